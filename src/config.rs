//! Runtime configuration, read once from the environment at startup.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use teloxide::types::{ChatId, MessageId, ThreadId};

/// A titled external link rendered as one URL keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkButton {
    pub title: String,
    pub url: reqwest::Url,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Extended warranty length in days, counted from approval.
    pub warranty_duration_days: i64,
    /// Extra days granted to cover service-center shipping.
    pub warranty_compensation_days: i64,
    /// Days after the sale during which self-service binding is open.
    pub warranty_bind_period_days: i64,
    /// The staff operations group.
    pub support_group: ChatId,
    /// Topic for support commands and forwarded tickets.
    pub support_thread: ThreadId,
    /// Topic for console-code lifecycle commands.
    pub codes_thread: ThreadId,
    pub website_url: Option<reqwest::Url>,
    pub warranty_conditions_url: Option<reqwest::Url>,
    /// The public community group users can join from the main menu.
    pub user_group: Option<ChatId>,
    /// Public link to that group, shown alongside join confirmations.
    pub user_group_link: Option<reqwest::Url>,
    /// Instruction links for the instructions menu.
    pub instructions: Vec<LinkButton>,
    /// Platforms where users are asked to leave their review.
    pub review_platforms: Vec<LinkButton>,
    /// Directory of advert photos and videos.
    pub ad_media_dir: PathBuf,
    /// Directory of licence agreement page images.
    pub licence_media_dir: PathBuf,
    pub media_refresh_interval: Duration,
}

fn required(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("{name} must be set"))
}

fn required_i64(name: &str) -> Result<i64> {
    required(name)?
        .parse()
        .with_context(|| format!("{name} must be an integer"))
}

fn optional_url(name: &str) -> Result<Option<reqwest::Url>> {
    match env::var(name) {
        Ok(raw) => reqwest::Url::parse(&raw)
            .map(Some)
            .with_context(|| format!("{name} is not a valid URL")),
        Err(_) => Ok(None),
    }
}

fn optional_chat_id(name: &str) -> Result<Option<ChatId>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(|id| Some(ChatId(id)))
            .with_context(|| format!("{name} must be a chat id")),
        Err(_) => Ok(None),
    }
}

/// Parse a JSON file of `[title, url]` pairs into link buttons.
pub fn load_link_list(path: &Path) -> Result<Vec<LinkButton>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read link list {}", path.display()))?;
    let entries: Vec<(String, String)> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed link list {}", path.display()))?;
    entries
        .into_iter()
        .map(|(title, url)| {
            let url = reqwest::Url::parse(&url)
                .with_context(|| format!("Bad URL for link '{title}'"))?;
            Ok(LinkButton { title, url })
        })
        .collect()
}

fn link_list(name: &str) -> Result<Vec<LinkButton>> {
    match env::var(name) {
        Ok(path) => load_link_list(Path::new(&path)),
        Err(_) => Ok(Vec::new()),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            warranty_duration_days: required_i64("WARRANTY_DURATION")?,
            warranty_compensation_days: required_i64("WARRANTY_COMPENSATION")?,
            warranty_bind_period_days: required_i64("WARRANTY_BIND_PERIOD")?,
            support_group: ChatId(required_i64("SUPPORT_GROUP_ID")?),
            support_thread: ThreadId(MessageId(
                required_i64("SUPPORT_THREAD_ID")?
                    .try_into()
                    .context("SUPPORT_THREAD_ID out of range")?,
            )),
            codes_thread: ThreadId(MessageId(
                required_i64("CODES_THREAD_ID")?
                    .try_into()
                    .context("CODES_THREAD_ID out of range")?,
            )),
            website_url: optional_url("WEBSITE_URL")?,
            warranty_conditions_url: optional_url("WARRANTY_CONDITIONS_URL")?,
            user_group: optional_chat_id("USER_GROUP_ID")?,
            user_group_link: optional_url("USER_GROUP_LINK")?,
            instructions: link_list("INSTRUCTIONS_PATH")?,
            review_platforms: link_list("REVIEWS_PATH")?,
            ad_media_dir: required("MEDIA_AD_PATH")?.into(),
            licence_media_dir: required("MEDIA_LIC_PATH")?.into(),
            media_refresh_interval: Duration::from_secs(required_i64("MEDIA_UPDATE_FREQ")?.max(1) as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_link_list() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"[["Setup guide", "https://example.com/setup"], ["FAQ", "https://example.com/faq"]]"#
        )?;

        let links = load_link_list(file.path())?;
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "Setup guide");
        assert_eq!(links[1].url.as_str(), "https://example.com/faq");
        Ok(())
    }

    #[test]
    fn test_load_link_list_rejects_bad_url() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"[["Broken", "not a url"]]"#)?;

        let err = load_link_list(file.path()).unwrap_err();
        assert!(err.to_string().contains("Broken"));
        Ok(())
    }

    #[test]
    fn test_load_link_list_missing_file() {
        assert!(load_link_list(Path::new("/nonexistent/links.json")).is_err());
    }
}
