//! In-memory cache of licence agreement pages and advert media.
//!
//! Staff drop files into the configured directories; a background task
//! reloads the cache on a fixed interval so new media shows up without
//! a restart. Licence pages are ordered by the trailing number in the
//! file name (`licence_1.png`, `licence_2.png`, ...).

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// How an advert file is sent to Telegram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdKind {
    Photo,
    Video,
    /// Animated gifs go out as documents to keep the animation.
    Document,
}

#[derive(Debug, Clone)]
pub struct AdMedia {
    pub data: Arc<Vec<u8>>,
    pub kind: AdKind,
}

#[derive(Default)]
struct MediaInner {
    licence_pages: BTreeMap<u32, Arc<Vec<u8>>>,
    adverts: Vec<AdMedia>,
}

pub struct MediaCache {
    ad_dir: std::path::PathBuf,
    licence_dir: std::path::PathBuf,
    inner: RwLock<MediaInner>,
}

fn ad_kind(path: &Path) -> Option<AdKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" => Some(AdKind::Photo),
        "mp4" | "avi" | "mov" | "mkv" => Some(AdKind::Video),
        "gif" => Some(AdKind::Document),
        _ => None,
    }
}

/// The page number is the trailing digit run of the file stem.
fn page_number(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

fn load_dir(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create media directory {}", dir.display()))?;
        info!("Created media directory {}", dir.display());
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read media directory {}", dir.display()))?
    {
        paths.push(entry?.path());
    }
    Ok(paths)
}

fn load(ad_dir: &Path, licence_dir: &Path) -> Result<MediaInner> {
    let mut inner = MediaInner::default();

    for path in load_dir(ad_dir)? {
        let Some(kind) = ad_kind(&path) else {
            warn!("Skipping advert file with unsupported extension: {}", path.display());
            continue;
        };
        match std::fs::read(&path) {
            Ok(data) => inner.adverts.push(AdMedia {
                data: Arc::new(data),
                kind,
            }),
            Err(e) => error!("Failed to read advert file {}: {e}", path.display()),
        }
    }

    for path in load_dir(licence_dir)? {
        if !matches!(ad_kind(&path), Some(AdKind::Photo)) {
            continue;
        }
        let Some(number) = page_number(&path) else {
            warn!("Licence file without a page number: {}", path.display());
            continue;
        };
        match std::fs::read(&path) {
            Ok(data) => {
                inner.licence_pages.insert(number, Arc::new(data));
            }
            Err(e) => error!("Failed to read licence file {}: {e}", path.display()),
        }
    }

    info!(
        "Loaded {} advert files and {} licence pages",
        inner.adverts.len(),
        inner.licence_pages.len()
    );
    Ok(inner)
}

impl MediaCache {
    pub fn load_from(ad_dir: impl Into<std::path::PathBuf>, licence_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        let ad_dir = ad_dir.into();
        let licence_dir = licence_dir.into();
        let inner = load(&ad_dir, &licence_dir)?;
        Ok(Self {
            ad_dir,
            licence_dir,
            inner: RwLock::new(inner),
        })
    }

    pub async fn reload(&self) -> Result<()> {
        let fresh = load(&self.ad_dir, &self.licence_dir)?;
        *self.inner.write().await = fresh;
        Ok(())
    }

    /// Licence page `n` (1-based) and the total page count.
    pub async fn licence_page(&self, n: u32) -> Option<(Arc<Vec<u8>>, usize)> {
        let inner = self.inner.read().await;
        let total = inner.licence_pages.len();
        inner.licence_pages.get(&n).map(|data| (Arc::clone(data), total))
    }

    pub async fn random_ad(&self) -> Option<AdMedia> {
        let inner = self.inner.read().await;
        inner.adverts.choose(&mut rand::thread_rng()).cloned()
    }
}

/// Reload the cache every `interval`. Failures are logged and retried
/// on the next tick. The handle is aborted on shutdown.
pub fn spawn_refresh(cache: Arc<MediaCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; the cache was just loaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = cache.reload().await {
                error!("Media cache refresh failed: {e:#}");
            }
        }
    })
}
