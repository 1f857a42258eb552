//! Parser for staff chat commands.
//!
//! Staff type commands into the operations group; a bare console code
//! (no slash) registers that console. Parsing never touches the
//! database, so a malformed command yields a corrective message and no
//! mutation.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::warranty::DATE_FORMAT;

static CONSOLE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9-]{3,32}$").unwrap());

/// Whether `token` is shaped like a console id.
pub fn is_console_code(token: &str) -> bool {
    CONSOLE_CODE_RE.is_match(token)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaffCommand {
    /// A bare console code registers that console.
    Register { console_id: String },
    Remove { console_id: String },
    Sell { console_id: String, date: Option<NaiveDate> },
    Unsell { console_id: String },
    Bind { console_id: String, user_id: i64 },
    Unbind { console_id: String },
    Approve { console_id: String, date: Option<NaiveDate> },
    Unapprove { console_id: String },
    Data { console_id: String },
    /// Approve and notify the console owner.
    ApproveWarranty { console_id: String },
    Reply { user_id: i64, ticket_number: i64, text: String },
    DirectReply { user_id: i64, text: String },
    Newsletter { text: String },
    Help,
    Id,
}

/// Command rejected before reaching the dispatcher. `Display` is the
/// corrective message sent back to the staff chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    UnknownCommand(String),
    BadConsoleCode(String),
    BadDate(String),
    BadUserId(String),
    BadTicketNumber(String),
    MissingArgument(&'static str),
    ExtraArguments,
    NotACommand,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnknownCommand(cmd) => {
                write!(f, "Unknown command {cmd}. Send /help for the command list.")
            }
            ParseError::BadConsoleCode(token) => {
                write!(f, "{token} does not look like a console code.")
            }
            ParseError::BadDate(token) => {
                write!(f, "{token} is not a valid date. Use DD-MM-YYYY.")
            }
            ParseError::BadUserId(token) => {
                write!(f, "{token} is not a valid Telegram user id.")
            }
            ParseError::BadTicketNumber(token) => {
                write!(f, "{token} is not a valid ticket number.")
            }
            ParseError::MissingArgument(what) => {
                write!(f, "Missing argument: {what}.")
            }
            ParseError::ExtraArguments => write!(f, "Too many arguments."),
            ParseError::NotACommand => write!(f, "Not a command."),
        }
    }
}

impl std::error::Error for ParseError {}

fn console_arg(token: Option<&str>) -> Result<String, ParseError> {
    let token = token.ok_or(ParseError::MissingArgument("console code"))?;
    if !is_console_code(token) {
        return Err(ParseError::BadConsoleCode(token.to_string()));
    }
    Ok(token.to_string())
}

fn date_arg(token: Option<&str>) -> Result<Option<NaiveDate>, ParseError> {
    match token {
        Some(token) => NaiveDate::parse_from_str(token, DATE_FORMAT)
            .map(Some)
            .map_err(|_| ParseError::BadDate(token.to_string())),
        None => Ok(None),
    }
}

fn user_id_arg(token: Option<&str>) -> Result<i64, ParseError> {
    let token = token.ok_or(ParseError::MissingArgument("user id"))?;
    token
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ParseError::BadUserId(token.to_string()))
}

/// Token cursor over the command text. Unlike `split_whitespace` it can
/// hand back the untokenized tail, which `/reply` and `/direct_reply`
/// need for their free-text argument.
struct Args<'a> {
    rest: &'a str,
}

impl<'a> Args<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .find(char::is_whitespace)
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(token)
    }

    fn tail(&self) -> &'a str {
        self.rest.trim()
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.next_token() {
            Some(_) => Err(ParseError::ExtraArguments),
            None => Ok(()),
        }
    }
}

/// Parse one staff message into a command. The command word is
/// case-insensitive; free-text tails (`/reply`, `/newsletter`) keep
/// their original spacing.
pub fn parse(text: &str) -> Result<StaffCommand, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::NotACommand);
    }

    if !text.starts_with('/') {
        // Bare token registration path.
        let mut args = Args::new(text);
        let token = args.next_token().unwrap_or_default();
        if args.next_token().is_some() || !is_console_code(token) {
            return Err(ParseError::NotACommand);
        }
        return Ok(StaffCommand::Register {
            console_id: token.to_string(),
        });
    }

    let mut args = Args::new(text);
    let command = args.next_token().unwrap_or_default().to_ascii_lowercase();

    match command.as_str() {
        "/help" => {
            args.finish()?;
            Ok(StaffCommand::Help)
        }
        "/id" => {
            args.finish()?;
            Ok(StaffCommand::Id)
        }
        "/remove" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Remove { console_id })
        }
        "/sell" => {
            let console_id = console_arg(args.next_token())?;
            let date = date_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Sell { console_id, date })
        }
        "/unsell" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Unsell { console_id })
        }
        "/bind" => {
            let console_id = console_arg(args.next_token())?;
            let user_id = user_id_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Bind { console_id, user_id })
        }
        "/unbind" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Unbind { console_id })
        }
        "/approve" => {
            let console_id = console_arg(args.next_token())?;
            let date = date_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Approve { console_id, date })
        }
        "/unapprove" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Unapprove { console_id })
        }
        "/data" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::Data { console_id })
        }
        "/approve_warranty" => {
            let console_id = console_arg(args.next_token())?;
            args.finish()?;
            Ok(StaffCommand::ApproveWarranty { console_id })
        }
        "/reply" => {
            let user_id = user_id_arg(args.next_token())?;
            let number_token = args
                .next_token()
                .ok_or(ParseError::MissingArgument("ticket number"))?;
            let ticket_number = number_token
                .parse::<i64>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ParseError::BadTicketNumber(number_token.to_string()))?;
            let reply_text = args.tail();
            if reply_text.is_empty() {
                return Err(ParseError::MissingArgument("reply text"));
            }
            Ok(StaffCommand::Reply {
                user_id,
                ticket_number,
                text: reply_text.to_string(),
            })
        }
        "/direct_reply" => {
            let user_id = user_id_arg(args.next_token())?;
            let reply_text = args.tail();
            if reply_text.is_empty() {
                return Err(ParseError::MissingArgument("message text"));
            }
            Ok(StaffCommand::DirectReply {
                user_id,
                text: reply_text.to_string(),
            })
        }
        "/newsletter" => {
            let body = args.tail();
            if body.is_empty() {
                return Err(ParseError::MissingArgument("newsletter text"));
            }
            Ok(StaffCommand::Newsletter {
                text: body.to_string(),
            })
        }
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_bare_code_registers() {
        assert_eq!(
            parse("ABC-123"),
            Ok(StaffCommand::Register {
                console_id: "ABC-123".to_string()
            })
        );
        // Plain chat messages are not commands.
        assert_eq!(parse("hello there"), Err(ParseError::NotACommand));
        assert_eq!(parse("a!"), Err(ParseError::NotACommand));
    }

    #[test]
    fn test_command_word_case_insensitive() {
        assert_eq!(
            parse("/SELL abc123"),
            Ok(StaffCommand::Sell {
                console_id: "abc123".to_string(),
                date: None
            })
        );
    }

    #[test]
    fn test_sell_with_explicit_date() {
        assert_eq!(
            parse("/sell ABC123 05-03-2025"),
            Ok(StaffCommand::Sell {
                console_id: "ABC123".to_string(),
                date: Some(date("05-03-2025"))
            })
        );
        assert_eq!(
            parse("/sell ABC123 2025-03-05"),
            Err(ParseError::BadDate("2025-03-05".to_string()))
        );
    }

    #[test]
    fn test_bind_requires_numeric_user_id() {
        assert_eq!(
            parse("/bind ABC123 42"),
            Ok(StaffCommand::Bind {
                console_id: "ABC123".to_string(),
                user_id: 42
            })
        );
        assert_eq!(
            parse("/bind ABC123 bob"),
            Err(ParseError::BadUserId("bob".to_string()))
        );
        assert_eq!(parse("/bind ABC123"), Err(ParseError::MissingArgument("user id")));
    }

    #[test]
    fn test_reply_keeps_free_text_tail() {
        assert_eq!(
            parse("/reply 42 3 Please update the firmware and retry."),
            Ok(StaffCommand::Reply {
                user_id: 42,
                ticket_number: 3,
                text: "Please update the firmware and retry.".to_string()
            })
        );
        assert_eq!(
            parse("/reply 42 0 text"),
            Err(ParseError::BadTicketNumber("0".to_string()))
        );
        assert_eq!(parse("/reply 42 3"), Err(ParseError::MissingArgument("reply text")));
    }

    #[test]
    fn test_direct_reply_and_newsletter() {
        assert_eq!(
            parse("/direct_reply 42 Your console has shipped."),
            Ok(StaffCommand::DirectReply {
                user_id: 42,
                text: "Your console has shipped.".to_string()
            })
        );
        assert_eq!(
            parse("/newsletter New firmware is out!"),
            Ok(StaffCommand::Newsletter {
                text: "New firmware is out!".to_string()
            })
        );
        assert_eq!(
            parse("/newsletter"),
            Err(ParseError::MissingArgument("newsletter text"))
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert!(matches!(parse("/frobnicate"), Err(ParseError::UnknownCommand(_))));
        assert_eq!(
            parse("/remove !!"),
            Err(ParseError::BadConsoleCode("!!".to_string()))
        );
        assert_eq!(parse("/unsell ABC123 extra"), Err(ParseError::ExtraArguments));
    }
}
