//! Conversation state for the user-facing flow.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

/// Per-chat conversation state. `/start` resets any state back to the
/// licence-acceptance entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatState {
    #[default]
    Start,
    WaitingForLicenceAccept {
        page: u32,
    },
    WaitingForAction,
    WaitingForTicketDescription,
    WaitingForPhone {
        ticket_id: i64,
    },
    WaitingForWarrantyCheck,
    WaitingForReviewCheck,
    WaitingForPhotoCheck {
        console_id: String,
        warranty_code: String,
    },
}

pub type ChatDialogue = Dialogue<ChatState, InMemStorage<ChatState>>;

/// Normalize a phone number: strip everything but digits and accept 10
/// or 11 digit results.
pub fn validate_phone(raw: &str) -> Result<String, &'static str> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 || digits.len() == 11 {
        Ok(digits)
    } else {
        Err("invalid_length")
    }
}
