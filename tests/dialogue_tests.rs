use anyhow::Result;

use consolecare::commands::{self, ParseError, StaffCommand};
use consolecare::dialogue::{validate_phone, ChatState};

/// Dialogue states must survive the serde round trip used by the
/// storage backend.
#[tokio::test]
async fn test_dialogue_state_serialization() -> Result<()> {
    let state = ChatState::WaitingForPhotoCheck {
        console_id: "GH-001".to_string(),
        warranty_code: "QWERTYUI".to_string(),
    };

    let json = serde_json::to_string(&state)?;
    let back: ChatState = serde_json::from_str(&json)?;
    assert_eq!(state, back);

    match back {
        ChatState::WaitingForPhotoCheck { console_id, warranty_code } => {
            assert_eq!(console_id, "GH-001");
            assert_eq!(warranty_code, "QWERTYUI");
        }
        _ => panic!("Unexpected dialogue state"),
    }

    Ok(())
}

#[test]
fn test_default_state_is_start() {
    assert!(matches!(ChatState::default(), ChatState::Start));
}

#[test]
fn test_phone_validation() {
    assert_eq!(validate_phone("+7 (900) 123-45-67").unwrap(), "79001234567");
    assert_eq!(validate_phone("8 900 123 45 67").unwrap(), "89001234567");

    assert!(validate_phone("12345").is_err());
    assert!(validate_phone("hello").is_err());
}

/// Malformed staff commands are rejected before touching anything.
#[test]
fn test_staff_command_parsing_surface() {
    assert_eq!(
        commands::parse("GH-001"),
        Ok(StaffCommand::Register {
            console_id: "GH-001".to_string()
        })
    );
    assert_eq!(
        commands::parse("/bind GH-001 4242"),
        Ok(StaffCommand::Bind {
            console_id: "GH-001".to_string(),
            user_id: 4242
        })
    );
    assert!(matches!(
        commands::parse("/sell GH-001 31-02-2025"),
        Err(ParseError::BadDate(_))
    ));
    assert_eq!(commands::parse("just chatting"), Err(ParseError::NotACommand));
    assert!(matches!(
        commands::parse("/reply fortytwo 1 hello"),
        Err(ParseError::BadUserId(_))
    ));
}

#[test]
fn test_newsletter_keeps_whole_tail() {
    assert_eq!(
        commands::parse("/newsletter Big sale:  consoles -20% this week!"),
        Ok(StaffCommand::Newsletter {
            text: "Big sale:  consoles -20% this week!".to_string()
        })
    );
}
