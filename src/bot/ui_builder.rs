//! Keyboards and message formatting for the user-facing flow.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::config::LinkButton;
use crate::ticket_store::{Ticket, TicketResponse, TicketStatus};
use crate::warranty::{self, WarrantyRecord, DATE_FORMAT};

pub fn main_menu_keyboard(
    website_url: Option<&reqwest::Url>,
    join_group: bool,
) -> InlineKeyboardMarkup {
    let mut rows = vec![vec![InlineKeyboardButton::callback(
        "📖 Instructions",
        "instructions",
    )]];
    if join_group {
        rows.push(vec![InlineKeyboardButton::callback(
            "🎮 Join our community",
            "join_group",
        )]);
    }
    rows.push(vec![InlineKeyboardButton::callback("⭐️ Leave a review", "reviews")]);
    rows.push(vec![InlineKeyboardButton::callback("🛠 Support", "support")]);
    rows.push(vec![InlineKeyboardButton::callback("🔒 Warranty", "warranty")]);
    if let Some(url) = website_url {
        rows.push(vec![InlineKeyboardButton::url("🌐 Our website", url.clone())]);
    }
    InlineKeyboardMarkup::new(rows)
}

/// URL-button menu over a configured link list, with a back button.
pub fn link_menu_keyboard(links: &[LinkButton]) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = links
        .iter()
        .map(|link| vec![InlineKeyboardButton::url(link.title.clone(), link.url.clone())])
        .collect();
    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 Back to menu",
        "back_to_main",
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn licence_next_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✅ Next",
        "next_licence",
    )]])
}

pub fn licence_accept_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "✅ Accept and continue",
        "licence_accepted",
    )]])
}

pub fn support_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("📝 Open a new ticket", "create_ticket")],
        vec![InlineKeyboardButton::callback("📋 My tickets", "my_tickets")],
        vec![InlineKeyboardButton::callback("🔙 Back to menu", "back_to_main")],
    ])
}

pub fn warranty_keyboard(conditions_url: Option<&reqwest::Url>) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![InlineKeyboardButton::callback("📝 Submit a review", "submit_review")],
        vec![InlineKeyboardButton::callback("✅ Check warranty status", "check_warranty")],
    ];
    if let Some(url) = conditions_url {
        rows.push(vec![InlineKeyboardButton::url("📄 Warranty terms", url.clone())]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "🔙 Back to menu",
        "back_to_main",
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn back_to_main_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🔙 Back to menu",
        "back_to_main",
    )]])
}

/// One row of 1-5 rating buttons. The ticket row id rides in the
/// callback data so a late click still rates the right ticket.
pub fn rating_keyboard(ticket_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![(1..=5)
        .map(|n| InlineKeyboardButton::callback(n.to_string(), format!("rate_{ticket_id}_{n}")))
        .collect::<Vec<_>>()])
}

fn fmt_opt_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Record dump for the staff `/data` command.
pub fn format_record(record: &WarrantyRecord) -> String {
    format!(
        "Console: {}\nSell date: {}\nOwner: {}\nWarranty code: {}\nApproval date: {}",
        record.console_id,
        fmt_opt_date(record.sell_date),
        record
            .owner_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        record.warranty_code.as_deref().unwrap_or("-"),
        fmt_opt_date(record.approval_date),
    )
}

pub fn format_ticket_status(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Pending => "⏳ Waiting for a reply",
        TicketStatus::Answered => "✅ Answered",
        TicketStatus::Closed => "📁 Closed",
    }
}

/// Ticket notification sent into the support topic for staff.
pub fn format_ticket_for_staff(ticket: &Ticket) -> String {
    format!(
        "🎫 Ticket #{} from user {}\n\n{}\n\n📞 Phone: {}\n\nReply with /reply {} {} <text>",
        ticket.number,
        ticket.user_id,
        ticket.description,
        ticket.phone.as_deref().unwrap_or("-"),
        ticket.user_id,
        ticket.number,
    )
}

/// The user's ticket list with any staff responses inlined.
pub fn format_ticket_list(tickets: &[(Ticket, Vec<TicketResponse>)]) -> String {
    if tickets.is_empty() {
        return "You have no tickets yet.".to_string();
    }
    let mut out = String::new();
    for (ticket, responses) in tickets {
        out.push_str(&format!(
            "🎫 Ticket #{}\n📊 Status: {}\n📅 Opened: {}\n{}\n",
            ticket.number,
            format_ticket_status(ticket.status),
            ticket.created_at,
            ticket.description,
        ));
        for response in responses {
            out.push_str(&format!("↪️ Support: {}\n", response.text));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

/// Status line for the warranty self-service check.
pub fn format_remaining(record: &WarrantyRecord, duration: i64, compensation: i64, today: chrono::NaiveDate) -> String {
    match warranty::remaining_warranty_days(record, duration, compensation, today) {
        Some(days) if days > 0 => {
            format!("✅ Your warranty is confirmed and active. Days left: {days}.")
        }
        Some(_) => "➖ Your warranty has expired.".to_string(),
        None => "➖ Your warranty is not confirmed yet.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_format_record_shows_dashes_for_missing_fields() {
        let record = WarrantyRecord::new("AB1");
        let text = format_record(&record);
        assert!(text.contains("Console: AB1"));
        assert!(text.contains("Sell date: -"));
        assert!(text.contains("Warranty code: -"));
    }

    #[test]
    fn test_format_record_full() {
        let record = WarrantyRecord {
            console_id: "AB1".to_string(),
            sell_date: Some(date("01-01-2025")),
            owner_id: Some(42),
            warranty_code: Some("QWERTYUI".to_string()),
            approval_date: Some(date("02-01-2025")),
        };
        let text = format_record(&record);
        assert!(text.contains("01-01-2025"));
        assert!(text.contains("42"));
        assert!(text.contains("QWERTYUI"));
    }

    #[test]
    fn test_main_menu_join_button_follows_configuration() {
        let with_group = main_menu_keyboard(None, true);
        let without_group = main_menu_keyboard(None, false);
        assert_eq!(
            with_group.inline_keyboard.len(),
            without_group.inline_keyboard.len() + 1
        );
        assert!(with_group
            .inline_keyboard
            .iter()
            .any(|row| row[0].text.contains("community")));
        assert!(!without_group
            .inline_keyboard
            .iter()
            .any(|row| row[0].text.contains("community")));
    }

    #[test]
    fn test_link_menu_keeps_back_button_last() {
        let links = vec![LinkButton {
            title: "Setup guide".to_string(),
            url: reqwest::Url::parse("https://example.com/setup").unwrap(),
        }];
        let kb = link_menu_keyboard(&links);
        assert_eq!(kb.inline_keyboard.len(), 2);
        assert_eq!(kb.inline_keyboard[0][0].text, "Setup guide");
        assert_eq!(kb.inline_keyboard[1][0].text, "🔙 Back to menu");

        let empty = link_menu_keyboard(&[]);
        assert_eq!(empty.inline_keyboard.len(), 1);
    }

    #[test]
    fn test_rating_keyboard_embeds_ticket_id() {
        let kb = rating_keyboard(17);
        assert_eq!(kb.inline_keyboard.len(), 1);
        assert_eq!(kb.inline_keyboard[0].len(), 5);
        let first = &kb.inline_keyboard[0][0];
        assert_eq!(first.text, "1");
        match &first.kind {
            teloxide::types::InlineKeyboardButtonKind::CallbackData(data) => {
                assert_eq!(data, "rate_17_1");
            }
            other => panic!("unexpected button kind: {other:?}"),
        }
    }

    #[test]
    fn test_format_remaining_states() {
        let mut record = WarrantyRecord::new("AB1");
        assert!(format_remaining(&record, 540, 8, date("01-01-2025")).contains("not confirmed"));

        record.approval_date = Some(date("01-01-2025"));
        assert!(format_remaining(&record, 540, 8, date("02-01-2025")).contains("Days left"));
        assert!(format_remaining(&record, 540, 8, date("01-01-2027")).contains("expired"));
    }

    #[test]
    fn test_ticket_list_empty_and_with_responses() {
        assert!(format_ticket_list(&[]).contains("no tickets"));

        let ticket = Ticket {
            id: 1,
            user_id: 42,
            number: 1,
            description: "screen flickers".to_string(),
            attachment: None,
            phone: None,
            status: TicketStatus::Answered,
            created_at: "2025-01-01 10:00:00".to_string(),
        };
        let response = TicketResponse {
            id: 1,
            ticket_id: 1,
            staff_id: 7,
            text: "try the new firmware".to_string(),
            attachment: None,
            rating: None,
            created_at: "2025-01-01 11:00:00".to_string(),
        };
        let text = format_ticket_list(&[(ticket, vec![response])]);
        assert!(text.contains("Ticket #1"));
        assert!(text.contains("✅ Answered"));
        assert!(text.contains("try the new firmware"));
    }
}
