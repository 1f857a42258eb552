//! Support tickets, staff responses and the newsletter audience.
//!
//! Ticket numbers are per-user and user-facing; the `id` column is the
//! internal row id used in callback data and foreign keys. Opening a
//! new ticket closes every earlier ticket of the same user that was
//! never answered.

use anyhow::{Context, Result};
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use teloxide::types::FileId;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Media attached to a ticket or a staff response. The Telegram file id
/// is only valid for the bot that received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Photo(FileId),
    Video(FileId),
    Document(FileId),
}

impl Attachment {
    fn columns(attachment: Option<&Attachment>) -> (Option<&str>, Option<&str>, Option<&str>) {
        match attachment {
            Some(Attachment::Photo(id)) => (Some(id.0.as_str()), None, None),
            Some(Attachment::Video(id)) => (None, Some(id.0.as_str()), None),
            Some(Attachment::Document(id)) => (None, None, Some(id.0.as_str())),
            None => (None, None, None),
        }
    }

    fn from_columns(
        photo: Option<String>,
        video: Option<String>,
        document: Option<String>,
    ) -> Option<Attachment> {
        photo
            .map(|id| Attachment::Photo(FileId(id)))
            .or(video.map(|id| Attachment::Video(FileId(id))))
            .or(document.map(|id| Attachment::Document(FileId(id))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketStatus {
    Pending,
    Answered,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Answered => "answered",
            TicketStatus::Closed => "closed",
        }
    }

    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(TicketStatus::Pending),
            "answered" => Ok(TicketStatus::Answered),
            "closed" => Ok(TicketStatus::Closed),
            other => anyhow::bail!("Unknown ticket status: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: i64,
    pub user_id: i64,
    pub number: i64,
    pub description: String,
    pub attachment: Option<Attachment>,
    pub phone: Option<String>,
    pub status: TicketStatus,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketResponse {
    pub id: i64,
    pub ticket_id: i64,
    pub staff_id: i64,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub rating: Option<i64>,
    pub created_at: String,
}

/// Initialize the ticket, response and newsletter tables.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS tickets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            number INTEGER NOT NULL,
            description TEXT NOT NULL,
            photo_id TEXT,
            video_id TEXT,
            document_id TEXT,
            phone TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            UNIQUE(user_id, number)
        )",
        [],
    )
    .context("Failed to create tickets table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ticket_responses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticket_id INTEGER NOT NULL REFERENCES tickets(id),
            staff_id INTEGER NOT NULL,
            response_text TEXT NOT NULL,
            photo_id TEXT,
            video_id TEXT,
            document_id TEXT,
            rating INTEGER,
            created_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create ticket_responses table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            joined_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create users table")?;

    Ok(())
}

fn now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Open a new ticket. Every earlier ticket of the user that was never
/// answered is closed, and the new ticket gets the next per-user number.
pub fn create_ticket(
    conn: &Connection,
    user_id: i64,
    description: &str,
    attachment: Option<Attachment>,
) -> Result<Ticket> {
    conn.execute(
        "UPDATE tickets SET status = 'closed'
         WHERE user_id = ?1 AND status != 'answered'",
        params![user_id],
    )
    .context("Failed to close superseded tickets")?;

    let number: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM tickets WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, i64>(0),
        )
        .context("Failed to count existing tickets")?
        + 1;

    let (photo, video, document) = Attachment::columns(attachment.as_ref());
    let created_at = now();
    conn.execute(
        "INSERT INTO tickets (user_id, number, description, photo_id, video_id, document_id, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
        params![user_id, number, description, photo, video, document, created_at],
    )
    .context("Failed to create ticket")?;

    let id = conn.last_insert_rowid();
    info!("Created ticket #{number} (row {id}) for user {user_id}");
    Ok(Ticket {
        id,
        user_id,
        number,
        description: description.to_string(),
        attachment,
        phone: None,
        status: TicketStatus::Pending,
        created_at,
    })
}

pub fn set_phone(conn: &Connection, ticket_id: i64, phone: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE tickets SET phone = ?1 WHERE id = ?2",
            params![phone, ticket_id],
        )
        .context("Failed to store ticket phone")?;
    Ok(rows > 0)
}

pub fn set_status(conn: &Connection, ticket_id: i64, status: TicketStatus) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE tickets SET status = ?1 WHERE id = ?2",
            params![status.as_str(), ticket_id],
        )
        .context("Failed to update ticket status")?;
    Ok(rows > 0)
}

fn ticket_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Ticket, String)> {
    Ok((
        Ticket {
            id: row.get(0)?,
            user_id: row.get(1)?,
            number: row.get(2)?,
            description: row.get(3)?,
            attachment: Attachment::from_columns(row.get(4)?, row.get(5)?, row.get(6)?),
            phone: row.get(7)?,
            status: TicketStatus::Pending,
            created_at: row.get(9)?,
        },
        row.get::<_, String>(8)?,
    ))
}

fn finish_ticket(pair: (Ticket, String)) -> Result<Ticket> {
    let (mut ticket, status) = pair;
    ticket.status = TicketStatus::parse(&status)?;
    Ok(ticket)
}

const TICKET_COLUMNS: &str =
    "id, user_id, number, description, photo_id, video_id, document_id, phone, status, created_at";

/// The most recently opened ticket of a user.
pub fn latest_ticket(conn: &Connection, user_id: i64) -> Result<Option<Ticket>> {
    let row = conn
        .query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = ?1 ORDER BY id DESC LIMIT 1"),
            params![user_id],
            ticket_from_row,
        )
        .optional()
        .context("Failed to read latest ticket")?;
    row.map(finish_ticket).transpose()
}

/// Look a ticket up by its row id.
pub fn ticket_by_id(conn: &Connection, ticket_id: i64) -> Result<Option<Ticket>> {
    let row = conn
        .query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = ?1"),
            params![ticket_id],
            ticket_from_row,
        )
        .optional()
        .context("Failed to look up ticket by id")?;
    row.map(finish_ticket).transpose()
}

/// Look a ticket up by its per-user number.
pub fn find_ticket(conn: &Connection, user_id: i64, number: i64) -> Result<Option<Ticket>> {
    let row = conn
        .query_row(
            &format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = ?1 AND number = ?2"),
            params![user_id, number],
            ticket_from_row,
        )
        .optional()
        .context("Failed to look up ticket by number")?;
    row.map(finish_ticket).transpose()
}

/// All tickets of a user, newest first.
pub fn tickets_for_user(conn: &Connection, user_id: i64) -> Result<Vec<Ticket>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE user_id = ?1 ORDER BY id DESC"
        ))
        .context("Failed to prepare ticket listing")?;
    let rows = stmt
        .query_map(params![user_id], ticket_from_row)
        .context("Failed to list tickets")?;
    rows.map(|pair| finish_ticket(pair?)).collect()
}

/// Record a staff response to a ticket.
pub fn add_response(
    conn: &Connection,
    ticket_id: i64,
    staff_id: i64,
    text: &str,
    attachment: Option<&Attachment>,
) -> Result<i64> {
    let (photo, video, document) = Attachment::columns(attachment);
    conn.execute(
        "INSERT INTO ticket_responses (ticket_id, staff_id, response_text, photo_id, video_id, document_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![ticket_id, staff_id, text, photo, video, document, now()],
    )
    .context("Failed to store ticket response")?;
    Ok(conn.last_insert_rowid())
}

/// Responses to a ticket, oldest first.
pub fn responses_for_ticket(conn: &Connection, ticket_id: i64) -> Result<Vec<TicketResponse>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, ticket_id, staff_id, response_text, photo_id, video_id, document_id, rating, created_at
             FROM ticket_responses WHERE ticket_id = ?1 ORDER BY id ASC",
        )
        .context("Failed to prepare response listing")?;
    let rows = stmt
        .query_map(params![ticket_id], |row| {
            Ok(TicketResponse {
                id: row.get(0)?,
                ticket_id: row.get(1)?,
                staff_id: row.get(2)?,
                text: row.get(3)?,
                attachment: Attachment::from_columns(row.get(4)?, row.get(5)?, row.get(6)?),
                rating: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .context("Failed to list ticket responses")?;
    rows.collect::<rusqlite::Result<_>>()
        .context("Failed to read ticket response rows")
}

/// Attach a 1-5 rating to the latest response of an answered ticket.
/// Returns `false` when the ticket is missing, not answered, or has no
/// response to rate.
pub fn rate_latest_response(conn: &Connection, ticket_id: i64, rating: i64) -> Result<bool> {
    if !(1..=5).contains(&rating) {
        return Ok(false);
    }

    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM tickets WHERE id = ?1",
            params![ticket_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read ticket status for rating")?;
    if status.as_deref() != Some("answered") {
        return Ok(false);
    }

    let rows = conn
        .execute(
            "UPDATE ticket_responses SET rating = ?1
             WHERE id = (SELECT MAX(id) FROM ticket_responses WHERE ticket_id = ?2)",
            params![rating, ticket_id],
        )
        .context("Failed to store response rating")?;
    Ok(rows > 0)
}

/// Register a user for the newsletter. Re-registration is a no-op.
pub fn add_user(
    conn: &Connection,
    user_id: i64,
    username: Option<&str>,
    first_name: &str,
    last_name: Option<&str>,
) -> Result<bool> {
    let rows = conn
        .execute(
            "INSERT OR IGNORE INTO users (user_id, username, first_name, last_name, joined_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, username, first_name, last_name, now()],
        )
        .context("Failed to register newsletter user")?;
    if rows > 0 {
        info!("Registered user {user_id} for the newsletter");
    }
    Ok(rows > 0)
}

/// All known user ids, for the newsletter broadcast.
pub fn all_user_ids(conn: &Connection) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare("SELECT user_id FROM users")
        .context("Failed to prepare user listing")?;
    let rows = stmt
        .query_map([], |row| row.get(0))
        .context("Failed to list users")?;
    rows.collect::<rusqlite::Result<_>>()
        .context("Failed to read user rows")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(conn)
    }

    #[test]
    fn test_create_ticket_numbers_and_closes_previous() -> Result<()> {
        let conn = setup()?;

        let first = create_ticket(&conn, 42, "screen flickers", None)?;
        assert_eq!(first.number, 1);
        assert_eq!(first.status, TicketStatus::Pending);

        // The first ticket was never answered, so the second closes it.
        let second = create_ticket(&conn, 42, "controller drift", None)?;
        assert_eq!(second.number, 2);

        let first_again = find_ticket(&conn, 42, 1)?.unwrap();
        assert_eq!(first_again.status, TicketStatus::Closed);
        assert_eq!(latest_ticket(&conn, 42)?.unwrap().id, second.id);

        Ok(())
    }

    #[test]
    fn test_answered_ticket_survives_new_ticket() -> Result<()> {
        let conn = setup()?;

        let first = create_ticket(&conn, 42, "screen flickers", None)?;
        set_status(&conn, first.id, TicketStatus::Answered)?;

        create_ticket(&conn, 42, "controller drift", None)?;
        assert_eq!(find_ticket(&conn, 42, 1)?.unwrap().status, TicketStatus::Answered);

        Ok(())
    }

    #[test]
    fn test_ticket_numbers_are_per_user() -> Result<()> {
        let conn = setup()?;

        create_ticket(&conn, 42, "a", None)?;
        let other = create_ticket(&conn, 99, "b", None)?;
        assert_eq!(other.number, 1);

        Ok(())
    }

    #[test]
    fn test_attachment_round_trip() -> Result<()> {
        let conn = setup()?;

        let attachment = Attachment::Photo(FileId("AgAC123".to_string()));
        let ticket = create_ticket(&conn, 42, "see photo", Some(attachment.clone()))?;
        let loaded = find_ticket(&conn, 42, ticket.number)?.unwrap();
        assert_eq!(loaded.attachment, Some(attachment));

        Ok(())
    }

    #[test]
    fn test_set_phone() -> Result<()> {
        let conn = setup()?;

        let ticket = create_ticket(&conn, 42, "broken", None)?;
        assert!(set_phone(&conn, ticket.id, "79001234567")?);
        assert_eq!(
            latest_ticket(&conn, 42)?.unwrap().phone.as_deref(),
            Some("79001234567")
        );

        Ok(())
    }

    #[test]
    fn test_rating_requires_answered_status() -> Result<()> {
        let conn = setup()?;

        let ticket = create_ticket(&conn, 42, "broken", None)?;
        add_response(&conn, ticket.id, 7, "try rebooting", None)?;

        // Not answered yet.
        assert!(!rate_latest_response(&conn, ticket.id, 5)?);

        set_status(&conn, ticket.id, TicketStatus::Answered)?;
        assert!(rate_latest_response(&conn, ticket.id, 5)?);

        let responses = responses_for_ticket(&conn, ticket.id)?;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].rating, Some(5));

        Ok(())
    }

    #[test]
    fn test_rating_targets_latest_response() -> Result<()> {
        let conn = setup()?;

        let ticket = create_ticket(&conn, 42, "broken", None)?;
        add_response(&conn, ticket.id, 7, "first answer", None)?;
        add_response(&conn, ticket.id, 7, "second answer", None)?;
        set_status(&conn, ticket.id, TicketStatus::Answered)?;

        assert!(rate_latest_response(&conn, ticket.id, 3)?);
        let responses = responses_for_ticket(&conn, ticket.id)?;
        assert_eq!(responses[0].rating, None);
        assert_eq!(responses[1].rating, Some(3));

        Ok(())
    }

    #[test]
    fn test_rating_out_of_range_rejected() -> Result<()> {
        let conn = setup()?;

        let ticket = create_ticket(&conn, 42, "broken", None)?;
        add_response(&conn, ticket.id, 7, "answer", None)?;
        set_status(&conn, ticket.id, TicketStatus::Answered)?;

        assert!(!rate_latest_response(&conn, ticket.id, 0)?);
        assert!(!rate_latest_response(&conn, ticket.id, 6)?);

        Ok(())
    }

    #[test]
    fn test_newsletter_users() -> Result<()> {
        let conn = setup()?;

        assert!(add_user(&conn, 42, Some("alice"), "Alice", None)?);
        assert!(!add_user(&conn, 42, Some("alice"), "Alice", None)?);
        assert!(add_user(&conn, 99, None, "Bob", Some("Smith"))?);

        let mut ids = all_user_ids(&conn)?;
        ids.sort_unstable();
        assert_eq!(ids, vec![42, 99]);

        Ok(())
    }
}
