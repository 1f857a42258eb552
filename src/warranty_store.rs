//! Record store for per-unit warranty data, keyed by console id.
//!
//! Mutations guard their lifecycle precondition in the SQL `WHERE`
//! clause, so e.g. a second `bind` without an intervening `unbind`
//! affects zero rows and reports `false` instead of overwriting the
//! owner. Errors are reserved for storage faults.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

use crate::warranty::{WarrantyRecord, DATE_FORMAT};

/// Length of generated warranty codes (uppercase A-Z).
pub const WARRANTY_CODE_LEN: usize = 8;

/// Initialize the warranty schema.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS consoles (
            console_id TEXT PRIMARY KEY,
            sell_date TEXT,
            owner_id INTEGER,
            warranty_code TEXT UNIQUE,
            approval_date TEXT
        )",
        [],
    )
    .context("Failed to create consoles table")?;
    Ok(())
}

fn fmt_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format(DATE_FORMAT).to_string())
}

fn parse_date(raw: Option<String>) -> Result<Option<NaiveDate>> {
    match raw {
        Some(s) => NaiveDate::parse_from_str(&s, DATE_FORMAT)
            .map(Some)
            .with_context(|| format!("Invalid stored date: {s}")),
        None => Ok(None),
    }
}

/// Register a console. Registering an already-known id is a no-op success.
pub fn add_console(conn: &Connection, console_id: &str, sell_date: Option<NaiveDate>) -> Result<bool> {
    let rows = conn
        .execute(
            "INSERT OR IGNORE INTO consoles (console_id, sell_date) VALUES (?1, ?2)",
            params![console_id, fmt_date(sell_date)],
        )
        .context("Failed to register console")?;
    if rows > 0 {
        info!("Registered console {console_id}");
    } else {
        info!("Console {console_id} already registered");
    }
    Ok(true)
}

/// Delete a console record entirely.
pub fn remove_console(conn: &Connection, console_id: &str) -> Result<bool> {
    let rows = conn
        .execute("DELETE FROM consoles WHERE console_id = ?1", params![console_id])
        .context("Failed to remove console")?;
    Ok(rows > 0)
}

/// Mark a console as sold on `date`.
pub fn sell_console(conn: &Connection, console_id: &str, date: NaiveDate) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE consoles SET sell_date = ?1
             WHERE console_id = ?2 AND sell_date IS NULL",
            params![date.format(DATE_FORMAT).to_string(), console_id],
        )
        .context("Failed to mark console as sold")?;
    Ok(rows > 0)
}

/// Clear the sale; binding and approval data go with it.
pub fn unsell_console(conn: &Connection, console_id: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE consoles
             SET sell_date = NULL, owner_id = NULL, warranty_code = NULL, approval_date = NULL
             WHERE console_id = ?1 AND sell_date IS NOT NULL",
            params![console_id],
        )
        .context("Failed to clear sale data")?;
    Ok(rows > 0)
}

fn code_taken(conn: &Connection, code: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM consoles WHERE warranty_code = ?1",
            params![code],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to check warranty code uniqueness")?;
    Ok(found.is_some())
}

/// Generate a warranty code not yet present in the unique index.
pub fn generate_warranty_code(conn: &Connection) -> Result<String> {
    let mut rng = rand::thread_rng();
    loop {
        let code: String = (0..WARRANTY_CODE_LEN)
            .map(|_| rng.gen_range(b'A'..=b'Z') as char)
            .collect();
        if !code_taken(conn, &code)? {
            return Ok(code);
        }
    }
}

/// Bind a sold, unbound console to a user, generating its warranty code.
pub fn bind_console(conn: &Connection, console_id: &str, owner_id: i64) -> Result<bool> {
    let code = generate_warranty_code(conn)?;
    let rows = conn
        .execute(
            "UPDATE consoles SET owner_id = ?1, warranty_code = ?2
             WHERE console_id = ?3 AND sell_date IS NOT NULL AND owner_id IS NULL",
            params![owner_id, code, console_id],
        )
        .context("Failed to bind console")?;
    if rows > 0 {
        info!("Bound console {console_id} to user {owner_id}");
    }
    Ok(rows > 0)
}

/// Clear the binding; approval goes with it.
pub fn unbind_console(conn: &Connection, console_id: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE consoles
             SET owner_id = NULL, warranty_code = NULL, approval_date = NULL
             WHERE console_id = ?1 AND owner_id IS NOT NULL",
            params![console_id],
        )
        .context("Failed to clear binding data")?;
    Ok(rows > 0)
}

/// Approve the warranty of a bound console as of `date`.
pub fn approve_console(conn: &Connection, console_id: &str, date: NaiveDate) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE consoles SET approval_date = ?1
             WHERE console_id = ?2 AND owner_id IS NOT NULL AND approval_date IS NULL",
            params![date.format(DATE_FORMAT).to_string(), console_id],
        )
        .context("Failed to approve warranty")?;
    if rows > 0 {
        info!("Approved warranty for console {console_id}");
    }
    Ok(rows > 0)
}

/// Revoke the approval only.
pub fn unapprove_console(conn: &Connection, console_id: &str) -> Result<bool> {
    let rows = conn
        .execute(
            "UPDATE consoles SET approval_date = NULL
             WHERE console_id = ?1 AND approval_date IS NOT NULL",
            params![console_id],
        )
        .context("Failed to revoke approval")?;
    Ok(rows > 0)
}

/// Fetch a console record by id.
pub fn get_console(conn: &Connection, console_id: &str) -> Result<Option<WarrantyRecord>> {
    let row = conn
        .query_row(
            "SELECT console_id, sell_date, owner_id, warranty_code, approval_date
             FROM consoles WHERE console_id = ?1",
            params![console_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
        .context("Failed to read console record")?;

    match row {
        Some((console_id, sell_date, owner_id, warranty_code, approval_date)) => {
            Ok(Some(WarrantyRecord {
                console_id,
                sell_date: parse_date(sell_date)?,
                owner_id,
                warranty_code,
                approval_date: parse_date(approval_date)?,
            }))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warranty;

    fn setup() -> Result<Connection> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(conn)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_add_console_duplicate_is_noop_success() -> Result<()> {
        let conn = setup()?;

        assert!(add_console(&conn, "AB1", None)?);
        sell_console(&conn, "AB1", date("01-01-2025"))?;

        // Re-registering must not clobber the existing record.
        assert!(add_console(&conn, "AB1", None)?);
        let record = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(record.sell_date, Some(date("01-01-2025")));

        Ok(())
    }

    #[test]
    fn test_full_lifecycle_scenario() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        assert!(sell_console(&conn, "AB1", date("01-01-2025"))?);
        assert!(bind_console(&conn, "AB1", 42)?);
        assert!(approve_console(&conn, "AB1", date("02-01-2025"))?);

        let record = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(record.console_id, "AB1");
        assert_eq!(record.sell_date, Some(date("01-01-2025")));
        assert_eq!(record.owner_id, Some(42));
        assert_eq!(record.approval_date, Some(date("02-01-2025")));
        let code = record.warranty_code.unwrap();
        assert_eq!(code.len(), WARRANTY_CODE_LEN);
        assert!(code.chars().all(|c| c.is_ascii_uppercase()));

        Ok(())
    }

    #[test]
    fn test_unsell_clears_dependent_fields() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        sell_console(&conn, "AB1", date("01-01-2025"))?;
        bind_console(&conn, "AB1", 42)?;
        approve_console(&conn, "AB1", date("02-01-2025"))?;

        assert!(unsell_console(&conn, "AB1")?);
        let record = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(record.console_id, "AB1");
        assert_eq!(record.sell_date, None);
        assert_eq!(record.owner_id, None);
        assert_eq!(record.warranty_code, None);
        assert_eq!(record.approval_date, None);

        Ok(())
    }

    #[test]
    fn test_double_bind_rejected() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        sell_console(&conn, "AB1", date("01-01-2025"))?;
        assert!(bind_console(&conn, "AB1", 42)?);

        let before = get_console(&conn, "AB1")?.unwrap();
        assert!(!bind_console(&conn, "AB1", 99)?);
        let after = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(before, after);

        Ok(())
    }

    #[test]
    fn test_bind_requires_sale() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        assert!(!bind_console(&conn, "AB1", 42)?);
        assert!(get_console(&conn, "AB1")?.unwrap().owner_id.is_none());

        Ok(())
    }

    #[test]
    fn test_approve_requires_binding() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        sell_console(&conn, "AB1", date("01-01-2025"))?;
        assert!(!approve_console(&conn, "AB1", date("02-01-2025"))?);

        bind_console(&conn, "AB1", 42)?;
        assert!(approve_console(&conn, "AB1", date("02-01-2025"))?);
        assert!(!approve_console(&conn, "AB1", date("03-01-2025"))?);

        Ok(())
    }

    #[test]
    fn test_unbind_and_unapprove_granularity() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        sell_console(&conn, "AB1", date("01-01-2025"))?;
        bind_console(&conn, "AB1", 42)?;
        approve_console(&conn, "AB1", date("02-01-2025"))?;

        // unapprove clears the approval only
        assert!(unapprove_console(&conn, "AB1")?);
        let record = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(record.approval_date, None);
        assert_eq!(record.owner_id, Some(42));
        assert!(record.warranty_code.is_some());

        // unbind clears code and approval but keeps the sale
        approve_console(&conn, "AB1", date("02-01-2025"))?;
        assert!(unbind_console(&conn, "AB1")?);
        let record = get_console(&conn, "AB1")?.unwrap();
        assert_eq!(record.owner_id, None);
        assert_eq!(record.warranty_code, None);
        assert_eq!(record.approval_date, None);
        assert_eq!(record.sell_date, Some(date("01-01-2025")));

        Ok(())
    }

    #[test]
    fn test_warranty_codes_unique_across_records() -> Result<()> {
        let conn = setup()?;

        let mut codes = std::collections::HashSet::new();
        for i in 0..50 {
            let id = format!("C{i}");
            add_console(&conn, &id, None)?;
            sell_console(&conn, &id, date("01-01-2025"))?;
            assert!(bind_console(&conn, &id, 1000 + i)?);
            let code = get_console(&conn, &id)?.unwrap().warranty_code.unwrap();
            assert!(codes.insert(code), "duplicate warranty code generated");
        }

        Ok(())
    }

    #[test]
    fn test_invariants_hold_after_operation_sequences() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        let ops: &[fn(&Connection) -> Result<bool>] = &[
            |c| sell_console(c, "AB1", NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()),
            |c| bind_console(c, "AB1", 42),
            |c| approve_console(c, "AB1", NaiveDate::from_ymd_opt(2025, 1, 2).unwrap()),
            |c| unapprove_console(c, "AB1"),
            |c| bind_console(c, "AB1", 7),
            |c| unbind_console(c, "AB1"),
            |c| approve_console(c, "AB1", NaiveDate::from_ymd_opt(2025, 1, 3).unwrap()),
            |c| unsell_console(c, "AB1"),
            |c| bind_console(c, "AB1", 8),
        ];

        for op in ops {
            let _ = op(&conn)?;
            let record = get_console(&conn, "AB1")?.unwrap();
            if warranty::bound(&record) {
                assert!(warranty::sold(&record), "bound implies sold");
            }
            if warranty::approved(&record) {
                assert!(warranty::bound(&record), "approved implies bound");
            }
        }

        Ok(())
    }

    #[test]
    fn test_remove_console() -> Result<()> {
        let conn = setup()?;

        add_console(&conn, "AB1", None)?;
        assert!(remove_console(&conn, "AB1")?);
        assert!(get_console(&conn, "AB1")?.is_none());
        assert!(!remove_console(&conn, "AB1")?);

        Ok(())
    }
}
