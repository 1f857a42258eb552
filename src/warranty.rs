//! Warranty lifecycle engine.
//!
//! Pure functions over a [`WarrantyRecord`]: state predicates, derived
//! values (remaining warranty days, bind-window expiry) and the
//! precondition checks shared by the staff command dispatcher and the
//! user self-service flow, so both sides agree on which transitions are
//! legal.

use chrono::{Duration, NaiveDate};

/// Wire format for all warranty dates (sell, approval, command arguments).
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// One record per physical console unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarrantyRecord {
    pub console_id: String,
    pub sell_date: Option<NaiveDate>,
    pub owner_id: Option<i64>,
    pub warranty_code: Option<String>,
    pub approval_date: Option<NaiveDate>,
}

impl WarrantyRecord {
    pub fn new(console_id: impl Into<String>) -> Self {
        Self {
            console_id: console_id.into(),
            sell_date: None,
            owner_id: None,
            warranty_code: None,
            approval_date: None,
        }
    }
}

/// The console has been marked as sold.
pub fn sold(record: &WarrantyRecord) -> bool {
    record.sell_date.is_some()
}

/// The console is bound to a Telegram user.
pub fn bound(record: &WarrantyRecord) -> bool {
    record.owner_id.is_some()
}

/// The warranty has been approved.
pub fn approved(record: &WarrantyRecord) -> bool {
    record.approval_date.is_some()
}

/// Days of warranty left as of `today`. Negative means expired,
/// `None` means the warranty was never approved.
pub fn remaining_warranty_days(
    record: &WarrantyRecord,
    duration_days: i64,
    compensation_days: i64,
    today: NaiveDate,
) -> Option<i64> {
    let approval = record.approval_date?;
    let end = approval + Duration::days(duration_days + compensation_days);
    Some((end - today).num_days())
}

/// Whether the self-service bind window is still open as of `today`.
/// `None` means the console has not been sold yet.
pub fn bind_window_open(
    record: &WarrantyRecord,
    bind_period_days: i64,
    today: NaiveDate,
) -> Option<bool> {
    let sell = record.sell_date?;
    let window_end = sell + Duration::days(bind_period_days);
    Some((window_end - today).num_days() > 0)
}

/// Rejected lifecycle transition, with a staff-presentable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    NotFound,
    AlreadyRegistered,
    AlreadySold,
    NotSold,
    AlreadyBound,
    NotBound,
    AlreadyApproved,
    NotApproved,
    BindWindowClosed,
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            StateError::NotFound => "console is not in the database",
            StateError::AlreadyRegistered => "console is already in the database",
            StateError::AlreadySold => "console is already marked as sold",
            StateError::NotSold => "console is not marked as sold",
            StateError::AlreadyBound => "console is already bound to a user",
            StateError::NotBound => "console is not bound to a user",
            StateError::AlreadyApproved => "warranty is already approved",
            StateError::NotApproved => "warranty is not approved",
            StateError::BindWindowClosed => "the binding window has closed",
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for StateError {}

fn existing(record: Option<&WarrantyRecord>) -> Result<&WarrantyRecord, StateError> {
    record.ok_or(StateError::NotFound)
}

/// `register` is only legal for an unknown console id.
pub fn check_register(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    match record {
        Some(_) => Err(StateError::AlreadyRegistered),
        None => Ok(()),
    }
}

pub fn check_remove(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    existing(record).map(|_| ())
}

pub fn check_sell(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    let record = existing(record)?;
    if sold(record) {
        return Err(StateError::AlreadySold);
    }
    Ok(())
}

pub fn check_unsell(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    let record = existing(record)?;
    if !sold(record) {
        return Err(StateError::NotSold);
    }
    Ok(())
}

/// Staff binding skips the window check; self-service binding enforces it.
pub fn check_bind(
    record: Option<&WarrantyRecord>,
    self_service: Option<(i64, NaiveDate)>,
) -> Result<(), StateError> {
    let record = existing(record)?;
    if !sold(record) {
        return Err(StateError::NotSold);
    }
    if bound(record) {
        return Err(StateError::AlreadyBound);
    }
    if let Some((bind_period_days, today)) = self_service {
        if bind_window_open(record, bind_period_days, today) != Some(true) {
            return Err(StateError::BindWindowClosed);
        }
    }
    Ok(())
}

pub fn check_unbind(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    let record = existing(record)?;
    if !bound(record) {
        return Err(StateError::NotBound);
    }
    Ok(())
}

pub fn check_approve(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    let record = existing(record)?;
    if !sold(record) {
        return Err(StateError::NotSold);
    }
    if !bound(record) {
        return Err(StateError::NotBound);
    }
    if approved(record) {
        return Err(StateError::AlreadyApproved);
    }
    Ok(())
}

pub fn check_unapprove(record: Option<&WarrantyRecord>) -> Result<(), StateError> {
    let record = existing(record)?;
    if !approved(record) {
        return Err(StateError::NotApproved);
    }
    Ok(())
}
