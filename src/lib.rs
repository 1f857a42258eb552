//! # ConsoleCare Telegram Bot
//!
//! A support and warranty-registration bot for a console retail brand:
//! ticket handling, warranty lifecycle management by staff commands,
//! and OCR-based review screenshot verification.

pub mod bot;
pub mod commands;
pub mod config;
pub mod dialogue;
pub mod media_cache;
pub mod ticket_store;
pub mod verify;
pub mod warranty;
pub mod warranty_store;
