//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: routes incoming messages by chat and dialogue state
//! - `callback_handler`: handles inline keyboard callback queries
//! - `staff`: dispatches staff commands from the operations group
//! - `ui_builder`: creates keyboards and formats messages

pub mod callback_handler;
pub mod message_handler;
pub mod staff;
pub mod ui_builder;

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::media_cache::MediaCache;

pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

/// Services shared by every handler, injected through dptree.
pub struct BotContext {
    pub db: Arc<Mutex<Connection>>,
    pub config: Config,
    pub media: Arc<MediaCache>,
}

impl BotContext {
    pub fn new(db: Arc<Mutex<Connection>>, config: Config, media: Arc<MediaCache>) -> Self {
        Self { db, config, media }
    }
}
