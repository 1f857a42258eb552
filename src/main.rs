use std::env;
use std::sync::Arc;

use anyhow::Result;
use log::info;
use rusqlite::Connection;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use tokio::sync::Mutex;

use consolecare::bot::{self, BotContext};
use consolecare::config::Config;
use consolecare::dialogue::ChatState;
use consolecare::media_cache::{self, MediaCache};
use consolecare::{ticket_store, warranty_store};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    info!("Starting ConsoleCare Telegram Bot");

    dotenv::dotenv().ok();

    let bot_token = env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let config = Config::from_env()?;

    info!("Initializing database at: {database_url}");
    let conn = Connection::open(&database_url)?;
    warranty_store::init_schema(&conn)?;
    ticket_store::init_schema(&conn)?;
    let shared_conn = Arc::new(Mutex::new(conn));

    let media = Arc::new(MediaCache::load_from(
        &config.ad_media_dir,
        &config.licence_media_dir,
    )?);
    let refresh_task = media_cache::spawn_refresh(Arc::clone(&media), config.media_refresh_interval);

    let ctx = Arc::new(BotContext::new(shared_conn, config, media));
    let bot = Bot::new(bot_token);

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .enter_dialogue::<Update, InMemStorage<ChatState>, ChatState>()
        .branch(Update::filter_message().endpoint(bot::message_handler))
        .branch(Update::filter_callback_query().endpoint(bot::callback_handler));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![InMemStorage::<ChatState>::new(), ctx])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    refresh_task.abort();
    info!("Dispatcher stopped, media refresh task aborted");

    Ok(())
}
