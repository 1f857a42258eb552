//! Message routing for the user-facing conversation flow.
//!
//! Messages from the operations group go to the staff dispatcher;
//! everything else is handled according to the chat's dialogue state.
//! A failing handler is logged, answered with a generic retry message
//! and the state reset, so one broken update never poisons the chat.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info};
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile};

use super::ui_builder;
use super::BotContext;
use crate::dialogue::{validate_phone, ChatDialogue, ChatState};
use crate::ticket_store::{self, Attachment};
use crate::verify;
use crate::warranty::{self, StateError};
use crate::warranty_store;

const GENERIC_ERROR: &str =
    "⚠️ Something went wrong while processing your message. Please try again or contact support.";

/// Fetch a Telegram file payload into memory.
pub async fn download_file_bytes(bot: &Bot, file_id: FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );
    let response = reqwest::get(&url).await?;
    Ok(response.bytes().await?.to_vec())
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    dialogue: ChatDialogue,
    ctx: Arc<BotContext>,
) -> Result<()> {
    if msg.chat.id == ctx.config.support_group {
        return super::staff::staff_message_handler(&bot, &msg, &ctx).await;
    }

    if let Err(e) = route_user_message(&bot, &msg, &dialogue, &ctx).await {
        error!("Handler failed for chat {}: {e:#}", msg.chat.id);
        if let Err(send_err) = bot
            .send_message(msg.chat.id, GENERIC_ERROR)
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await
        {
            error!("Failed to send error notice to chat {}: {send_err}", msg.chat.id);
        }
        dialogue.update(ChatState::WaitingForAction).await?;
    }
    Ok(())
}

async fn route_user_message(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
) -> Result<()> {
    // /start restarts the flow from any state.
    if msg.text() == Some("/start") {
        return start_licence_flow(bot, msg, dialogue, ctx).await;
    }

    let state = dialogue.get().await?.unwrap_or_default();
    match state {
        ChatState::Start | ChatState::WaitingForLicenceAccept { .. } => {
            bot.send_message(msg.chat.id, "Please send /start to begin.")
                .await?;
        }
        ChatState::WaitingForAction => {
            bot.send_message(msg.chat.id, "Please choose an action:")
                .reply_markup(ui_builder::main_menu_keyboard(
                    ctx.config.website_url.as_ref(),
                    ctx.config.user_group.is_some(),
                ))
                .await?;
        }
        ChatState::WaitingForTicketDescription => {
            handle_ticket_description(bot, msg, dialogue, ctx).await?;
        }
        ChatState::WaitingForPhone { ticket_id } => {
            handle_phone(bot, msg, dialogue, ctx, ticket_id).await?;
        }
        ChatState::WaitingForWarrantyCheck | ChatState::WaitingForReviewCheck => {
            match msg.text() {
                Some(console_id) => {
                    warranty_status_check(bot, msg, dialogue, ctx, console_id.trim()).await?;
                }
                None => {
                    bot.send_message(msg.chat.id, "⌨️ Please send your console code as text.")
                        .reply_markup(ui_builder::back_to_main_keyboard())
                        .await?;
                }
            }
        }
        ChatState::WaitingForPhotoCheck {
            console_id,
            warranty_code,
        } => {
            handle_photo_check(bot, msg, dialogue, ctx, &console_id, &warranty_code).await?;
        }
    }
    Ok(())
}

/// Entry point: show the first licence page. Without licence media the
/// agreement step is skipped entirely.
pub async fn start_licence_flow(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
) -> Result<()> {
    info!("Starting conversation with chat {}", msg.chat.id);
    match ctx.media.licence_page(1).await {
        Some((page, total)) => {
            let keyboard = if total > 1 {
                ui_builder::licence_next_keyboard()
            } else {
                ui_builder::licence_accept_keyboard()
            };
            bot.send_photo(msg.chat.id, InputFile::memory(page.as_ref().clone()))
                .caption("📄 Please read the licence agreement.")
                .reply_markup(keyboard)
                .await?;
            dialogue
                .update(ChatState::WaitingForLicenceAccept { page: 1 })
                .await?;
        }
        None => {
            // No licence pages configured.
            if let Some(user) = msg.from.as_ref() {
                let conn = ctx.db.lock().await;
                ticket_store::add_user(
                    &conn,
                    user.id.0 as i64,
                    user.username.as_deref(),
                    &user.first_name,
                    user.last_name.as_deref(),
                )?;
            }
            bot.send_message(msg.chat.id, "Please choose an action:")
                .reply_markup(ui_builder::main_menu_keyboard(
                    ctx.config.website_url.as_ref(),
                    ctx.config.user_group.is_some(),
                ))
                .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
    }
    Ok(())
}

fn extract_attachment(msg: &Message) -> Option<Attachment> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(Attachment::Photo(photo.file.id.clone()));
    }
    if let Some(video) = msg.video() {
        return Some(Attachment::Video(video.file.id.clone()));
    }
    if let Some(doc) = msg.document() {
        return Some(Attachment::Document(doc.file.id.clone()));
    }
    None
}

async fn handle_ticket_description(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
) -> Result<()> {
    let description = msg.text().or_else(|| msg.caption()).map(str::trim);
    let Some(description) = description.filter(|d| !d.is_empty()) else {
        bot.send_message(
            msg.chat.id,
            "📝 Please describe your issue in text. You can attach one photo, video or document.",
        )
        .reply_markup(ui_builder::back_to_main_keyboard())
        .await?;
        return Ok(());
    };

    let user_id = msg.chat.id.0;
    let attachment = extract_attachment(msg);
    let ticket = {
        let conn = ctx.db.lock().await;
        ticket_store::create_ticket(&conn, user_id, description, attachment)?
    };

    bot.send_message(
        msg.chat.id,
        format!(
            "🎫 Ticket #{} created.\n📞 Please send a phone number we can reach you at.",
            ticket.number
        ),
    )
    .await?;
    dialogue
        .update(ChatState::WaitingForPhone { ticket_id: ticket.id })
        .await?;
    Ok(())
}

async fn handle_phone(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
    ticket_id: i64,
) -> Result<()> {
    let raw = msg.text().unwrap_or_default();
    let phone = match validate_phone(raw) {
        Ok(phone) => phone,
        Err(_) => {
            bot.send_message(
                msg.chat.id,
                "❌ That does not look like a phone number. Please send 10 or 11 digits.",
            )
            .await?;
            return Ok(());
        }
    };

    let ticket = {
        let conn = ctx.db.lock().await;
        if ticket_store::set_phone(&conn, ticket_id, &phone)? {
            ticket_store::ticket_by_id(&conn, ticket_id)?
        } else {
            None
        }
    }
    .context("Ticket disappeared while collecting the phone number")?;

    // Forward the complete ticket into the support topic.
    bot.send_message(ctx.config.support_group, ui_builder::format_ticket_for_staff(&ticket))
        .message_thread_id(ctx.config.support_thread)
        .await?;
    if let Some(attachment) = &ticket.attachment {
        match attachment {
            Attachment::Photo(id) => {
                bot.send_photo(ctx.config.support_group, InputFile::file_id(id.clone()))
                    .message_thread_id(ctx.config.support_thread)
                    .await?;
            }
            Attachment::Video(id) => {
                bot.send_video(ctx.config.support_group, InputFile::file_id(id.clone()))
                    .message_thread_id(ctx.config.support_thread)
                    .await?;
            }
            Attachment::Document(id) => {
                bot.send_document(ctx.config.support_group, InputFile::file_id(id.clone()))
                    .message_thread_id(ctx.config.support_thread)
                    .await?;
            }
        }
    }

    bot.send_message(
        msg.chat.id,
        "✅ Your ticket has been sent to support. We will reply here.",
    )
    .reply_markup(ui_builder::main_menu_keyboard(
        ctx.config.website_url.as_ref(),
        ctx.config.user_group.is_some(),
    ))
    .await?;
    dialogue.update(ChatState::WaitingForAction).await?;
    Ok(())
}

/// The self-service decision tree: status report for approved consoles,
/// screenshot request for bound ones, and window-checked self binding
/// for consoles that are only sold.
async fn warranty_status_check(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
    console_id: &str,
) -> Result<()> {
    let today = Utc::now().date_naive();
    let record = {
        let conn = ctx.db.lock().await;
        warranty_store::get_console(&conn, console_id)?
    };

    let Some(record) = record else {
        bot.send_message(
            msg.chat.id,
            "❌ Your console was not found. Check the code and try again, or contact support.",
        )
        .reply_markup(ui_builder::back_to_main_keyboard())
        .await?;
        dialogue.update(ChatState::WaitingForAction).await?;
        return Ok(());
    };

    if warranty::approved(&record) {
        let text = ui_builder::format_remaining(
            &record,
            ctx.config.warranty_duration_days,
            ctx.config.warranty_compensation_days,
            today,
        );
        bot.send_message(msg.chat.id, text)
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
        dialogue.update(ChatState::WaitingForAction).await?;
        return Ok(());
    }

    if warranty::bound(&record) {
        let code = record
            .warranty_code
            .clone()
            .context("Bound console without a warranty code")?;
        request_review_screenshot(bot, msg, dialogue, console_id, &code).await?;
        return Ok(());
    }

    // Sold but unbound: try self-service binding inside the window.
    let self_service = Some((ctx.config.warranty_bind_period_days, today));
    match warranty::check_bind(Some(&record), self_service) {
        Ok(()) => {
            let user_id = msg.chat.id.0;
            let bound = {
                let conn = ctx.db.lock().await;
                if warranty_store::bind_console(&conn, console_id, user_id)? {
                    warranty_store::get_console(&conn, console_id)?
                } else {
                    None
                }
            };
            match bound.and_then(|r| r.warranty_code) {
                Some(code) => {
                    request_review_screenshot(bot, msg, dialogue, console_id, &code).await?;
                }
                None => {
                    bot.send_message(
                        msg.chat.id,
                        "❌ Could not register your warranty. Please try again or contact support.",
                    )
                    .reply_markup(ui_builder::back_to_main_keyboard())
                    .await?;
                    dialogue.update(ChatState::WaitingForAction).await?;
                }
            }
        }
        Err(StateError::BindWindowClosed) => {
            bot.send_message(
                msg.chat.id,
                format!(
                    "➖ More than {} days have passed since the purchase. Please contact support to register your warranty.",
                    ctx.config.warranty_bind_period_days
                ),
            )
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        Err(_) => {
            bot.send_message(
                msg.chat.id,
                "❌ This console is not registered as sold. Please contact support.",
            )
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
    }
    Ok(())
}

async fn request_review_screenshot(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    console_id: &str,
    warranty_code: &str,
) -> Result<()> {
    bot.send_message(
        msg.chat.id,
        format!(
            "➖ Your warranty is not confirmed yet.\nYour warranty code is {warranty_code}.\nLeave a review mentioning this code and send a screenshot of it here."
        ),
    )
    .reply_markup(ui_builder::back_to_main_keyboard())
    .await?;
    dialogue
        .update(ChatState::WaitingForPhotoCheck {
            console_id: console_id.to_string(),
            warranty_code: warranty_code.to_string(),
        })
        .await?;
    Ok(())
}

fn screenshot_file_id(msg: &Message) -> Option<FileId> {
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return Some(photo.file.id.clone());
    }
    let doc = msg.document()?;
    let mime = doc.mime_type.as_ref()?;
    if mime.to_string().starts_with("image/") {
        Some(doc.file.id.clone())
    } else {
        None
    }
}

async fn handle_photo_check(
    bot: &Bot,
    msg: &Message,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
    console_id: &str,
    warranty_code: &str,
) -> Result<()> {
    let Some(file_id) = screenshot_file_id(msg) else {
        bot.send_message(
            msg.chat.id,
            "Please send the review screenshot as a photo or an image document, or go back to the main menu.",
        )
        .reply_markup(ui_builder::back_to_main_keyboard())
        .await?;
        return Ok(());
    };

    let bytes = download_file_bytes(bot, file_id).await?;
    let code = warranty_code.to_string();
    // Tesseract is CPU-bound; keep it off the async worker threads.
    let found = tokio::task::spawn_blocking(move || verify::code_present(&bytes, &code)).await??;

    if found {
        let today = Utc::now().date_naive();
        let approved = {
            let conn = ctx.db.lock().await;
            warranty_store::approve_console(&conn, console_id, today)?
        };
        if approved {
            info!("Warranty approved by review screenshot for console {console_id}");
            bot.send_message(
                msg.chat.id,
                "🎉 Congratulations! Your extended warranty is now active.\nYou can check its status any time in the warranty menu.",
            )
            .reply_markup(ui_builder::warranty_keyboard(
                ctx.config.warranty_conditions_url.as_ref(),
            ))
            .await?;
        } else {
            bot.send_message(
                msg.chat.id,
                "⚠️ Could not confirm the warranty. Please contact support.",
            )
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
        }
    } else {
        bot.send_message(
            msg.chat.id,
            "❌ Could not recognize the code. Try cropping the screenshot closer to the code and send it again from the warranty menu.",
        )
        .reply_markup(ui_builder::warranty_keyboard(
            ctx.config.warranty_conditions_url.as_ref(),
        ))
        .await?;
    }
    dialogue.update(ChatState::WaitingForAction).await?;
    Ok(())
}
