//! Staff command dispatch for the operations group.
//!
//! Console lifecycle commands are only honored in the console-codes
//! topic and support commands only in the support topic, so a code
//! pasted into the wrong thread never mutates anything. Every mutation
//! is precondition-checked through the lifecycle engine first.

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};
use teloxide::prelude::*;
use teloxide::types::{InputFile, Message, ThreadId};

use super::ui_builder;
use super::BotContext;
use crate::commands::{self, ParseError, StaffCommand};
use crate::ticket_store::{self, Attachment, TicketStatus};
use crate::warranty;
use crate::warranty_store;

const HELP_TEXT: &str = "\
Console-codes topic:
<code> - register a console
/remove <code> - delete a console record
/sell <code> [DD-MM-YYYY] - mark as sold (default today)
/unsell <code> - clear the sale
/bind <code> <user_id> - bind to a user
/unbind <code> - clear the binding
/approve <code> [DD-MM-YYYY] - approve the warranty
/unapprove <code> - revoke the approval
/approve_warranty <code> - approve and notify the owner
/data <code> - show the full record

Support topic:
/reply <user_id> <ticket_no> <text> - answer a ticket (one attachment allowed)
/direct_reply <user_id> <text> - message a user directly
/newsletter <text> - broadcast to all registered users

Anywhere:
/help - this message
/id - show chat and topic ids";

const GENERIC_STAFF_ERROR: &str =
    "⚠️ Something went wrong while executing the command. Please try again later.";

pub async fn staff_message_handler(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<()> {
    let Some(text) = msg.text().or_else(|| msg.caption()) else {
        return Ok(());
    };

    let command = match commands::parse(text) {
        Ok(command) => command,
        // Ordinary group chatter is not addressed to the bot.
        Err(ParseError::NotACommand) => return Ok(()),
        Err(e) => {
            reply(bot, msg, &format!("❌ {e}")).await?;
            return Ok(());
        }
    };

    if !in_allowed_thread(&command, msg.thread_id, ctx) {
        warn!("Staff command in the wrong topic ignored: {text}");
        return Ok(());
    }

    // A storage or transport fault still gets an acknowledgment, so the
    // operator is never left guessing whether the command ran.
    if let Err(e) = dispatch(bot, msg, ctx, command).await {
        error!("Staff command failed in chat {}: {e:#}", msg.chat.id);
        reply(bot, msg, GENERIC_STAFF_ERROR).await?;
    }
    Ok(())
}

fn is_console_command(command: &StaffCommand) -> bool {
    matches!(
        command,
        StaffCommand::Register { .. }
            | StaffCommand::Remove { .. }
            | StaffCommand::Sell { .. }
            | StaffCommand::Unsell { .. }
            | StaffCommand::Bind { .. }
            | StaffCommand::Unbind { .. }
            | StaffCommand::Approve { .. }
            | StaffCommand::Unapprove { .. }
            | StaffCommand::Data { .. }
            | StaffCommand::ApproveWarranty { .. }
    )
}

fn in_allowed_thread(command: &StaffCommand, thread: Option<ThreadId>, ctx: &BotContext) -> bool {
    match command {
        StaffCommand::Help | StaffCommand::Id => true,
        c if is_console_command(c) => thread == Some(ctx.config.codes_thread),
        _ => thread == Some(ctx.config.support_thread),
    }
}

/// Answer in the topic the command came from.
async fn reply(bot: &Bot, msg: &Message, text: &str) -> Result<()> {
    let mut request = bot.send_message(msg.chat.id, text);
    if let Some(thread) = msg.thread_id {
        request = request.message_thread_id(thread);
    }
    request.await?;
    Ok(())
}

async fn dispatch(bot: &Bot, msg: &Message, ctx: &BotContext, command: StaffCommand) -> Result<()> {
    let today = Utc::now().date_naive();
    match command {
        StaffCommand::Register { console_id } => {
            let outcome = {
                let conn = ctx.db.lock().await;
                let record = warranty_store::get_console(&conn, &console_id)?;
                match warranty::check_register(record.as_ref()) {
                    Ok(()) => {
                        warranty_store::add_console(&conn, &console_id, None)?;
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            };
            match outcome {
                Ok(()) => reply(bot, msg, &format!("✅ Console {console_id} registered.")).await?,
                Err(e) => reply(bot, msg, &format!("❌ {console_id}: {e}")).await?,
            }
        }
        StaffCommand::Remove { console_id } => {
            lifecycle_mutation(bot, msg, ctx, &console_id, "removed", |conn, record| {
                warranty::check_remove(record)?;
                Ok(warranty_store::remove_console(conn, &console_id)?)
            })
            .await?;
        }
        StaffCommand::Sell { console_id, date } => {
            let date = date.unwrap_or(today);
            lifecycle_mutation(bot, msg, ctx, &console_id, "marked as sold", |conn, record| {
                warranty::check_sell(record)?;
                Ok(warranty_store::sell_console(conn, &console_id, date)?)
            })
            .await?;
        }
        StaffCommand::Unsell { console_id } => {
            lifecycle_mutation(bot, msg, ctx, &console_id, "sale cleared", |conn, record| {
                warranty::check_unsell(record)?;
                Ok(warranty_store::unsell_console(conn, &console_id)?)
            })
            .await?;
        }
        StaffCommand::Bind { console_id, user_id } => {
            // Staff binding bypasses the self-service window.
            lifecycle_mutation(bot, msg, ctx, &console_id, "bound", |conn, record| {
                warranty::check_bind(record, None)?;
                Ok(warranty_store::bind_console(conn, &console_id, user_id)?)
            })
            .await?;
        }
        StaffCommand::Unbind { console_id } => {
            lifecycle_mutation(bot, msg, ctx, &console_id, "binding cleared", |conn, record| {
                warranty::check_unbind(record)?;
                Ok(warranty_store::unbind_console(conn, &console_id)?)
            })
            .await?;
        }
        StaffCommand::Approve { console_id, date } => {
            let date = date.unwrap_or(today);
            lifecycle_mutation(bot, msg, ctx, &console_id, "warranty approved", |conn, record| {
                warranty::check_approve(record)?;
                Ok(warranty_store::approve_console(conn, &console_id, date)?)
            })
            .await?;
        }
        StaffCommand::Unapprove { console_id } => {
            lifecycle_mutation(bot, msg, ctx, &console_id, "approval revoked", |conn, record| {
                warranty::check_unapprove(record)?;
                Ok(warranty_store::unapprove_console(conn, &console_id)?)
            })
            .await?;
        }
        StaffCommand::Data { console_id } => {
            let record = {
                let conn = ctx.db.lock().await;
                warranty_store::get_console(&conn, &console_id)?
            };
            match record {
                Some(record) => reply(bot, msg, &ui_builder::format_record(&record)).await?,
                None => reply(bot, msg, &format!("❌ {console_id} is not in the database.")).await?,
            }
        }
        StaffCommand::ApproveWarranty { console_id } => {
            approve_and_notify(bot, msg, ctx, &console_id, today).await?;
        }
        StaffCommand::Reply {
            user_id,
            ticket_number,
            text,
        } => {
            answer_ticket(bot, msg, ctx, user_id, ticket_number, &text).await?;
        }
        StaffCommand::DirectReply { user_id, text } => {
            send_to_user(bot, ChatId(user_id), &text, extract_attachment(msg).as_ref()).await?;
            reply(bot, msg, &format!("✅ Message sent to user {user_id}.")).await?;
        }
        StaffCommand::Newsletter { text } => {
            broadcast_newsletter(bot, msg, ctx, &text).await?;
        }
        StaffCommand::Help => {
            reply(bot, msg, HELP_TEXT).await?;
        }
        StaffCommand::Id => {
            let thread = msg
                .thread_id
                .map(|t| t.0 .0.to_string())
                .unwrap_or_else(|| "-".to_string());
            reply(bot, msg, &format!("Chat id: {}\nTopic id: {thread}", msg.chat.id)).await?;
        }
    }
    Ok(())
}

/// Run an engine-checked mutation and acknowledge the outcome. The
/// closure returns `Ok(false)` when the guarded UPDATE raced and
/// matched no row.
async fn lifecycle_mutation<F>(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    console_id: &str,
    action: &str,
    mutate: F,
) -> Result<()>
where
    F: FnOnce(
        &rusqlite::Connection,
        Option<&warranty::WarrantyRecord>,
    ) -> Result<bool, anyhow::Error>,
{
    let outcome = {
        let conn = ctx.db.lock().await;
        let record = warranty_store::get_console(&conn, console_id)?;
        mutate(&conn, record.as_ref())
    };
    match outcome {
        Ok(true) => {
            info!("Console {console_id}: {action}");
            reply(bot, msg, &format!("✅ Console {console_id}: {action}.")).await?;
        }
        Ok(false) => {
            reply(
                bot,
                msg,
                &format!("❌ Console {console_id}: the record changed, please retry."),
            )
            .await?;
        }
        Err(e) => match e.downcast::<warranty::StateError>() {
            Ok(state_err) => reply(bot, msg, &format!("❌ {console_id}: {state_err}")).await?,
            Err(other) => return Err(other),
        },
    }
    Ok(())
}

async fn approve_and_notify(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    console_id: &str,
    today: chrono::NaiveDate,
) -> Result<()> {
    let outcome = {
        let conn = ctx.db.lock().await;
        let record = warranty_store::get_console(&conn, console_id)?;
        match warranty::check_approve(record.as_ref()) {
            Ok(()) => {
                let record = record.context("Record vanished after the precondition check")?;
                let owner = record.owner_id.context("Bound console without an owner")?;
                if warranty_store::approve_console(&conn, console_id, today)? {
                    Ok(Some(owner))
                } else {
                    Ok(None)
                }
            }
            Err(e) => Err(e),
        }
    };
    match outcome {
        Ok(Some(owner)) => {
            if let Err(e) = bot
                .send_message(
                    ChatId(owner),
                    format!("🎉 Congratulations! Your extended warranty for console {console_id} is now active."),
                )
                .await
            {
                warn!("Could not notify owner {owner} of console {console_id}: {e}");
            }
            reply(bot, msg, &format!("✅ Console {console_id}: warranty approved, owner notified.")).await?;
        }
        Ok(None) => {
            reply(bot, msg, &format!("❌ Console {console_id}: the record changed, please retry.")).await?;
        }
        Err(e) => {
            reply(bot, msg, &format!("❌ {console_id}: {e}")).await?;
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

async fn send_to_user(
    bot: &Bot,
    user: ChatId,
    text: &str,
    attachment: Option<&Attachment>,
) -> Result<()> {
    bot.send_message(user, text).await?;
    if let Some(attachment) = attachment {
        match attachment {
            Attachment::Photo(id) => {
                bot.send_photo(user, InputFile::file_id(id.clone())).await?;
            }
            Attachment::Video(id) => {
                bot.send_video(user, InputFile::file_id(id.clone())).await?;
            }
            Attachment::Document(id) => {
                bot.send_document(user, InputFile::file_id(id.clone())).await?;
            }
        }
    }
    Ok(())
}

async fn answer_ticket(
    bot: &Bot,
    msg: &Message,
    ctx: &BotContext,
    user_id: i64,
    ticket_number: i64,
    text: &str,
) -> Result<()> {
    let staff_id = msg.from.as_ref().map(|u| u.id.0 as i64).unwrap_or_default();
    let attachment = extract_attachment(msg);

    let ticket = {
        let conn = ctx.db.lock().await;
        let Some(ticket) = ticket_store::find_ticket(&conn, user_id, ticket_number)? else {
            drop(conn);
            reply(bot, msg, &format!("❌ User {user_id} has no ticket #{ticket_number}.")).await?;
            return Ok(());
        };
        ticket_store::add_response(&conn, ticket.id, staff_id, text, attachment.as_ref())?;
        ticket_store::set_status(&conn, ticket.id, TicketStatus::Answered)?;
        ticket
    };

    bot.send_message(
        ChatId(user_id),
        format!("💬 Support replied to your ticket #{ticket_number}:\n\n{text}\n\nPlease rate the answer:"),
    )
    .reply_markup(ui_builder::rating_keyboard(ticket.id))
    .await?;
    if let Some(attachment) = &attachment {
        match attachment {
            Attachment::Photo(id) => {
                bot.send_photo(ChatId(user_id), InputFile::file_id(id.clone())).await?;
            }
            Attachment::Video(id) => {
                bot.send_video(ChatId(user_id), InputFile::file_id(id.clone())).await?;
            }
            Attachment::Document(id) => {
                bot.send_document(ChatId(user_id), InputFile::file_id(id.clone())).await?;
            }
        }
    }

    reply(bot, msg, &format!("✅ Ticket #{ticket_number} answered.")).await?;
    Ok(())
}

async fn broadcast_newsletter(bot: &Bot, msg: &Message, ctx: &BotContext, text: &str) -> Result<()> {
    let user_ids = {
        let conn = ctx.db.lock().await;
        ticket_store::all_user_ids(&conn)?
    };

    let mut sent = 0usize;
    let mut failed = 0usize;
    for user_id in user_ids {
        match bot.send_message(ChatId(user_id), text).await {
            Ok(_) => sent += 1,
            Err(e) => {
                // Users who blocked the bot are expected here.
                warn!("Newsletter delivery to {user_id} failed: {e}");
                failed += 1;
            }
        }
    }

    info!("Newsletter delivered to {sent} users, {failed} failures");
    reply(bot, msg, &format!("📣 Newsletter sent to {sent} users ({failed} failed).")).await?;
    Ok(())
}
