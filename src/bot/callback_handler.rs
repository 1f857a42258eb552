//! Callback handler for inline keyboard events.

use std::sync::Arc;

use anyhow::Result;
use log::{error, info, warn};
use teloxide::prelude::*;
use teloxide::types::InputFile;

use super::ui_builder;
use super::BotContext;
use crate::dialogue::{ChatDialogue, ChatState};
use crate::media_cache::AdKind;
use crate::ticket_store;

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    dialogue: ChatDialogue,
    ctx: Arc<BotContext>,
) -> Result<()> {
    let result = route_callback(&bot, &q, &dialogue, &ctx).await;
    // Always clear the button loading state, even after a failure.
    bot.answer_callback_query(q.id.clone()).await?;
    if let Err(e) = result {
        error!("Callback handler failed for user {}: {e:#}", q.from.id);
        if let Some(msg) = &q.message {
            bot.send_message(
                msg.chat().id,
                "⚠️ Something went wrong. Please try again or contact support.",
            )
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
        }
        dialogue.update(ChatState::WaitingForAction).await?;
    }
    Ok(())
}

async fn route_callback(
    bot: &Bot,
    q: &CallbackQuery,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
) -> Result<()> {
    let Some(msg) = &q.message else {
        warn!("Callback from user {} without an attached message", q.from.id);
        return Ok(());
    };
    let chat_id = msg.chat().id;
    let data = q.data.as_deref().unwrap_or("");

    if let Some(rest) = data.strip_prefix("rate_") {
        return handle_rating(bot, chat_id, ctx, rest).await;
    }

    match data {
        "next_licence" => {
            let page = match dialogue.get().await? {
                Some(ChatState::WaitingForLicenceAccept { page }) => page,
                _ => return Ok(()),
            };
            show_licence_page(bot, chat_id, dialogue, ctx, page + 1).await?;
        }
        "licence_accepted" => {
            {
                let conn = ctx.db.lock().await;
                ticket_store::add_user(
                    &conn,
                    q.from.id.0 as i64,
                    q.from.username.as_deref(),
                    &q.from.first_name,
                    q.from.last_name.as_deref(),
                )?;
            }
            send_random_advert(bot, chat_id, ctx).await?;
            bot.send_message(chat_id, "Please choose an action:")
                .reply_markup(ui_builder::main_menu_keyboard(
                    ctx.config.website_url.as_ref(),
                    ctx.config.user_group.is_some(),
                ))
                .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "back_to_main" => {
            bot.send_message(chat_id, "Please choose an action:")
                .reply_markup(ui_builder::main_menu_keyboard(
                    ctx.config.website_url.as_ref(),
                    ctx.config.user_group.is_some(),
                ))
                .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "instructions" => {
            if ctx.config.instructions.is_empty() {
                bot.send_message(
                    chat_id,
                    "📖 Instructions are not available yet. Please contact support.",
                )
                .reply_markup(ui_builder::back_to_main_keyboard())
                .await?;
            } else {
                bot.send_message(chat_id, "📖 Choose an instruction:")
                    .reply_markup(ui_builder::link_menu_keyboard(&ctx.config.instructions))
                    .await?;
            }
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "reviews" => {
            if ctx.config.review_platforms.is_empty() {
                bot.send_message(
                    chat_id,
                    "⭐️ Review platforms are not configured yet. Please contact support.",
                )
                .reply_markup(ui_builder::back_to_main_keyboard())
                .await?;
            } else {
                bot.send_message(chat_id, "⭐️ Choose a platform for your review:")
                    .reply_markup(ui_builder::link_menu_keyboard(&ctx.config.review_platforms))
                    .await?;
            }
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "join_group" => {
            handle_join_group(bot, q, chat_id, ctx).await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "support" => {
            let latest = {
                let conn = ctx.db.lock().await;
                ticket_store::latest_ticket(&conn, chat_id.0)?
            };
            let text = match latest {
                Some(ticket) => format!(
                    "🛠 Support\n\nYour latest ticket is #{} ({}).",
                    ticket.number,
                    ui_builder::format_ticket_status(ticket.status)
                ),
                None => "🛠 Support\n\nYou have no tickets yet.".to_string(),
            };
            bot.send_message(chat_id, text)
                .reply_markup(ui_builder::support_keyboard())
                .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "create_ticket" => {
            bot.send_message(
                chat_id,
                "📝 Describe your issue in one message. You can attach one photo, video or document.",
            )
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
            dialogue.update(ChatState::WaitingForTicketDescription).await?;
        }
        "my_tickets" => {
            let listing = {
                let conn = ctx.db.lock().await;
                let tickets = ticket_store::tickets_for_user(&conn, chat_id.0)?;
                tickets
                    .into_iter()
                    .map(|ticket| {
                        let responses = ticket_store::responses_for_ticket(&conn, ticket.id)?;
                        Ok((ticket, responses))
                    })
                    .collect::<Result<Vec<_>>>()?
            };
            bot.send_message(chat_id, ui_builder::format_ticket_list(&listing))
                .reply_markup(ui_builder::support_keyboard())
                .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "warranty" => {
            bot.send_message(
                chat_id,
                "🔒 The extended warranty covers delivery to the service center, free repairs and fast replacement.\n\nTo activate it, check your warranty status, leave a review with your warranty code and send us a screenshot.",
            )
            .reply_markup(ui_builder::warranty_keyboard(
                ctx.config.warranty_conditions_url.as_ref(),
            ))
            .await?;
            dialogue.update(ChatState::WaitingForAction).await?;
        }
        "check_warranty" => {
            bot.send_message(chat_id, "⌨️ Please send your console code.")
                .reply_markup(ui_builder::back_to_main_keyboard())
                .await?;
            dialogue.update(ChatState::WaitingForWarrantyCheck).await?;
        }
        "submit_review" => {
            bot.send_message(chat_id, "⌨️ Please send your console code.")
                .reply_markup(ui_builder::back_to_main_keyboard())
                .await?;
            dialogue.update(ChatState::WaitingForReviewCheck).await?;
        }
        other => {
            warn!("Unhandled callback data from user {}: {other}", q.from.id);
        }
    }
    Ok(())
}

async fn show_licence_page(
    bot: &Bot,
    chat_id: ChatId,
    dialogue: &ChatDialogue,
    ctx: &BotContext,
    page: u32,
) -> Result<()> {
    match ctx.media.licence_page(page).await {
        Some((data, total)) => {
            let keyboard = if (page as usize) < total {
                ui_builder::licence_next_keyboard()
            } else {
                ui_builder::licence_accept_keyboard()
            };
            bot.send_photo(chat_id, InputFile::memory(data.as_ref().clone()))
                .reply_markup(keyboard)
                .await?;
            dialogue
                .update(ChatState::WaitingForLicenceAccept { page })
                .await?;
        }
        None => {
            // Page count changed under us; fall through to acceptance.
            bot.send_message(chat_id, "📄 Please accept the licence agreement to continue.")
                .reply_markup(ui_builder::licence_accept_keyboard())
                .await?;
        }
    }
    Ok(())
}

/// Let the user into the community group: members get the public link,
/// everyone else is approved directly or handed a one-day invite link.
async fn handle_join_group(
    bot: &Bot,
    q: &CallbackQuery,
    chat_id: ChatId,
    ctx: &BotContext,
) -> Result<()> {
    let Some(group) = ctx.config.user_group else {
        warn!("Join button pressed but no community group is configured");
        bot.send_message(chat_id, "Joining the group is not available right now.")
            .reply_markup(ui_builder::back_to_main_keyboard())
            .await?;
        return Ok(());
    };
    let menu = ui_builder::main_menu_keyboard(ctx.config.website_url.as_ref(), true);

    let already_member = match bot.get_chat_member(group, q.from.id).await {
        Ok(member) => member.kind.is_present(),
        // Unknown to the group yet; fall through to the join attempt.
        Err(_) => false,
    };
    if already_member {
        let mut text = "✅ You are already a member of our group!".to_string();
        if let Some(link) = &ctx.config.user_group_link {
            text.push_str(&format!("\n\n🔗 Group link: {link}"));
        }
        bot.send_message(chat_id, text).reply_markup(menu).await?;
        return Ok(());
    }

    // A stale ban would make any join attempt fail.
    if let Err(e) = bot
        .unban_chat_member(group, q.from.id)
        .only_if_banned(true)
        .await
    {
        warn!("Could not lift a possible ban for user {}: {e}", q.from.id);
    }

    match bot.approve_chat_join_request(group, q.from.id).await {
        Ok(_) => {
            info!("User {} added to the community group", q.from.id);
            let mut text = "✅ You have been added to our community group!".to_string();
            if let Some(link) = &ctx.config.user_group_link {
                text.push_str(&format!("\n\n🔗 Group link: {link}"));
            }
            bot.send_message(chat_id, text).reply_markup(menu).await?;
        }
        Err(e) => {
            info!("Direct join failed for user {}, sending an invite link: {e}", q.from.id);
            let invite = bot
                .create_chat_invite_link(group)
                .expire_date(chrono::Utc::now() + chrono::Duration::days(1))
                .member_limit(1)
                .await?;
            bot.send_message(
                chat_id,
                format!(
                    "🔗 Join our group: {}\n\nIf you have trouble joining, please contact support.",
                    invite.invite_link
                ),
            )
            .reply_markup(menu)
            .await?;
        }
    }
    Ok(())
}

async fn send_random_advert(bot: &Bot, chat_id: ChatId, ctx: &BotContext) -> Result<()> {
    let Some(ad) = ctx.media.random_ad().await else {
        return Ok(());
    };
    let payload = InputFile::memory(ad.data.as_ref().clone());
    match ad.kind {
        AdKind::Photo => {
            bot.send_photo(chat_id, payload).await?;
        }
        AdKind::Video => {
            bot.send_video(chat_id, payload).await?;
        }
        AdKind::Document => {
            bot.send_document(chat_id, payload).await?;
        }
    }
    Ok(())
}

/// Rating callbacks carry `rate_{ticket_row_id}_{score}`.
async fn handle_rating(bot: &Bot, chat_id: ChatId, ctx: &BotContext, rest: &str) -> Result<()> {
    let Some((ticket_id, score)) = parse_rating(rest) else {
        warn!("Malformed rating callback: rate_{rest}");
        return Ok(());
    };

    let rated = {
        let conn = ctx.db.lock().await;
        ticket_store::rate_latest_response(&conn, ticket_id, score)?
    };
    if rated {
        info!("Ticket {ticket_id} rated {score} by chat {chat_id}");
        bot.send_message(chat_id, "⭐️ Thank you for your feedback!")
            .await?;
    } else {
        bot.send_message(chat_id, "This ticket can no longer be rated.")
            .await?;
    }
    Ok(())
}

fn parse_rating(rest: &str) -> Option<(i64, i64)> {
    let (ticket, score) = rest.split_once('_')?;
    Some((ticket.parse().ok()?, score.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("17_5"), Some((17, 5)));
        assert_eq!(parse_rating("17"), None);
        assert_eq!(parse_rating("x_5"), None);
        assert_eq!(parse_rating("17_x"), None);
    }
}
