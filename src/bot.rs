//! Startup-time Telegram calls made by the bot launcher before it hands off
//! to the bot process: token check and command menu registration.
use anyhow::{Context, Result};
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::utils::command::BotCommands;
use tracing::info;

use crate::config::Telegram;

/// Commands shown in the Telegram menu.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Доступные команды:")]
pub enum Command {
    #[command(description = "Запустить бота")]
    Start,
    #[command(description = "Открыть каталог")]
    Catalog,
    #[command(description = "Корзина")]
    Cart,
    #[command(description = "Частые вопросы")]
    Faq,
    #[command(description = "Мой профиль")]
    Profile,
}

/// Menu entries in display order.
pub fn menu() -> Vec<BotCommand> {
    Command::bot_commands()
}

/// Verify the token with `getMe`, then publish the command menu.
pub async fn register_commands(cfg: &Telegram) -> Result<()> {
    let bot = Bot::new(cfg.bot_token.expose());
    let me = bot
        .get_me()
        .await
        .context("telegram rejected the bot token")?;
    info!(username = ?me.username, "bot token verified");

    bot.set_my_commands(menu())
        .await
        .context("failed to register bot commands")?;
    info!(count = menu().len(), "bot commands registered");
    Ok(())
}
