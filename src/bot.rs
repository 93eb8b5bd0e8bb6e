use crate::book_keeping::{AddTemplate, Books, TemplateId, TemplateSummary, VariationsPage};
use crate::broadcast::{self, Failure};
use crate::config::{Config, Mode};
use crate::script_check;
use crate::variation::{self, Outcome};
use anyhow::Context;
use log::{info, warn};
use std::sync::Arc;
use teloxide::{
    dispatching::{UpdateFilterExt, UpdateHandler},
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile},
    utils::command::BotCommands,
};
use thiserror::Error;

const HELP_TEXT: &str = r#"
Hello! I build look-alike variations of a text: some Cyrillic letters are swapped for the Latin letters that render the same. Useful for checking how your own filters and deduplication cope with them.

/generate [N] {text} - make N variations of {text} and keep them as a template.
/check {text} - show which words mix Latin and Cyrillic letters.
/templates - list your templates.
/show {id} - browse the variations of a template.
/export {id} - download a template as JSON.
/delete {id} - delete a template.
/stop - stop receiving announcements.
/help - display this help text.
"#;

/// Telegram refuses messages longer than this.
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "subscribe and open the menu.")]
    Start,
    #[command(description = "display this text.")]
    Help,
    #[command(description = "generate variations: /generate [N] text.")]
    Generate(String),
    #[command(description = "find words mixing Latin and Cyrillic.")]
    Check(String),
    #[command(description = "list your templates.")]
    Templates,
    #[command(description = "browse a template: /show id.")]
    Show(String),
    #[command(description = "download a template as JSON: /export id.")]
    Export(String),
    #[command(description = "delete a template: /delete id.")]
    Delete(String),
    #[command(description = "stop receiving announcements.")]
    Stop,
    #[command(description = "storage statistics (admin).")]
    Stats,
    #[command(description = "announce to subscribers (admin).")]
    Broadcast(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    #[error("nothing to work with, send some text after the command")]
    MissingText,
    #[error("expected a template number, e.g. /show 3")]
    MissingId,
    #[error("{0:?} is not a template number")]
    BadId(String),
}

/// Splits `/generate` arguments into a count and the template. A leading
/// number is the count; anything else is the template with `default` count.
pub fn parse_generate_args(args: &str, default: usize) -> Result<(usize, String), ArgsError> {
    let args = args.trim();
    let (count, text) = match args.split_once(char::is_whitespace) {
        Some((head, rest)) => match head.parse::<usize>() {
            Ok(count) => (count, rest.trim()),
            Err(_) => (default, args),
        },
        None => (default, args),
    };
    if text.is_empty() {
        return Err(ArgsError::MissingText);
    }
    Ok((count, text.to_owned()))
}

pub fn parse_template_id(args: &str) -> Result<TemplateId, ArgsError> {
    let args = args.trim().trim_start_matches('#');
    if args.is_empty() {
        return Err(ArgsError::MissingId);
    }
    args.parse::<TemplateId>()
        .map_err(|_| ArgsError::BadId(args.to_owned()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callback {
    Page { template_id: TemplateId, page: usize },
    Templates,
    Help,
    Stats,
}

impl Callback {
    pub fn parse(data: &str) -> Option<Callback> {
        match data {
            "templates" => Some(Callback::Templates),
            "help" => Some(Callback::Help),
            "stats" => Some(Callback::Stats),
            _ => {
                let mut parts = data.strip_prefix("page:")?.split(':');
                let template_id = parts.next()?.parse().ok()?;
                let page = parts.next()?.parse().ok()?;
                if parts.next().is_some() {
                    return None;
                }
                Some(Callback::Page { template_id, page })
            }
        }
    }

    pub fn data(&self) -> String {
        match self {
            Callback::Page { template_id, page } => format!("page:{}:{}", template_id, page),
            Callback::Templates => String::from("templates"),
            Callback::Help => String::from("help"),
            Callback::Stats => String::from("stats"),
        }
    }

    fn button(&self, text: impl Into<String>) -> InlineKeyboardButton {
        InlineKeyboardButton::callback(text, self.data())
    }
}

/// Cuts `text` to what a single Telegram message can carry.
pub fn fit_message(text: String) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn preview(text: &str, chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > chars || text.lines().nth(1).is_some() {
        let mut short: String = line.chars().take(chars).collect();
        short.push('…');
        short
    } else {
        line.to_owned()
    }
}

pub fn main_menu(is_admin: bool) -> InlineKeyboardMarkup {
    let mut rows = vec![
        vec![Callback::Templates.button("My templates")],
        vec![Callback::Help.button("Help")],
    ];
    if is_admin {
        rows.push(vec![Callback::Stats.button("Statistics")]);
    }
    InlineKeyboardMarkup::new(rows)
}

pub fn render_outcome(template_id: TemplateId, outcome: &Outcome) -> String {
    format!(
        "Template #{} saved.\nVariations: {}\nAttempts: {}\nTime: {:.2}s\nStopped: {}",
        template_id,
        outcome.variations.len(),
        outcome.attempts,
        outcome.elapsed.as_secs_f64(),
        outcome.stop_reason
    )
}

pub fn render_page(page: &VariationsPage, page_size: usize) -> String {
    let mut text = format!(
        "Template #{}, page {}/{} ({} variations)\n\n",
        page.template_id, page.page, page.total_pages, page.total
    );
    if page.items.is_empty() {
        text.push_str("No variations stored.");
    }
    let first = (page.page - 1) * page_size + 1;
    for (i, item) in page.items.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", first + i, item));
    }
    fit_message(text)
}

pub fn page_keyboard(page: &VariationsPage) -> InlineKeyboardMarkup {
    let mut nav = Vec::new();
    if page.page > 1 {
        nav.push(
            Callback::Page {
                template_id: page.template_id,
                page: page.page - 1,
            }
            .button("◀"),
        );
    }
    if page.page < page.total_pages {
        nav.push(
            Callback::Page {
                template_id: page.template_id,
                page: page.page + 1,
            }
            .button("▶"),
        );
    }
    let mut rows = Vec::new();
    if !nav.is_empty() {
        rows.push(nav);
    }
    rows.push(vec![Callback::Templates.button("My templates")]);
    InlineKeyboardMarkup::new(rows)
}

pub fn render_templates(templates: &[TemplateSummary]) -> String {
    if templates.is_empty() {
        return String::from("You have no templates yet. Try /generate followed by some text.");
    }
    let mut text = String::from("Your templates:\n\n");
    for t in templates {
        text.push_str(&format!(
            "#{} · {} variations · {}\n",
            t.id,
            t.variations,
            preview(&t.text, 40)
        ));
    }
    fit_message(text)
}

pub fn templates_keyboard(templates: &[TemplateSummary]) -> InlineKeyboardMarkup {
    let rows = templates
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .map(|t| {
                    Callback::Page {
                        template_id: t.id,
                        page: 1,
                    }
                    .button(format!("#{}", t.id))
                })
                .collect()
        })
        .collect::<Vec<Vec<_>>>();
    InlineKeyboardMarkup::new(rows)
}

pub fn render_check(report: &script_check::Report) -> String {
    if report.mixed.is_empty() {
        return String::from("No word mixes Latin and Cyrillic letters.");
    }
    let mut text = String::from("Words mixing Latin and Cyrillic letters:\n");
    for word in &report.mixed {
        text.push_str(&format!(
            "• {} ({} Latin, {} Cyrillic)\n",
            word.word, word.latin, word.cyrillic
        ));
    }
    text.push_str("\nNormalized:\n");
    text.push_str(&report.normalized);
    fit_message(text)
}

async fn send_page(
    bot: &Bot,
    chat_id: ChatId,
    books: &Books,
    config: &Config,
    template_id: TemplateId,
    page: usize,
) -> anyhow::Result<()> {
    match books
        .variations_page(chat_id.0, template_id, page, config.page_size)
        .await?
    {
        Some(page) => {
            bot.send_message(chat_id, render_page(&page, config.page_size))
                .reply_markup(page_keyboard(&page))
                .await?;
        }
        None => {
            bot.send_message(chat_id, format!("Template #{} not found.", template_id))
                .await?;
        }
    }
    Ok(())
}

async fn send_stats(bot: &Bot, chat_id: ChatId, books: &Books, config: &Config) -> anyhow::Result<()> {
    let stats = books.stats().await?;
    let mode = match config.mode()? {
        Mode::Polling => String::from("polling"),
        Mode::Webhook(url) => format!("webhook on port {} ({})", config.webhook_port, url.host_str().unwrap_or("?")),
    };
    bot.send_message(
        chat_id,
        format!(
            "Subscribers: {} ({} active)\nTemplates: {}\nVariations: {}\nMode: {}",
            stats.subscribers, stats.active_subscribers, stats.templates, stats.variations, mode
        ),
    )
    .await?;
    Ok(())
}

async fn generate(
    bot: &Bot,
    chat_id: ChatId,
    args: &str,
    books: &Books,
    config: &Config,
) -> anyhow::Result<()> {
    let (count, text) = match parse_generate_args(args, config.default_variations) {
        Ok(parsed) => parsed,
        Err(e) => {
            bot.send_message(chat_id, format!("{}\nUsage: /generate [N] text", e))
                .await?;
            return Ok(());
        }
    };
    let limits = match config.limits(count) {
        Ok(limits) => limits,
        Err(e) => {
            bot.send_message(chat_id, e.to_string()).await?;
            return Ok(());
        }
    };
    if variation::capacity(&text) == 0 {
        bot.send_message(
            chat_id,
            "This text has no letters with Latin look-alikes, nothing to vary.",
        )
        .await?;
        return Ok(());
    }

    info!("generating {} variations for {}", count, chat_id);
    let template = text.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        variation::generate(&template, &limits, &mut rand::thread_rng())
    })
    .await
    .context("generation task failed")??;

    let added = books
        .add_template(
            chat_id.0,
            text,
            outcome.variations.clone(),
            config.max_templates_per_user,
        )
        .await?;
    match added {
        AddTemplate::Added(template_id) => {
            bot.send_message(chat_id, render_outcome(template_id, &outcome))
                .await?;
            send_page(bot, chat_id, books, config, template_id, 1).await?;
        }
        AddTemplate::LimitReached => {
            bot.send_message(
                chat_id,
                format!(
                    "You already keep {} templates. Delete one with /delete first.",
                    config.max_templates_per_user
                ),
            )
            .await?;
        }
    }
    Ok(())
}

async fn announce(
    bot: &Bot,
    chat_id: ChatId,
    text: String,
    books: &Books,
    config: &Config,
) -> anyhow::Result<()> {
    let text = text.trim().to_owned();
    if text.is_empty() {
        bot.send_message(chat_id, "Usage: /broadcast text").await?;
        return Ok(());
    }

    let recipients = books.active_subscribers().await?;
    info!("broadcasting to {} subscribers", recipients.len());
    let report = broadcast::deliver(&recipients, config.broadcast_delay(), |user_id| {
        let bot = bot.clone();
        let text = text.clone();
        async move {
            bot.send_message(ChatId(user_id), text)
                .await
                .map(|_| ())
                .map_err(Failure::from)
        }
    })
    .await;

    for &user_id in &report.blocked {
        books.unsubscribe(user_id).await?;
    }
    bot.send_message(
        chat_id,
        format!(
            "Delivered: {}\nUnreachable (unsubscribed): {}\nFailed: {}",
            report.delivered,
            report.blocked.len(),
            report.failed
        ),
    )
    .await?;
    Ok(())
}

async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    books: Books,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id;
    let is_admin = u64::try_from(chat_id.0).map_or(false, |id| config.is_admin(id));

    match cmd {
        Command::Start => {
            let username = msg.chat.username().map(String::from);
            if books.subscribe(chat_id.0, username).await? {
                info!("new subscriber {}", chat_id);
            }
            bot.send_message(chat_id, HELP_TEXT.trim())
                .reply_markup(main_menu(is_admin))
                .await?;
        }
        Command::Help => {
            bot.send_message(chat_id, HELP_TEXT.trim()).await?;
        }
        Command::Generate(args) => generate(&bot, chat_id, &args, &books, &config).await?,
        Command::Check(text) => {
            if text.trim().is_empty() {
                bot.send_message(chat_id, "Usage: /check text").await?;
            } else {
                let report = script_check::check(&text);
                bot.send_message(chat_id, render_check(&report)).await?;
            }
        }
        Command::Templates => {
            let templates = books.templates(chat_id.0).await?;
            bot.send_message(chat_id, render_templates(&templates))
                .reply_markup(templates_keyboard(&templates))
                .await?;
        }
        Command::Show(args) => match parse_template_id(&args) {
            Ok(template_id) => send_page(&bot, chat_id, &books, &config, template_id, 1).await?,
            Err(e) => {
                bot.send_message(chat_id, e.to_string()).await?;
            }
        },
        Command::Export(args) => match parse_template_id(&args) {
            Ok(template_id) => match books.export(chat_id.0, template_id).await? {
                Some(export) => {
                    let json = serde_json::to_vec_pretty(&export)?;
                    let file = InputFile::memory(json)
                        .file_name(format!("template-{}.json", template_id));
                    bot.send_document(chat_id, file).await?;
                }
                None => {
                    bot.send_message(chat_id, format!("Template #{} not found.", template_id))
                        .await?;
                }
            },
            Err(e) => {
                bot.send_message(chat_id, e.to_string()).await?;
            }
        },
        Command::Delete(args) => match parse_template_id(&args) {
            Ok(template_id) => {
                let reply = if books.delete_template(chat_id.0, template_id).await? {
                    format!("Template #{} deleted.", template_id)
                } else {
                    format!("Template #{} not found.", template_id)
                };
                bot.send_message(chat_id, reply).await?;
            }
            Err(e) => {
                bot.send_message(chat_id, e.to_string()).await?;
            }
        },
        Command::Stop => {
            let reply = if books.unsubscribe(chat_id.0).await? {
                "You will no longer receive announcements. Send /start to come back."
            } else {
                "You are not subscribed to announcements."
            };
            bot.send_message(chat_id, reply).await?;
        }
        Command::Stats if is_admin => send_stats(&bot, chat_id, &books, &config).await?,
        Command::Broadcast(text) if is_admin => {
            announce(&bot, chat_id, text, &books, &config).await?
        }
        Command::Stats | Command::Broadcast(_) => {
            warn!("{} tried an admin command", chat_id);
            bot.send_message(chat_id, "This command is for the bot admin only.")
                .await?;
        }
    }
    Ok(())
}

async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    books: Books,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(message) = q.message.as_ref() else {
        return Ok(());
    };
    let chat_id = message.chat().id;
    let Some(callback) = q.data.as_deref().and_then(Callback::parse) else {
        warn!("unknown callback data {:?}", q.data);
        return Ok(());
    };

    match callback {
        Callback::Page { template_id, page } => {
            match books
                .variations_page(q.from.id.0 as i64, template_id, page, config.page_size)
                .await?
            {
                Some(page) => {
                    bot.edit_message_text(chat_id, message.id(), render_page(&page, config.page_size))
                        .reply_markup(page_keyboard(&page))
                        .await?;
                }
                None => {
                    bot.send_message(chat_id, format!("Template #{} not found.", template_id))
                        .await?;
                }
            }
        }
        Callback::Templates => {
            let templates = books.templates(q.from.id.0 as i64).await?;
            bot.send_message(chat_id, render_templates(&templates))
                .reply_markup(templates_keyboard(&templates))
                .await?;
        }
        Callback::Help => {
            bot.send_message(chat_id, HELP_TEXT.trim()).await?;
        }
        Callback::Stats => {
            if config.is_admin(q.from.id.0) {
                send_stats(&bot, chat_id, &books, &config).await?;
            }
        }
    }
    Ok(())
}

async fn fallback_handler(bot: Bot, msg: Message) -> anyhow::Result<()> {
    bot.send_message(msg.chat.id, "I only understand commands. Send /help for the list.")
        .await?;
    Ok(())
}

pub fn schema() -> UpdateHandler<anyhow::Error> {
    let messages = Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        .branch(dptree::endpoint(fallback_handler));

    dptree::entry()
        .branch(messages)
        .branch(Update::filter_callback_query().endpoint(callback_handler))
}
