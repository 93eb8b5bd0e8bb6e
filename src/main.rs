use anyhow::Context;
use teloxide::update_listeners::webhooks;
use variant_bot::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    info!("starting");

    let config = Config::from_env()?;
    let mode = config.mode()?;

    let book_keeper = BookKeeper::open(&config.database_path)?;
    let (books, book_keeping) = Books::spawn(book_keeper);

    let bot = Bot::from_env();
    bot.set_my_commands(Command::bot_commands())
        .await
        .context("failed to register bot commands")?;

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![books, Arc::new(config.clone())])
        .enable_ctrlc_handler()
        .build();

    match mode {
        Mode::Polling => {
            info!("listening with long polling");
            dispatcher.dispatch().await;
        }
        Mode::Webhook(url) => {
            info!("listening for webhook {} on port {}", url, config.webhook_port);
            let addr = ([0, 0, 0, 0], config.webhook_port).into();
            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url))
                .await
                .context("failed to set up the webhook")?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("an error from the update listener"),
                )
                .await;
        }
    }

    // The book keeper stops once the dispatcher's handle is gone.
    drop(dispatcher);
    if let Err(e) = book_keeping.await {
        error!("book keeping task failed: {}", e);
    }
    info!("stopped");
    Ok(())
}
