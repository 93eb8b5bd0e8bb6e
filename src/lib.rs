pub mod book_keeping;
pub mod bot;
pub mod broadcast;
pub mod config;
pub mod script_check;
pub mod variation;

pub mod prelude {
    pub use super::book_keeping::{BookKeeper, Books};
    pub use super::bot::{schema, Command};
    pub use super::config::{Config, Mode};
    pub use log::{error, info};
    pub use std::sync::Arc;
    pub use teloxide::{prelude::*, utils::command::BotCommands};
}

pub use prelude::*;
