//! Storage of subscribers, templates and their variations.
//!
//! The SQLite connection is owned by a single blocking task running
//! [`run_book_keeping`]. Handlers never touch it directly: they send a
//! [`Message`] through a [`Books`] handle and await the reply on the oneshot
//! channel the message carries.

use anyhow::Context;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

type ResponseChannel<T> = oneshot::Sender<anyhow::Result<T>>;

pub type TemplateId = i64;

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subscribers (
    user_id INTEGER PRIMARY KEY,
    username TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    joined_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS templates_owner ON templates(owner_id);

CREATE TABLE IF NOT EXISTS variations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    template_id INTEGER NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    UNIQUE(template_id, text)
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddTemplate {
    Added(TemplateId),
    LimitReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSummary {
    pub id: TemplateId,
    pub text: String,
    pub variations: usize,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariationsPage {
    pub template_id: TemplateId,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateExport {
    pub id: TemplateId,
    pub template: String,
    pub created_at: String,
    pub variations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub subscribers: usize,
    pub active_subscribers: usize,
    pub templates: usize,
    pub variations: usize,
}

#[derive(Debug)]
pub enum Message {
    Subscribe {
        user_id: i64,
        username: Option<String>,
        response_tx: ResponseChannel<bool>,
    },
    Unsubscribe {
        user_id: i64,
        response_tx: ResponseChannel<bool>,
    },
    ActiveSubscribers {
        response_tx: ResponseChannel<Vec<i64>>,
    },
    AddTemplate {
        owner_id: i64,
        text: String,
        variations: Vec<String>,
        limit: usize,
        response_tx: ResponseChannel<AddTemplate>,
    },
    Templates {
        owner_id: i64,
        response_tx: ResponseChannel<Vec<TemplateSummary>>,
    },
    VariationsPage {
        owner_id: i64,
        template_id: TemplateId,
        page: usize,
        page_size: usize,
        response_tx: ResponseChannel<Option<VariationsPage>>,
    },
    Export {
        owner_id: i64,
        template_id: TemplateId,
        response_tx: ResponseChannel<Option<TemplateExport>>,
    },
    DeleteTemplate {
        owner_id: i64,
        template_id: TemplateId,
        response_tx: ResponseChannel<bool>,
    },
    Stats {
        response_tx: ResponseChannel<Stats>,
    },
}

pub struct BookKeeper {
    conn: Connection,
}

impl BookKeeper {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize database schema")?;
        Ok(BookKeeper { conn })
    }

    pub fn subscribe(&self, user_id: i64, username: Option<&str>) -> anyhow::Result<bool> {
        let was_active: Option<bool> = self
            .conn
            .query_row(
                "SELECT active FROM subscribers WHERE user_id = ?1",
                params![user_id],
                |r| r.get(0),
            )
            .optional()?;
        self.conn.execute(
            "INSERT INTO subscribers (user_id, username, active) VALUES (?1, ?2, 1)
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username, active = 1",
            params![user_id, username],
        )?;
        Ok(was_active != Some(true))
    }

    pub fn unsubscribe(&self, user_id: i64) -> anyhow::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE subscribers SET active = 0 WHERE user_id = ?1 AND active = 1",
            params![user_id],
        )?;
        Ok(changed > 0)
    }

    pub fn active_subscribers(&self) -> anyhow::Result<Vec<i64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM subscribers WHERE active = 1 ORDER BY user_id")?;
        let ids = stmt
            .query_map([], |r| r.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    pub fn add_template(
        &mut self,
        owner_id: i64,
        text: &str,
        variations: &[String],
        limit: usize,
    ) -> anyhow::Result<AddTemplate> {
        let tx = self.conn.transaction()?;
        let owned: i64 = tx.query_row(
            "SELECT COUNT(*) FROM templates WHERE owner_id = ?1",
            params![owner_id],
            |r| r.get(0),
        )?;
        if owned as usize >= limit {
            return Ok(AddTemplate::LimitReached);
        }

        tx.execute(
            "INSERT INTO templates (owner_id, text) VALUES (?1, ?2)",
            params![owner_id, text],
        )?;
        let id = tx.last_insert_rowid();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO variations (template_id, position, text) VALUES (?1, ?2, ?3)",
            )?;
            for (position, variation) in variations.iter().enumerate() {
                stmt.execute(params![id, position as i64, variation])?;
            }
        }
        tx.commit()?;
        Ok(AddTemplate::Added(id))
    }

    pub fn templates(&self, owner_id: i64) -> anyhow::Result<Vec<TemplateSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.text, t.created_at,
                    (SELECT COUNT(*) FROM variations v WHERE v.template_id = t.id)
             FROM templates t
             WHERE t.owner_id = ?1
             ORDER BY t.id DESC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], |r| {
                Ok(TemplateSummary {
                    id: r.get(0)?,
                    text: r.get(1)?,
                    created_at: r.get(2)?,
                    variations: r.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn owns(&self, owner_id: i64, template_id: TemplateId) -> anyhow::Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM templates WHERE id = ?1 AND owner_id = ?2",
                params![template_id, owner_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn variations_page(
        &self,
        owner_id: i64,
        template_id: TemplateId,
        page: usize,
        page_size: usize,
    ) -> anyhow::Result<Option<VariationsPage>> {
        if !self.owns(owner_id, template_id)? {
            return Ok(None);
        }
        let page_size = page_size.max(1);
        let total = self.conn.query_row(
            "SELECT COUNT(*) FROM variations WHERE template_id = ?1",
            params![template_id],
            |r| r.get::<_, i64>(0),
        )? as usize;
        let total_pages = ((total + page_size - 1) / page_size).max(1);
        let page = page.clamp(1, total_pages);

        let mut stmt = self.conn.prepare(
            "SELECT text FROM variations WHERE template_id = ?1
             ORDER BY position LIMIT ?2 OFFSET ?3",
        )?;
        let items = stmt
            .query_map(
                params![
                    template_id,
                    page_size as i64,
                    ((page - 1) * page_size) as i64
                ],
                |r| r.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(VariationsPage {
            template_id,
            page,
            total_pages,
            total,
            items,
        }))
    }

    pub fn export(
        &self,
        owner_id: i64,
        template_id: TemplateId,
    ) -> anyhow::Result<Option<TemplateExport>> {
        let head: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT text, created_at FROM templates WHERE id = ?1 AND owner_id = ?2",
                params![template_id, owner_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((template, created_at)) = head else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT text FROM variations WHERE template_id = ?1 ORDER BY position")?;
        let variations = stmt
            .query_map(params![template_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(Some(TemplateExport {
            id: template_id,
            template,
            created_at,
            variations,
        }))
    }

    pub fn delete_template(&self, owner_id: i64, template_id: TemplateId) -> anyhow::Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM templates WHERE id = ?1 AND owner_id = ?2",
            params![template_id, owner_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn stats(&self) -> anyhow::Result<Stats> {
        let count = |sql: &str| -> anyhow::Result<usize> {
            Ok(self.conn.query_row(sql, [], |r| r.get::<_, i64>(0))? as usize)
        };
        Ok(Stats {
            subscribers: count("SELECT COUNT(*) FROM subscribers")?,
            active_subscribers: count("SELECT COUNT(*) FROM subscribers WHERE active = 1")?,
            templates: count("SELECT COUNT(*) FROM templates")?,
            variations: count("SELECT COUNT(*) FROM variations")?,
        })
    }

    fn handle(&mut self, message: Message) {
        // A dropped receiver only means the caller went away.
        match message {
            Message::Subscribe {
                user_id,
                username,
                response_tx,
            } => {
                let _ = response_tx.send(self.subscribe(user_id, username.as_deref()));
            }
            Message::Unsubscribe {
                user_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.unsubscribe(user_id));
            }
            Message::ActiveSubscribers { response_tx } => {
                let _ = response_tx.send(self.active_subscribers());
            }
            Message::AddTemplate {
                owner_id,
                text,
                variations,
                limit,
                response_tx,
            } => {
                let _ = response_tx.send(self.add_template(owner_id, &text, &variations, limit));
            }
            Message::Templates {
                owner_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.templates(owner_id));
            }
            Message::VariationsPage {
                owner_id,
                template_id,
                page,
                page_size,
                response_tx,
            } => {
                let _ = response_tx.send(self.variations_page(owner_id, template_id, page, page_size));
            }
            Message::Export {
                owner_id,
                template_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.export(owner_id, template_id));
            }
            Message::DeleteTemplate {
                owner_id,
                template_id,
                response_tx,
            } => {
                let _ = response_tx.send(self.delete_template(owner_id, template_id));
            }
            Message::Stats { response_tx } => {
                let _ = response_tx.send(self.stats());
            }
        }
    }
}

/// Serves messages until every [`Books`] handle is dropped. Blocks the
/// current thread, so run it with `spawn_blocking`.
pub fn run_book_keeping(mut book_keeper: BookKeeper, mut rx: mpsc::Receiver<Message>) {
    info!("book keeping started");
    while let Some(message) = rx.blocking_recv() {
        book_keeper.handle(message);
    }
    info!("book keeping stopped");
}

/// Cloneable async front of the book keeper.
#[derive(Debug, Clone)]
pub struct Books {
    tx: mpsc::Sender<Message>,
}

impl Books {
    pub fn spawn(book_keeper: BookKeeper) -> (Books, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::task::spawn_blocking(move || run_book_keeping(book_keeper, rx));
        (Books { tx }, handle)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(ResponseChannel<T>) -> Message,
    ) -> anyhow::Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(make(response_tx))
            .await
            .context("book keeper is gone")?;
        response_rx.await.map_err(|e| {
            error!("book keeper dropped a request: {}", e);
            anyhow::anyhow!("book keeper dropped the request")
        })?
    }

    pub async fn subscribe(&self, user_id: i64, username: Option<String>) -> anyhow::Result<bool> {
        self.request(|response_tx| Message::Subscribe {
            user_id,
            username,
            response_tx,
        })
        .await
    }

    pub async fn unsubscribe(&self, user_id: i64) -> anyhow::Result<bool> {
        self.request(|response_tx| Message::Unsubscribe {
            user_id,
            response_tx,
        })
        .await
    }

    pub async fn active_subscribers(&self) -> anyhow::Result<Vec<i64>> {
        self.request(|response_tx| Message::ActiveSubscribers { response_tx })
            .await
    }

    pub async fn add_template(
        &self,
        owner_id: i64,
        text: String,
        variations: Vec<String>,
        limit: usize,
    ) -> anyhow::Result<AddTemplate> {
        self.request(|response_tx| Message::AddTemplate {
            owner_id,
            text,
            variations,
            limit,
            response_tx,
        })
        .await
    }

    pub async fn templates(&self, owner_id: i64) -> anyhow::Result<Vec<TemplateSummary>> {
        self.request(|response_tx| Message::Templates {
            owner_id,
            response_tx,
        })
        .await
    }

    pub async fn variations_page(
        &self,
        owner_id: i64,
        template_id: TemplateId,
        page: usize,
        page_size: usize,
    ) -> anyhow::Result<Option<VariationsPage>> {
        self.request(|response_tx| Message::VariationsPage {
            owner_id,
            template_id,
            page,
            page_size,
            response_tx,
        })
        .await
    }

    pub async fn export(
        &self,
        owner_id: i64,
        template_id: TemplateId,
    ) -> anyhow::Result<Option<TemplateExport>> {
        self.request(|response_tx| Message::Export {
            owner_id,
            template_id,
            response_tx,
        })
        .await
    }

    pub async fn delete_template(
        &self,
        owner_id: i64,
        template_id: TemplateId,
    ) -> anyhow::Result<bool> {
        self.request(|response_tx| Message::DeleteTemplate {
            owner_id,
            template_id,
            response_tx,
        })
        .await
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        self.request(|response_tx| Message::Stats { response_tx })
            .await
    }
}
