use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecipeError>;

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("No changes to save for recipe {recipe_id}")]
    NoChange { recipe_id: i64 },

    #[error("Concurrent modification of recipe {recipe_id}")]
    ConcurrencyConflict { recipe_id: i64 },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RecipeError {
    /// True when the error is a unique-constraint violation reported by SQLite.
    #[inline]
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }
}

pub mod commands;
pub mod config;
pub mod consistency;
pub mod database;
pub mod embeddings;
pub mod enrichment;
pub mod queue;
pub mod search;
pub mod service;
pub mod versions;
