#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub short_id: String,
    pub title: String,
    pub current_version_id: Option<i64>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl Recipe {
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Version row as stored; tags and projects live in join tables.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct VersionRow {
    pub id: i64,
    pub recipe_id: i64,
    pub version_number: i64,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub is_current: bool,
    pub ai_summary: Option<String>,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeVersion {
    pub id: i64,
    pub recipe_id: i64,
    pub version_number: i64,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub is_current: bool,
    pub ai_summary: Option<String>,
    pub tags: Vec<String>,
    pub projects: Vec<String>,
    pub created_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl RecipeVersion {
    #[inline]
    pub fn from_row(row: VersionRow, tags: Vec<String>, projects: Vec<String>) -> Self {
        Self {
            id: row.id,
            recipe_id: row.recipe_id,
            version_number: row.version_number,
            title: row.title,
            content: row.content,
            content_hash: row.content_hash,
            is_current: row.is_current,
            ai_summary: row.ai_summary,
            tags,
            projects,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        }
    }

    /// Display label such as "v3".
    #[inline]
    pub fn version_label(&self) -> String {
        format!("v{}", self.version_number)
    }

    #[inline]
    pub fn in_project(&self, project: &str) -> bool {
        self.projects.iter().any(|p| p.eq_ignore_ascii_case(project))
    }
}

/// Fully prepared version ready to be written; hash and number already computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDraft {
    pub version_number: i64,
    pub title: String,
    pub content: String,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecipe {
    pub short_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVersion {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RecipeMetadataUpdate {
    pub title: Option<String>,
    pub short_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipeDetails {
    pub recipe: Recipe,
    pub current: Option<RecipeVersion>,
}

/// Current version that matched a substring query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMatch {
    pub short_id: String,
    pub version: RecipeVersion,
    pub title_match: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub title: String,
    pub short_id: String,
    pub version_id: i64,
    pub status: QueueStatus,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl QueueItem {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none() && self.status.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            QueueStatus::Pending => write!(f, "Pending"),
            QueueStatus::Processing => write!(f, "Processing"),
            QueueStatus::Completed => write!(f, "Completed"),
            QueueStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub title: String,
    pub short_id: String,
    pub version_id: i64,
}
