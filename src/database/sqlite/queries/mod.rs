
use super::models::*;
use crate::Result;
use chrono::NaiveDateTime;
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

const RECIPE_COLUMNS: &str =
    "id, short_id, title, current_version_id, created_at, updated_at, deleted_at";

const VERSION_COLUMNS: &str = "id, recipe_id, version_number, title, content, content_hash, \
                               is_current, ai_summary, created_at, deleted_at";

pub struct RecipeQueries;

impl RecipeQueries {
    #[inline]
    pub async fn insert(
        conn: &mut SqliteConnection,
        short_id: &str,
        title: &str,
        now: NaiveDateTime,
    ) -> Result<i64> {
        let id = sqlx::query(
            "INSERT INTO recipes (short_id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(short_id)
        .bind(title)
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<Recipe>> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?");
        let recipe = sqlx::query_as::<_, Recipe>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(recipe)
    }

    /// Live recipe with the given short id, compared case-insensitively.
    #[inline]
    pub async fn get_by_short_id(
        conn: &mut SqliteConnection,
        short_id: &str,
    ) -> Result<Option<Recipe>> {
        let sql = format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes \
             WHERE short_id = ? COLLATE NOCASE AND deleted_at IS NULL"
        );
        let recipe = sqlx::query_as::<_, Recipe>(&sql)
            .bind(short_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(recipe)
    }

    /// Most recently deleted recipe with the given short id.
    #[inline]
    pub async fn get_deleted_by_short_id(
        conn: &mut SqliteConnection,
        short_id: &str,
    ) -> Result<Option<Recipe>> {
        let sql = format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes \
             WHERE short_id = ? COLLATE NOCASE AND deleted_at IS NOT NULL \
             ORDER BY deleted_at DESC LIMIT 1"
        );
        let recipe = sqlx::query_as::<_, Recipe>(&sql)
            .bind(short_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(recipe)
    }

    /// Live recipe other than `exclude_id` that already uses this short id.
    #[inline]
    pub async fn short_id_taken(
        conn: &mut SqliteConnection,
        short_id: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recipes \
             WHERE short_id = ? COLLATE NOCASE AND deleted_at IS NULL AND id != COALESCE(?, -1)",
        )
        .bind(short_id)
        .bind(exclude_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(taken > 0)
    }

    /// Live recipe other than `exclude_id` that already uses this title.
    #[inline]
    pub async fn title_taken(
        conn: &mut SqliteConnection,
        title: &str,
        exclude_id: Option<i64>,
    ) -> Result<bool> {
        let taken: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM recipes \
             WHERE title = ? COLLATE NOCASE AND deleted_at IS NULL AND id != COALESCE(?, -1)",
        )
        .bind(title)
        .bind(exclude_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(taken > 0)
    }

    #[inline]
    pub async fn set_current_version(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        title: &str,
        version_id: i64,
        now: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE recipes SET title = ?, current_version_id = ?, updated_at = ? WHERE id = ?",
        )
        .bind(title)
        .bind(version_id)
        .bind(now)
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    #[inline]
    pub async fn update_metadata(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        title: &str,
        short_id: &str,
        now: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query("UPDATE recipes SET title = ?, short_id = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(short_id)
            .bind(now)
            .bind(recipe_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    #[inline]
    pub async fn mark_deleted(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        now: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE recipes SET deleted_at = ?, current_version_id = NULL, updated_at = ? \
             WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Clears the deletion mark and re-points the recipe at its current version.
    #[inline]
    pub async fn mark_restored(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        now: NaiveDateTime,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recipes
            SET deleted_at = NULL,
                updated_at = ?,
                current_version_id = (
                    SELECT id FROM recipe_versions WHERE recipe_id = ? AND is_current = 1
                )
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(recipe_id)
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    #[inline]
    pub async fn list(conn: &mut SqliteConnection, include_deleted: bool) -> Result<Vec<Recipe>> {
        let sql = if include_deleted {
            format!("SELECT {RECIPE_COLUMNS} FROM recipes ORDER BY updated_at DESC, id DESC")
        } else {
            format!(
                "SELECT {RECIPE_COLUMNS} FROM recipes WHERE deleted_at IS NULL \
                 ORDER BY updated_at DESC, id DESC"
            )
        };

        let recipes = sqlx::query_as::<_, Recipe>(&sql)
            .fetch_all(&mut *conn)
            .await?;

        Ok(recipes)
    }
}

#[derive(Debug, FromRow)]
struct TextSearchRow {
    #[sqlx(flatten)]
    version: VersionRow,
    short_id: String,
}

pub struct VersionQueries;

impl VersionQueries {
    #[inline]
    pub async fn insert(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        draft: &VersionDraft,
        is_current: bool,
        now: NaiveDateTime,
    ) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO recipe_versions
                (recipe_id, version_number, title, content, content_hash, is_current, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(recipe_id)
        .bind(draft.version_number)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(&draft.content_hash)
        .bind(is_current)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .last_insert_rowid();

        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(conn: &mut SqliteConnection, id: i64) -> Result<Option<VersionRow>> {
        let sql = format!("SELECT {VERSION_COLUMNS} FROM recipe_versions WHERE id = ?");
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row)
    }

    #[inline]
    pub async fn get_current(
        conn: &mut SqliteConnection,
        recipe_id: i64,
    ) -> Result<Option<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM recipe_versions WHERE recipe_id = ? AND is_current = 1"
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(recipe_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row)
    }

    /// Looks up a version by number regardless of its deletion state.
    #[inline]
    pub async fn get_by_number(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        version_number: i64,
    ) -> Result<Option<VersionRow>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM recipe_versions WHERE recipe_id = ? AND version_number = ?"
        );
        let row = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(recipe_id)
            .bind(version_number)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row)
    }

    /// Highest number ever assigned, soft-deleted rows included.
    #[inline]
    pub async fn max_version_number(conn: &mut SqliteConnection, recipe_id: i64) -> Result<i64> {
        let max: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version_number), 0) FROM recipe_versions WHERE recipe_id = ?",
        )
        .bind(recipe_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(max)
    }

    #[inline]
    pub async fn list_for_recipe(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<VersionRow>> {
        let filter = if include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM recipe_versions WHERE recipe_id = ?{filter} \
             ORDER BY version_number DESC"
        );
        let rows = sqlx::query_as::<_, VersionRow>(&sql)
            .bind(recipe_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows)
    }

    /// Flips `is_current` off for the given version, but only if it is still current.
    #[inline]
    pub async fn retire_current(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        version_id: i64,
    ) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE recipe_versions SET is_current = 0 \
             WHERE id = ? AND recipe_id = ? AND is_current = 1",
        )
        .bind(version_id)
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(affected)
    }

    #[inline]
    pub async fn set_summary(
        conn: &mut SqliteConnection,
        version_id: i64,
        summary: &str,
    ) -> Result<u64> {
        let affected = sqlx::query("UPDATE recipe_versions SET ai_summary = ? WHERE id = ?")
            .bind(summary)
            .bind(version_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        Ok(affected)
    }

    #[inline]
    pub async fn soft_delete(
        conn: &mut SqliteConnection,
        version_id: i64,
        now: NaiveDateTime,
    ) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE recipe_versions SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(version_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(affected)
    }

    #[inline]
    pub async fn soft_delete_for_recipe(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        now: NaiveDateTime,
    ) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE recipe_versions SET deleted_at = ? WHERE recipe_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(recipe_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(affected)
    }

    /// Restores the versions that were deleted together with their recipe.
    /// Versions deleted individually beforehand keep their own timestamp and stay deleted.
    #[inline]
    pub async fn restore_for_recipe(
        conn: &mut SqliteConnection,
        recipe_id: i64,
        deleted_at: NaiveDateTime,
    ) -> Result<u64> {
        let affected = sqlx::query(
            "UPDATE recipe_versions SET deleted_at = NULL WHERE recipe_id = ? AND deleted_at = ?",
        )
        .bind(recipe_id)
        .bind(deleted_at)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(affected)
    }

    /// Case-insensitive substring match over current versions of live recipes.
    /// Title hits sort ahead of body-only hits, then newest first.
    /// SQLite's `lower()` only folds ASCII, so matching runs on this side.
    #[inline]
    pub async fn text_search(
        conn: &mut SqliteConnection,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<(VersionRow, String, bool)>> {
        let project_filter = if project.is_some() {
            r#"
              AND EXISTS (
                  SELECT 1 FROM version_projects vp
                  JOIN projects p ON p.id = vp.project_id
                  WHERE vp.version_id = v.id AND p.name = ? COLLATE NOCASE
              )"#
        } else {
            ""
        };

        let sql = format!(
            r#"
            SELECT v.id, v.recipe_id, v.version_number, v.title, v.content, v.content_hash,
                   v.is_current, v.ai_summary, v.created_at, v.deleted_at,
                   r.short_id
            FROM recipe_versions v
            JOIN recipes r ON r.current_version_id = v.id
            WHERE r.deleted_at IS NULL
              AND v.deleted_at IS NULL
              AND v.is_current = 1{project_filter}
            ORDER BY v.created_at DESC, v.id DESC
            "#
        );

        let mut q = sqlx::query_as::<_, TextSearchRow>(&sql);
        if let Some(project) = project {
            q = q.bind(project);
        }
        let rows = q.fetch_all(&mut *conn).await?;

        let needle = query.to_lowercase();
        let mut matches: Vec<(VersionRow, String, bool)> = rows
            .into_iter()
            .filter_map(|row| {
                let title_match = row.version.title.to_lowercase().contains(&needle);
                if !title_match && !row.version.content.to_lowercase().contains(&needle) {
                    return None;
                }
                Some((row.version, row.short_id, title_match))
            })
            .collect();
        // Stable, so recency order survives within each group.
        matches.sort_by_key(|(_, _, title_match)| !title_match);
        matches.truncate(limit);

        debug!("Text search for {:?} matched {} versions", query, matches.len());
        Ok(matches)
    }
}

/// Many-to-many label tables attached to versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Tag,
    Project,
}

impl LabelKind {
    fn tables(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Tag => ("tags", "version_tags", "tag_id"),
            Self::Project => ("projects", "version_projects", "project_id"),
        }
    }
}

pub struct LabelQueries;

impl LabelQueries {
    /// Attaches labels by name, creating label rows that do not exist yet.
    #[inline]
    pub async fn attach(
        conn: &mut SqliteConnection,
        kind: LabelKind,
        version_id: i64,
        names: &[String],
    ) -> Result<()> {
        let (table, join_table, fk) = kind.tables();
        let insert_label = format!("INSERT OR IGNORE INTO {table} (name) VALUES (?)");
        let select_label = format!("SELECT id FROM {table} WHERE name = ? COLLATE NOCASE");
        let link = format!("INSERT OR IGNORE INTO {join_table} (version_id, {fk}) VALUES (?, ?)");

        for name in names {
            sqlx::query(&insert_label)
                .bind(name)
                .execute(&mut *conn)
                .await?;
            let label_id: i64 = sqlx::query_scalar(&select_label)
                .bind(name)
                .fetch_one(&mut *conn)
                .await?;
            sqlx::query(&link)
                .bind(version_id)
                .bind(label_id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    #[inline]
    pub async fn for_version(
        conn: &mut SqliteConnection,
        kind: LabelKind,
        version_id: i64,
    ) -> Result<Vec<String>> {
        let (table, join_table, fk) = kind.tables();
        let sql = format!(
            "SELECT l.name FROM {table} l JOIN {join_table} j ON j.{fk} = l.id \
             WHERE j.version_id = ? ORDER BY l.name"
        );
        let names = sqlx::query_scalar::<_, String>(&sql)
            .bind(version_id)
            .fetch_all(&mut *conn)
            .await?;

        Ok(names)
    }
}
