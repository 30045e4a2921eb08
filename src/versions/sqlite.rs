use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::debug;

use super::repository::RecipeRepository;
use crate::database::sqlite::{
    Database, LabelKind, LabelQueries, Recipe, RecipeQueries, RecipeVersion, TextMatch,
    VersionDraft, VersionQueries, VersionRow,
};
use crate::{RecipeError, Result};

/// [`RecipeRepository`] backed by the SQLite metadata database.
#[derive(Debug, Clone)]
pub struct SqliteRecipeRepository {
    database: Database,
}

impl SqliteRecipeRepository {
    #[inline]
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn hydrate(conn: &mut SqliteConnection, row: VersionRow) -> Result<RecipeVersion> {
        let tags = LabelQueries::for_version(conn, LabelKind::Tag, row.id).await?;
        let projects = LabelQueries::for_version(conn, LabelKind::Project, row.id).await?;
        Ok(RecipeVersion::from_row(row, tags, projects))
    }

    async fn hydrate_all(
        conn: &mut SqliteConnection,
        rows: Vec<VersionRow>,
    ) -> Result<Vec<RecipeVersion>> {
        let mut versions = Vec::with_capacity(rows.len());
        for row in rows {
            versions.push(Self::hydrate(conn, row).await?);
        }
        Ok(versions)
    }

    async fn attach_labels(
        conn: &mut SqliteConnection,
        version_id: i64,
        draft: &VersionDraft,
    ) -> Result<()> {
        LabelQueries::attach(conn, LabelKind::Tag, version_id, &draft.tags).await?;
        LabelQueries::attach(conn, LabelKind::Project, version_id, &draft.projects).await?;
        Ok(())
    }

    async fn fetch_recipe(conn: &mut SqliteConnection, recipe_id: i64) -> Result<Recipe> {
        RecipeQueries::get_by_id(conn, recipe_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("recipe {recipe_id}")))
    }
}

fn duplicate_on_conflict(err: RecipeError, what: &str) -> RecipeError {
    if err.is_unique_violation() {
        RecipeError::Duplicate(format!("{what} already in use by another recipe"))
    } else {
        err
    }
}

#[async_trait]
impl RecipeRepository for SqliteRecipeRepository {
    async fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::get_by_id(&mut conn, id).await
    }

    async fn get_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::get_by_short_id(&mut conn, short_id).await
    }

    async fn get_deleted_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::get_deleted_by_short_id(&mut conn, short_id).await
    }

    async fn list_recipes(&self, include_deleted: bool) -> Result<Vec<Recipe>> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::list(&mut conn, include_deleted).await
    }

    async fn short_id_taken(&self, short_id: &str, exclude_id: Option<i64>) -> Result<bool> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::short_id_taken(&mut conn, short_id, exclude_id).await
    }

    async fn title_taken(&self, title: &str, exclude_id: Option<i64>) -> Result<bool> {
        let mut conn = self.database.acquire().await?;
        RecipeQueries::title_taken(&mut conn, title, exclude_id).await
    }

    async fn current_version(&self, recipe_id: i64) -> Result<Option<RecipeVersion>> {
        let mut conn = self.database.acquire().await?;
        match VersionQueries::get_current(&mut conn, recipe_id).await? {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn version_by_number(
        &self,
        recipe_id: i64,
        version_number: i64,
    ) -> Result<Option<RecipeVersion>> {
        let mut conn = self.database.acquire().await?;
        match VersionQueries::get_by_number(&mut conn, recipe_id, version_number).await? {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn version_by_id(&self, version_id: i64) -> Result<Option<RecipeVersion>> {
        let mut conn = self.database.acquire().await?;
        match VersionQueries::get_by_id(&mut conn, version_id).await? {
            Some(row) => Ok(Some(Self::hydrate(&mut conn, row).await?)),
            None => Ok(None),
        }
    }

    async fn list_versions(
        &self,
        recipe_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<RecipeVersion>> {
        let mut conn = self.database.acquire().await?;
        let rows = VersionQueries::list_for_recipe(&mut conn, recipe_id, include_deleted).await?;
        Self::hydrate_all(&mut conn, rows).await
    }

    async fn max_version_number(&self, recipe_id: i64) -> Result<i64> {
        let mut conn = self.database.acquire().await?;
        VersionQueries::max_version_number(&mut conn, recipe_id).await
    }

    async fn insert_recipe(
        &self,
        short_id: &str,
        draft: &VersionDraft,
    ) -> Result<(Recipe, RecipeVersion)> {
        let now = Utc::now().naive_utc();
        let mut tx = self.database.begin().await?;

        let recipe_id = RecipeQueries::insert(&mut tx, short_id, &draft.title, now)
            .await
            .map_err(|e| duplicate_on_conflict(e, "short id or title"))?;
        let version_id = VersionQueries::insert(&mut tx, recipe_id, draft, true, now).await?;
        Self::attach_labels(&mut tx, version_id, draft).await?;
        RecipeQueries::set_current_version(&mut tx, recipe_id, &draft.title, version_id, now)
            .await?;

        let recipe = Self::fetch_recipe(&mut tx, recipe_id).await?;
        let row = VersionQueries::get_by_id(&mut tx, version_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("version {version_id}")))?;
        let version = Self::hydrate(&mut tx, row).await?;

        tx.commit().await?;

        debug!("Created recipe {} ({}) with version {}", recipe.id, short_id, version.id);
        Ok((recipe, version))
    }

    async fn append_version(
        &self,
        recipe_id: i64,
        previous_version_id: i64,
        draft: &VersionDraft,
    ) -> Result<RecipeVersion> {
        let now = Utc::now().naive_utc();
        let mut tx = self.database.begin().await?;

        // The write goes first so the transaction holds the write lock before it reads.
        let retired = VersionQueries::retire_current(&mut tx, recipe_id, previous_version_id).await?;
        if retired == 0 {
            tx.rollback().await?;
            return Err(RecipeError::ConcurrencyConflict { recipe_id });
        }

        let version_id = match VersionQueries::insert(&mut tx, recipe_id, draft, true, now).await {
            Ok(id) => id,
            Err(e) if e.is_unique_violation() => {
                tx.rollback().await?;
                return Err(RecipeError::ConcurrencyConflict { recipe_id });
            }
            Err(e) => return Err(e),
        };
        Self::attach_labels(&mut tx, version_id, draft).await?;
        RecipeQueries::set_current_version(&mut tx, recipe_id, &draft.title, version_id, now)
            .await
            .map_err(|e| duplicate_on_conflict(e, "title"))?;

        let row = VersionQueries::get_by_id(&mut tx, version_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("version {version_id}")))?;
        let version = Self::hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(version)
    }

    async fn update_metadata(
        &self,
        recipe_id: i64,
        title: &str,
        short_id: &str,
    ) -> Result<Recipe> {
        let now = Utc::now().naive_utc();
        let mut tx = self.database.begin().await?;

        RecipeQueries::update_metadata(&mut tx, recipe_id, title, short_id, now)
            .await
            .map_err(|e| duplicate_on_conflict(e, "short id or title"))?;
        let recipe = Self::fetch_recipe(&mut tx, recipe_id).await?;

        tx.commit().await?;
        Ok(recipe)
    }

    async fn delete_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        let now = Utc::now().naive_utc();
        let mut tx = self.database.begin().await?;

        RecipeQueries::mark_deleted(&mut tx, recipe_id, now).await?;
        let versions = VersionQueries::soft_delete_for_recipe(&mut tx, recipe_id, now).await?;
        let recipe = Self::fetch_recipe(&mut tx, recipe_id).await?;

        tx.commit().await?;

        debug!("Soft-deleted recipe {} and {} versions", recipe_id, versions);
        Ok(recipe)
    }

    async fn restore_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        let now = Utc::now().naive_utc();
        let mut tx = self.database.begin().await?;

        let recipe = Self::fetch_recipe(&mut tx, recipe_id).await?;
        let Some(deleted_at) = recipe.deleted_at else {
            tx.rollback().await?;
            return Ok(recipe);
        };

        RecipeQueries::mark_restored(&mut tx, recipe_id, now)
            .await
            .map_err(|e| duplicate_on_conflict(e, "short id or title"))?;
        VersionQueries::restore_for_recipe(&mut tx, recipe_id, deleted_at).await?;
        let recipe = Self::fetch_recipe(&mut tx, recipe_id).await?;

        tx.commit().await?;
        Ok(recipe)
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut conn = self.database.acquire().await?;
        VersionQueries::soft_delete(&mut conn, version_id, now).await?;
        Ok(())
    }

    async fn set_summary(&self, version_id: i64, summary: &str) -> Result<()> {
        let mut conn = self.database.acquire().await?;
        let updated = VersionQueries::set_summary(&mut conn, version_id, summary).await?;
        if updated == 0 {
            return Err(RecipeError::NotFound(format!("version {version_id}")));
        }
        Ok(())
    }

    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<TextMatch>> {
        let mut conn = self.database.acquire().await?;
        let rows = VersionQueries::text_search(&mut conn, query, limit, project).await?;

        let mut matches = Vec::with_capacity(rows.len());
        for (row, short_id, title_match) in rows {
            let version = Self::hydrate(&mut conn, row).await?;
            matches.push(TextMatch {
                short_id,
                version,
                title_match,
            });
        }
        Ok(matches)
    }
}
