//! Storage seam for recipes and their versions.
//!
//! [`VersionStore`](super::VersionStore) owns the versioning rules (hashing, dedup,
//! numbering, revert). Implementations of [`RecipeRepository`] only persist and
//! load rows, but every multi-row write must be atomic.

use async_trait::async_trait;

use crate::Result;
use crate::database::sqlite::{Recipe, RecipeVersion, TextMatch, VersionDraft};

#[async_trait]
pub trait RecipeRepository: Send + Sync {
    async fn get_recipe(&self, id: i64) -> Result<Option<Recipe>>;

    /// Live recipe by short id, compared case-insensitively.
    async fn get_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>>;

    /// Most recently deleted recipe by short id.
    async fn get_deleted_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>>;

    async fn list_recipes(&self, include_deleted: bool) -> Result<Vec<Recipe>>;

    async fn short_id_taken(&self, short_id: &str, exclude_id: Option<i64>) -> Result<bool>;

    async fn title_taken(&self, title: &str, exclude_id: Option<i64>) -> Result<bool>;

    async fn current_version(&self, recipe_id: i64) -> Result<Option<RecipeVersion>>;

    /// Version by number, whether or not it has been soft-deleted.
    async fn version_by_number(
        &self,
        recipe_id: i64,
        version_number: i64,
    ) -> Result<Option<RecipeVersion>>;

    async fn version_by_id(&self, version_id: i64) -> Result<Option<RecipeVersion>>;

    /// Newest first.
    async fn list_versions(
        &self,
        recipe_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<RecipeVersion>>;

    /// Highest version number ever assigned to the recipe, deleted rows included. Zero if none.
    async fn max_version_number(&self, recipe_id: i64) -> Result<i64>;

    /// Creates the recipe and its first, current version atomically.
    /// Fails with `Duplicate` if a live recipe already uses the short id or title.
    async fn insert_recipe(
        &self,
        short_id: &str,
        draft: &VersionDraft,
    ) -> Result<(Recipe, RecipeVersion)>;

    /// Atomically retires `previous_version_id`, inserts `draft` as the new current
    /// version and re-points the recipe at it.
    /// Fails with `ConcurrencyConflict` if `previous_version_id` is no longer current
    /// or the version number has already been taken.
    async fn append_version(
        &self,
        recipe_id: i64,
        previous_version_id: i64,
        draft: &VersionDraft,
    ) -> Result<RecipeVersion>;

    async fn update_metadata(&self, recipe_id: i64, title: &str, short_id: &str)
    -> Result<Recipe>;

    /// Soft-deletes the recipe and all its live versions together; clears the current pointer.
    async fn delete_recipe(&self, recipe_id: i64) -> Result<Recipe>;

    /// Reverses [`delete_recipe`](Self::delete_recipe).
    async fn restore_recipe(&self, recipe_id: i64) -> Result<Recipe>;

    async fn delete_version(&self, version_id: i64) -> Result<()>;

    async fn set_summary(&self, version_id: i64, summary: &str) -> Result<()>;

    /// Case-insensitive substring search over current versions of live recipes,
    /// title matches first, then newest first.
    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<TextMatch>>;
}
