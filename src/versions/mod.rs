// Versioned recipe storage
// Content-hash dedup, monotonic version numbering and append-only revert on top of a repository


pub mod memory;
pub mod repository;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::database::sqlite::{
    NewRecipe, NewVersion, Recipe, RecipeDetails, RecipeMetadataUpdate, RecipeVersion, TextMatch,
    VersionDraft,
};
use crate::{RecipeError, Result};

pub use memory::InMemoryRecipeRepository;
pub use repository::RecipeRepository;
pub use sqlite::SqliteRecipeRepository;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_CONTENT_CHARS: usize = 200_000;
pub const MAX_SHORT_ID_CHARS: usize = 64;
pub const MAX_LABEL_CHARS: usize = 64;

/// Attempts made by [`VersionStore::save`] before a numbering conflict is reported.
const MAX_SAVE_ATTEMPTS: u32 = 3;

/// Digest used to detect no-op saves: hex SHA-256 of `title + ":" + content`.
#[inline]
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(RecipeError::Validation("title must not be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(RecipeError::Validation(format!(
            "title must be at most {MAX_TITLE_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_content(content: &str) -> Result<()> {
    if content.chars().count() > MAX_CONTENT_CHARS {
        return Err(RecipeError::Validation(format!(
            "content must be at most {MAX_CONTENT_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_short_id(short_id: &str) -> Result<String> {
    let trimmed = short_id.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_SHORT_ID_CHARS {
        return Err(RecipeError::Validation(format!(
            "short id must be 1 to {MAX_SHORT_ID_CHARS} characters"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(RecipeError::Validation(format!(
            "short id '{trimmed}' may only contain letters, digits, '-' and '_'"
        )));
    }
    Ok(trimmed.to_string())
}

fn normalize_labels(kind: &str, labels: &[String]) -> Result<Vec<String>> {
    let mut normalized: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(RecipeError::Validation(format!("{kind} names must not be empty")));
        }
        if trimmed.chars().count() > MAX_LABEL_CHARS {
            return Err(RecipeError::Validation(format!(
                "{kind} '{trimmed}' is longer than {MAX_LABEL_CHARS} characters"
            )));
        }
        if !normalized.iter().any(|n| n.eq_ignore_ascii_case(trimmed)) {
            normalized.push(trimmed.to_string());
        }
    }
    Ok(normalized)
}

/// Validated title, content and labels for one version.
struct CheckedVersion {
    title: String,
    content: String,
    tags: Vec<String>,
    projects: Vec<String>,
}

impl CheckedVersion {
    fn new(title: &str, content: &str, tags: &[String], projects: &[String]) -> Result<Self> {
        let title = validate_title(title)?;
        validate_content(content)?;
        Ok(Self {
            title,
            content: content.to_string(),
            tags: normalize_labels("tag", tags)?,
            projects: normalize_labels("project", projects)?,
        })
    }

    fn into_draft(self, version_number: i64) -> VersionDraft {
        VersionDraft {
            version_number,
            content_hash: content_hash(&self.title, &self.content),
            title: self.title,
            content: self.content,
            tags: self.tags,
            projects: self.projects,
        }
    }
}

/// Owns the recipe/version data model and its version-chain rules.
pub struct VersionStore {
    repository: Arc<dyn RecipeRepository>,
    recipe_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

/// Holds one recipe's write lock. The map entry is dropped with the last holder.
struct RecipeLockGuard<'a> {
    locks: &'a Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
    recipe_id: i64,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for RecipeLockGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.recipe_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.recipe_id);
        }
    }
}

impl VersionStore {
    #[inline]
    pub fn new(repository: Arc<dyn RecipeRepository>) -> Self {
        Self {
            repository,
            recipe_locks: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn repository(&self) -> &Arc<dyn RecipeRepository> {
        &self.repository
    }

    /// Per-recipe lock serialising writes to one recipe.
    async fn lock_recipe(&self, recipe_id: i64) -> RecipeLockGuard<'_> {
        let lock = {
            let mut locks = self
                .recipe_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(recipe_id).or_default())
        };
        RecipeLockGuard {
            locks: &self.recipe_locks,
            recipe_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    async fn live_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        match self.repository.get_recipe(recipe_id).await? {
            Some(recipe) if !recipe.is_deleted() => Ok(recipe),
            _ => Err(RecipeError::NotFound(format!("recipe {recipe_id}"))),
        }
    }

    /// Creates a recipe together with its first, current version.
    #[inline]
    pub async fn create(&self, recipe: &NewRecipe) -> Result<(Recipe, RecipeVersion)> {
        let short_id = validate_short_id(&recipe.short_id)?;
        let checked = CheckedVersion::new(
            &recipe.title,
            &recipe.content,
            &recipe.tags,
            &recipe.projects,
        )?;

        if self.repository.short_id_taken(&short_id, None).await? {
            return Err(RecipeError::Duplicate(format!(
                "a recipe with short id '{short_id}' already exists"
            )));
        }
        if self.repository.title_taken(&checked.title, None).await? {
            return Err(RecipeError::Duplicate(format!(
                "a recipe titled '{}' already exists",
                checked.title
            )));
        }

        let draft = checked.into_draft(1);
        let (recipe, version) = self.repository.insert_recipe(&short_id, &draft).await?;

        info!("Created recipe '{}' ({})", recipe.title, recipe.short_id);
        Ok((recipe, version))
    }

    /// Appends a new current version, or fails with `NoChange` if title and content are unchanged.
    #[inline]
    pub async fn save(&self, recipe_id: i64, version: &NewVersion) -> Result<RecipeVersion> {
        let checked = CheckedVersion::new(
            &version.title,
            &version.content,
            &version.tags,
            &version.projects,
        )?;

        let _guard = self.lock_recipe(recipe_id).await;

        let mut attempt = 1;
        loop {
            match self.try_save(recipe_id, &checked).await {
                Err(RecipeError::ConcurrencyConflict { .. }) if attempt < MAX_SAVE_ATTEMPTS => {
                    warn!(
                        "Version numbering conflict on recipe {} (attempt {}), retrying",
                        recipe_id, attempt
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_save(&self, recipe_id: i64, checked: &CheckedVersion) -> Result<RecipeVersion> {
        let recipe = self.live_recipe(recipe_id).await?;
        let current = self
            .repository
            .current_version(recipe_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("current version of recipe {recipe_id}")))?;

        if content_hash(&checked.title, &checked.content) == current.content_hash {
            return Err(RecipeError::NoChange { recipe_id });
        }

        if !recipe.title.eq_ignore_ascii_case(&checked.title)
            && self
                .repository
                .title_taken(&checked.title, Some(recipe_id))
                .await?
        {
            return Err(RecipeError::Duplicate(format!(
                "a recipe titled '{}' already exists",
                checked.title
            )));
        }

        let next = self.repository.max_version_number(recipe_id).await? + 1;
        let draft = VersionDraft {
            version_number: next,
            title: checked.title.clone(),
            content: checked.content.clone(),
            content_hash: content_hash(&checked.title, &checked.content),
            tags: checked.tags.clone(),
            projects: checked.projects.clone(),
        };

        let version = self
            .repository
            .append_version(recipe_id, current.id, &draft)
            .await?;

        debug!(
            "Recipe {} advanced from v{} to v{}",
            recipe_id, current.version_number, version.version_number
        );
        Ok(version)
    }

    /// Creates a new version copying an earlier one. Soft-deleted versions can be reverted to.
    #[inline]
    pub async fn revert(&self, recipe_id: i64, version_number: i64) -> Result<RecipeVersion> {
        self.live_recipe(recipe_id).await?;
        let target = self
            .repository
            .version_by_number(recipe_id, version_number)
            .await?
            .ok_or_else(|| {
                RecipeError::NotFound(format!("version v{version_number} of recipe {recipe_id}"))
            })?;

        let copy = NewVersion {
            title: target.title,
            content: target.content,
            tags: target.tags,
            projects: target.projects,
        };
        let version = self.save(recipe_id, &copy).await?;

        info!(
            "Reverted recipe {} to v{} as v{}",
            recipe_id, version_number, version.version_number
        );
        Ok(version)
    }

    /// Renames a recipe without creating a version.
    #[inline]
    pub async fn update_metadata(
        &self,
        recipe_id: i64,
        update: &RecipeMetadataUpdate,
    ) -> Result<Recipe> {
        let _guard = self.lock_recipe(recipe_id).await;
        let recipe = self.live_recipe(recipe_id).await?;

        let title = match &update.title {
            Some(title) => validate_title(title)?,
            None => recipe.title.clone(),
        };
        let short_id = match &update.short_id {
            Some(short_id) => validate_short_id(short_id)?,
            None => recipe.short_id.clone(),
        };

        if title == recipe.title && short_id == recipe.short_id {
            return Ok(recipe);
        }

        if self
            .repository
            .short_id_taken(&short_id, Some(recipe_id))
            .await?
        {
            return Err(RecipeError::Duplicate(format!(
                "a recipe with short id '{short_id}' already exists"
            )));
        }
        if self.repository.title_taken(&title, Some(recipe_id)).await? {
            return Err(RecipeError::Duplicate(format!(
                "a recipe titled '{title}' already exists"
            )));
        }

        self.repository
            .update_metadata(recipe_id, &title, &short_id)
            .await
    }

    /// Soft-deletes the recipe and its versions.
    #[inline]
    pub async fn delete_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        let _guard = self.lock_recipe(recipe_id).await;

        self.live_recipe(recipe_id).await?;
        let recipe = self.repository.delete_recipe(recipe_id).await?;

        info!("Deleted recipe '{}' ({})", recipe.title, recipe.short_id);
        Ok(recipe)
    }

    /// Undoes [`delete_recipe`](Self::delete_recipe). Restoring a live recipe is a no-op.
    #[inline]
    pub async fn restore(&self, recipe_id: i64) -> Result<Recipe> {
        let _guard = self.lock_recipe(recipe_id).await;

        let recipe = self
            .repository
            .get_recipe(recipe_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("recipe {recipe_id}")))?;
        if !recipe.is_deleted() {
            return Ok(recipe);
        }

        if self.repository.short_id_taken(&recipe.short_id, None).await? {
            return Err(RecipeError::Duplicate(format!(
                "short id '{}' is now used by another recipe",
                recipe.short_id
            )));
        }
        if self.repository.title_taken(&recipe.title, None).await? {
            return Err(RecipeError::Duplicate(format!(
                "title '{}' is now used by another recipe",
                recipe.title
            )));
        }

        let recipe = self.repository.restore_recipe(recipe_id).await?;
        info!("Restored recipe '{}' ({})", recipe.title, recipe.short_id);
        Ok(recipe)
    }

    /// Soft-deletes a single non-current version. Its number stays reserved.
    #[inline]
    pub async fn delete_version(&self, recipe_id: i64, version_number: i64) -> Result<()> {
        let _guard = self.lock_recipe(recipe_id).await;

        self.live_recipe(recipe_id).await?;
        let version = match self
            .repository
            .version_by_number(recipe_id, version_number)
            .await?
        {
            Some(version) if version.deleted_at.is_none() => version,
            _ => {
                return Err(RecipeError::NotFound(format!(
                    "version v{version_number} of recipe {recipe_id}"
                )));
            }
        };
        if version.is_current {
            return Err(RecipeError::Validation(format!(
                "v{version_number} is the current version and cannot be deleted"
            )));
        }

        self.repository.delete_version(version.id).await
    }

    #[inline]
    pub async fn read(&self, recipe_id: i64) -> Result<RecipeDetails> {
        let recipe = self.live_recipe(recipe_id).await?;
        let current = self.repository.current_version(recipe.id).await?;
        Ok(RecipeDetails { recipe, current })
    }

    /// Case-insensitive lookup of a live recipe.
    #[inline]
    pub async fn read_by_short_id(&self, short_id: &str) -> Result<RecipeDetails> {
        let recipe = self
            .repository
            .get_recipe_by_short_id(short_id.trim())
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("recipe '{short_id}'")))?;
        let current = self.repository.current_version(recipe.id).await?;
        Ok(RecipeDetails { recipe, current })
    }

    /// Finds a live recipe by numeric id or short id. Numeric input is tried as an id first.
    #[inline]
    pub async fn resolve(&self, id_or_short_id: &str) -> Result<Recipe> {
        let key = id_or_short_id.trim();
        if let Ok(id) = key.parse::<i64>() {
            if let Some(recipe) = self.repository.get_recipe(id).await? {
                if !recipe.is_deleted() {
                    return Ok(recipe);
                }
            }
        }

        self.repository
            .get_recipe_by_short_id(key)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("recipe '{key}'")))
    }

    /// Like [`resolve`](Self::resolve) but also finds deleted recipes.
    #[inline]
    pub async fn resolve_any(&self, id_or_short_id: &str) -> Result<Recipe> {
        let key = id_or_short_id.trim();
        if let Ok(id) = key.parse::<i64>() {
            if let Some(recipe) = self.repository.get_recipe(id).await? {
                return Ok(recipe);
            }
        }

        if let Some(recipe) = self.repository.get_recipe_by_short_id(key).await? {
            return Ok(recipe);
        }
        self.repository
            .get_deleted_recipe_by_short_id(key)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("recipe '{key}'")))
    }

    #[inline]
    pub async fn get_version(&self, recipe_id: i64, version_number: i64) -> Result<RecipeVersion> {
        match self
            .repository
            .version_by_number(recipe_id, version_number)
            .await?
        {
            Some(version) if version.deleted_at.is_none() => Ok(version),
            _ => Err(RecipeError::NotFound(format!(
                "version v{version_number} of recipe {recipe_id}"
            ))),
        }
    }

    #[inline]
    pub async fn get_version_by_id(&self, version_id: i64) -> Result<RecipeVersion> {
        self.repository
            .version_by_id(version_id)
            .await?
            .ok_or_else(|| RecipeError::NotFound(format!("version {version_id}")))
    }

    /// Live versions, newest first.
    #[inline]
    pub async fn list_versions(&self, recipe_id: i64) -> Result<Vec<RecipeVersion>> {
        if self.repository.get_recipe(recipe_id).await?.is_none() {
            return Err(RecipeError::NotFound(format!("recipe {recipe_id}")));
        }
        self.repository.list_versions(recipe_id, false).await
    }

    #[inline]
    pub async fn list_recipes(&self, include_deleted: bool) -> Result<Vec<Recipe>> {
        self.repository.list_recipes(include_deleted).await
    }

    #[inline]
    pub async fn set_summary(&self, version_id: i64, summary: &str) -> Result<()> {
        self.repository.set_summary(version_id, summary).await
    }

    #[inline]
    pub async fn text_search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<TextMatch>> {
        self.repository.text_search(query, limit, project).await
    }
}
