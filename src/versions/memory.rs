//! In-memory [`RecipeRepository`] for tests and ephemeral use.
//!
//! Mirrors the SQLite constraints: live short ids and titles are unique
//! case-insensitively, version numbers are unique per recipe, and at most one
//! version per recipe is current.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::repository::RecipeRepository;
use crate::database::sqlite::{Recipe, RecipeVersion, TextMatch, VersionDraft};
use crate::{RecipeError, Result};

#[derive(Default)]
struct State {
    recipes: BTreeMap<i64, Recipe>,
    versions: BTreeMap<i64, RecipeVersion>,
    next_recipe_id: i64,
    next_version_id: i64,
}

impl State {
    fn live_conflict(&self, short_id: &str, title: &str, exclude_id: Option<i64>) -> bool {
        self.recipes.values().any(|r| {
            Some(r.id) != exclude_id
                && !r.is_deleted()
                && (r.short_id.eq_ignore_ascii_case(short_id) || r.title.eq_ignore_ascii_case(title))
        })
    }

    fn recipe_mut(&mut self, recipe_id: i64) -> Result<&mut Recipe> {
        self.recipes
            .get_mut(&recipe_id)
            .ok_or_else(|| RecipeError::NotFound(format!("recipe {recipe_id}")))
    }

    fn push_version(&mut self, recipe_id: i64, draft: &VersionDraft) -> RecipeVersion {
        self.next_version_id += 1;
        let version = RecipeVersion {
            id: self.next_version_id,
            recipe_id,
            version_number: draft.version_number,
            title: draft.title.clone(),
            content: draft.content.clone(),
            content_hash: draft.content_hash.clone(),
            is_current: true,
            ai_summary: None,
            tags: draft.tags.clone(),
            projects: draft.projects.clone(),
            created_at: Utc::now().naive_utc(),
            deleted_at: None,
        };
        self.versions.insert(version.id, version.clone());
        version
    }
}

#[derive(Default)]
pub struct InMemoryRecipeRepository {
    state: RwLock<State>,
}

impl InMemoryRecipeRepository {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipeRepository for InMemoryRecipeRepository {
    async fn get_recipe(&self, id: i64) -> Result<Option<Recipe>> {
        Ok(self.state.read().await.recipes.get(&id).cloned())
    }

    async fn get_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>> {
        let state = self.state.read().await;
        Ok(state
            .recipes
            .values()
            .find(|r| !r.is_deleted() && r.short_id.eq_ignore_ascii_case(short_id))
            .cloned())
    }

    async fn get_deleted_recipe_by_short_id(&self, short_id: &str) -> Result<Option<Recipe>> {
        let state = self.state.read().await;
        Ok(state
            .recipes
            .values()
            .filter(|r| r.is_deleted() && r.short_id.eq_ignore_ascii_case(short_id))
            .max_by_key(|r| (r.deleted_at, r.id))
            .cloned())
    }

    async fn list_recipes(&self, include_deleted: bool) -> Result<Vec<Recipe>> {
        let state = self.state.read().await;
        let mut recipes: Vec<Recipe> = state
            .recipes
            .values()
            .filter(|r| include_deleted || !r.is_deleted())
            .cloned()
            .collect();
        recipes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        Ok(recipes)
    }

    async fn short_id_taken(&self, short_id: &str, exclude_id: Option<i64>) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.recipes.values().any(|r| {
            Some(r.id) != exclude_id && !r.is_deleted() && r.short_id.eq_ignore_ascii_case(short_id)
        }))
    }

    async fn title_taken(&self, title: &str, exclude_id: Option<i64>) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.recipes.values().any(|r| {
            Some(r.id) != exclude_id && !r.is_deleted() && r.title.eq_ignore_ascii_case(title)
        }))
    }

    async fn current_version(&self, recipe_id: i64) -> Result<Option<RecipeVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .find(|v| v.recipe_id == recipe_id && v.is_current)
            .cloned())
    }

    async fn version_by_number(
        &self,
        recipe_id: i64,
        version_number: i64,
    ) -> Result<Option<RecipeVersion>> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .find(|v| v.recipe_id == recipe_id && v.version_number == version_number)
            .cloned())
    }

    async fn version_by_id(&self, version_id: i64) -> Result<Option<RecipeVersion>> {
        Ok(self.state.read().await.versions.get(&version_id).cloned())
    }

    async fn list_versions(
        &self,
        recipe_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<RecipeVersion>> {
        let state = self.state.read().await;
        let mut versions: Vec<RecipeVersion> = state
            .versions
            .values()
            .filter(|v| v.recipe_id == recipe_id && (include_deleted || v.deleted_at.is_none()))
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    async fn max_version_number(&self, recipe_id: i64) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .versions
            .values()
            .filter(|v| v.recipe_id == recipe_id)
            .map(|v| v.version_number)
            .max()
            .unwrap_or(0))
    }

    async fn insert_recipe(
        &self,
        short_id: &str,
        draft: &VersionDraft,
    ) -> Result<(Recipe, RecipeVersion)> {
        let mut state = self.state.write().await;
        if state.live_conflict(short_id, &draft.title, None) {
            return Err(RecipeError::Duplicate(
                "short id or title already in use by another recipe".to_string(),
            ));
        }

        let now = Utc::now().naive_utc();
        state.next_recipe_id += 1;
        let recipe_id = state.next_recipe_id;
        let version = state.push_version(recipe_id, draft);
        let recipe = Recipe {
            id: recipe_id,
            short_id: short_id.to_string(),
            title: draft.title.clone(),
            current_version_id: Some(version.id),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.recipes.insert(recipe_id, recipe.clone());

        Ok((recipe, version))
    }

    async fn append_version(
        &self,
        recipe_id: i64,
        previous_version_id: i64,
        draft: &VersionDraft,
    ) -> Result<RecipeVersion> {
        let mut state = self.state.write().await;

        let still_current = state
            .versions
            .get(&previous_version_id)
            .is_some_and(|v| v.recipe_id == recipe_id && v.is_current);
        let number_taken = state
            .versions
            .values()
            .any(|v| v.recipe_id == recipe_id && v.version_number == draft.version_number);
        if !still_current || number_taken {
            return Err(RecipeError::ConcurrencyConflict { recipe_id });
        }

        let short_id = state.recipe_mut(recipe_id)?.short_id.clone();
        if state
            .recipes
            .values()
            .any(|r| r.id != recipe_id && !r.is_deleted() && r.title.eq_ignore_ascii_case(&draft.title))
        {
            return Err(RecipeError::Duplicate(format!(
                "title already in use by another recipe than '{short_id}'"
            )));
        }

        if let Some(previous) = state.versions.get_mut(&previous_version_id) {
            previous.is_current = false;
        }
        let version = state.push_version(recipe_id, draft);

        let recipe = state.recipe_mut(recipe_id)?;
        recipe.title = draft.title.clone();
        recipe.current_version_id = Some(version.id);
        recipe.updated_at = Utc::now().naive_utc();

        Ok(version)
    }

    async fn update_metadata(
        &self,
        recipe_id: i64,
        title: &str,
        short_id: &str,
    ) -> Result<Recipe> {
        let mut state = self.state.write().await;
        if state.live_conflict(short_id, title, Some(recipe_id)) {
            return Err(RecipeError::Duplicate(
                "short id or title already in use by another recipe".to_string(),
            ));
        }

        let recipe = state.recipe_mut(recipe_id)?;
        recipe.title = title.to_string();
        recipe.short_id = short_id.to_string();
        recipe.updated_at = Utc::now().naive_utc();
        Ok(recipe.clone())
    }

    async fn delete_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        let mut state = self.state.write().await;
        let now = Utc::now().naive_utc();

        let recipe = state.recipe_mut(recipe_id)?;
        recipe.deleted_at = Some(now);
        recipe.current_version_id = None;
        recipe.updated_at = now;
        let recipe = recipe.clone();

        for version in state.versions.values_mut() {
            if version.recipe_id == recipe_id && version.deleted_at.is_none() {
                version.deleted_at = Some(now);
            }
        }

        Ok(recipe)
    }

    async fn restore_recipe(&self, recipe_id: i64) -> Result<Recipe> {
        let mut state = self.state.write().await;

        let snapshot = state.recipe_mut(recipe_id)?.clone();
        let Some(deleted_at) = snapshot.deleted_at else {
            return Ok(snapshot);
        };
        if state.live_conflict(&snapshot.short_id, &snapshot.title, Some(recipe_id)) {
            return Err(RecipeError::Duplicate(
                "short id or title already in use by another recipe".to_string(),
            ));
        }

        let mut current_id = None;
        for version in state.versions.values_mut() {
            if version.recipe_id != recipe_id {
                continue;
            }
            if version.deleted_at == Some(deleted_at) {
                version.deleted_at = None;
            }
            if version.is_current {
                current_id = Some(version.id);
            }
        }

        let recipe = state.recipe_mut(recipe_id)?;
        recipe.deleted_at = None;
        recipe.current_version_id = current_id;
        recipe.updated_at = Utc::now().naive_utc();
        Ok(recipe.clone())
    }

    async fn delete_version(&self, version_id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(version) = state.versions.get_mut(&version_id) {
            if version.deleted_at.is_none() {
                version.deleted_at = Some(Utc::now().naive_utc());
            }
        }
        Ok(())
    }

    async fn set_summary(&self, version_id: i64, summary: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let version = state
            .versions
            .get_mut(&version_id)
            .ok_or_else(|| RecipeError::NotFound(format!("version {version_id}")))?;
        version.ai_summary = Some(summary.to_string());
        Ok(())
    }

    async fn text_search(
        &self,
        query: &str,
        limit: usize,
        project: Option<&str>,
    ) -> Result<Vec<TextMatch>> {
        let needle = query.to_lowercase();
        let state = self.state.read().await;

        let mut matches: Vec<TextMatch> = state
            .recipes
            .values()
            .filter(|r| !r.is_deleted())
            .filter_map(|recipe| {
                let version = state.versions.get(&recipe.current_version_id?)?;
                if version.deleted_at.is_some() || !version.is_current {
                    return None;
                }
                if project.is_some_and(|p| !version.in_project(p)) {
                    return None;
                }
                let title_match = version.title.to_lowercase().contains(&needle);
                if !title_match && !version.content.to_lowercase().contains(&needle) {
                    return None;
                }
                Some(TextMatch {
                    short_id: recipe.short_id.clone(),
                    version: version.clone(),
                    title_match,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.title_match
                .cmp(&a.title_match)
                .then(b.version.created_at.cmp(&a.version.created_at))
                .then(b.version.id.cmp(&a.version.id))
        });
        matches.truncate(limit);
        Ok(matches)
    }
}
