// Consistency module
// Cross-checks the version chain of every live recipe against itself and the embedding store


use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::Result;
use crate::database::sqlite::Recipe;
use crate::embeddings::EmbeddingStore;
use crate::versions::VersionStore;

/// One broken invariant on one recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// No live version carries the current flag.
    NoCurrentVersion,
    /// More than one live version carries the current flag.
    MultipleCurrentVersions { version_numbers: Vec<i64> },
    /// `current_version_id` points somewhere other than the flagged version.
    PointerMismatch {
        pointer: Option<i64>,
        flagged: Option<i64>,
    },
    DuplicateVersionNumber { version_number: i64 },
    MultipleCurrentEmbeddings { version_ids: Vec<i64> },
}

impl fmt::Display for IssueKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCurrentVersion => write!(f, "no current version"),
            Self::MultipleCurrentVersions { version_numbers } => {
                write!(f, "multiple current versions {version_numbers:?}")
            }
            Self::PointerMismatch { pointer, flagged } => write!(
                f,
                "current pointer {pointer:?} disagrees with flagged version {flagged:?}"
            ),
            Self::DuplicateVersionNumber { version_number } => {
                write!(f, "version number v{version_number} used more than once")
            }
            Self::MultipleCurrentEmbeddings { version_ids } => {
                write!(f, "multiple current embeddings for versions {version_ids:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeIssue {
    pub recipe_id: i64,
    pub short_id: String,
    pub kind: IssueKind,
}

/// Report of a consistency check between the version chains and the embedding store
#[derive(Debug, Clone, Default)]
pub struct ConsistencyReport {
    pub recipes_checked: usize,
    pub versions_checked: usize,
    pub current_embeddings: usize,
    /// Current embeddings for a version that is no longer current. Expected while
    /// a newer version waits for enrichment, so not counted as an issue.
    pub stale_embeddings: usize,
    pub issues: Vec<RecipeIssue>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Vault is consistent: {} recipes, {} versions, {} current embeddings",
                self.recipes_checked, self.versions_checked, self.current_embeddings
            )
        } else {
            format!(
                "Vault has inconsistencies: {} issues across {} recipes",
                self.total_issues(),
                self.recipes_checked
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.issues.len()
    }
}

/// Checks the current-version invariants of the vault
pub struct ConsistencyValidator {
    versions: Arc<VersionStore>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl ConsistencyValidator {
    #[inline]
    pub fn new(versions: Arc<VersionStore>, embeddings: Arc<dyn EmbeddingStore>) -> Self {
        Self {
            versions,
            embeddings,
        }
    }

    /// Walk every live recipe and the current embeddings.
    #[inline]
    pub async fn check(&self) -> Result<ConsistencyReport> {
        info!("Starting consistency check");

        let recipes = self.versions.list_recipes(false).await?;
        let mut report = ConsistencyReport {
            recipes_checked: recipes.len(),
            ..ConsistencyReport::default()
        };

        let mut current_by_recipe: HashMap<i64, Option<i64>> = HashMap::new();
        for recipe in &recipes {
            let flagged = self.check_recipe(recipe, &mut report).await?;
            current_by_recipe.insert(recipe.id, flagged);
        }

        self.check_embeddings(&recipes, &current_by_recipe, &mut report)
            .await?;

        report.is_consistent = report.issues.is_empty();
        if report.is_consistent {
            info!("{}", report.summary());
        } else {
            warn!("{}", report.summary());
            log_consistency_issues(&report);
        }

        Ok(report)
    }

    /// Returns the id of the single flagged current version, if there is exactly one.
    async fn check_recipe(
        &self,
        recipe: &Recipe,
        report: &mut ConsistencyReport,
    ) -> Result<Option<i64>> {
        let versions = self
            .versions
            .repository()
            .list_versions(recipe.id, true)
            .await?;
        report.versions_checked += versions.len();

        let mut push = |kind: IssueKind| {
            report.issues.push(RecipeIssue {
                recipe_id: recipe.id,
                short_id: recipe.short_id.clone(),
                kind,
            });
        };

        let mut seen_numbers: BTreeMap<i64, usize> = BTreeMap::new();
        for version in &versions {
            *seen_numbers.entry(version.version_number).or_default() += 1;
        }
        for (version_number, count) in seen_numbers {
            if count > 1 {
                push(IssueKind::DuplicateVersionNumber { version_number });
            }
        }

        let flagged: Vec<_> = versions
            .iter()
            .filter(|version| version.is_current && version.deleted_at.is_none())
            .collect();
        let flagged_id = match flagged.as_slice() {
            [] => {
                push(IssueKind::NoCurrentVersion);
                None
            }
            [only] => Some(only.id),
            many => {
                let mut version_numbers: Vec<i64> =
                    many.iter().map(|version| version.version_number).collect();
                version_numbers.sort_unstable();
                push(IssueKind::MultipleCurrentVersions { version_numbers });
                None
            }
        };

        if flagged.len() <= 1 && recipe.current_version_id != flagged_id {
            push(IssueKind::PointerMismatch {
                pointer: recipe.current_version_id,
                flagged: flagged_id,
            });
        }

        debug!(
            "Checked {} ({} versions, current {:?})",
            recipe.short_id,
            versions.len(),
            flagged_id
        );
        Ok(flagged_id)
    }

    async fn check_embeddings(
        &self,
        recipes: &[Recipe],
        current_by_recipe: &HashMap<i64, Option<i64>>,
        report: &mut ConsistencyReport,
    ) -> Result<()> {
        let entries = self.embeddings.list_current().await?;
        report.current_embeddings = entries.len();

        let mut by_recipe: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
        for entry in &entries {
            by_recipe
                .entry(entry.recipe_id)
                .or_default()
                .push(entry.version_id);
        }

        for (recipe_id, mut version_ids) in by_recipe {
            let flagged = current_by_recipe.get(&recipe_id).copied().flatten();
            report.stale_embeddings += version_ids
                .iter()
                .filter(|version_id| flagged != Some(**version_id))
                .count();

            if version_ids.len() > 1 {
                version_ids.sort_unstable();
                let short_id = recipes
                    .iter()
                    .find(|recipe| recipe.id == recipe_id)
                    .map_or_else(|| recipe_id.to_string(), |recipe| recipe.short_id.clone());
                report.issues.push(RecipeIssue {
                    recipe_id,
                    short_id,
                    kind: IssueKind::MultipleCurrentEmbeddings { version_ids },
                });
            }
        }

        Ok(())
    }
}

fn log_consistency_issues(report: &ConsistencyReport) {
    for issue in &report.issues {
        warn!(
            "Recipe {} ({}): {}",
            issue.short_id, issue.recipe_id, issue.kind
        );
    }
    if report.stale_embeddings > 0 {
        warn!(
            "{} current embeddings belong to superseded versions; run the processor to refresh them",
            report.stale_embeddings
        );
    }
}
