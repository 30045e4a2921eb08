use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use recipe_vault::Result;
use recipe_vault::commands::{
    QueueAction, RecipeInput, add_recipe, check_consistency, delete_recipe, delete_version,
    edit_recipe, list_recipes, optimize_storage, parse_version_number, queue_command, read_content,
    reindex_recipe, rename_recipe, restore_recipe, revert_recipe, run_processor, search_recipes,
    show_history, show_recipe,
};
use recipe_vault::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "recipe-vault")]
#[command(about = "A versioned recipe store with AI summaries and semantic search")]
#[command(version)]
struct Cli {
    /// Base directory for the database, vectors and config.toml (default: ~/.recipe-vault)
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and processor settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Add a new recipe
    Add {
        /// Short id used to refer to the recipe, e.g. "green-curry"
        short_id: String,
        #[arg(long)]
        title: String,
        /// Markdown file with the recipe content, or "-" for stdin
        #[arg(long)]
        file: PathBuf,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "project")]
        projects: Vec<String>,
    },
    /// Save a new version of a recipe
    Edit {
        /// Recipe id or short id
        recipe: String,
        /// Markdown file with the new content, or "-" for stdin
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        /// Replaces the current tags when given
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Replaces the current projects when given
        #[arg(long = "project")]
        projects: Vec<String>,
    },
    /// Create a new version with the content of an older one
    Revert {
        recipe: String,
        /// Version to restore, e.g. "2" or "v2"
        #[arg(value_parser = parse_version_number)]
        version: i64,
    },
    /// Show the current version of a recipe
    Show { recipe: String },
    /// List the versions of a recipe, newest first
    History { recipe: String },
    /// List recipes
    List {
        /// Include deleted recipes
        #[arg(long)]
        all: bool,
    },
    /// Change the title or short id without creating a version
    Rename {
        recipe: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        short_id: Option<String>,
    },
    /// Soft-delete a recipe
    Delete { recipe: String },
    /// Soft-delete an old version of a recipe
    DeleteVersion {
        recipe: String,
        #[arg(value_parser = parse_version_number)]
        version: i64,
    },
    /// Undo a delete
    Restore { recipe: String },
    /// Search recipes by meaning, falling back to text
    Search {
        query: String,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Inspect and maintain the enrichment queue
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },
    /// Queue the current version of a recipe for enrichment again
    Reindex { recipe: String },
    /// Run the enrichment processor
    Process {
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },
    /// Verify version and embedding invariants
    Check,
    /// Compact the database and the vector store
    Optimize,
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Item counts per status
    Status,
    /// Recently failed items
    Errors,
    /// Items waiting to be processed
    Pending,
    /// Recently completed items
    Completed,
    /// Return a failed item to the queue
    Retry { id: i64 },
    /// Return every failed item to the queue
    RetryAll,
    /// Remove finished items past the retention period
    Cleanup,
}

impl From<QueueCommand> for QueueAction {
    fn from(command: QueueCommand) -> Self {
        match command {
            QueueCommand::Status => Self::Status,
            QueueCommand::Errors => Self::Errors,
            QueueCommand::Pending => Self::Pending,
            QueueCommand::Completed => Self::Completed,
            QueueCommand::Retry { id } => Self::Retry(id),
            QueueCommand::RetryAll => Self::RetryAll,
            QueueCommand::Cleanup => Self::Cleanup,
        }
    }
}

fn recipe_input(
    file: &Path,
    title: Option<String>,
    tags: Vec<String>,
    projects: Vec<String>,
) -> anyhow::Result<RecipeInput> {
    Ok(RecipeInput {
        title,
        content: read_content(file)?,
        tags,
        projects,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base_dir = get_config_dir(cli.base_dir.as_deref())
        .map_err(|e| recipe_vault::RecipeError::Config(e.to_string()))?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&base_dir)?;
            } else {
                run_interactive_config(&base_dir)?;
            }
        }
        Commands::Add {
            short_id,
            title,
            file,
            tags,
            projects,
        } => {
            let input = recipe_input(&file, Some(title), tags, projects)?;
            add_recipe(&base_dir, short_id, input).await?;
        }
        Commands::Edit {
            recipe,
            file,
            title,
            tags,
            projects,
        } => {
            let input = recipe_input(&file, title, tags, projects)?;
            edit_recipe(&base_dir, &recipe, input).await?;
        }
        Commands::Revert { recipe, version } => {
            revert_recipe(&base_dir, &recipe, version).await?;
        }
        Commands::Show { recipe } => {
            show_recipe(&base_dir, &recipe).await?;
        }
        Commands::History { recipe } => {
            show_history(&base_dir, &recipe).await?;
        }
        Commands::List { all } => {
            list_recipes(&base_dir, all).await?;
        }
        Commands::Rename {
            recipe,
            title,
            short_id,
        } => {
            rename_recipe(&base_dir, &recipe, title, short_id).await?;
        }
        Commands::Delete { recipe } => {
            delete_recipe(&base_dir, &recipe).await?;
        }
        Commands::DeleteVersion { recipe, version } => {
            delete_version(&base_dir, &recipe, version).await?;
        }
        Commands::Restore { recipe } => {
            restore_recipe(&base_dir, &recipe).await?;
        }
        Commands::Search {
            query,
            project,
            limit,
        } => {
            search_recipes(&base_dir, &query, project.as_deref(), limit).await?;
        }
        Commands::Queue { action } => {
            queue_command(&base_dir, action.into()).await?;
        }
        Commands::Reindex { recipe } => {
            reindex_recipe(&base_dir, &recipe).await?;
        }
        Commands::Process { once } => {
            run_processor(&base_dir, once).await?;
        }
        Commands::Check => {
            check_consistency(&base_dir).await?;
        }
        Commands::Optimize => {
            optimize_storage(&base_dir).await?;
        }
    }

    Ok(())
}
