use quarry::cli::{Cli, Commands, ConfigAction};
use quarry::config::{Config, ConfigValidator};
use quarry::document::Document;
use quarry::engine::Engine;
use quarry::error::{QuarryError, Result};
use quarry::retrieval::{SearchMode, SearchRequest, SearchResponse};
use std::future::Future;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Index { file } => {
            let config = load_config(cli.config, cli.profile)?;
            with_engine(&config, |engine| async move { cmd_index(&engine, &file).await })?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            category,
            kind,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let request = SearchRequest::new(query, mode)
                .with_max_results(limit)
                .with_categories(category)
                .with_file_kinds(kind);
            with_engine(&config, |engine| async move {
                cmd_search(&engine, request, json).await
            })?;
        }
        Commands::Status { json } => {
            let config = load_config(cli.config, cli.profile)?;
            with_engine(&config, |engine| async move { cmd_status(&engine, json) })?;
        }
        Commands::Refresh => {
            let config = load_config(cli.config, cli.profile)?;
            with_engine(&config, |engine| async move {
                let generation = engine.force_refresh().await?;
                println!("✓ Index refreshed at generation {}", generation);
                Ok(())
            })?;
        }
        Commands::Rebuild => {
            let config = load_config(cli.config, cli.profile)?;
            with_engine(&config, |engine| async move {
                let generation = engine.rebuild().await?;
                println!("✓ Embeddings rebuilt at generation {}", generation);
                Ok(())
            })?;
        }
        Commands::Delete { ids } => {
            let config = load_config(cli.config, cli.profile)?;
            with_engine(&config, |engine| async move {
                let removed = engine.delete(&ids).await?;
                println!("✓ Deleted {} of {} documents", removed, ids.len());
                Ok(())
            })?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "quarry=debug" } else { "quarry=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Run `command` against an engine on a fresh runtime, shutting it down afterwards
fn with_engine<F, Fut>(config: &Config, command: F) -> Result<()>
where
    F: FnOnce(std::sync::Arc<Engine>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Runtime::new().map_err(|e| QuarryError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;

    runtime.block_on(async {
        let engine = std::sync::Arc::new(Engine::from_config(config).await?);
        let result = command(engine.clone()).await;
        engine.shutdown().await;
        result
    })
}

async fn cmd_index(engine: &Engine, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file).map_err(|e| QuarryError::Io {
        source: e,
        context: format!("Failed to read documents file: {:?}", file),
    })?;

    let documents: Vec<Document> = match serde_json::from_str(&content) {
        Ok(documents) => documents,
        Err(_) => {
            let single: Document = serde_json::from_str(&content).map_err(|e| QuarryError::Json {
                source: e,
                context: format!("Failed to parse documents from {:?}", file),
            })?;
            vec![single]
        }
    };

    let submitted = documents.len();
    let outcome = engine.upsert(documents).await?;

    println!("✓ Accepted {} of {} documents", outcome.accepted, submitted);
    if let Some(generation) = outcome.generation {
        println!("  Generation: {}", generation);
    }
    if !outcome.without_embedding.is_empty() {
        println!(
            "  Indexed without embedding (keyword only): {}",
            outcome.without_embedding.join(", ")
        );
    }
    for error in &outcome.errors {
        println!("  ✗ {:?}: {}", error.id, error.reason);
    }

    Ok(())
}

async fn cmd_search(engine: &Engine, request: SearchRequest, json: bool) -> Result<()> {
    let response = engine.search(request).await?;

    if json {
        let text = serde_json::to_string_pretty(&response).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize search response".to_string(),
        })?;
        println!("{}", text);
        return Ok(());
    }

    print_response(&response);
    Ok(())
}

fn print_response(response: &SearchResponse) {
    if response.degraded {
        println!(
            "⚠ Embedding provider unavailable, showing {} results",
            response.mode_used
        );
    }

    println!(
        "{} results ({} shown, {} mode, {}ms)",
        response.total_results,
        response.results.len(),
        response.mode_used,
        response.execution_time_ms
    );

    for (rank, result) in response.results.iter().enumerate() {
        let title = if result.title.is_empty() {
            &result.document_id
        } else {
            &result.title
        };
        println!(
            "\n{:>2}. {} [{:.3}]",
            rank + 1,
            title,
            result.score
        );
        println!(
            "    id: {}  category: {}  modified: {}",
            result.document_id,
            result.content_category,
            result.modified_at.format("%Y-%m-%d %H:%M:%S")
        );
        if response.mode_used != SearchMode::Keyword {
            println!(
                "    keyword: {:.3}  vector: {:.3}",
                result.keyword_score, result.vector_score
            );
        }
        if !result.summary.is_empty() {
            println!("    {}", result.summary);
        }
    }
}

fn cmd_status(engine: &Engine, json: bool) -> Result<()> {
    let status = engine.status();

    if json {
        let text = serde_json::to_string_pretty(&status).map_err(|e| QuarryError::Json {
            source: e,
            context: "Failed to serialize status".to_string(),
        })?;
        println!("{}", text);
        return Ok(());
    }

    println!("Quarry Status");
    println!("=============");
    println!("\nStore: {}", status.backend);
    println!("Model: {}", status.model);
    println!("Generation: {}", status.generation);
    println!("Documents: {}", status.document_count);
    println!("Embeddings: {}", status.embedding_count);
    if let Some(at) = status.last_refresh_at {
        println!("Last refresh: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = status.last_refresh_error {
        println!("Last refresh error: {}", error);
    }

    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let text = toml::to_string_pretty(&config)?;
            println!("{}", text);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            ConfigValidator::validate(&config)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| QuarryError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'quarry config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
