//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::retrieval::SearchMode;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    about = "Hybrid keyword and embedding search over a local document index",
    long_about = "Quarry indexes documents with their embeddings into a local store and answers \
                  free-text queries using keyword matching, vector similarity, or a weighted \
                  hybrid of both."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index documents from a JSON file (an array of documents)
    Index {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Search the index
    Search {
        /// Search query text
        query: String,

        /// Scoring mode: keyword, vector, hybrid or semantic
        #[arg(short, long, default_value = "hybrid")]
        mode: SearchMode,

        /// Maximum number of results to return (0 = configured default)
        #[arg(short, long, default_value = "0")]
        limit: usize,

        /// Restrict to content categories (repeatable)
        #[arg(long)]
        category: Vec<String>,

        /// Restrict to file kinds (repeatable)
        #[arg(long)]
        kind: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show index status
    Status {
        /// Show status in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Compute missing embeddings and reload the index
    Refresh,

    /// Recompute every embedding (after a model change)
    Rebuild,

    /// Delete documents by id
    Delete {
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "quarry", "search", "azure functions", "--mode", "keyword", "--limit", "5",
            "--category", "text", "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                query,
                mode,
                limit,
                category,
                json,
                ..
            } => {
                assert_eq!(query, "azure functions");
                assert_eq!(mode, SearchMode::Keyword);
                assert_eq!(limit, 5);
                assert_eq!(category, vec!["text"]);
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["quarry", "search", "x", "--mode", "fuzzy"]).is_err());
    }

    #[test]
    fn test_delete_requires_ids() {
        assert!(Cli::try_parse_from(["quarry", "delete"]).is_err());
        let cli = Cli::try_parse_from(["quarry", "delete", "a", "b"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { ids } if ids.len() == 2));
    }
}
