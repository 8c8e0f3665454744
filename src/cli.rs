use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::config::Overrides;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(flatten)]
    pub search: SearchArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for config.yaml and CATMAP_* variables.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Catalog CSV file
    #[clap(long, global = true)]
    pub catalog: Option<PathBuf>,

    /// Number of ranked candidates before filtering
    #[clap(short = 'k', long, global = true)]
    pub top_k: Option<usize>,

    /// Confidence threshold between 0.0 and 1.0
    #[clap(short, long, global = true)]
    pub threshold: Option<f32>,

    /// Embedding model (e.g. all-MiniLM-L6-v2, bge-small-en-v1.5)
    #[clap(long, global = true)]
    pub model: Option<String>,
}

impl From<&SearchArgs> for Overrides {
    fn from(args: &SearchArgs) -> Self {
        Self {
            catalog_path: args.catalog.clone(),
            top_k: args.top_k,
            score_threshold: args.threshold,
            model: args.model.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Find the categories matching a query
    Search {
        /// Free-text query, e.g. "help opening jars"
        #[clap(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Print hits as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Prompt for queries until an empty line or Ctrl+C
    Interactive {},
    /// Start the HTTP API.
    Serve {
        /// Listen address, overrides server.bind
        #[clap(long)]
        bind: Option<String>,
    },
    /// Print the loaded catalog
    Catalog {
        /// Print records as JSON
        #[clap(long, default_value = "false")]
        json: bool,
    },
}
