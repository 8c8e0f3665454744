use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use homedir::my_home;
use inquire::error::InquireError;
use tracing_subscriber::EnvFilter;

mod catalog;
mod cli;
mod config;
mod display;
mod errors;
mod semantic;
#[cfg(test)]
mod tests;
mod web;

use cli::Command;
use config::{Config, Overrides};
use errors::SearchError;
use semantic::SearchService;

fn base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var("CATMAP_BASE_PATH") {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("could not determine home directory")?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/catmap"))
}

fn load_config(overrides: &Overrides) -> anyhow::Result<Config> {
    let mut config = Config::load_with(&base_path()?)?;
    config.apply_env()?;
    config.apply_overrides(overrides)?;
    Ok(config)
}

/// Print a readable message for `err` and turn it into the exit error.
fn report(err: SearchError) -> anyhow::Error {
    eprintln!("{}", display::user_message(&err));
    anyhow::Error::new(err)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = load_config(&Overrides::from(&args.search))?;
    let threshold = config.search.score_threshold;

    let service = Arc::new(SearchService::from_config(&config));

    match args.command {
        Command::Search { query, json } => {
            let query = query.join(" ");
            let hits = service.run_query(&query).map_err(report)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else {
                print!("{}", display::render_hits(&hits, threshold));
            }
            Ok(())
        }

        Command::Interactive {} => {
            service.initialize().map_err(report)?;
            println!(
                "{} categories loaded. Empty line or Ctrl+C to quit.",
                service.indexed_count()
            );

            loop {
                let query = match inquire::Text::new("What are you looking for?").prompt() {
                    Ok(query) => query,
                    Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                        return Ok(())
                    }
                    Err(err) => bail!("An error occurred: {}", err),
                };

                if query.trim().is_empty() {
                    return Ok(());
                }

                // keep prompting after a failed query; the next one may succeed
                match service.run_query(&query) {
                    Ok(hits) => println!("{}", display::render_hits(&hits, threshold)),
                    Err(err) => eprintln!("{}\n", display::user_message(&err)),
                }
            }
        }

        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            web::start_daemon(service, &bind)
        }

        Command::Catalog { json } => {
            let records = catalog::load(&config.catalog_path)
                .map_err(report)?
                .into_records();

            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", display::render_catalog(&records));
            }
            Ok(())
        }
    }
}
