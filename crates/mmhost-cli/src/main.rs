//! mmhost CLI
//!
//! Command-line interface for interacting with the mmhost daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// mmhost - multi-model inference host
#[derive(Parser, Debug)]
#[command(name = "mmhost")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8080", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a model artifact
    Register {
        /// Model identifier (e.g., Chicago_IL or housing/denver:v2)
        model: String,

        /// Artifact location (file:// path, absolute path or http(s) URL)
        location: String,

        /// Expected SHA-256 of the artifact
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Remove a model from the inventory
    Deregister {
        /// Model identifier
        model: String,
    },

    /// List registered models
    Models,

    /// Run a prediction
    Predict {
        /// Model identifier
        model: String,

        /// Feature values in order
        #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
        features: Vec<f64>,
    },

    /// Show resident models
    Cache,

    /// Drop a model from the cache
    Invalidate {
        /// Model identifier
        model: String,
    },

    /// Show system status
    Top,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Register {
            model,
            location,
            sha256,
        } => {
            commands::register(&client, model, location, sha256).await?;
        }
        Commands::Deregister { model } => {
            commands::deregister(&client, &model).await?;
        }
        Commands::Models => {
            commands::models(&client).await?;
        }
        Commands::Predict { model, features } => {
            commands::predict(&client, model, features).await?;
        }
        Commands::Cache => {
            commands::cache(&client).await?;
        }
        Commands::Invalidate { model } => {
            commands::invalidate(&client, &model).await?;
        }
        Commands::Top => {
            commands::top(&client).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_predict_accepts_negative_features() {
        let cli = Cli::try_parse_from(["mmhost", "predict", "Tulsa_OK", "1.5", "-2", "0"]).unwrap();
        match cli.command {
            Commands::Predict { model, features } => {
                assert_eq!(model, "Tulsa_OK");
                assert_eq!(features, vec![1.5, -2.0, 0.0]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_predict_requires_features() {
        assert!(Cli::try_parse_from(["mmhost", "predict", "Tulsa_OK"]).is_err());
    }
}
