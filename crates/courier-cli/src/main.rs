//! Courier CLI - upload build artifacts to object storage.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Upload build artifacts to object storage")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "courier.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files and directories
    Upload {
        /// Files or directories to upload
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Key prefix for uploaded objects
        #[arg(short, long, default_value = "")]
        prefix: String,

        /// Worker threads (overrides courier.toml)
        #[arg(long)]
        pool_size: Option<usize>,
    },
}

/// Filter directive applied on top of `RUST_LOG`.
const DEFAULT_DIRECTIVE: &str = "courier=info";

#[tokio::main]
async fn main() {
    let directive = match DEFAULT_DIRECTIVE.parse::<Directive>() {
        Ok(directive) => directive,
        Err(e) => {
            eprintln!("Error: invalid log directive {DEFAULT_DIRECTIVE}: {e}");
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Upload {
            paths,
            prefix,
            pool_size,
        } => {
            commands::upload::run(commands::upload::UploadArgs {
                config: cli.config,
                paths,
                prefix,
                pool_size,
            })
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_upload() {
        let cli = Cli::try_parse_from([
            "courier",
            "--config",
            "ci.toml",
            "upload",
            "--prefix",
            "builds/42",
            "--pool-size",
            "4",
            "app.zip",
            "dist",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("ci.toml"));
        let Commands::Upload {
            paths,
            prefix,
            pool_size,
        } = cli.command;
        assert_eq!(paths, vec![PathBuf::from("app.zip"), PathBuf::from("dist")]);
        assert_eq!(prefix, "builds/42");
        assert_eq!(pool_size, Some(4));
    }

    #[test]
    fn default_directive_is_scoped_to_courier_crates() {
        let directive: Directive = DEFAULT_DIRECTIVE.parse().unwrap();
        assert_eq!(directive.to_string(), "courier=info");
    }

    #[test]
    fn upload_requires_paths() {
        assert!(Cli::try_parse_from(["courier", "upload"]).is_err());
    }
}
