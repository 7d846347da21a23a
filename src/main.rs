//! keywarden command line entry point.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use keywarden::client::api::ApiClient;
use keywarden::client::shell;
use keywarden::config::Config;
use keywarden::crypto::snapshot;
use keywarden::model::{CollectionKind, SyncBundle};
use keywarden::server;

#[derive(Parser)]
#[command(
    name = "keywarden",
    version,
    about = "Personal secrets vault with multi-device push sync"
)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the vault server.
    Serve,
    /// Run the interactive client shell.
    Shell {
        /// Server base URL, overriding the config file.
        #[arg(long)]
        server: Option<String>,
    },
    /// Pull collections and write an encrypted snapshot file.
    Sync {
        /// Server base URL, overriding the config file.
        #[arg(long)]
        server: Option<String>,
        /// Session token from a previous login.
        #[arg(long)]
        token: String,
        /// Snapshot file to write.
        #[arg(long)]
        file: PathBuf,
        /// Snapshot passphrase.
        #[arg(long)]
        key: String,
        /// Collections to pull (default: all).
        #[arg(long = "collection")]
        collections: Vec<String>,
    },
    /// Print one collection from an encrypted snapshot file, offline.
    Read {
        /// Snapshot file to read.
        #[arg(long)]
        file: PathBuf,
        /// Snapshot passphrase.
        #[arg(long)]
        key: String,
        /// Collection to print.
        #[arg(long)]
        collection: String,
    },
    /// Generate shell completions.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keywarden=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Serve => server::run_server(&config).await,
        Command::Shell { server } => {
            if let Some(url) = server {
                config.client.server_url = url;
            }
            shell::run_shell(&config).await
        }
        Command::Sync {
            server,
            token,
            file,
            key,
            collections,
        } => {
            if let Some(url) = server {
                config.client.server_url = url;
            }
            sync_to_file(&config, &token, &file, &key, &collections).await
        }
        Command::Read {
            file,
            key,
            collection,
        } => read_from_file(&file, &key, &collection),
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "keywarden", &mut io::stdout());
            Ok(())
        }
    }
}

/// One-shot pull of the named collections into an encrypted snapshot.
async fn sync_to_file(
    config: &Config,
    token: &str,
    file: &Path,
    key: &str,
    collections: &[String],
) -> Result<()> {
    let kinds: Vec<CollectionKind> = if collections.is_empty() {
        CollectionKind::ALL.to_vec()
    } else {
        collections
            .iter()
            .map(|name| name.parse())
            .collect::<Result<_, _>>()?
    };

    let api = ApiClient::new(&config.client.server_url)?;
    let mut bundle = SyncBundle::default();
    for kind in kinds {
        *bundle.collection_mut(kind) = api.pull(token, kind).await?;
    }
    snapshot::write_snapshot(file, &bundle, key)?;
    tracing::info!(records = bundle.len(), file = %file.display(), "Snapshot written");
    Ok(())
}

/// Decrypt a snapshot offline and pretty-print one collection.
fn read_from_file(file: &Path, key: &str, collection: &str) -> Result<()> {
    let kind: CollectionKind = collection.parse()?;
    let bundle = snapshot::read_snapshot(file, key)?;
    println!("{}", serde_json::to_string_pretty(bundle.collection(kind))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_accepts_repeated_collections() {
        let cli = Cli::try_parse_from([
            "keywarden",
            "sync",
            "--token",
            "t0ken",
            "--file",
            "vault.snap",
            "--key",
            "hunter2",
            "--collection",
            "text",
            "--collection",
            "cards",
        ])
        .unwrap();
        match cli.command {
            Command::Sync { collections, .. } => {
                assert_eq!(collections, vec!["text", "cards"]);
            }
            _ => panic!("expected sync subcommand"),
        }
    }

    #[test]
    fn config_flag_is_global() {
        let cli = Cli::try_parse_from(["keywarden", "serve", "--config", "kw.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("kw.toml")));
    }
}
