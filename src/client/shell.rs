//! Interactive vault shell.
//!
//! One persistent menu drives the whole client: a logged-out menu for
//! account setup and a logged-in menu for record operations. A device
//! listener runs alongside the menu; since the server fans change
//! signals out to every registered device of the user, this client's
//! own mutations loop back through the listener and refresh the shared
//! bundle without an explicit re-pull.
//!
//! ## Locking
//!
//! `ShellState` is shared between the menu loop and the listener task.
//! The `token` and `bundle` mutexes are only taken for short clones or
//! swaps, never across an await point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use console::style;
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Input, Password, Select};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::client::api::{ApiClient, ApiError, ApiResult};
use crate::client::listener::DeviceListener;
use crate::config::Config;
use crate::crypto::snapshot;
use crate::model::{CollectionKind, Metadata, SyncBundle};

const LOGGED_OUT_MENU: &[&str] = &["login", "register", "quit"];
const LOGGED_IN_MENU: &[&str] = &[
    "sync", "show", "add", "update", "delete", "export", "import", "quit",
];

/// State shared between the menu loop and the listener task.
struct ShellState {
    api: ApiClient,
    device_addr: String,
    token: Mutex<Option<String>>,
    bundle: Mutex<SyncBundle>,
}

impl ShellState {
    fn token(&self) -> Option<String> {
        self.token.lock().clone()
    }

    /// Pull every collection into the shared bundle. Returns the number
    /// of records pulled.
    async fn refresh(&self) -> ApiResult<usize> {
        let token = match self.token() {
            Some(token) => token,
            // A stray signal before login has nothing to pull.
            None => return Ok(0),
        };
        let bundle = self.api.pull_all(&token).await?;
        let count = bundle.len();
        *self.bundle.lock() = bundle;
        Ok(count)
    }
}

fn spawn_listener(listener: DeviceListener, state: Arc<ShellState>) -> JoinHandle<()> {
    tokio::spawn(listener.run(move || {
        let state = state.clone();
        async move {
            match state.refresh().await {
                Ok(count) => tracing::info!(records = count, "Pulled after change signal"),
                Err(e) => tracing::warn!("Signal-triggered pull failed: {e}"),
            }
        }
    }))
}

/// Entry point for the `shell` subcommand. Runs until the user quits or
/// the server becomes unreachable mid-operation.
pub async fn run_shell(config: &Config) -> anyhow::Result<()> {
    let api = ApiClient::new(&config.client.server_url)?;
    let listener = DeviceListener::bind().await?;
    let device_addr = listener.local_addr().to_string();
    let cancel = listener.cancel_token();

    let state = Arc::new(ShellState {
        api,
        device_addr,
        token: Mutex::new(None),
        bundle: Mutex::new(SyncBundle::default()),
    });
    let listener_task = spawn_listener(listener, state.clone());

    if state.api.ping().await {
        println!("Vault shell, server {} is up.", state.api.base_url());
    } else {
        println!(
            "{} Server {} is not responding; sign-in will fail until it is back.",
            style("!").yellow(),
            state.api.base_url()
        );
    }

    loop {
        if state.token().is_some() {
            let choice = LOGGED_IN_MENU[select_index("Select action", LOGGED_IN_MENU).await?];
            match choice {
                "sync" => sync_now(&state).await,
                "show" => show(&state)?,
                "add" => add(&state).await?,
                "update" => update(&state).await?,
                "delete" => delete(&state).await?,
                "export" => export(&state).await?,
                "import" => import(&state).await?,
                _ => break,
            }
        } else {
            let choice = LOGGED_OUT_MENU[select_index("Select action", LOGGED_OUT_MENU).await?];
            match choice {
                "login" => login(&state).await?,
                "register" => register(&state).await?,
                _ => break,
            }
        }
    }

    cancel.cancel();
    let token = state.token.lock().take();
    if let Some(token) = token {
        if let Err(e) = state.api.unregister_device(&token, &state.device_addr).await {
            tracing::warn!("Failed to unregister device: {e}");
        }
    }
    if let Err(e) = listener_task.await {
        tracing::warn!("Listener task failed: {e}");
    }
    println!("Bye!");
    Ok(())
}

// ── Session actions ─────────────────────────────────────────────────

/// Register the device address, store the token and pull the vault.
async fn start_session(state: &Arc<ShellState>, username: &str, token: String) -> anyhow::Result<()> {
    state
        .api
        .register_device(&token, &state.device_addr)
        .await
        .context("Failed to register this device for change signals")?;
    *state.token.lock() = Some(token);
    match state.refresh().await {
        Ok(count) => println!(
            "{} Signed in as '{username}' — {count} records synced.",
            style("✔").green()
        ),
        Err(e) => println!(
            "{} Signed in as '{username}', but the initial sync failed: {e}",
            style("!").yellow()
        ),
    }
    Ok(())
}

async fn login(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let username = prompt_line("Username").await?;
    let password = prompt_secret("Password").await?;
    match state.api.login(&username, &password).await {
        Ok(token) => start_session(state, &username, token).await,
        Err(e) => report(e),
    }
}

async fn register(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let username = prompt_line("Username").await?;
    let password = prompt_secret("Password").await?;
    match state.api.register_user(&username, &password).await {
        // Registration already hands back a session token, so sign the
        // fresh account straight in.
        Ok(token) => start_session(state, &username, token).await,
        Err(e) => report(e),
    }
}

// ── Record actions ──────────────────────────────────────────────────

async fn sync_now(state: &Arc<ShellState>) {
    println!("Syncing...");
    match state.refresh().await {
        Ok(count) => println!("{} {count} records pulled.", style("✔").green()),
        Err(e) => println!("{} Sync failed: {e}", style("✘").red()),
    }
}

fn show(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let bundle = state.bundle.lock();
    println!("{}", serde_json::to_string_pretty(&*bundle)?);
    Ok(())
}

async fn add(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let Some(token) = state.token() else {
        return Ok(());
    };
    let kind = select_collection().await?;
    let data = prompt_data(kind).await?;
    let metadata = prompt_metadata().await?;
    match state.api.add_record(&token, kind, data, metadata).await {
        Ok(id) => println!("{} Stored with id {id}.", style("✔").green()),
        Err(e) => report(e)?,
    }
    Ok(())
}

async fn update(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let Some(token) = state.token() else {
        return Ok(());
    };
    let kind = select_collection().await?;
    let record_id = prompt_line("Record id").await?;
    let data = prompt_data(kind).await?;
    let metadata = prompt_metadata().await?;
    match state
        .api
        .update_record(&token, kind, &record_id, data, metadata)
        .await
    {
        Ok(()) => println!("{} Record {record_id} updated.", style("✔").green()),
        Err(e) => report(e)?,
    }
    Ok(())
}

async fn delete(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let Some(token) = state.token() else {
        return Ok(());
    };
    let kind = select_collection().await?;
    let record_id = prompt_line("Record id").await?;
    match state.api.delete_record(&token, kind, &record_id).await {
        Ok(()) => println!("{} Record {record_id} deleted.", style("✔").green()),
        Err(e) => report(e)?,
    }
    Ok(())
}

// ── Snapshot actions ────────────────────────────────────────────────

async fn export(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let path = prompt_line("Snapshot file").await?;
    let passphrase = prompt_secret_confirmed("Snapshot passphrase").await?;
    let bundle = state.bundle.lock().clone();
    let count = bundle.len();
    let target = PathBuf::from(&path);
    let written =
        tokio::task::spawn_blocking(move || snapshot::write_snapshot(&target, &bundle, &passphrase))
            .await?;
    match written {
        Ok(()) => println!("{} {count} records exported to {path}.", style("✔").green()),
        Err(e) => println!("{} Export failed: {e:#}", style("✘").red()),
    }
    Ok(())
}

async fn import(state: &Arc<ShellState>) -> anyhow::Result<()> {
    let path = prompt_line("Snapshot file").await?;
    let passphrase = prompt_secret("Snapshot passphrase").await?;
    let source = PathBuf::from(&path);
    let loaded =
        tokio::task::spawn_blocking(move || snapshot::read_snapshot(&source, &passphrase)).await?;
    match loaded {
        Ok(bundle) => {
            println!(
                "{} {} records imported from {path}.",
                style("✔").green(),
                bundle.len()
            );
            *state.bundle.lock() = bundle;
        }
        Err(e) => println!("{} Import failed: {e:#}", style("✘").red()),
    }
    Ok(())
}

// ── Error reporting ─────────────────────────────────────────────────

/// Print a rejection and carry on; an unreachable server ends the shell.
fn report(err: ApiError) -> anyhow::Result<()> {
    match err {
        ApiError::Connect(_) => Err(err).context("Server unreachable"),
        other => {
            println!("{} {other}", style("✘").red());
            Ok(())
        }
    }
}

// ── Prompts ─────────────────────────────────────────────────────────
// dialoguer blocks on the terminal, so every prompt hops to a blocking
// thread while the listener task keeps running.

async fn select_index(prompt: &str, items: &[&str]) -> anyhow::Result<usize> {
    let prompt = prompt.to_string();
    let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
    let index = tokio::task::spawn_blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .items(&items)
            .default(0)
            .interact()
    })
    .await??;
    Ok(index)
}

async fn select_collection() -> anyhow::Result<CollectionKind> {
    let labels = CollectionKind::ALL.map(|kind| kind.as_str());
    let index = select_index("Select collection", &labels).await?;
    Ok(CollectionKind::ALL[index])
}

async fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    let text = tokio::task::spawn_blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .interact_text()
    })
    .await??;
    Ok(text)
}

async fn prompt_optional(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    let text = tokio::task::spawn_blocking(move || {
        Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()
    })
    .await??;
    Ok(text)
}

async fn prompt_secret(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    let secret = tokio::task::spawn_blocking(move || {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .interact()
    })
    .await??;
    Ok(secret)
}

async fn prompt_secret_confirmed(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    let secret = tokio::task::spawn_blocking(move || {
        Password::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .with_confirmation("Confirm passphrase", "Passphrases do not match")
            .interact()
    })
    .await??;
    Ok(secret)
}

/// Collection-specific data payload for add/update.
async fn prompt_data(kind: CollectionKind) -> anyhow::Result<Value> {
    let data = match kind {
        CollectionKind::Text => Value::String(prompt_line("Text").await?),
        CollectionKind::Binary => Value::String(prompt_line("Binary data (encoded)").await?),
        CollectionKind::Credential => {
            let login = prompt_line("Login").await?;
            let password = prompt_line("Password").await?;
            json!({ "login": login, "password": password })
        }
        CollectionKind::Card => {
            let number = prompt_line("Card number").await?;
            let cvv = prompt_line("CVV").await?;
            let expires = prompt_line("Expiration date").await?;
            json!({ "card_number": number, "cvv": cvv, "expiration_date": expires })
        }
    };
    Ok(data)
}

/// Key/value pairs until an empty key.
async fn prompt_metadata() -> anyhow::Result<Metadata> {
    let mut metadata = Metadata::new();
    loop {
        let key = prompt_optional("Metadata key (empty to finish)").await?;
        if key.is_empty() {
            break;
        }
        let value = prompt_line("Metadata value").await?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}
