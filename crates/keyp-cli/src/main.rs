//! keyp - local-first secret manager
//!
//! Securely store structured secrets with full-text search. A vault is a
//! single encrypted SQLite file; unlocking persists a derived-key session
//! so repeated commands skip the passphrase prompt.

mod ui;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use keyp_core::config::{parse_duration, Config};
use keyp_core::error::{SessionError, VaultError};
use keyp_core::handle::VaultHandle;
use keyp_core::models::{Field, Secret};
use keyp_core::session::SessionManager;
use keyp_core::store::SearchOptions;
use keyp_core::sync::{GitSyncer, Syncer};
use keyp_core::vault::{self, Vault};
use keyp_server::Server;

const MIN_PASSPHRASE_LEN: usize = 8;

// Exit codes
const EXIT_ERROR: i32 = 1;
const EXIT_CONFLICT: i32 = 2;
const EXIT_AUTH_FAILED: i32 = 3;
const EXIT_NOT_FOUND: i32 = 4;
const EXIT_VAULT_LOCKED: i32 = 5;

#[derive(Parser)]
#[command(name = "keyp")]
#[command(about = "Local-first secret manager")]
#[command(long_about = "keyp is a local-first secret manager for developers and families.
Securely store structured secrets with full-text search.")]
#[command(version)]
struct Cli {
    /// Path to the vault database (default: ~/.keyp/vault.db)
    #[arg(long, global = true)]
    vault: Option<PathBuf>,

    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new keyp vault
    Init {
        /// Path to the vault file (default: ~/.keyp/vault.db)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Unlock vault for faster access
    Unlock {
        /// Minutes before auto-lock
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },

    /// Explicitly lock the vault
    Lock,

    /// Add a new secret with multiple fields
    Add {
        name: String,
        /// Optional notes for the secret
        #[arg(long)]
        notes: Option<String>,
    },

    /// Set a secret value (create-or-update, single field)
    Set {
        name: String,
        value: Option<String>,
        /// Read value from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Get a secret value (copies to clipboard by default)
    Get {
        name: String,
        /// Specific field to retrieve (default: first field)
        #[arg(long)]
        field: Option<String>,
        /// Print to stdout instead of clipboard
        #[arg(long)]
        stdout: bool,
    },

    /// Show secret details (sensitive values masked unless --reveal)
    Show {
        name: String,
        /// Show sensitive values
        #[arg(long)]
        reveal: bool,
    },

    /// Edit an existing secret
    Edit {
        name: String,
        /// Specific field to edit (by label)
        #[arg(long)]
        field: Option<String>,
        /// Update notes for the secret
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a secret
    #[command(alias = "rm")]
    Delete {
        name: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// List all secrets
    #[command(alias = "ls")]
    List {
        /// Filter by tags (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        /// Output tab-separated values (no headers)
        #[arg(long)]
        porcelain: bool,
    },

    /// Search secrets (full-text over names, tags, notes, field labels)
    Search {
        query: String,
        /// Output tab-separated values (no headers)
        #[arg(long)]
        porcelain: bool,
    },

    /// Manage secret tags
    Tag {
        #[command(subcommand)]
        action: TagCommands,
    },

    /// Rename a secret
    Rename {
        old_name: String,
        new_name: String,
    },

    /// Export all secrets as JSON (values in plaintext)
    Export {
        /// Output file (default: keyp-export.json)
        file: Option<PathBuf>,
        /// Print to stdout instead of a file
        #[arg(long)]
        stdout: bool,
    },

    /// Import secrets from a JSON export or a KEY=value file
    Import {
        file: PathBuf,
        /// Overwrite secrets that already exist
        #[arg(long)]
        replace: bool,
        /// Show what would be imported without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show vault statistics
    Stats,

    /// Synchronize the vault directory with a git remote
    Sync {
        #[command(subcommand)]
        action: SyncCommands,
    },

    /// Start the HTTP API server
    Serve {
        /// HTTP server port
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Session timeout duration (e.g. 900s, 15m, 2h)
        #[arg(long, default_value = "15m")]
        timeout: String,
    },

    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add one or more tags to a secret
    Add {
        secret: String,
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Remove a tag from a secret
    Rm { secret: String, tag: String },
    /// List tags (all, or for a specific secret)
    List { secret: Option<String> },
}

#[derive(Subcommand)]
enum SyncCommands {
    /// Initialize a git repository in the vault directory
    Init,
    /// Configure the remote repository URL
    Remote { url: String },
    /// Commit and push the vault to the remote
    Push,
    /// Pull vault changes from the remote
    Pull,
    /// Show sync status
    Status,
}

/// CLI-level error: a core error plus the layer that failed, or a plain
/// message. Exit codes derive from the error variant, never from message
/// text.
#[derive(Debug)]
enum CliError {
    Vault {
        context: &'static str,
        source: VaultError,
    },
    Message(String),
    Io(io::Error),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Vault { context, source } => write!(f, "{context}: {source}"),
            CliError::Message(message) => f.write_str(message),
            CliError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for CliError {
    fn from(err: io::Error) -> Self {
        CliError::Io(err)
    }
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Vault { source, .. } => match source {
                VaultError::NotFound(_) => EXIT_NOT_FOUND,
                VaultError::AlreadyExists(_) => EXIT_CONFLICT,
                VaultError::InvalidPassphrase => EXIT_AUTH_FAILED,
                VaultError::Locked => EXIT_VAULT_LOCKED,
                _ => EXIT_ERROR,
            },
            _ => EXIT_ERROR,
        }
    }
}

trait VaultContext<T> {
    /// Attach the failing layer to a core error.
    fn ctx(self, context: &'static str) -> Result<T, CliError>;
}

impl<T> VaultContext<T> for Result<T, VaultError> {
    fn ctx(self, context: &'static str) -> Result<T, CliError> {
        self.map_err(|source| CliError::Vault { context, source })
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("{}", ui::error(&err.to_string()));
        std::process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let vault_path = cli
        .vault
        .clone()
        .unwrap_or_else(vault::default_path);
    let json = cli.json;

    match cli.command {
        Commands::Init { path } => {
            let path = path.unwrap_or(vault_path);
            handle_init(&path)
        }
        Commands::Unlock { timeout } => handle_unlock(&vault_path, timeout),
        Commands::Lock => handle_lock(),
        Commands::Add { name, notes } => handle_add(&vault_path, &name, notes),
        Commands::Set { name, value, stdin } => handle_set(&vault_path, &name, value, stdin),
        Commands::Get {
            name,
            field,
            stdout,
        } => handle_get(&vault_path, &name, field.as_deref(), stdout, json),
        Commands::Show { name, reveal } => handle_show(&vault_path, &name, reveal, json),
        Commands::Edit {
            name,
            field,
            notes,
        } => handle_edit(&vault_path, &name, field.as_deref(), notes),
        Commands::Delete { name, force } => handle_delete(&vault_path, &name, force),
        Commands::List { tags, porcelain } => handle_list(&vault_path, tags, porcelain, json),
        Commands::Search { query, porcelain } => {
            handle_search(&vault_path, &query, porcelain, json)
        }
        Commands::Tag { action } => handle_tag(&vault_path, action),
        Commands::Rename { old_name, new_name } => {
            handle_rename(&vault_path, &old_name, &new_name)
        }
        Commands::Export { file, stdout } => handle_export(&vault_path, file, stdout),
        Commands::Import {
            file,
            replace,
            dry_run,
        } => handle_import(&vault_path, &file, replace, dry_run),
        Commands::Stats => handle_stats(&vault_path),
        Commands::Sync { action } => handle_sync(&vault_path, action),
        Commands::Serve {
            port,
            bind,
            timeout,
        } => handle_serve(vault_path, port, &bind, &timeout),
        Commands::Version => {
            println!("keyp v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// === Session plumbing ===

fn session_manager() -> Result<SessionManager, CliError> {
    let config = Config::load().ctx("failed to load config")?;
    Ok(SessionManager::new(config.session_timeout))
}

/// Obtain an unlocked handle: first from the disk session, then by
/// prompting. A successful passphrase unlock refreshes the disk session.
fn open_session(vault_path: &PathBuf) -> Result<VaultHandle, CliError> {
    let sessions = session_manager()?;

    match sessions.load() {
        Ok(key) => {
            let handle = VaultHandle::new(vault_path);
            if handle.unlock_with_key(key, Duration::ZERO).is_ok() {
                return Ok(handle);
            }
            // The stored key does not fit this vault; discard and re-prompt
            let _ = sessions.clear();
        }
        Err(SessionError::NoSession) => {}
        Err(SessionError::Expired) | Err(SessionError::Corrupt) => {
            let _ = sessions.clear();
        }
        Err(SessionError::Io(err)) => return Err(err.into()),
    }

    let password = ui::prompt_password("Vault password: ")?;
    let handle = VaultHandle::new(vault_path);
    handle
        .unlock(&password, Duration::ZERO)
        .ctx("failed to unlock vault")?;

    if let Some(key) = handle.derived_key() {
        let _ = sessions.save(&key);
    }
    Ok(handle)
}

// === Command handlers ===

fn handle_init(path: &PathBuf) -> Result<(), CliError> {
    if vault::exists(path) {
        return Err(CliError::Message(format!(
            "vault already exists at {}",
            path.display()
        )));
    }

    let password =
        ui::prompt_confirm_password("Enter vault password: ", "Confirm password: ")?;
    if password.len() < MIN_PASSPHRASE_LEN {
        return Err(CliError::Message(format!(
            "password must be at least {MIN_PASSPHRASE_LEN} characters"
        )));
    }

    let vault = Vault::init(path, &password).ctx("failed to initialize vault")?;
    vault.close().ctx("failed to close vault")?;

    // Auto-unlock: persist the session so the next commands skip the prompt
    let handle = VaultHandle::new(path);
    handle
        .unlock(&password, Duration::ZERO)
        .ctx("failed to unlock vault")?;
    if let Some(key) = handle.derived_key() {
        let _ = session_manager()?.save(&key);
    }

    println!("{}", ui::success(&format!("Vault created at {}", path.display())));
    println!();
    println!("Next steps:");
    println!("  keyp add <name>     Add a secret");
    println!("  keyp serve          Start the HTTP API");
    Ok(())
}

fn handle_unlock(vault_path: &PathBuf, timeout_minutes: u64) -> Result<(), CliError> {
    let password = ui::prompt_password("Enter vault password: ")?;

    let timeout = Duration::from_secs(timeout_minutes * 60);
    let handle = VaultHandle::new(vault_path);
    handle
        .unlock(&password, timeout)
        .ctx("failed to unlock vault")?;

    let sessions = SessionManager::new(timeout);
    if let Some(key) = handle.derived_key() {
        sessions
            .save(&key)
            .map_err(|err| CliError::Message(format!("failed to save session: {err}")))?;
    }

    println!("Vault unlocked for {timeout_minutes} minutes");
    Ok(())
}

fn handle_lock() -> Result<(), CliError> {
    session_manager()?
        .clear()
        .map_err(|err| CliError::Message(format!("failed to clear session: {err}")))?;
    println!("{}", ui::success("Vault locked"));
    Ok(())
}

fn handle_add(vault_path: &PathBuf, name: &str, notes: Option<String>) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;

    let mut secret = Secret::new(name);
    if let Some(notes) = notes {
        secret.notes = notes;
    }

    println!("Enter fields (empty label to finish):");
    for (label, value) in ui::prompt_fields()? {
        secret.add_field(Field::new(label, value));
    }

    if secret.fields.is_empty() {
        return Err(CliError::Message(
            "secret must have at least one field".to_string(),
        ));
    }

    let count = secret.fields.len();
    handle
        .with_vault(|vault| vault.create(&secret))
        .ctx("failed to create secret")?;

    println!(
        "{}",
        ui::success(&format!("Secret '{name}' created with {count} field(s)"))
    );
    Ok(())
}

fn handle_set(
    vault_path: &PathBuf,
    name: &str,
    value: Option<String>,
    stdin: bool,
) -> Result<(), CliError> {
    let value = if stdin {
        let mut buffer = String::new();
        io::Read::read_to_string(&mut io::stdin(), &mut buffer)?;
        buffer.trim().to_string()
    } else if let Some(value) = value {
        value
    } else {
        ui::prompt_password("Enter value: ")?
    };

    let handle = open_session(vault_path)?;

    let mut secret = Secret::new(name);
    secret.add_field(Field::new("value", value));

    let result = handle.with_vault(|vault| match vault.create(&secret) {
        Err(VaultError::AlreadyExists(_)) => {
            let mut existing = vault.get_by_name(name)?;
            existing.fields = secret.fields.clone();
            vault.update(&mut existing)
        }
        other => other,
    });
    result.ctx("failed to save secret")?;

    println!("Secret '{name}' saved");
    Ok(())
}

fn handle_get(
    vault_path: &PathBuf,
    name: &str,
    field: Option<&str>,
    stdout: bool,
    json: bool,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;
    let secret = handle
        .with_vault(|vault| vault.get_by_name(name))
        .ctx("failed to get secret")?;

    let value = select_field_value(&secret, field)?;

    if json {
        let output = serde_json::json!({ "value": value });
        println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        return Ok(());
    }

    if stdout {
        println!("{value}");
    } else {
        ui::copy_with_auto_clear(&value, ui::DEFAULT_CLEAR_DURATION)
            .map_err(|err| CliError::Message(format!("failed to copy to clipboard: {err}")))?;
        println!(
            "{}",
            ui::success("Copied to clipboard (clears in 45s)")
        );
    }
    Ok(())
}

fn handle_show(
    vault_path: &PathBuf,
    name: &str,
    reveal: bool,
    json: bool,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;
    let secret = handle
        .with_vault(|vault| vault.get_by_name(name))
        .ctx("failed to get secret")?;

    let secret = if reveal { secret } else { secret.redacted() };

    if json {
        println!("{}", serde_json::to_string_pretty(&secret).unwrap_or_default());
        return Ok(());
    }

    println!("Name: {}", secret.name);
    println!("Tags: {}", secret.tags.join(", "));
    println!("Created: {}", secret.created_at.format("%Y-%m-%d %H:%M"));
    println!("Updated: {}", secret.updated_at.format("%Y-%m-%d %H:%M"));
    if !secret.notes.is_empty() {
        println!("Notes: {}", secret.notes);
    }
    println!("\nFields:");
    for field in &secret.fields {
        println!("  {}: {}", field.label, field.value);
    }
    Ok(())
}

fn handle_edit(
    vault_path: &PathBuf,
    name: &str,
    field: Option<&str>,
    notes: Option<String>,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;
    let mut secret = handle
        .with_vault(|vault| vault.get_by_name(name))
        .ctx("failed to get secret")?;

    match field {
        Some(label) => {
            let target = secret
                .fields
                .iter_mut()
                .find(|f| f.label == label)
                .ok_or_else(|| CliError::Vault {
                    context: "failed to edit secret",
                    source: VaultError::NotFound(format!("field '{label}'")),
                })?;
            target.value = ui::prompt_password(&format!("New value for '{label}': "))?;
        }
        None => {
            if secret.fields.is_empty() {
                println!("Secret has no fields");
                return Ok(());
            }
            for field in &mut secret.fields {
                let value = ui::prompt_password(&format!(
                    "Edit '{}' (leave empty to skip): ",
                    field.label
                ))?;
                if !value.is_empty() {
                    field.value = value;
                }
            }
        }
    }

    if let Some(notes) = notes {
        secret.notes = notes;
    }

    handle
        .with_vault(|vault| vault.update(&mut secret))
        .ctx("failed to update secret")?;

    println!("{}", ui::success(&format!("Secret '{name}' updated")));
    Ok(())
}

fn handle_delete(vault_path: &PathBuf, name: &str, force: bool) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;

    // Verify existence up front so the confirmation names a real secret
    handle
        .with_vault(|vault| vault.get_by_name(name).map(|_| ()))
        .ctx("failed to get secret")?;

    if !force {
        let confirm = ui::prompt_visible(&format!("Type '{name}' to confirm deletion: "))?;
        if confirm != name {
            return Err(CliError::Message("deletion cancelled".to_string()));
        }
    }

    handle
        .with_vault(|vault| vault.delete(name))
        .ctx("failed to delete secret")?;

    println!("Secret '{name}' deleted");
    Ok(())
}

fn handle_list(
    vault_path: &PathBuf,
    tags: Vec<String>,
    porcelain: bool,
    json: bool,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;
    let opts = SearchOptions { tags, limit: 0 };
    let secrets = handle
        .with_vault(|vault| vault.list(&opts))
        .ctx("failed to list secrets")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&secrets).unwrap_or_default());
        return Ok(());
    }

    if porcelain {
        print_porcelain(&secrets);
        return Ok(());
    }

    if secrets.is_empty() {
        println!("No secrets found");
        return Ok(());
    }
    print_table(&secrets);
    Ok(())
}

fn handle_search(
    vault_path: &PathBuf,
    query: &str,
    porcelain: bool,
    json: bool,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;
    let secrets = handle
        .with_vault(|vault| vault.search(query, &SearchOptions::default()))
        .ctx("failed to search secrets")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&secrets).unwrap_or_default());
        return Ok(());
    }

    if porcelain {
        print_porcelain(&secrets);
        return Ok(());
    }

    if secrets.is_empty() {
        println!("No secrets match '{query}'");
        return Ok(());
    }

    let noun = if secrets.len() == 1 { "secret" } else { "secrets" };
    println!("Found {} {noun} matching '{query}':\n", secrets.len());
    print_table(&secrets);
    Ok(())
}

fn handle_tag(vault_path: &PathBuf, action: TagCommands) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;

    match action {
        TagCommands::Add { secret: name, tags } => {
            let mut secret = handle
                .with_vault(|vault| vault.get_by_name(&name))
                .ctx("failed to get secret")?;

            let mut added = 0;
            for tag in tags {
                if secret.tags.contains(&tag) {
                    println!("Tag '{tag}' already exists on secret '{name}'");
                } else {
                    secret.tags.push(tag);
                    added += 1;
                }
            }

            if added > 0 {
                handle
                    .with_vault(|vault| vault.update(&mut secret))
                    .ctx("failed to update secret")?;
            }
            println!("Added {added} tag(s) to secret '{name}'");
        }
        TagCommands::Rm { secret: name, tag } => {
            let mut secret = handle
                .with_vault(|vault| vault.get_by_name(&name))
                .ctx("failed to get secret")?;

            let before = secret.tags.len();
            secret.tags.retain(|t| t != &tag);
            if secret.tags.len() == before {
                println!("Tag '{tag}' not found on secret '{name}'");
                return Ok(());
            }

            handle
                .with_vault(|vault| vault.update(&mut secret))
                .ctx("failed to update secret")?;
            println!("Tag '{tag}' removed from secret '{name}'");
        }
        TagCommands::List { secret: None } => {
            let secrets = handle
                .with_vault(|vault| vault.list(&SearchOptions::default()))
                .ctx("failed to list secrets")?;

            let mut tags: Vec<String> = secrets.into_iter().flat_map(|s| s.tags).collect();
            tags.sort();
            tags.dedup();

            if tags.is_empty() {
                println!("No tags found");
                return Ok(());
            }
            println!("All tags:");
            for tag in tags {
                println!("  {tag}");
            }
        }
        TagCommands::List { secret: Some(name) } => {
            let secret = handle
                .with_vault(|vault| vault.get_by_name(&name))
                .ctx("failed to get secret")?;

            if secret.tags.is_empty() {
                println!("Secret '{name}' has no tags");
                return Ok(());
            }
            println!("Tags for secret '{name}':");
            for tag in &secret.tags {
                println!("  {tag}");
            }
        }
    }
    Ok(())
}

fn handle_rename(
    vault_path: &PathBuf,
    old_name: &str,
    new_name: &str,
) -> Result<(), CliError> {
    if old_name == new_name {
        return Err(CliError::Message(
            "new name must be different from old name".to_string(),
        ));
    }

    let handle = open_session(vault_path)?;
    let mut secret = handle
        .with_vault(|vault| vault.get_by_name(old_name))
        .ctx("failed to get secret")?;

    secret.name = new_name.to_string();
    handle
        .with_vault(|vault| vault.update(&mut secret))
        .ctx("failed to rename secret")?;

    println!(
        "{}",
        ui::success(&format!("Secret '{old_name}' renamed to '{new_name}'"))
    );
    Ok(())
}

fn handle_export(
    vault_path: &PathBuf,
    file: Option<PathBuf>,
    stdout: bool,
) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;

    // Full records, so every secret is fetched with its decrypted fields
    let secrets = handle
        .with_vault(|vault| {
            let summaries = vault.list(&SearchOptions::default())?;
            summaries
                .iter()
                .map(|s| vault.get_by_name(&s.name))
                .collect::<Result<Vec<_>, _>>()
        })
        .ctx("failed to export secrets")?;

    if secrets.is_empty() {
        println!("{}", ui::warning("No secrets to export"));
        return Ok(());
    }

    let json = serde_json::to_string_pretty(&secrets)
        .map_err(|err| CliError::Message(format!("failed to serialize export: {err}")))?;

    if stdout {
        println!("{json}");
        return Ok(());
    }

    let path = file.unwrap_or_else(|| PathBuf::from("keyp-export.json"));
    std::fs::write(&path, json)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    println!(
        "{}",
        ui::success(&format!(
            "Exported {} secret(s) to {}",
            secrets.len(),
            path.display()
        ))
    );
    eprintln!(
        "{}",
        ui::warning("Warning: the export contains plaintext values. Delete it when done.")
    );
    Ok(())
}

fn handle_import(
    vault_path: &PathBuf,
    file: &PathBuf,
    replace: bool,
    dry_run: bool,
) -> Result<(), CliError> {
    let content = std::fs::read_to_string(file)?;
    let entries = parse_import(&content)?;
    if entries.is_empty() {
        println!("{}", ui::warning("Nothing to import"));
        return Ok(());
    }

    let handle = open_session(vault_path)?;

    let mut imported = 0;
    let mut skipped = 0;
    for (name, value) in entries {
        let exists = handle
            .with_vault(|vault| match vault.get_by_name(&name) {
                Ok(_) => Ok(true),
                Err(VaultError::NotFound(_)) => Ok(false),
                Err(err) => Err(err),
            })
            .ctx("failed to read secret")?;

        if exists && !replace {
            println!("Skipping '{name}' (already exists, use --replace to overwrite)");
            skipped += 1;
            continue;
        }

        if dry_run {
            let verb = if exists { "replace" } else { "import" };
            println!("Would {verb} '{name}'");
            imported += 1;
            continue;
        }

        let mut secret = Secret::new(&name);
        secret.add_field(Field::new("value", value));
        handle
            .with_vault(|vault| {
                if exists {
                    let mut existing = vault.get_by_name(&name)?;
                    existing.fields = secret.fields.clone();
                    vault.update(&mut existing)
                } else {
                    vault.create(&secret)
                }
            })
            .ctx("failed to import secret")?;
        imported += 1;
    }

    let action = if dry_run { "Would import" } else { "Imported" };
    println!(
        "{}",
        ui::success(&format!("{action} {imported} secret(s), skipped {skipped}"))
    );
    Ok(())
}

/// Accepts either a JSON object of name-to-value pairs or KEY=value lines
/// (comments and blanks ignored).
fn parse_import(content: &str) -> Result<Vec<(String, String)>, CliError> {
    if let Ok(map) = serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(content) {
        return Ok(map
            .into_iter()
            .filter_map(|(name, value)| {
                value.as_str().map(|v| (name, v.to_string()))
            })
            .collect());
    }

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CliError::Message(format!(
                "unrecognized import line: '{line}'"
            )));
        };
        entries.push((
            key.trim().to_string(),
            value.trim().trim_matches('"').to_string(),
        ));
    }
    Ok(entries)
}

fn handle_stats(vault_path: &PathBuf) -> Result<(), CliError> {
    let handle = open_session(vault_path)?;

    let secrets = handle
        .with_vault(|vault| {
            let summaries = vault.list(&SearchOptions::default())?;
            summaries
                .iter()
                .map(|s| vault.get_by_name(&s.name))
                .collect::<Result<Vec<_>, _>>()
        })
        .ctx("failed to read secrets")?;

    let field_count: usize = secrets.iter().map(|s| s.fields.len()).sum();
    let mut tags: Vec<&str> = secrets
        .iter()
        .flat_map(|s| s.tags.iter().map(String::as_str))
        .collect();
    tags.sort_unstable();
    tags.dedup();

    let metadata = std::fs::metadata(vault_path)?;

    println!("{}", ui::header("Vault statistics"));
    println!("Path:        {}", vault_path.display());
    println!("Secrets:     {}", secrets.len());
    println!("Fields:      {field_count}");
    println!("Unique tags: {}", tags.len());
    println!("File size:   {} bytes", metadata.len());
    Ok(())
}

fn handle_sync(vault_path: &PathBuf, action: SyncCommands) -> Result<(), CliError> {
    let vault_dir = vault_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or_else(|| CliError::Message("vault path has no parent directory".to_string()))?;
    let syncer = GitSyncer::new(vault_dir);

    let sync_err = |err| CliError::Message(format!("sync failed: {err}"));
    match action {
        SyncCommands::Init => {
            syncer.init().map_err(sync_err)?;
            println!("{}", ui::success("Sync repository initialized"));
        }
        SyncCommands::Remote { url } => {
            syncer.add_remote(&url).map_err(sync_err)?;
            println!("Remote set to {url}");
        }
        SyncCommands::Push => {
            syncer.commit("keyp sync").map_err(sync_err)?;
            syncer.push().map_err(sync_err)?;
            println!("{}", ui::success("Vault pushed to remote"));
        }
        SyncCommands::Pull => {
            syncer.pull().map_err(sync_err)?;
            println!("{}", ui::success("Vault pulled from remote"));
        }
        SyncCommands::Status => {
            let status = syncer.status().map_err(sync_err)?;
            println!("Initialized:      {}", yes_no(status.initialized));
            println!("Remote:           {}", yes_no(status.remote_configured));
            println!("Working tree:     {}", if status.clean { "clean" } else { "dirty" });
            println!("Unpushed commits: {}", status.unpushed_commits);
            println!("Unpulled commits: {}", status.unpulled_commits);
        }
    }
    Ok(())
}

fn handle_serve(
    vault_path: PathBuf,
    port: u16,
    bind: &str,
    timeout: &str,
) -> Result<(), CliError> {
    init_logging();

    let timeout = parse_duration(timeout)
        .map_err(|err| CliError::Message(format!("invalid --timeout: {err}")))?;
    let address: SocketAddr = format!("{bind}:{port}")
        .parse()
        .map_err(|_| CliError::Message(format!("invalid bind address '{bind}:{port}'")))?;

    let mut server = Server::new(address, vault_path);
    server.set_session_timeout(timeout);

    println!("Server listening on http://{address}");
    println!("Press Ctrl+C to shutdown...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server.run())?;
    Ok(())
}

// === Helpers ===

/// Log to stderr so command output on stdout stays machine-readable.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).compact())
        .with(filter)
        .init();
}

/// Pick the requested field's value, defaulting to the first field.
fn select_field_value(secret: &Secret, field: Option<&str>) -> Result<String, CliError> {
    match field {
        Some(label) => secret
            .field(label)
            .map(|f| f.value.clone())
            .ok_or_else(|| CliError::Vault {
                context: "failed to get field",
                source: VaultError::NotFound(format!("field '{label}'")),
            }),
        None => secret
            .fields
            .first()
            .map(|f| f.value.clone())
            .ok_or_else(|| CliError::Message("secret has no fields".to_string())),
    }
}

fn print_table(secrets: &[Secret]) {
    println!(
        "{}",
        ui::header(&format!("{:<30} {:<20} {}", "NAME", "TAGS", "UPDATED"))
    );
    for secret in secrets {
        println!(
            "{:<30} {:<20} {}",
            secret.name,
            secret.tags.join(", "),
            secret.updated_at.format("%Y-%m-%d %H:%M"),
        );
    }
}

fn print_porcelain(secrets: &[Secret]) {
    for secret in secrets {
        println!(
            "{}\t{}\t{}",
            secret.name,
            secret.tags.join(", "),
            secret.updated_at.format("%Y-%m-%d"),
        );
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault_err(source: VaultError) -> CliError {
        CliError::Vault {
            context: "test",
            source,
        }
    }

    #[test]
    fn test_exit_codes_follow_error_variants() {
        assert_eq!(
            vault_err(VaultError::NotFound("secret 'x'".into())).exit_code(),
            EXIT_NOT_FOUND
        );
        assert_eq!(
            vault_err(VaultError::AlreadyExists("secret 'x'".into())).exit_code(),
            EXIT_CONFLICT
        );
        assert_eq!(
            vault_err(VaultError::InvalidPassphrase).exit_code(),
            EXIT_AUTH_FAILED
        );
        assert_eq!(vault_err(VaultError::Locked).exit_code(), EXIT_VAULT_LOCKED);
        assert_eq!(
            vault_err(VaultError::Database("x".into())).exit_code(),
            EXIT_ERROR
        );
        assert_eq!(
            CliError::Message("anything".into()).exit_code(),
            EXIT_ERROR
        );
    }

    #[test]
    fn test_select_field_value() {
        let mut secret = Secret::new("gh");
        secret.add_field(Field::new("username", "alice"));
        secret.add_field(Field::new("token", "abc"));

        assert_eq!(select_field_value(&secret, None).unwrap(), "alice");
        assert_eq!(select_field_value(&secret, Some("token")).unwrap(), "abc");

        let missing = select_field_value(&secret, Some("pin")).unwrap_err();
        assert_eq!(missing.exit_code(), EXIT_NOT_FOUND);

        let empty = Secret::new("empty");
        assert_eq!(
            select_field_value(&empty, None).unwrap_err().exit_code(),
            EXIT_ERROR
        );
    }

    #[test]
    fn test_parse_import_json_and_env() {
        let json = r#"{"db": "postgres://x", "api": "sk-123"}"#;
        let mut entries = parse_import(json).unwrap();
        entries.sort();
        assert_eq!(
            entries,
            [
                ("api".to_string(), "sk-123".to_string()),
                ("db".to_string(), "postgres://x".to_string()),
            ]
        );

        let env = "# comment\nDB_URL=postgres://x\nTOKEN=\"quoted\"\n\n";
        let entries = parse_import(env).unwrap();
        assert_eq!(
            entries,
            [
                ("DB_URL".to_string(), "postgres://x".to_string()),
                ("TOKEN".to_string(), "quoted".to_string()),
            ]
        );

        assert!(parse_import("not an assignment").is_err());
    }

    #[test]
    fn test_error_display_names_layer_and_cause() {
        let err = CliError::Vault {
            context: "failed to get secret",
            source: VaultError::NotFound("secret 'gh'".into()),
        };
        assert_eq!(err.to_string(), "failed to get secret: secret 'gh' not found");
    }
}
