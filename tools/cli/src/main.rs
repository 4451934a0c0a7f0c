//! keybundle CLI - Command line interface for bundles and entries.
//!
//! This tool registers identities, creates and shares bundles, and stores
//! encrypted entries in a local or remote secret store.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use keybundle_common::{BundleId, EntryId, IdentityId};
use keybundle_crypto::DeviceSecret;
use keybundle_storage::{create_default_registry, StoreConfig};
use keybundle_vault::{
    Capability, ClientConfig, Entry, Session, VaultClient, DEFAULT_ACCOUNT_SCOPE,
};

#[derive(Parser)]
#[command(name = "keybundle")]
#[command(about = "keybundle - Zero-knowledge shared secret bundles")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    store: StoreArgs,

    /// Identity to act as.
    #[arg(short, long, global = true)]
    identity: Option<String>,

    /// Account scope mixed into key derivation.
    #[arg(long, default_value = DEFAULT_ACCOUNT_SCOPE, global = true)]
    scope: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Directory of a local store (default: platform data directory).
    #[arg(long, global = true, conflicts_with = "kv_address")]
    store_root: Option<PathBuf>,

    /// Address of a remote KV store; the token is prompted for.
    #[arg(long, global = true)]
    kv_address: Option<String>,

    /// Mount of the remote KV engine.
    #[arg(long, default_value = DEFAULT_ACCOUNT_SCOPE, global = true)]
    kv_mount: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity.
    Register {
        /// Existing device secret (hex); a new one is generated if omitted.
        #[arg(long)]
        device_secret: Option<String>,
    },

    /// Manage bundles.
    #[command(subcommand)]
    Bundle(BundleCommands),

    /// Manage entries of a bundle.
    #[command(subcommand)]
    Entry(EntryCommands),
}

#[derive(Subcommand)]
enum BundleCommands {
    /// Create a bundle.
    Create {
        /// Display name.
        #[arg(short, long)]
        name: String,
    },

    /// List bundles you own or are a member of.
    List,

    /// Share a bundle with another identity.
    Share {
        #[arg(short, long)]
        bundle: String,

        /// Identity to share with.
        #[arg(short, long)]
        recipient: String,

        /// Comma-separated capabilities.
        #[arg(short, long, value_delimiter = ',', default_value = "read,list")]
        capabilities: Vec<String>,

        /// Allow the recipient to share further.
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Subcommand)]
enum EntryCommands {
    /// Add a login entry; the password is prompted for.
    Add {
        #[arg(short, long)]
        bundle: String,

        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        username: String,
    },

    /// List entries of a bundle.
    List {
        #[arg(short, long)]
        bundle: String,
    },

    /// Show an entry.
    Show {
        #[arg(short, long)]
        bundle: String,

        #[arg(short, long)]
        entry: String,

        /// Print concealed values.
        #[arg(long)]
        reveal: bool,
    },

    /// Replace the password of an entry.
    Update {
        #[arg(short, long)]
        bundle: String,

        #[arg(short, long)]
        entry: String,

        /// New username (default: keep).
        #[arg(short, long)]
        username: Option<String>,
    },

    /// Remove an entry.
    Remove {
        #[arg(short, long)]
        bundle: String,

        #[arg(short, long)]
        entry: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = open_client(&cli.store, &cli.scope)?;
    let identity = cli
        .identity
        .as_deref()
        .context("--identity is required")
        .and_then(|id| IdentityId::new(id).context("Invalid identity"))?;

    match cli.command {
        Commands::Register { device_secret } => {
            cmd_register(&client, &identity, device_secret.as_deref()).await
        }

        Commands::Bundle(command) => {
            let mut session = unlock(&client, &identity).await?;
            match command {
                BundleCommands::Create { name } => {
                    cmd_bundle_create(&client, &mut session, &name).await
                }
                BundleCommands::List => cmd_bundle_list(&client, &session).await,
                BundleCommands::Share {
                    bundle,
                    recipient,
                    capabilities,
                    admin,
                } => {
                    cmd_bundle_share(&client, &mut session, &bundle, &recipient, &capabilities, admin)
                        .await
                }
            }
        }

        Commands::Entry(command) => {
            let mut session = unlock(&client, &identity).await?;
            match command {
                EntryCommands::Add {
                    bundle,
                    name,
                    username,
                } => cmd_entry_add(&client, &mut session, &bundle, &name, &username).await,
                EntryCommands::List { bundle } => {
                    cmd_entry_list(&client, &mut session, &bundle).await
                }
                EntryCommands::Show {
                    bundle,
                    entry,
                    reveal,
                } => cmd_entry_show(&client, &mut session, &bundle, &entry, reveal).await,
                EntryCommands::Update {
                    bundle,
                    entry,
                    username,
                } => {
                    cmd_entry_update(&client, &mut session, &bundle, &entry, username.as_deref())
                        .await
                }
                EntryCommands::Remove { bundle, entry } => {
                    cmd_entry_remove(&client, &mut session, &bundle, &entry).await
                }
            }
        }
    }
}

/// Build a client for the selected store.
fn open_client(args: &StoreArgs, scope: &str) -> Result<VaultClient> {
    let config = match (&args.kv_address, &args.store_root) {
        (Some(address), _) => StoreConfig::Kv {
            address: address.clone(),
            mount: args.kv_mount.clone(),
            token: prompt_secret("Enter store token: ")?.to_string(),
        },
        (None, Some(root)) => StoreConfig::Local { root: root.clone() },
        (None, None) => StoreConfig::default_local()?,
    };
    info!("Using {:?} store", config);

    let store = config
        .open(&create_default_registry())
        .context("Failed to open store")?;
    VaultClient::new(store, ClientConfig::new(scope)).context("Invalid client configuration")
}

/// Prompt for a secret without echo.
fn prompt_secret(prompt: &str) -> Result<Zeroizing<String>> {
    let secret = rpassword::prompt_password(prompt).context("Failed to read input")?;
    Ok(Zeroizing::new(secret))
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = prompt_secret(prompt)?;
    Ok(Zeroizing::new(password.as_bytes().to_vec()))
}

fn prompt_device_secret() -> Result<DeviceSecret> {
    let encoded = prompt_secret("Enter device secret: ")?;
    DeviceSecret::from_hex(&encoded).context("Invalid device secret")
}

async fn unlock(client: &VaultClient, identity: &IdentityId) -> Result<Session> {
    let password = prompt_password("Enter password: ")?;
    let device_secret = prompt_device_secret()?;
    client
        .unlock(identity, &password, &device_secret)
        .await
        .context("Failed to unlock")
}

fn bundle_id(bundle: &str) -> Result<BundleId> {
    BundleId::new(bundle).context("Invalid bundle id")
}

/// Register a new identity.
async fn cmd_register(
    client: &VaultClient,
    identity: &IdentityId,
    device_secret: Option<&str>,
) -> Result<()> {
    info!("Registering identity: {}", identity);

    let password = prompt_password("Enter password: ")?;
    let confirm = prompt_password("Confirm password: ")?;

    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    let (device_secret, generated) = match device_secret {
        Some(encoded) => (
            DeviceSecret::from_hex(encoded).context("Invalid device secret")?,
            false,
        ),
        None => (DeviceSecret::generate(), true),
    };

    let record = client
        .register(identity, &password, &device_secret)
        .await
        .context("Failed to register identity")?;

    println!("Identity registered successfully!");
    println!("  Identity: {}", identity);
    println!("  Record: {}", record.id);
    println!("  KDF iterations: {}", record.kdf_params.iterations);
    if generated {
        println!("\nDevice secret (store it safely, it is needed to unlock):");
        println!("  {}", device_secret.to_hex());
    }

    Ok(())
}

/// Create a bundle.
async fn cmd_bundle_create(client: &VaultClient, session: &mut Session, name: &str) -> Result<()> {
    let bundle = client
        .create_bundle(session, name)
        .await
        .context("Failed to create bundle")?;

    println!("Bundle created successfully!");
    println!("  ID: {}", bundle.id);
    println!("  Name: {}", bundle.name);

    Ok(())
}

/// List accessible bundles.
async fn cmd_bundle_list(client: &VaultClient, session: &Session) -> Result<()> {
    let bundles = client
        .bundles(session)
        .await
        .context("Failed to list bundles")?;

    if bundles.is_empty() {
        println!("No bundles.");
        return Ok(());
    }

    for bundle in bundles {
        let role = if bundle.is_owner(session.identity()) {
            "owner"
        } else if bundle.can_administer(session.identity()) {
            "admin"
        } else {
            "member"
        };
        println!(
            "  {}  {} ({}, {} members)",
            bundle.id,
            bundle.name,
            role,
            bundle.members.len()
        );
    }

    Ok(())
}

/// Share a bundle.
async fn cmd_bundle_share(
    client: &VaultClient,
    session: &mut Session,
    bundle: &str,
    recipient: &str,
    capabilities: &[String],
    admin: bool,
) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let recipient = IdentityId::new(recipient).context("Invalid recipient")?;
    let capabilities = capabilities
        .iter()
        .map(|c| Capability::parse(c))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Invalid capabilities")?;

    let updated = client
        .share_bundle(session, &bundle, &recipient, &capabilities, admin)
        .await
        .context("Failed to share bundle")?;

    println!("Bundle {} shared with {}", updated.name, recipient);

    Ok(())
}

/// Add a login entry.
async fn cmd_entry_add(
    client: &VaultClient,
    session: &mut Session,
    bundle: &str,
    name: &str,
    username: &str,
) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let secret = prompt_secret("Entry password: ")?;

    let key = client.open_bundle(session, &bundle).await.context("Failed to open bundle")?;
    let entries = client.entries(session, &bundle).await?;
    let metadata = entries.get_metadata(&key).await.context("Failed to read bundle")?;

    let entry = Entry::password(name, username, secret.as_str());
    let outcome = entries
        .put_entry(&key, None, &entry, &metadata)
        .await
        .context("Failed to add entry")?;

    println!("Entry added: {} ({})", name, outcome.descriptor.id);

    Ok(())
}

/// List entries.
async fn cmd_entry_list(client: &VaultClient, session: &mut Session, bundle: &str) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let key = client.open_bundle(session, &bundle).await.context("Failed to open bundle")?;
    let entries = client
        .entries(session, &bundle)
        .await?
        .list_entries(&key)
        .await
        .context("Failed to list entries")?;

    if entries.is_empty() {
        println!("Bundle is empty.");
    } else {
        for descriptor in entries {
            println!(
                "  {}  {} [{}] v{}",
                descriptor.id, descriptor.name, descriptor.entry_type, descriptor.version
            );
        }
    }

    Ok(())
}

/// Show one entry.
async fn cmd_entry_show(
    client: &VaultClient,
    session: &mut Session,
    bundle: &str,
    entry: &str,
    reveal: bool,
) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let id = EntryId::new(entry).context("Invalid entry id")?;

    let key = client.open_bundle(session, &bundle).await.context("Failed to open bundle")?;
    let entries = client.entries(session, &bundle).await?;
    let metadata = entries.get_metadata(&key).await.context("Failed to read bundle")?;
    let descriptor = metadata
        .find(&id)
        .with_context(|| format!("No entry {} in bundle", id))?;

    let entry = entries
        .get_entry(&key, descriptor)
        .await
        .context("Failed to read entry")?;

    println!("{} [{}]", entry.name, entry.entry_type);
    for field in entry.core.iter().chain(entry.more.iter()) {
        let value = if field.is_concealed() && !reveal {
            "********"
        } else {
            field.value.as_str()
        };
        println!("  {}: {}", field.label, value);
    }
    if !entry.tags.is_empty() {
        println!("  Tags: {}", entry.tags.join(", "));
    }

    Ok(())
}

/// Replace an entry's password.
async fn cmd_entry_update(
    client: &VaultClient,
    session: &mut Session,
    bundle: &str,
    entry: &str,
    username: Option<&str>,
) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let id = EntryId::new(entry).context("Invalid entry id")?;

    let key = client.open_bundle(session, &bundle).await.context("Failed to open bundle")?;
    let entries = client.entries(session, &bundle).await?;
    let metadata = entries.get_metadata(&key).await.context("Failed to read bundle")?;
    let descriptor = metadata
        .find(&id)
        .with_context(|| format!("No entry {} in bundle", id))?;
    let mut current = entries
        .get_entry(&key, descriptor)
        .await
        .context("Failed to read entry")?;

    let secret = prompt_secret("New entry password: ")?;
    for field in current.core.iter_mut() {
        match field.label.as_str() {
            "Password" => field.value = secret.to_string(),
            "Username" => {
                if let Some(username) = username {
                    field.value = username.to_string();
                }
            }
            _ => {}
        }
    }

    let outcome = entries
        .put_entry(&key, Some(&id), &current, &metadata)
        .await
        .context("Failed to update entry")?;
    if !outcome.reclaimed {
        info!("Previous version of {} was left in the store", id);
    }

    println!("Entry updated: {} (v{})", current.name, outcome.descriptor.version);

    Ok(())
}

/// Remove an entry.
async fn cmd_entry_remove(
    client: &VaultClient,
    session: &mut Session,
    bundle: &str,
    entry: &str,
) -> Result<()> {
    let bundle = bundle_id(bundle)?;
    let id = EntryId::new(entry).context("Invalid entry id")?;

    let key = client.open_bundle(session, &bundle).await.context("Failed to open bundle")?;
    let outcome = client
        .entries(session, &bundle)
        .await?
        .delete_entry(&key, &id)
        .await
        .context("Failed to remove entry")?;

    match outcome.removed {
        Some(removed) => println!("Entry removed: {}", removed.name),
        None => println!("No entry {} in bundle.", id),
    }

    Ok(())
}
