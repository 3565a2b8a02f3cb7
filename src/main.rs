use clap::{Parser, Subcommand};
use futures::StreamExt;
use mimalloc::MiMalloc;
use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use castor::auth::{callback, flow};
use castor::config::{Config, wire};
use castor::storage::AccountStore;
use castor::Gateway;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "castor")]
#[command(about = "OpenAI-compatible gateway multiplexing CloudCode identities")]
#[command(version)]
struct Cli {
    /// Override the accounts storage file.
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway server.
    Serve,

    /// Log in with a Google account and store the identity.
    Login {
        /// Pre-resolved project id to pass through the OAuth flow.
        #[arg(long)]
        project_id: Option<String>,
    },

    /// Manage stored identities.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },

    /// One-shot generation from the command line.
    Generate {
        #[arg(long, default_value = "gemini-3-pro")]
        model: String,

        /// Optional system instruction.
        #[arg(long)]
        system: Option<String>,

        prompt: String,
    },
}

#[derive(Subcommand)]
enum AccountsCommand {
    /// List stored identities.
    List,
    /// Remove an identity by email.
    Remove {
        #[arg(long)]
        email: String,
    },
    /// Set the active identity for both families.
    Use {
        #[arg(long)]
        index: usize,
    },
    /// Delete the whole store.
    Clear,
}

fn store_for(cli_storage: Option<PathBuf>) -> AccountStore {
    cli_storage.map_or_else(AccountStore::from_env, AccountStore::at)
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let store = store_for(cli.storage.clone());

    match cli.command {
        Command::Serve => serve(store).await,
        Command::Login { project_id } => login(store, project_id.as_deref()).await,
        Command::Accounts { command } => accounts(store, command),
        Command::Generate {
            model,
            system,
            prompt,
        } => generate(store, &model, system.as_deref(), &prompt).await,
    }
}

fn init_tracing(loglevel: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(loglevel.to_string()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();
}

async fn serve(store: AccountStore) -> Result<(), Box<dyn std::error::Error>> {
    // The server requires a real config file with a non-empty castor_key.
    let cfg = Config::from_toml();
    init_tracing(&cfg.basic.loglevel);

    let gateway = Arc::new(Gateway::load(cfg.gateway(), store));
    let castor_key: Arc<str> = Arc::from(cfg.basic.castor_key.clone());
    let state = castor::server::router::CastorState::new(gateway, castor_key);
    let app = castor::server::router::castor_router(state);

    let addr = SocketAddr::from((cfg.basic.listen_addr, cfg.basic.listen_port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server has shut down gracefully.");
    Ok(())
}

async fn login(
    store: AccountStore,
    project_id: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_optional_toml();
    init_tracing(&cfg.basic.loglevel);
    let gateway_cfg = cfg.gateway();

    let auth = flow::build_authorization_url(&gateway_cfg, project_id.unwrap_or_default())?;
    println!("Open this URL in your browser to authorize castor:\n\n{}\n", auth.url);
    println!("Waiting for the browser callback...");

    let (code, state) = callback::wait_for_callback(wire::OAUTH_REDIRECT_PORT).await?;

    let http = reqwest::Client::new();
    let login = flow::exchange_code(&gateway_cfg, &http, &code, &state).await?;

    store.add_or_update(
        login.email.as_deref(),
        &login.refresh_token,
        login.project_id.as_deref(),
        login.managed_project_id.as_deref(),
    )?;

    println!(
        "Logged in as {} (project: {}).",
        login.email.as_deref().unwrap_or("<unknown>"),
        login.project_id.as_deref().unwrap_or("<undiscovered>")
    );
    Ok(())
}

fn accounts(
    store: AccountStore,
    command: AccountsCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        AccountsCommand::List => {
            let Some(doc) = store.load() else {
                println!("No accounts stored.");
                return Ok(());
            };
            if doc.accounts.is_empty() {
                println!("No accounts stored.");
                return Ok(());
            }

            println!(
                "{:>3}  {:<32} {:<24} {:<17} {:<17} active",
                "#", "email", "project", "added", "last used"
            );
            for (index, account) in doc.accounts.iter().enumerate() {
                let mut active = String::new();
                if doc.active_index_by_family.gemini == index {
                    active.push_str("gemini ");
                }
                if doc.active_index_by_family.claude == index {
                    active.push_str("claude");
                }
                println!(
                    "{index:>3}  {:<32} {:<24} {:<17} {:<17} {active}",
                    account.email.as_deref().unwrap_or("-"),
                    account.project_id.as_deref().unwrap_or("-"),
                    format_timestamp(account.added_at),
                    format_timestamp(account.last_used),
                );
            }
        }
        AccountsCommand::Remove { email } => {
            if store.remove_by_email(&email)? {
                println!("Removed {email}.");
            } else {
                println!("No account with email {email}.");
            }
        }
        AccountsCommand::Use { index } => {
            if store.set_active(index)? {
                println!("Active account set to #{index}.");
            } else {
                println!("Index {index} is out of range.");
            }
        }
        AccountsCommand::Clear => {
            store.clear();
            println!("Account store cleared.");
        }
    }
    Ok(())
}

async fn generate(
    store: AccountStore,
    model: &str,
    system: Option<&str>,
    prompt: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = Config::from_optional_toml();
    init_tracing(&cfg.basic.loglevel);

    let gateway = Gateway::load(cfg.gateway(), store);
    let contents = vec![castor_schema::Content::text(
        Some("user".to_string()),
        prompt,
    )];

    let mut chunks = std::pin::pin!(gateway.generate_stream(model, contents, system, None).await?);
    let mut stdout = std::io::stdout();
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Err(err) => return Err(err.into()),
        }
    }
    println!();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { /* ... */ },
        _ = terminate => { /* ... */ },
    }
}
