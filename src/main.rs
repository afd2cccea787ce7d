use anyhow::Context;
use bloglist::{
    client::BlogService,
    controller::AppController,
    db, log_capture, server,
    session::{LocalStorage, SessionStore},
    state::AppState,
    tui::{self, TuiConfig},
};
use clap::{Args, Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "bloglist=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "bloglist", about = "Blog list backend and terminal client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the blog collection and login API
    Serve(ServeArgs),
    /// Create a user who can log in and own blogs
    AddUser(AddUserArgs),
    /// Run the interactive terminal client against a running server
    Client(ClientArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3003")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// SQLite database file, created if missing
    #[arg(long, env = "DATABASE_PATH", default_value = "bloglist.db")]
    database: PathBuf,
}

#[derive(Args, Debug)]
struct AddUserArgs {
    username: String,

    /// Display name
    #[arg(long)]
    name: Option<String>,

    #[arg(long, env = "BLOGLIST_PASSWORD")]
    password: String,

    /// SQLite database file, created if missing
    #[arg(long, env = "DATABASE_PATH", default_value = "bloglist.db")]
    database: PathBuf,
}

#[derive(Args, Debug)]
struct ClientArgs {
    /// Server origin
    #[arg(long, env = "BLOGLIST_API_URL", default_value = "http://localhost:3003")]
    api_url: String,

    /// File holding the saved login session.
    /// Defaults to `bloglist-storage.json` adjacent to the binary.
    #[arg(long, env = "BLOGLIST_STORAGE")]
    storage: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (silently ignored if absent).
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_stderr_logging();
            serve(args).await
        }
        Command::AddUser(args) => {
            init_stderr_logging();
            add_user(args).await
        }
        Command::Client(args) => client(args).await,
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    tracing::info!("database: {}", args.database.display());
    let pool = db::init_pool(&args.database).await?;
    let app = server::app(AppState::new(pool));

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Cannot bind to {addr}"))?;

    tracing::info!("Listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn add_user(args: AddUserArgs) -> anyhow::Result<()> {
    let pool = db::init_pool(&args.database).await?;
    let user = db::add_user(&pool, &args.username, args.name.as_deref(), &args.password).await?;
    tracing::info!(id = user.id, "User '{}' created", user.username);
    Ok(())
}

async fn client(args: ClientArgs) -> anyhow::Result<()> {
    // Logs go to the in-app panel; writing to stderr would corrupt the screen.
    let (capture, log_buffer) = log_capture::new();
    tracing_subscriber::registry()
        .with(env_filter())
        .with(capture)
        .init();

    let storage_path = match args.storage {
        Some(path) => path,
        None => {
            let exe = std::env::current_exe().context("Cannot determine binary path")?;
            exe.parent()
                .context("Binary has no parent directory")?
                .join("bloglist-storage.json")
        }
    };
    tracing::info!("session storage: {}", storage_path.display());

    let api = BlogService::new(args.api_url.clone()).context("Cannot build HTTP client")?;
    let sessions = SessionStore::new(LocalStorage::new(storage_path));
    let controller = Arc::new(AppController::new(Arc::new(api), sessions));

    tui::run(TuiConfig {
        api_url: args.api_url,
        controller,
        log_buffer,
    })
    .await
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result { tracing::error!("ctrl-c error: {}", e); }
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
    tracing::info!("Shutting down gracefully");
}
