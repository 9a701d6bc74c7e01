use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;

mod app;
mod bot;
mod clock;
mod config;
mod db;
mod error;
mod feed;
mod locks;
mod models;
mod notify;
mod scheduler;
#[cfg(test)]
mod testing;

use app::App;
use clock::SystemClock;
use config::Config;
use db::{KvStore, MemoryStore, Repository};
use error::Result;
use feed::ChannelFetcher;
use notify::{LogNotifier, Notifier, TelegramNotifier};
use scheduler::Scheduler;

#[derive(Debug, Parser)]
#[command(name = "postwatch", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "POSTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Keep all state in memory instead of the database
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler and the webhook until Ctrl-C (default)
    Serve,
    /// Check every due subscription once and exit
    CheckOnce,
    /// Run one bot command as the given user and print the reply
    Command {
        user: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (info and above unless RUST_LOG says otherwise)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env();
    config.validate()?;

    let app = Arc::new(build_app(&config, cli.memory).await?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(app, &config).await?,
        Command::CheckOnce => {
            let report = Scheduler::new(app, &config.scheduler).run_due_batch().await;
            println!(
                "Checked {} subscriptions: {} delivered, {} failed, {} errors",
                report.checked, report.delivered, report.failed, report.errors
            );
        }
        Command::Command { user, text } => {
            let reply = bot::respond(&app, &user, bot::parse_command(&text.join(" "))).await;
            println!("{}", reply);
        }
    }

    Ok(())
}

async fn build_app(config: &Config, memory: bool) -> Result<App> {
    let kv: Arc<dyn KvStore> = if memory {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(Repository::new(&config.db_path).await?)
    };

    let fetcher = Arc::new(ChannelFetcher::new(
        &config.boosty,
        config.scheduler.fetch_timeout(),
    )?);

    let notifier: Arc<dyn Notifier> = match &config.telegram.token {
        Some(token) => Arc::new(TelegramNotifier::new(&config.telegram.api_base, token)?),
        None => {
            tracing::warn!("No Telegram token configured, messages will only be logged");
            Arc::new(LogNotifier)
        }
    };

    Ok(App::new(
        kv,
        fetcher,
        notifier,
        Arc::new(SystemClock),
        &config.scheduler,
    ))
}

async fn serve(app: Arc<App>, config: &Config) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);

    let scheduler = Scheduler::new(app.clone(), &config.scheduler);
    let scheduler_task = tokio::spawn({
        let stop = stop_rx.clone();
        async move { scheduler.run(stop).await }
    });

    let webhook_task = match &config.webhook.secret {
        Some(secret) => {
            let listener = TcpListener::bind(&config.webhook.listen_addr).await?;
            tracing::info!("Webhook listening on {}", config.webhook.listen_addr);
            let router = bot::router(app.clone(), secret);
            Some(tokio::spawn(bot::serve(listener, router, stop_rx.clone())))
        }
        None => {
            tracing::info!("No webhook secret configured, webhook disabled");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    let _ = stop_tx.send(true);

    scheduler_task.await.map_err(anyhow::Error::from)?;
    if let Some(task) = webhook_task {
        task.await.map_err(anyhow::Error::from)??;
    }

    Ok(())
}
