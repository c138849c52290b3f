use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use filtersync::app::AppContext;
use filtersync::cli::{commands, Cli, Commands, DaemonAction};
use filtersync::config::Config;
use filtersync::daemon::{self, Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Daemon { action: DaemonAction::Stop } => {
            match daemon::stop_daemon() {
                Ok(()) => println!("Daemon stopped"),
                Err(e) => eprintln!("{}", e),
            }
            return Ok(());
        }
        Commands::Daemon { action: DaemonAction::Status } => {
            println!("{}", daemon::daemon_status());
            return Ok(());
        }
        _ => {}
    }

    let ctx = AppContext::new(config)?;

    match cli.command {
        Commands::Sync { force } => commands::sync(&ctx, force).await?,
        Commands::Daemon { .. } => Daemon::new(Arc::new(ctx)).run().await?,
        Commands::Count => commands::count(&ctx).await?,
        Commands::Validate { url } => commands::validate(&ctx, &url).await?,
        Commands::Status => commands::status(&ctx)?,
        Commands::Path => commands::print_path(&ctx)?,
        Commands::Show => commands::show_filters(&ctx)?,
        Commands::Subscribe {
            url,
            title,
            file,
            primary,
        } => commands::subscribe(&ctx, &url, title, file, primary).await?,
        Commands::Unsubscribe { url } => commands::unsubscribe(&ctx, &url).await?,
        Commands::Allow { domain, remove } => commands::allow(&ctx, &domain, remove).await?,
        Commands::Block { domain, remove } => commands::block(&ctx, &domain, remove).await?,
        Commands::AcceptableAds { state } => {
            commands::acceptable_ads(&ctx, state.enabled()).await?
        }
        Commands::Cadence { mode } => commands::cadence(&ctx, mode.into())?,
    }

    Ok(())
}
