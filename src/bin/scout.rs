//! Scout CLI.
//!
//! Drives the full portal workflow (login, search, extraction) or the
//! structure-inspection probe against an arbitrary page.
//!
//! Usage examples:
//!   Search for a property (credentials from SCOUT_EMAIL/SCOUT_PASSWORD):
//!     $ SCOUT_EMAIL=... SCOUT_PASSWORD=... \
//!       cargo run --bin scout -- search --property "クレールハイツ" --headless
//!   Inspect a page's search controls:
//!     $ cargo run --bin scout -- inspect --url https://example.com

use std::path::PathBuf;

use anyhow::{Context, Result};
use bukken_scout::config::{ScoutConfig, ScoutConfigOverrides, Verbosity};
use bukken_scout::{ChromiumChannel, Session, SiteProfile};
use clap::{Args, Parser, Subcommand};
use log::info;

#[derive(Parser)]
#[command(name = "scout", author, version, about = "Rental portal automation utilities")]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in, search for a property, and print the extracted record.
    Search(SearchArgs),
    /// Catalogue plausible search controls on a page.
    Inspect(InspectArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// Property name to search for.
    #[arg(long)]
    property: String,

    /// Run the browser headless.
    #[arg(long)]
    headless: bool,

    /// Directory for screenshots, captured markup, and records.
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Assume an already-authenticated profile and skip the login step.
    #[arg(long)]
    skip_login: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// Page to inspect.
    #[arg(long)]
    url: String,

    /// Run the browser headless.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let verbosity = verbosity_from_count(cli.verbose);

    match cli.command {
        Command::Search(args) => run_search(args, verbosity).await,
        Command::Inspect(args) => run_inspect(args, verbosity).await,
    }
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn build_config(
    headless: bool,
    artifacts: Option<PathBuf>,
    verbosity: Verbosity,
) -> Result<ScoutConfig> {
    let config = ScoutConfig::from_env().context("failed to load configuration")?;
    let mut overrides = ScoutConfigOverrides::default().headless(headless);
    overrides.verbose = Some(verbosity);
    if artifacts.is_some() {
        overrides.artifacts_dir = Some(artifacts);
    }
    Ok(config.with_overrides(overrides))
}

async fn run_search(args: SearchArgs, verbosity: Verbosity) -> Result<()> {
    let config = build_config(args.headless, args.artifacts, verbosity)?;

    let channel = ChromiumChannel::launch(&config)
        .await
        .context("failed to launch browser")?;
    let session = Session::new(Box::new(channel), SiteProfile::rental_portal(), config);

    let outcome = if args.skip_login {
        info!("skipping login, searching directly");
        session.search(&args.property).await?;
        session.collect().await?
    } else {
        session.run(&args.property).await?
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).context("failed to encode outcome")?
    );
    if !outcome.missing.is_empty() {
        info!("fields without a value: {}", outcome.missing.join(", "));
    }

    session.close().await.context("failed to close browser")?;
    Ok(())
}

async fn run_inspect(args: InspectArgs, verbosity: Verbosity) -> Result<()> {
    let config = build_config(args.headless, None, verbosity)?;

    let channel = ChromiumChannel::launch(&config)
        .await
        .context("failed to launch browser")?;
    let session = Session::new(Box::new(channel), SiteProfile::rental_portal(), config);

    session.goto(&args.url).await?;
    let report = session.inspect().await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to encode report")?
    );

    session.close().await.context("failed to close browser")?;
    Ok(())
}
