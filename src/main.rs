use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use release_mirror::{Config, ConfigOverrides, EstimateReport, MirrorResult, ReleaseMirror};

#[derive(Parser)]
#[command(name = "release-mirror")]
#[command(about = "Mirror GitHub and GitLab release assets to a local directory")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show what would be downloaded without writing anything
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Mirror a single repository instead of the configured list
    #[arg(long)]
    repo: Option<String>,

    /// Base directory for mirrored releases
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Proxy server (host:port)
    #[arg(long)]
    proxy: Option<String>,

    /// GitHub token (overrides config and GITHUB_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// GitLab token (overrides config and GITLAB_TOKEN)
    #[arg(long)]
    gitlab_token: Option<String>,

    /// Estimate API requests needed instead of mirroring
    #[arg(long)]
    estimate: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("failed to initialize logging")?;

    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli)?;
    debug!("mirroring into {}", config.base_dir.display());

    if config.urls.is_empty() {
        warn!("no urls configured");
        return Ok(ExitCode::SUCCESS);
    }

    let urls = config.urls.clone();
    let mirror = ReleaseMirror::new(config, cli.dry_run).context("failed to set up http clients")?;

    if cli.estimate {
        let report = mirror.estimate_all(&urls).await;
        print_estimate(&report);
        return Ok(ExitCode::SUCCESS);
    }

    if cli.dry_run {
        info!("dry run: nothing will be written");
    }

    let result = mirror.mirror_all().await;
    print_summary(&result);

    Ok(if result.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Resolve configuration: file (explicit or default), then CLI, then environment
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match (&cli.config, &cli.repo) {
        (Some(path), _) => Config::load(path)?,
        (None, Some(_)) => {
            let Some(base_dir) = &cli.base_dir else {
                bail!("--repo requires --base-dir when no config file is given");
            };
            Config::with_base_dir(base_dir)
        }
        (None, None) => {
            let default_path = Config::default_config_path()?;
            if !default_path.exists() {
                bail!(
                    "no configuration found: pass --config or --repo (looked for {})",
                    default_path.display()
                );
            }
            Config::load(&default_path)?
        }
    };

    if let Some(repo) = &cli.repo {
        config.urls = vec![repo.clone()];
    }

    config.apply_overrides(ConfigOverrides {
        base_dir: cli.base_dir.clone(),
        proxy: cli.proxy.clone(),
        github_token: cli.token.clone(),
        gitlab_token: cli.gitlab_token.clone(),
    });
    config.expand_paths()?;
    config.apply_env_tokens();
    config.validate()?;

    Ok(config)
}

fn print_summary(result: &MirrorResult) {
    println!();
    println!("Summary:");
    println!("  Downloaded:      {}", result.downloaded.len());
    println!("  Skipped:         {}", result.skipped.len());
    println!("  Errors:          {}", result.errors.len());
    println!("  Hash mismatches: {}", result.hash_mismatches.len());
    println!("  API requests:    {}", result.api_requests);

    if !result.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &result.errors {
            println!("  {}", error);
        }
    }

    if !result.hash_mismatches.is_empty() {
        println!();
        println!("Hash mismatches:");
        for mismatch in &result.hash_mismatches {
            println!("  {}", mismatch);
        }
    }
}

fn print_estimate(report: &EstimateReport) {
    println!();
    println!("Rate limits:");
    if let Some(rl) = report.github_rate_limit {
        println!("  GitHub: {}/{} remaining ({} used)", rl.remaining, rl.limit, rl.used);
    }
    if let Some(rl) = report.gitlab_rate_limit {
        println!("  GitLab: {}/{} remaining ({} used)", rl.remaining, rl.limit, rl.used);
    }

    println!();
    println!("Repositories:");
    for estimate in &report.repositories {
        println!(
            "  {}: {} releases, {} requests",
            estimate.repository, estimate.release_count, estimate.api_requests
        );
    }

    println!();
    println!("Total releases:          {}", report.total_releases());
    println!("Total requests needed:   {}", report.total_requests());
    println!("Requests spent estimating: {}", report.estimate_requests);
}
