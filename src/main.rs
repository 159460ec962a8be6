//! CLI entry point for sharelink-dl.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use sharelink_core::links::{dedupe_links, read_links_file, scrape_page, write_default_links_file};
use sharelink_core::{
    BatchSummary, DownloadEngine, DownloaderConfig, FilenameResolver, HttpClient, LinkResolver,
    TransferEngine,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::Args;

/// Exit status when the batch was interrupted or timed out.
const EXIT_INTERRUPTED: u8 = 130;

/// Where the links for this run come from.
#[derive(Debug)]
enum LinkSource {
    Scrape { url: String, from_cli: bool },
    File { path: PathBuf, from_cli: bool },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let mut config = load_config(&args)?;
    init_tracing(&args, config.log_level.as_deref());

    debug!(?args, "CLI arguments parsed");
    info!("sharelink-dl starting");

    apply_overrides(&mut config, &args);
    config.validate().context("invalid configuration")?;

    let client =
        HttpClient::new(&config.client_settings()).context("failed to build HTTP client")?;

    let source = select_source(&args, &config);
    let raw_links = collect_links(&client, &source, &config).await?;
    if raw_links.is_empty() {
        info!("no links to process");
        return Ok(ExitCode::SUCCESS);
    }

    let (links, removed) = dedupe_links(raw_links);
    if removed > 0 {
        info!(removed, "removed duplicate links");
    }
    info!(count = links.len(), "unique links to process");

    let resolved = LinkResolver::new(config.export.clone()).resolve_all(&links);

    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .with_context(|| {
            format!(
                "cannot create download directory {}",
                config.download_dir.display()
            )
        })?;

    let transfer = TransferEngine::new(
        client,
        FilenameResolver::new(config.download_dir.clone()),
        config.retry.policy(),
    )?
    .with_confirm_base(&config.confirm_base_url)?
    .with_chunk_size(config.chunk_size);
    let engine = DownloadEngine::new(transfer, config.max_workers)?
        .with_batch_timeout(config.batch_timeout());

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping new downloads");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let results = engine
        .run_batch(resolved.tasks, Arc::clone(&interrupted))
        .await;

    let summary = BatchSummary::from_results(&results).with_unresolved(&resolved.failures);
    summary.log(&config.download_dir);

    if interrupted.load(Ordering::SeqCst) {
        warn!("batch interrupted, partial files are kept for the next run");
        return Ok(ExitCode::from(EXIT_INTERRUPTED));
    }
    if summary.has_failures() {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn load_config(args: &Args) -> Result<DownloaderConfig> {
    match &args.config {
        Some(path) => DownloaderConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => DownloaderConfig::load_default().context("failed to load default config"),
    }
}

/// Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info.
fn init_tracing(args: &Args, config_level: Option<&str>) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => config_level.unwrap_or("info"),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn apply_overrides(config: &mut DownloaderConfig, args: &Args) {
    if let Some(dir) = &args.download_dir {
        config.download_dir.clone_from(dir);
    }
    if let Some(concurrency) = args.concurrency {
        config.max_workers = usize::from(concurrency);
    }
    if let Some(attempts) = args.max_attempts {
        config.retry.max_attempts = u32::from(attempts);
    }
    if let Some(secs) = args.timeout {
        config.batch_timeout_secs = Some(secs);
    }
    if let Some(format) = &args.doc_format {
        config.export.document.clone_from(format);
    }
    if let Some(format) = &args.sheet_format {
        config.export.spreadsheet.clone_from(format);
    }
    if let Some(format) = &args.slides_format {
        config.export.presentation.clone_from(format);
    }
}

/// `--scrape-url` > `--links-file` > config `scrape_url` > config `links_file`.
fn select_source(args: &Args, config: &DownloaderConfig) -> LinkSource {
    if let Some(url) = &args.scrape_url {
        LinkSource::Scrape {
            url: url.clone(),
            from_cli: true,
        }
    } else if let Some(path) = &args.links_file {
        LinkSource::File {
            path: path.clone(),
            from_cli: true,
        }
    } else if let Some(url) = &config.scrape_url {
        LinkSource::Scrape {
            url: url.clone(),
            from_cli: false,
        }
    } else {
        LinkSource::File {
            path: config.links_file.clone(),
            from_cli: false,
        }
    }
}

async fn collect_links(
    client: &HttpClient,
    source: &LinkSource,
    config: &DownloaderConfig,
) -> Result<Vec<String>> {
    match source {
        LinkSource::Scrape { url, from_cli } => {
            info!(url = %url, from_cli, "scraping page for links");
            let links = scrape_page(client, url, &config.link_patterns)
                .await
                .with_context(|| format!("failed to scrape {url}"))?;
            if links.is_empty() {
                warn!(url = %url, "no matching links found on page");
            }
            Ok(links)
        }
        LinkSource::File { path, from_cli } => {
            info!(path = %path.display(), from_cli, "reading links file");
            if !from_cli && write_default_links_file(path)? {
                info!(
                    path = %path.display(),
                    "add links to the new file or pass --scrape-url / --links-file"
                );
                return Ok(Vec::new());
            }
            let links = read_links_file(path)?;
            if links.is_empty() {
                warn!(path = %path.display(), "links file has no links");
            }
            Ok(links)
        }
    }
}
