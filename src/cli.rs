//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download documents behind share links.
///
/// Links come from a page (`--scrape-url`), a links file (`--links-file`), or
/// the config file. Unset flags fall back to the config file, then to
/// built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "sharelink-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Page to scrape for share links
    #[arg(long, value_name = "URL", conflicts_with = "links_file")]
    pub scrape_url: Option<String>,

    /// File with one share link per line
    #[arg(long, value_name = "PATH")]
    pub links_file: Option<PathBuf>,

    /// Config file (default: $XDG_CONFIG_HOME/sharelink-dl/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory receiving downloaded files
    #[arg(short = 'o', long, value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum transfer attempts per file, first try included (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_attempts: Option<u8>,

    /// Overall batch timeout in seconds; unfinished files keep their .part
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=86_400))]
    pub timeout: Option<u64>,

    /// Export format for documents (pdf, docx, odt, rtf, txt, html, epub)
    #[arg(long, value_name = "FORMAT")]
    pub doc_format: Option<String>,

    /// Export format for spreadsheets (pdf, xlsx, ods, csv, tsv, html)
    #[arg(long, value_name = "FORMAT")]
    pub sheet_format: Option<String>,

    /// Export format for presentations (pdf, pptx, odp, txt)
    #[arg(long, value_name = "FORMAT")]
    pub slides_format: Option<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
