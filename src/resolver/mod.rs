//! Share-link resolution: maps a user-facing share URL to a [`DownloadTask`].
//!
//! - [`LinkResolver`] - recognizes Drive file links and Docs/Sheets/Slides
//!   links, choosing the export format from [`ExportFormats`]
//! - [`extract_file_id`] - pulls the provider file ID out of a URL
//! - [`ResolveError`] - why a link produced no task
//!
//! Resolution failures never reach the download engine: [`LinkResolver::resolve_all`]
//! splits them out before a batch starts.
//!
//! # Example
//!
//! ```
//! use sharelink_core::config::ExportFormats;
//! use sharelink_core::resolver::LinkResolver;
//!
//! let resolver = LinkResolver::new(ExportFormats::default());
//! let task = resolver
//!     .resolve("https://docs.google.com/document/d/abc123/edit")
//!     .unwrap();
//! assert_eq!(
//!     task.download_url,
//!     "https://docs.google.com/document/d/abc123/export?format=pdf"
//! );
//! ```
//!
//! [`DownloadTask`]: crate::download::DownloadTask
//! [`ExportFormats`]: crate::config::ExportFormats

mod drive;
mod error;

pub use drive::{LinkResolver, ResolvedLinks, extract_file_id};
pub use error::ResolveError;
