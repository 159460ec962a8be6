//! Error types for link resolution.

use thiserror::Error;

/// Reasons a share link does not produce a download task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Folder links cannot be downloaded as a single file.
    #[error("folder links cannot be downloaded directly: {link}")]
    Folder {
        /// The folder link.
        link: String,
    },

    /// No file identifier could be found in the link.
    #[error("could not extract a file ID from {link}")]
    MissingFileId {
        /// The offending link.
        link: String,
    },

    /// The link has a file ID but an unrecognized shape.
    #[error("unrecognized share link format: {link}")]
    Unsupported {
        /// The offending link.
        link: String,
    },
}

impl ResolveError {
    /// The link that failed to resolve.
    #[must_use]
    pub fn link(&self) -> &str {
        match self {
            Self::Folder { link } | Self::MissingFileId { link } | Self::Unsupported { link } => {
                link
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_display() {
        let error = ResolveError::Folder {
            link: "https://drive.google.com/drive/folders/xyz".to_string(),
        };
        assert!(error.to_string().contains("folder"));
        assert_eq!(error.link(), "https://drive.google.com/drive/folders/xyz");
    }
}
