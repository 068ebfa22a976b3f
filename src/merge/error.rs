use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::Feature;

/// Errors raised while merging workbooks
#[derive(Debug, Error)]
pub enum MergeError {
    /// Bad input detected before any file is touched
    #[error("{0}")]
    Validation(String),

    #[error("Failed to open {}: {reason}", .path.display())]
    SourceOpen { path: PathBuf, reason: String },

    #[error("Could not copy {feature}: {message}")]
    FeatureCopy { feature: Feature, message: String },

    #[error("Failed to save {}: {reason}{}", .path.display(), hint_suffix(.hint))]
    Save {
        path: PathBuf,
        reason: String,
        hint: Option<String>,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Invalid settings file {}: {reason}", .path.display())]
    Settings { path: PathBuf, reason: String },

    #[error("Merge task failed: {0}")]
    Task(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref().map(|h| format!(" ({})", h)).unwrap_or_default()
}

impl MergeError {
    pub fn validation(message: impl Into<String>) -> Self {
        MergeError::Validation(message.into())
    }

    pub fn source_open(path: &Path, reason: impl Into<String>) -> Self {
        MergeError::SourceOpen {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn feature(feature: Feature, message: impl Into<String>) -> Self {
        MergeError::FeatureCopy {
            feature,
            message: message.into(),
        }
    }

    pub fn save(path: &Path, reason: impl Into<String>) -> Self {
        MergeError::Save {
            path: path.to_path_buf(),
            reason: reason.into(),
            hint: None,
            source: None,
        }
    }

    /// Save failure caused by an I/O error, with a hint when the file is locked
    pub fn save_io(path: &Path, context: impl Into<String>, err: io::Error) -> Self {
        let hint = is_lock_conflict(&err).then(|| {
            "the file may be open in another program or the folder is write-protected; \
             close it and try again"
                .to_string()
        });

        MergeError::Save {
            path: path.to_path_buf(),
            reason: context.into(),
            hint,
            source: Some(err),
        }
    }

    pub fn settings(path: &Path, reason: impl Into<String>) -> Self {
        MergeError::Settings {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Whether the run must stop on this error
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MergeError::SourceOpen { .. } | MergeError::FeatureCopy { .. }
        )
    }
}

/// Render an error followed by each of its causes, separated by `: `
pub fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Detect lock and permission conflicts on the destination file
pub fn is_lock_conflict(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }

    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32) | Some(33)) {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_hint_on_permission_denied() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let merge_err = MergeError::save_io(Path::new("/out/Merged.xlsx"), "cannot create the output file", err);

        match &merge_err {
            MergeError::Save { hint, .. } => assert!(hint.is_some()),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(merge_err.to_string().contains("close it and try again"));
        assert!(merge_err.is_fatal());
    }

    #[test]
    fn test_save_without_hint() {
        let err = io::Error::new(io::ErrorKind::NotFound, "no such directory");
        let merge_err = MergeError::save_io(Path::new("/missing/Merged.xlsx"), "cannot create the output file", err);
        assert_eq!(
            merge_err.to_string(),
            "Failed to save /missing/Merged.xlsx: cannot create the output file"
        );
    }

    #[test]
    fn test_error_chain_includes_io_cause() {
        let err = io::Error::new(io::ErrorKind::NotFound, "no such directory");
        let merge_err = MergeError::save_io(Path::new("/missing/Merged.xlsx"), "cannot create the output file", err);

        assert!(merge_err.source().is_some());
        assert_eq!(
            error_chain(&merge_err),
            "Failed to save /missing/Merged.xlsx: cannot create the output file: no such directory"
        );
        assert_eq!(
            error_chain(&MergeError::validation("No output folder selected.")),
            "No output folder selected."
        );
    }

    #[test]
    fn test_non_fatal_kinds() {
        assert!(!MergeError::feature(Feature::Font, "bad").is_fatal());
        assert!(!MergeError::source_open(Path::new("a.xlsx"), "corrupt").is_fatal());
        assert!(MergeError::validation("No files selected for merging.").is_fatal());
    }
}
