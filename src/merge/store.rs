use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::error::MergeError;
use super::model::{SourceDocument, TargetDocument};

/// Reads source workbooks and persists the merged one
pub trait WorkbookStore: Send + Sync {
    /// Open a workbook. With `preserve_formulas` off, formula cells come back
    /// with their cached values only.
    fn open(&self, path: &Path, preserve_formulas: bool) -> Result<SourceDocument, MergeError>;

    fn save(&self, document: &TargetDocument, path: &Path) -> Result<(), MergeError>;
}

/// Compute SHA-256 checksum of a file
pub fn compute_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
