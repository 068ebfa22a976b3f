use calamine::{open_workbook, Reader, Xlsx};
use glob::{MatchOptions, Pattern};
use log::{debug, warn};
use std::path::{Path, PathBuf};

use super::error::MergeError;
use super::types::FileDescriptor;

/// Extensions the merger can read and write
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm"];

/// Prefix of the lock files spreadsheet applications leave next to open workbooks
const TEMP_FILE_PREFIX: &str = "~$";

/// `REPORT.XLSX` is as much a workbook as `report.xlsx`
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Finds workbooks in a folder and reads their sheet names
#[derive(Debug, Clone, Copy)]
pub struct FolderScanner {
    pub include_subfolders: bool,
    pub skip_temp_files: bool,
}

impl FolderScanner {
    pub fn new(include_subfolders: bool, skip_temp_files: bool) -> Self {
        FolderScanner {
            include_subfolders,
            skip_temp_files,
        }
    }

    /// Describe every readable workbook under `folder`, sorted by path.
    ///
    /// Unreadable files are skipped with a warning; a missing folder yields
    /// an empty list.
    pub fn scan(&self, folder: &Path) -> Result<Vec<FileDescriptor>, MergeError> {
        if !folder.is_dir() {
            warn!("Folder not found: {}", folder.display());
            return Ok(Vec::new());
        }

        let mut paths = self.candidate_paths(folder)?;
        paths.sort_by_key(|p| p.to_string_lossy().to_lowercase());

        let mut descriptors = Vec::with_capacity(paths.len());
        for path in paths {
            match read_sheet_names(&path) {
                Ok(sheet_names) => {
                    debug!("Found {} ({} sheets)", path.display(), sheet_names.len());
                    descriptors.push(FileDescriptor::new(path, sheet_names));
                }
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }

        Ok(descriptors)
    }

    fn candidate_paths(&self, folder: &Path) -> Result<Vec<PathBuf>, MergeError> {
        let root = Pattern::escape(&folder.to_string_lossy());
        let pattern = if self.include_subfolders {
            format!("{}/**/*.xls*", root)
        } else {
            format!("{}/*.xls*", root)
        };

        let entries = glob::glob_with(&pattern, MATCH_OPTIONS)
            .map_err(|e| MergeError::validation(format!("Invalid folder pattern {}: {}", pattern, e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if self.accepts(&path) => paths.push(path),
                Ok(_) => {}
                Err(e) => warn!("Cannot read {}: {}", e.path().display(), e.error()),
            }
        }
        Ok(paths)
    }

    /// Whether a globbed path should be offered for merging
    pub fn accepts(&self, path: &Path) -> bool {
        if !path.is_file() || !is_workbook_path(path) {
            return false;
        }
        !(self.skip_temp_files && is_temp_file(path))
    }
}

impl Default for FolderScanner {
    fn default() -> Self {
        FolderScanner::new(false, true)
    }
}

pub fn is_workbook_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| WORKBOOK_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(TEMP_FILE_PREFIX))
        .unwrap_or(false)
}

/// Sheet names in workbook order
pub fn read_sheet_names(path: &Path) -> Result<Vec<String>, MergeError> {
    // Both accepted extensions share the OOXML container, whatever their case
    let workbook: Xlsx<std::io::BufReader<std::fs::File>> = open_workbook(path)
        .map_err(|e: calamine::XlsxError| MergeError::source_open(path, e.to_string()))?;
    Ok(workbook.sheet_names().to_vec())
}
