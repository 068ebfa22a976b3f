use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::error::MergeError;

pub const DEFAULT_OUTPUT_FILENAME: &str = "MergedWorkbook.xlsx";

/// Configuration for one merge run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MergeSettings {
    pub include_subfolders: bool,
    pub skip_temp_files: bool,
    /// Folder the merged workbook is written to; empty means not chosen yet
    pub output_folder: PathBuf,
    pub output_filename: String,
    pub create_index_sheet: bool,
    /// Keep formula expressions instead of their last computed values
    pub preserve_formulas: bool,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            include_subfolders: false,
            skip_temp_files: true,
            output_folder: PathBuf::new(),
            output_filename: DEFAULT_OUTPUT_FILENAME.to_string(),
            create_index_sheet: false,
            preserve_formulas: true,
        }
    }
}

impl MergeSettings {
    /// Load settings from a JSON file; missing keys take their defaults
    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let content = fs::read_to_string(path).map_err(|e| MergeError::settings(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| MergeError::settings(path, e.to_string()))
    }

    /// Check that an output location is configured
    pub fn validate(&self) -> Result<(), MergeError> {
        if self.output_folder.as_os_str().is_empty() {
            return Err(MergeError::validation("No output folder selected."));
        }
        if self.output_filename.trim().is_empty() {
            return Err(MergeError::validation("No output filename given."));
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_folder.join(self.output_filename.trim())
    }
}
