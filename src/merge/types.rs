use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Represents a cell value with type information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    #[default]
    Empty,
    String(String),
    Number(f64),
    Boolean(bool),
    Error(String),
    /// Expression stored without the leading `=`
    Formula { formula: String, cached_value: Option<Box<CellValue>> },
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_formula(&self) -> bool {
        matches!(self, CellValue::Formula { .. })
    }

    /// The value a reader sees without recalculation
    pub fn cached(&self) -> CellValue {
        match self {
            CellValue::Formula { cached_value, .. } => cached_value
                .as_deref()
                .cloned()
                .unwrap_or(CellValue::Empty),
            other => other.clone(),
        }
    }

    /// Text shown for the value, used for auto-sizing columns
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::String(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
            CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Error(e) => e.clone(),
            CellValue::Formula { formula, .. } => format!("={}", formula),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

// ==================== Copy Features ====================

/// One independently copyable part of a worksheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    TabColor,
    FreezePanes,
    PageSetup,
    ColumnDimension,
    RowDimension,
    CellValue,
    Font,
    Border,
    Fill,
    NumberFormat,
    Alignment,
    Protection,
    MergedRange,
    DataValidation,
    ConditionalFormatting,
    Table,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::TabColor => "tab color",
            Feature::FreezePanes => "freeze panes",
            Feature::PageSetup => "page setup",
            Feature::ColumnDimension => "column dimension",
            Feature::RowDimension => "row dimension",
            Feature::CellValue => "cell value",
            Feature::Font => "font",
            Feature::Border => "border",
            Feature::Fill => "fill",
            Feature::NumberFormat => "number format",
            Feature::Alignment => "alignment",
            Feature::Protection => "protection",
            Feature::MergedRange => "merged range",
            Feature::DataValidation => "data validation",
            Feature::ConditionalFormatting => "conditional formatting",
            Feature::Table => "table",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature that could not be copied; recorded instead of aborting the copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyWarning {
    pub sheet: String,
    pub feature: Feature,
    /// A1 reference or range the failure applies to, if any
    pub location: Option<String>,
    pub message: String,
}

impl fmt::Display for CopyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(
                f,
                "Warning: could not copy {} at '{}'!{}: {}",
                self.feature, self.sheet, location, self.message
            ),
            None => write!(
                f,
                "Warning: could not copy {} on '{}': {}",
                self.feature, self.sheet, self.message
            ),
        }
    }
}

// ==================== Merge Inputs & Outputs ====================

/// Metadata about a workbook found by the scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub display_name: String,
    pub sheet_names: Vec<String>,
    pub sheet_count: usize,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl FileDescriptor {
    pub fn new(path: impl Into<PathBuf>, sheet_names: Vec<String>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        FileDescriptor {
            path,
            display_name,
            sheet_count: sheet_names.len(),
            sheet_names,
            selected: true,
        }
    }
}

/// One successfully copied sheet, in copy order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRecord {
    /// 1-based position of the file among the selected files
    pub file_index: usize,
    pub file_name: String,
    pub original_sheet_name: String,
    pub new_sheet_name: String,
}

/// Running count of copied sheets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    /// Build a progress pair that always satisfies `current <= total`
    pub fn new(current: usize, total: usize) -> Self {
        Progress {
            current,
            total: total.max(current),
        }
    }
}
