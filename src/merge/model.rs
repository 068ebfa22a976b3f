//! In-memory workbook model shared by source and target documents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use super::coords::{cell_ref, CellRange, MAX_COL, MAX_ROW};
use super::error::MergeError;
use super::styles::{validate_color, CellStyle, DifferentialStyles};
use super::types::{CellValue, CopyWarning, Feature};

/// Longest sheet name a workbook accepts
pub const MAX_SHEET_NAME_LEN: usize = 31;
/// Characters a sheet name may not contain
pub const FORBIDDEN_SHEET_CHARS: &[char] = &[':', '/', '\\', '?', '*', '[', ']'];

const MAX_COLUMN_WIDTH: f64 = 255.0;
const MAX_ROW_HEIGHT: f64 = 409.0;

// ==================== Cells ====================

/// Link from a cell to a location inside the same workbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperlink {
    /// Location such as `'Sheet 1'!A1`
    pub location: String,
}

impl Hyperlink {
    /// Link to A1 of the given sheet, quoting the name as formulas do
    pub fn to_sheet(sheet: &str) -> Self {
        Hyperlink {
            location: format!("'{}'!A1", sheet.replace('\'', "''")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    pub style: CellStyle,
    pub hyperlink: Option<Hyperlink>,
}

// ==================== Sheet Metadata ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SheetState {
    #[default]
    Visible,
    Hidden,
    VeryHidden,
}

impl SheetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetState::Visible => "visible",
            SheetState::Hidden => "hidden",
            SheetState::VeryHidden => "veryHidden",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "hidden" => SheetState::Hidden,
            "veryHidden" => SheetState::VeryHidden,
            _ => SheetState::Visible,
        }
    }
}

/// Frozen region, given by the first scrollable cell (A5 freezes rows 1-4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezePanes {
    pub row: u32,
    pub col: u32,
}

impl FreezePanes {
    pub fn at(row: u32, col: u32) -> Self {
        FreezePanes { row, col }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.row == 0 || self.col == 0 || self.row > MAX_ROW || self.col > MAX_COL {
            return Err(format!("Freeze cell R{}C{} is out of bounds", self.row, self.col));
        }
        if self.row == 1 && self.col == 1 {
            return Err("Freeze at A1 freezes nothing".to_string());
        }
        Ok(())
    }

    pub fn top_left_cell(&self) -> String {
        cell_ref(self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Default,
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orientation::Default => "default",
            Orientation::Portrait => "portrait",
            Orientation::Landscape => "landscape",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "portrait" => Orientation::Portrait,
            "landscape" => Orientation::Landscape,
            _ => Orientation::Default,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PageSetup {
    pub orientation: Option<Orientation>,
    pub paper_size: Option<u32>,
    /// Pages wide to fit the print area on
    pub fit_to_width: Option<u32>,
    /// Pages tall to fit the print area on
    pub fit_to_height: Option<u32>,
}

impl PageSetup {
    pub fn is_default(&self) -> bool {
        *self == PageSetup::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrintOptions {
    pub horizontal_centered: bool,
    pub vertical_centered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnDimension {
    pub width: Option<f64>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RowDimension {
    pub height: Option<f64>,
    pub hidden: bool,
}

// ==================== Rules & Tables ====================

/// A data-validation rule, kept verbatim
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataValidationRule {
    /// Space-separated list of covered ranges
    pub sqref: String,
    /// `list`, `whole`, `decimal`, `date`, `custom`, ...
    pub kind: String,
    pub operator: Option<String>,
    pub formula1: Option<String>,
    pub formula2: Option<String>,
    pub allow_blank: bool,
    pub show_input_message: bool,
    pub show_error_message: bool,
    pub prompt_title: Option<String>,
    pub prompt: Option<String>,
}

/// Threshold of a color scale, data bar or icon set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValuePoint {
    /// `min`, `max`, `num`, `percent`, `percentile` or `formula`
    pub kind: String,
    pub value: Option<String>,
}

/// Thresholds and colors of a `colorScale`, `dataBar` or `iconSet` rule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueScale {
    pub points: Vec<ValuePoint>,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalRule {
    /// `cellIs`, `expression`, `containsText`, ...
    pub kind: String,
    pub operator: Option<String>,
    pub priority: i32,
    pub stop_if_true: bool,
    pub formula: Option<String>,
    /// Index into the owning document's differential-style registry
    pub dxf_id: Option<usize>,
    /// Operand of `containsText`, `beginsWith`, ... rules
    pub text: Option<String>,
    /// Item count of `top10` rules (a percentage when `percent` is set)
    pub rank: Option<u32>,
    pub percent: bool,
    pub bottom: bool,
    /// Explicit direction of `aboveAverage` rules
    pub above_average: Option<bool>,
    /// `today`, `lastWeek`, ... for `timePeriod` rules
    pub time_period: Option<String>,
    /// Payload of `colorScale`, `dataBar` and `iconSet` rules
    pub scale: Option<ValueScale>,
}

impl ConditionalRule {
    /// Check that the rule carries what its kind needs to be written
    pub fn validate(&self) -> Result<(), String> {
        let missing = |what: &str| Err(format!("{} rule has no {}", self.kind, what));

        match self.kind.as_str() {
            "cellIs" | "expression" if self.formula.is_none() => return missing("formula"),
            "containsText" | "notContainsText" | "beginsWith" | "endsWith" if self.text.is_none() => {
                return missing("text")
            }
            "timePeriod" if self.time_period.is_none() => return missing("time period"),
            "top10" => match self.rank {
                Some(rank) if rank > 0 && (!self.percent || rank <= 100) => {}
                Some(rank) => return Err(format!("top10 rank {} out of range", rank)),
                None => return missing("rank"),
            },
            _ => {}
        }

        let (min_points, max_points, colors) = match self.kind.as_str() {
            "colorScale" => (2, 3, None),
            "dataBar" => (2, 2, Some(1)),
            "iconSet" => (2, 5, Some(0)),
            _ => return Ok(()),
        };
        let Some(scale) = &self.scale else {
            return missing("thresholds");
        };
        if !(min_points..=max_points).contains(&scale.points.len()) {
            return Err(format!(
                "{} rule has {} thresholds, expected {} to {}",
                self.kind,
                scale.points.len(),
                min_points,
                max_points
            ));
        }
        let expected_colors = colors.unwrap_or(scale.points.len());
        if scale.colors.len() != expected_colors {
            return Err(format!(
                "{} rule has {} colors, expected {}",
                self.kind,
                scale.colors.len(),
                expected_colors
            ));
        }
        for color in &scale.colors {
            validate_color(color)?;
        }
        Ok(())
    }
}

/// Conditional-formatting rules sharing one range list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConditionalFormat {
    pub sqref: String,
    pub rules: Vec<ConditionalRule>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TableStyle {
    pub name: String,
    pub show_first_column: bool,
    pub show_last_column: bool,
    pub show_row_stripes: bool,
    pub show_column_stripes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub range: CellRange,
    pub columns: Vec<String>,
    pub style: Option<TableStyle>,
}

// ==================== Worksheet ====================

/// One sheet of a source or target workbook.
///
/// Once a range is merged, only its anchor cell accepts values; merges must
/// therefore be applied after the sheet's cells are written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Worksheet {
    pub name: String,
    cells: BTreeMap<(u32, u32), Cell>,
    merged: Vec<CellRange>,
    pub columns: BTreeMap<u32, ColumnDimension>,
    pub rows: BTreeMap<u32, RowDimension>,
    pub tab_color: Option<String>,
    pub state: SheetState,
    pub freeze_panes: Option<FreezePanes>,
    pub page_setup: PageSetup,
    pub print_options: PrintOptions,
    pub data_validations: Vec<DataValidationRule>,
    pub conditional_formats: Vec<ConditionalFormat>,
    pub tables: Vec<Table>,
}

/// Source sheets and target sheets share one representation
pub type SourceSheet = Worksheet;
pub type TargetSheet = Worksheet;

fn check_bounds(row: u32, col: u32) -> Result<(), String> {
    if row == 0 || col == 0 || row > MAX_ROW || col > MAX_COL {
        return Err(format!("R{}C{} is outside the worksheet", row, col));
    }
    Ok(())
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Worksheet {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Populated cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = ((u32, u32), &Cell)> {
        self.cells.iter().map(|(coord, cell)| (*coord, cell))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Cell at the coordinate, created empty if missing
    pub fn cell_mut(&mut self, row: u32, col: u32) -> Result<&mut Cell, MergeError> {
        check_bounds(row, col).map_err(|m| MergeError::feature(Feature::CellValue, m))?;
        Ok(self.cells.entry((row, col)).or_default())
    }

    /// Write a value, rejecting cells hidden under an applied merge
    pub fn set_value(&mut self, row: u32, col: u32, value: CellValue) -> Result<(), MergeError> {
        if let Some(range) = self.covering_merge(row, col) {
            return Err(MergeError::feature(
                Feature::CellValue,
                format!("{} is covered by merged range {}", cell_ref(row, col), range),
            ));
        }
        self.cell_mut(row, col)?.value = value;
        Ok(())
    }

    /// Merged range hiding this cell, if it is not the range's anchor
    pub fn covering_merge(&self, row: u32, col: u32) -> Option<CellRange> {
        self.merged
            .iter()
            .find(|range| range.contains(row, col) && range.anchor() != (row, col))
            .copied()
    }

    pub fn merged_ranges(&self) -> &[CellRange] {
        &self.merged
    }

    /// Merge a range; values of covered non-anchor cells are dropped, styles kept
    pub fn merge_range(&mut self, range: CellRange) -> Result<(), MergeError> {
        let fail = |message: String| MergeError::feature(Feature::MergedRange, message);

        check_bounds(range.first_row, range.first_col).map_err(fail)?;
        check_bounds(range.last_row, range.last_col).map_err(fail)?;

        if range.is_single_cell() {
            return Err(fail(format!("{} is a single cell", range)));
        }
        if let Some(existing) = self.merged.iter().find(|m| m.overlaps(&range)) {
            return Err(fail(format!("{} overlaps merged range {}", range, existing)));
        }

        let anchor = range.anchor();
        for ((row, col), cell) in self.cells.range_mut((range.first_row, 0)..=(range.last_row, u32::MAX)) {
            if range.contains(*row, *col) && (*row, *col) != anchor {
                cell.value = CellValue::Empty;
            }
        }

        self.merged.push(range);
        Ok(())
    }

    pub fn set_column(&mut self, col: u32, dimension: ColumnDimension) -> Result<(), MergeError> {
        let fail = |message: String| MergeError::feature(Feature::ColumnDimension, message);

        if col == 0 || col > MAX_COL {
            return Err(fail(format!("Column {} is outside the worksheet", col)));
        }
        if let Some(width) = dimension.width {
            if !width.is_finite() || !(0.0..=MAX_COLUMN_WIDTH).contains(&width) {
                return Err(fail(format!("Column width {} out of range", width)));
            }
        }

        self.columns.insert(col, dimension);
        Ok(())
    }

    pub fn set_row(&mut self, row: u32, dimension: RowDimension) -> Result<(), MergeError> {
        let fail = |message: String| MergeError::feature(Feature::RowDimension, message);

        if row == 0 || row > MAX_ROW {
            return Err(fail(format!("Row {} is outside the worksheet", row)));
        }
        if let Some(height) = dimension.height {
            if !height.is_finite() || !(0.0..=MAX_ROW_HEIGHT).contains(&height) {
                return Err(fail(format!("Row height {} out of range", height)));
            }
        }

        self.rows.insert(row, dimension);
        Ok(())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.name.as_str())
    }
}

// ==================== Documents ====================

/// A workbook opened for reading; dropped as soon as its sheets are copied
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub sheets: Vec<SourceSheet>,
    pub dxfs: DifferentialStyles,
    /// Content the reader could not represent, keyed by source sheet name
    pub warnings: Vec<CopyWarning>,
}

/// The merged workbook under construction
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetDocument {
    sheets: Vec<TargetSheet>,
    pub dxfs: DifferentialStyles,
}

/// Check a sheet name against the workbook naming rules
pub fn validate_sheet_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Sheet name is empty".to_string());
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(format!("Sheet name '{}' is longer than {} characters", name, MAX_SHEET_NAME_LEN));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        return Err(format!("Sheet name '{}' contains '{}'", name, c));
    }
    Ok(())
}

impl TargetDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheets(&self) -> &[TargetSheet] {
        &self.sheets
    }

    pub fn sheets_mut(&mut self) -> &mut [TargetSheet] {
        &mut self.sheets
    }

    pub fn sheet_names(&self) -> HashSet<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn contains_sheet(&self, name: &str) -> bool {
        self.sheet(name).is_some()
    }

    /// Sheet names compare case-insensitively
    pub fn sheet(&self, name: &str) -> Option<&TargetSheet> {
        self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Every table name in the document
    pub fn table_names(&self) -> HashSet<String> {
        self.sheets
            .iter()
            .flat_map(|s| s.table_names().map(str::to_string))
            .collect()
    }

    /// Insert a sheet at `position` (clamped to the end)
    pub fn insert_sheet(&mut self, position: usize, sheet: TargetSheet) -> Result<&mut TargetSheet, MergeError> {
        validate_sheet_name(&sheet.name).map_err(MergeError::validation)?;
        if self.contains_sheet(&sheet.name) {
            return Err(MergeError::validation(format!(
                "Workbook already contains a sheet named '{}'",
                sheet.name
            )));
        }

        let position = position.min(self.sheets.len());
        self.sheets.insert(position, sheet);
        Ok(&mut self.sheets[position])
    }

    pub fn push_sheet(&mut self, sheet: TargetSheet) -> Result<&mut TargetSheet, MergeError> {
        let end = self.sheets.len();
        self.insert_sheet(end, sheet)
    }

    /// Make the first sheet visible when every sheet is hidden; returns its name if changed
    pub fn ensure_visible_sheet(&mut self) -> Option<String> {
        if self.sheets.iter().any(|s| s.state == SheetState::Visible) {
            return None;
        }
        let first = self.sheets.first_mut()?;
        first.state = SheetState::Visible;
        Some(first.name.clone())
    }
}
