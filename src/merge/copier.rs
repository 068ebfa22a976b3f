//! Copies one source worksheet into a new sheet of the target workbook.
//!
//! Every feature is an independent step. A failing step is recorded as a
//! [`CopyWarning`] and the copy carries on with the next step, cell or facet.

use log::{debug, warn};
use std::collections::HashSet;

use super::coords::{cell_ref, column_letter, parse_sqref, CellRange};
use super::error::MergeError;
use super::model::{
    validate_sheet_name, ConditionalFormat, PageSetup, SourceSheet, Table, TargetDocument,
    TargetSheet,
};
use super::naming::NameAllocator;
use super::styles::{to_argb, validate_color, DifferentialStyles, Facet};
use super::types::{CellValue, CopyWarning, Feature};

/// Highest paper size code a page setup may carry
const MAX_PAPER_SIZE: u32 = 118;
const MAX_FIT_TO_PAGES: u32 = 32_767;

/// Outcome of copying one sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetCopyReport {
    pub sheet_name: String,
    pub cells_copied: usize,
    pub warnings: Vec<CopyWarning>,
}

/// Runs independently fallible steps and keeps the failures as warnings
struct BestEffort {
    sheet: String,
    warnings: Vec<CopyWarning>,
}

impl BestEffort {
    fn new(sheet: &str) -> Self {
        BestEffort {
            sheet: sheet.to_string(),
            warnings: Vec::new(),
        }
    }

    fn attempt<T>(
        &mut self,
        feature: Feature,
        location: Option<String>,
        step: impl FnOnce() -> Result<T, MergeError>,
    ) -> Option<T> {
        match step() {
            Ok(value) => Some(value),
            Err(err) => {
                self.fail(feature, location, err);
                None
            }
        }
    }

    fn fail(&mut self, feature: Feature, location: Option<String>, err: MergeError) {
        let (feature, message) = match err {
            MergeError::FeatureCopy { feature, message } => (feature, message),
            other => (feature, other.to_string()),
        };
        self.record(feature, location, message);
    }

    fn record(&mut self, feature: Feature, location: Option<String>, message: String) {
        let warning = CopyWarning {
            sheet: self.sheet.clone(),
            feature,
            location,
            message,
        };
        warn!("{}", warning);
        self.warnings.push(warning);
    }
}

/// Copies worksheets feature by feature into a target document
#[derive(Debug, Clone, Copy)]
pub struct SheetCopyEngine {
    preserve_formulas: bool,
}

impl SheetCopyEngine {
    pub fn new(preserve_formulas: bool) -> Self {
        SheetCopyEngine { preserve_formulas }
    }

    /// Copy `source` into a new sheet called `name` appended to `target`.
    ///
    /// `source_dxfs` is the differential-style registry of the document that
    /// owns `source`. Only an unusable sheet name is an error; every other
    /// failure ends up in the report's warnings.
    pub fn copy_sheet(
        &self,
        source: &SourceSheet,
        source_dxfs: &DifferentialStyles,
        target: &mut TargetDocument,
        name: &str,
    ) -> Result<SheetCopyReport, MergeError> {
        validate_sheet_name(name).map_err(MergeError::validation)?;
        if target.contains_sheet(name) {
            return Err(MergeError::validation(format!(
                "Workbook already contains a sheet named '{}'",
                name
            )));
        }

        let mut sheet = TargetSheet::new(name);
        let mut steps = BestEffort::new(name);

        // 1. Sheet-level metadata
        steps.attempt(Feature::TabColor, None, || copy_tab_color(source, &mut sheet));
        sheet.state = source.state;
        steps.attempt(Feature::FreezePanes, None, || copy_freeze_panes(source, &mut sheet));
        steps.attempt(Feature::PageSetup, None, || copy_page_setup(source, &mut sheet));
        sheet.print_options = source.print_options;

        // 2. Column and row dimensions
        for (col, dimension) in &source.columns {
            steps.attempt(Feature::ColumnDimension, Some(column_letter(*col)), || {
                sheet.set_column(*col, *dimension)
            });
        }
        for (row, dimension) in &source.rows {
            steps.attempt(Feature::RowDimension, Some(row.to_string()), || {
                sheet.set_row(*row, *dimension)
            });
        }

        // 3. Merges wait until every cell is written
        let pending_merges: Vec<CellRange> = source.merged_ranges().to_vec();

        // 4. Values and style facets, row-major
        let cells_copied = self.copy_cells(source, &mut sheet, &mut steps);

        // 5. Merges
        for range in pending_merges {
            steps.attempt(Feature::MergedRange, Some(range.to_string()), || {
                sheet.merge_range(range)
            });
        }

        // 6. Data validations
        for rule in &source.data_validations {
            steps.attempt(Feature::DataValidation, Some(rule.sqref.clone()), || {
                parse_sqref(&rule.sqref)
                    .map_err(|m| MergeError::feature(Feature::DataValidation, m))?;
                sheet.data_validations.push(rule.clone());
                Ok(())
            });
        }

        // 7. Conditional formats and their differential styles
        for format in &source.conditional_formats {
            copy_conditional_format(format, source_dxfs, &mut target.dxfs, &mut sheet, &mut steps);
        }

        // 8. Tables
        let mut used_tables = target.table_names();
        for table in &source.tables {
            steps.attempt(Feature::Table, Some(table.name.clone()), || {
                copy_table(table, &mut sheet, &mut used_tables)
            });
        }

        debug!(
            "Copied sheet '{}' -> '{}': {} cells, {} warnings",
            source.name,
            name,
            cells_copied,
            steps.warnings.len()
        );

        target.push_sheet(sheet)?;

        Ok(SheetCopyReport {
            sheet_name: name.to_string(),
            cells_copied,
            warnings: steps.warnings,
        })
    }

    /// Value written to the target for a source value
    pub fn target_value(&self, value: &CellValue) -> CellValue {
        match value {
            CellValue::Formula { .. } if self.preserve_formulas => value.clone(),
            CellValue::Formula { .. } => value.cached(),
            other => other.clone(),
        }
    }

    fn copy_cells(&self, source: &SourceSheet, sheet: &mut TargetSheet, steps: &mut BestEffort) -> usize {
        let mut copied = 0;

        for ((row, col), cell) in source.cells() {
            let location = cell_ref(row, col);

            let value = self.target_value(&cell.value);
            if steps
                .attempt(Feature::CellValue, Some(location.clone()), || {
                    sheet.set_value(row, col, value)
                })
                .is_some()
            {
                copied += 1;
            }

            let target_cell = match sheet.cell_mut(row, col) {
                Ok(cell) => cell,
                Err(err) => {
                    steps.fail(Feature::CellValue, Some(location), err);
                    continue;
                }
            };

            for facet in Facet::ALL {
                if !facet.is_present(&cell.style) {
                    continue;
                }
                steps.attempt(facet.feature(), Some(location.clone()), || {
                    facet.copy(&cell.style, &mut target_cell.style).map(|_| ())
                });
            }
        }

        copied
    }
}

fn copy_tab_color(source: &SourceSheet, sheet: &mut TargetSheet) -> Result<(), MergeError> {
    if let Some(color) = &source.tab_color {
        validate_color(color).map_err(|m| MergeError::feature(Feature::TabColor, m))?;
        sheet.tab_color = Some(to_argb(color));
    }
    Ok(())
}

fn copy_freeze_panes(source: &SourceSheet, sheet: &mut TargetSheet) -> Result<(), MergeError> {
    if let Some(panes) = source.freeze_panes {
        panes
            .validate()
            .map_err(|m| MergeError::feature(Feature::FreezePanes, m))?;
        sheet.freeze_panes = Some(panes);
    }
    Ok(())
}

fn copy_page_setup(source: &SourceSheet, sheet: &mut TargetSheet) -> Result<(), MergeError> {
    let setup: PageSetup = source.page_setup;
    let fail = |message: String| MergeError::feature(Feature::PageSetup, message);

    if let Some(size) = setup.paper_size {
        if size == 0 || size > MAX_PAPER_SIZE {
            return Err(fail(format!("Unknown paper size {}", size)));
        }
    }
    for pages in [setup.fit_to_width, setup.fit_to_height].into_iter().flatten() {
        if pages > MAX_FIT_TO_PAGES {
            return Err(fail(format!("Fit-to page count {} out of range", pages)));
        }
    }

    sheet.page_setup = setup;
    Ok(())
}

/// Copy one conditional-format block, rebasing differential-style indices.
///
/// Each referenced style is appended to the target registry and the rule is
/// pointed at the new entry, so indices never leak from source to target.
fn copy_conditional_format(
    format: &ConditionalFormat,
    source_dxfs: &DifferentialStyles,
    target_dxfs: &mut DifferentialStyles,
    sheet: &mut TargetSheet,
    steps: &mut BestEffort,
) {
    let location = Some(format.sqref.clone());

    let parsed = steps.attempt(Feature::ConditionalFormatting, location.clone(), || {
        parse_sqref(&format.sqref).map_err(|m| MergeError::feature(Feature::ConditionalFormatting, m))
    });
    if parsed.is_none() {
        return;
    }

    let mut copied = ConditionalFormat {
        sqref: format.sqref.clone(),
        rules: Vec::with_capacity(format.rules.len()),
    };

    for rule in &format.rules {
        let usable = steps.attempt(Feature::ConditionalFormatting, location.clone(), || {
            rule.validate()
                .map_err(|m| MergeError::feature(Feature::ConditionalFormatting, m))
        });
        if usable.is_none() {
            continue;
        }

        let mut new_rule = rule.clone();

        if let Some(index) = rule.dxf_id {
            match source_dxfs.get(index) {
                Some(style) => {
                    let valid = steps.attempt(Feature::ConditionalFormatting, location.clone(), || {
                        style
                            .validate()
                            .map_err(|m| MergeError::feature(Feature::ConditionalFormatting, m))
                    });
                    if valid.is_none() {
                        continue;
                    }
                    new_rule.dxf_id = Some(target_dxfs.push(style.clone()));
                }
                None => {
                    new_rule.dxf_id = None;
                    steps.record(
                        Feature::ConditionalFormatting,
                        location.clone(),
                        format!(
                            "differential style {} does not exist; rule copied without formatting",
                            index
                        ),
                    );
                }
            }
        }

        copied.rules.push(new_rule);
    }

    if !copied.rules.is_empty() {
        sheet.conditional_formats.push(copied);
    }
}

/// Copy a table under a document-wide unique name
fn copy_table(
    table: &Table,
    sheet: &mut TargetSheet,
    used_names: &mut HashSet<String>,
) -> Result<(), MergeError> {
    let fail = |message: String| MergeError::feature(Feature::Table, message);

    let range = table.range;
    if range.first_row == range.last_row {
        return Err(fail(format!("Table range {} has no data rows", range)));
    }
    if let Some(other) = sheet.tables.iter().find(|t| t.range.overlaps(&range)) {
        return Err(fail(format!("Table range {} overlaps table '{}'", range, other.name)));
    }

    let width = (range.last_col - range.first_col + 1) as usize;
    let columns = if table.columns.is_empty() {
        (1..=width).map(|i| format!("Column{}", i)).collect()
    } else if table.columns.len() == width {
        table.columns.clone()
    } else {
        return Err(fail(format!(
            "Table has {} column names for {} columns",
            table.columns.len(),
            width
        )));
    };

    let prefix = format!("{}_", sheet.name);
    let name = NameAllocator::tables().allocate(&prefix, &table.name, used_names);
    used_names.insert(name.clone());

    sheet.tables.push(Table {
        name,
        range,
        columns,
        style: table.style.clone(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::model::{
        ColumnDimension, ConditionalRule, DataValidationRule, FreezePanes, RowDimension,
        SheetState, TableStyle, ValuePoint, ValueScale, Worksheet,
    };
    use crate::merge::styles::{CellStyle, DifferentialStyle, FillStyle, FontStyle};

    fn formula_sheet() -> Worksheet {
        let mut sheet = Worksheet::new("Data");
        sheet.set_value(1, 1, CellValue::Number(2.0)).unwrap();
        sheet.set_value(2, 1, CellValue::Number(3.0)).unwrap();
        sheet
            .set_value(
                3,
                1,
                CellValue::Formula {
                    formula: "SUM(A1:A2)".to_string(),
                    cached_value: Some(Box::new(CellValue::Number(5.0))),
                },
            )
            .unwrap();
        sheet
    }

    fn highlight() -> DifferentialStyle {
        DifferentialStyle {
            font: Some(FontStyle {
                bold: true,
                color: Some("FF9C0006".to_string()),
                ..Default::default()
            }),
            fill: Some(FillStyle::solid("FFC7CE")),
            ..Default::default()
        }
    }

    fn rule_with_dxf(dxf_id: usize) -> ConditionalRule {
        ConditionalRule {
            kind: "cellIs".to_string(),
            operator: Some("greaterThan".to_string()),
            priority: 1,
            formula: Some("10".to_string()),
            dxf_id: Some(dxf_id),
            ..Default::default()
        }
    }

    #[test]
    fn test_formulas_preserved() {
        let source = formula_sheet();
        let mut target = TargetDocument::new();
        let engine = SheetCopyEngine::new(true);

        let report = engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Data")
            .unwrap();

        assert!(report.warnings.is_empty());
        assert_eq!(report.cells_copied, 3);
        let sheet = target.sheet("1_Data").unwrap();
        assert_eq!(sheet.cell(3, 1).unwrap().value, source.cell(3, 1).unwrap().value);
    }

    #[test]
    fn test_cached_values_when_formulas_not_preserved() {
        let source = formula_sheet();
        let mut target = TargetDocument::new();
        let engine = SheetCopyEngine::new(false);

        engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Data")
            .unwrap();

        let sheet = target.sheet("1_Data").unwrap();
        assert_eq!(sheet.cell(3, 1).unwrap().value, CellValue::Number(5.0));
    }

    #[test]
    fn test_merges_survive_style_failures() {
        let mut source = Worksheet::new("Report");
        source.set_value(1, 1, "Title".into()).unwrap();
        source.cell_mut(1, 1).unwrap().style = CellStyle {
            font: Some(FontStyle {
                size: Some(1000.0),
                ..Default::default()
            }),
            fill: Some(FillStyle::solid("C6EFCE")),
            ..Default::default()
        };
        source.cell_mut(1, 2).unwrap().style.number_format = Some(String::new());
        source.merge_range("A1:C1".parse().unwrap()).unwrap();
        source.merge_range("A3:B4".parse().unwrap()).unwrap();

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Report")
            .unwrap();

        let sheet = target.sheet("1_Report").unwrap();
        assert_eq!(sheet.merged_ranges(), source.merged_ranges());
        assert!(sheet.cell(1, 1).unwrap().style.font.is_none());
        assert!(sheet.cell(1, 1).unwrap().style.fill.is_some());

        let features: Vec<_> = report.warnings.iter().map(|w| w.feature).collect();
        assert_eq!(features, vec![Feature::Font, Feature::NumberFormat]);
        assert_eq!(report.warnings[0].location.as_deref(), Some("A1"));
    }

    #[test]
    fn test_sheet_metadata_and_dimensions() {
        let mut source = Worksheet::new("Meta");
        source.tab_color = Some("00B050".to_string());
        source.state = SheetState::Hidden;
        source.freeze_panes = Some(FreezePanes::at(2, 1));
        source.page_setup.paper_size = Some(9);
        source.print_options.horizontal_centered = true;
        source.columns.insert(2, ColumnDimension { width: Some(20.0), hidden: false });
        source.columns.insert(3, ColumnDimension { width: Some(999.0), hidden: true });
        source.rows.insert(1, RowDimension { height: Some(30.0), hidden: false });

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Meta")
            .unwrap();

        let sheet = target.sheet("1_Meta").unwrap();
        assert_eq!(sheet.tab_color.as_deref(), Some("FF00B050"));
        assert_eq!(sheet.state, SheetState::Hidden);
        assert_eq!(sheet.freeze_panes, Some(FreezePanes::at(2, 1)));
        assert_eq!(sheet.page_setup.paper_size, Some(9));
        assert!(sheet.print_options.horizontal_centered);
        assert_eq!(sheet.columns.get(&2).and_then(|c| c.width), Some(20.0));
        assert!(sheet.columns.get(&3).is_none());
        assert_eq!(sheet.rows.get(&1).and_then(|r| r.height), Some(30.0));

        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].feature, Feature::ColumnDimension);
        assert_eq!(report.warnings[0].location.as_deref(), Some("C"));
    }

    #[test]
    fn test_bad_metadata_does_not_stop_cells() {
        let mut source = formula_sheet();
        source.tab_color = Some("blue".to_string());
        source.page_setup.paper_size = Some(500);

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Data")
            .unwrap();

        assert_eq!(report.cells_copied, 3);
        assert_eq!(report.warnings.len(), 2);
        assert!(target.sheet("1_Data").unwrap().tab_color.is_none());
    }

    #[test]
    fn test_data_validations_copied_verbatim() {
        let mut source = Worksheet::new("Input");
        let rule = DataValidationRule {
            sqref: "B2:B20".to_string(),
            kind: "list".to_string(),
            formula1: Some("\"Yes,No\"".to_string()),
            allow_blank: true,
            ..Default::default()
        };
        source.data_validations.push(rule.clone());
        source.data_validations.push(DataValidationRule {
            sqref: "not a range".to_string(),
            ..rule.clone()
        });

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Input")
            .unwrap();

        assert_eq!(target.sheet("1_Input").unwrap().data_validations, vec![rule]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].feature, Feature::DataValidation);
    }

    #[test]
    fn test_dxf_indices_rebased_into_target_registry() {
        let mut source_dxfs = DifferentialStyles::new();
        source_dxfs.push(DifferentialStyle::default());
        let highlight_id = source_dxfs.push(highlight());

        let mut source = Worksheet::new("Scores");
        source.conditional_formats.push(ConditionalFormat {
            sqref: "A1:A10".to_string(),
            rules: vec![rule_with_dxf(highlight_id)],
        });

        let mut target = TargetDocument::new();
        let engine = SheetCopyEngine::new(true);

        // Two copies of the same sheet each append their own registry entry
        engine.copy_sheet(&source, &source_dxfs, &mut target, "1_Scores").unwrap();
        engine.copy_sheet(&source, &source_dxfs, &mut target, "2_Scores").unwrap();

        assert_eq!(target.dxfs.len(), 2);
        for (expected, name) in [(0, "1_Scores"), (1, "2_Scores")] {
            let rule = &target.sheet(name).unwrap().conditional_formats[0].rules[0];
            assert_eq!(rule.dxf_id, Some(expected));
            assert_eq!(target.dxfs.get(expected), Some(&highlight()));
        }
    }

    #[test]
    fn test_missing_dxf_is_dropped_not_leaked() {
        let mut source = Worksheet::new("Scores");
        source.conditional_formats.push(ConditionalFormat {
            sqref: "A1:A10".to_string(),
            rules: vec![rule_with_dxf(7)],
        });

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Scores")
            .unwrap();

        let rule = &target.sheet("1_Scores").unwrap().conditional_formats[0].rules[0];
        assert_eq!(rule.dxf_id, None);
        assert!(target.dxfs.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_scale_rules_copied_and_empty_payloads_dropped() {
        let color_scale = ConditionalRule {
            kind: "colorScale".to_string(),
            priority: 1,
            scale: Some(ValueScale {
                points: vec![
                    ValuePoint {
                        kind: "min".to_string(),
                        value: None,
                    },
                    ValuePoint {
                        kind: "max".to_string(),
                        value: None,
                    },
                ],
                colors: vec!["FFF8696B".to_string(), "FF63BE7B".to_string()],
            }),
            ..Default::default()
        };
        let top_three = ConditionalRule {
            kind: "top10".to_string(),
            priority: 2,
            rank: Some(3),
            ..Default::default()
        };
        let bare_bar = ConditionalRule {
            kind: "dataBar".to_string(),
            priority: 3,
            ..Default::default()
        };

        let mut source = Worksheet::new("Scores");
        source.conditional_formats.push(ConditionalFormat {
            sqref: "B2:B10".to_string(),
            rules: vec![color_scale.clone(), top_three.clone(), bare_bar],
        });

        let mut target = TargetDocument::new();
        let report = SheetCopyEngine::new(true)
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Scores")
            .unwrap();

        let rules = &target.sheet("1_Scores").unwrap().conditional_formats[0].rules;
        assert_eq!(rules, &vec![color_scale, top_three]);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].feature, Feature::ConditionalFormatting);
        assert!(report.warnings[0].message.contains("dataBar"));
    }

    #[test]
    fn test_tables_renamed_and_unique_across_document() {
        let mut source = Worksheet::new("Sales");
        source.tables.push(Table {
            name: "Orders".to_string(),
            range: "A1:C10".parse().unwrap(),
            columns: vec!["Id".into(), "Item".into(), "Qty".into()],
            style: Some(TableStyle {
                name: "TableStyleMedium2".to_string(),
                show_row_stripes: true,
                ..Default::default()
            }),
        });
        source.tables.push(Table {
            name: "Overlap".to_string(),
            range: "B5:D12".parse().unwrap(),
            columns: Vec::new(),
            style: None,
        });

        let mut target = TargetDocument::new();
        let engine = SheetCopyEngine::new(true);
        let first = engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Sales")
            .unwrap();
        engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "2_Sales")
            .unwrap();

        assert_eq!(first.warnings.len(), 1);
        assert_eq!(first.warnings[0].feature, Feature::Table);

        let one = &target.sheet("1_Sales").unwrap().tables[0];
        let two = &target.sheet("2_Sales").unwrap().tables[0];
        assert_eq!(one.name, "_1_Sales_Orders");
        assert_eq!(two.name, "_2_Sales_Orders");
        assert_eq!(one.range, source.tables[0].range);
        assert_eq!(one.style, source.tables[0].style);
        assert_eq!(target.table_names().len(), 2);
    }

    #[test]
    fn test_duplicate_sheet_name_is_rejected() {
        let source = formula_sheet();
        let mut target = TargetDocument::new();
        let engine = SheetCopyEngine::new(true);
        engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Data")
            .unwrap();

        let err = engine
            .copy_sheet(&source, &DifferentialStyles::new(), &mut target, "1_Data")
            .unwrap_err();
        assert!(matches!(err, MergeError::Validation(_)));
        assert_eq!(target.sheets().len(), 1);
    }
}
