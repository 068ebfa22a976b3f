//! Summary sheet listing every copied sheet with a link to it.

use chrono::NaiveDateTime;
use log::info;

use super::coords::CellRange;
use super::error::MergeError;
use super::model::{ColumnDimension, FreezePanes, Hyperlink, TargetDocument, Worksheet};
use super::naming::NameAllocator;
use super::styles::{FillStyle, FontStyle};
use super::types::{CellValue, MergeRecord};

pub const INDEX_SHEET_NAME: &str = "Index";
pub const INDEX_TITLE: &str = "Merged Workbook Index";
pub const INDEX_HEADERS: [&str; 4] = ["File Index", "File Name", "Original Sheet", "New Sheet"];

const HEADER_ROW: u32 = 4;
const FIRST_DATA_ROW: u32 = 5;
const HEADER_FILL: &str = "C6EFCE";
const LINK_COLOR: &str = "0563C1";
const MAX_AUTO_WIDTH: usize = 50;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Builds the index sheet from the merge records
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexBuilder;

impl IndexBuilder {
    pub fn new() -> Self {
        IndexBuilder
    }

    /// Insert the index sheet at the front of `target`.
    ///
    /// Returns the sheet's name, or `None` when there is nothing to index.
    pub fn build(
        &self,
        target: &mut TargetDocument,
        records: &[MergeRecord],
        generated_at: NaiveDateTime,
    ) -> Result<Option<String>, MergeError> {
        if records.is_empty() {
            return Ok(None);
        }

        let name = NameAllocator::sheets().allocate("", INDEX_SHEET_NAME, &target.sheet_names());
        let mut sheet = Worksheet::new(name.clone());

        // Title and timestamp
        let title = sheet.cell_mut(1, 1)?;
        title.value = INDEX_TITLE.into();
        title.style.font = Some(FontStyle {
            bold: true,
            size: Some(14.0),
            ..Default::default()
        });
        sheet.set_value(
            2,
            1,
            format!("Generated on: {}", generated_at.format(TIMESTAMP_FORMAT)).into(),
        )?;

        for (col, header) in (1u32..).zip(INDEX_HEADERS) {
            let cell = sheet.cell_mut(HEADER_ROW, col)?;
            cell.value = header.into();
            cell.style.font = Some(FontStyle {
                bold: true,
                ..Default::default()
            });
            cell.style.fill = Some(FillStyle::solid(HEADER_FILL));
        }

        for (row, record) in (FIRST_DATA_ROW..).zip(records) {
            sheet.set_value(row, 1, CellValue::Number(record.file_index as f64))?;
            sheet.set_value(row, 2, record.file_name.as_str().into())?;
            sheet.set_value(row, 3, record.original_sheet_name.as_str().into())?;

            let link = sheet.cell_mut(row, 4)?;
            link.value = record.new_sheet_name.as_str().into();
            if target.contains_sheet(&record.new_sheet_name) {
                link.hyperlink = Some(Hyperlink::to_sheet(&record.new_sheet_name));
                link.style.font = Some(FontStyle {
                    color: Some(LINK_COLOR.to_string()),
                    underline: Some("single".to_string()),
                    ..Default::default()
                });
            }
        }

        for col in 1..=INDEX_HEADERS.len() as u32 {
            let width = auto_width(&sheet, col);
            sheet.set_column(
                col,
                ColumnDimension {
                    width: Some(width),
                    hidden: false,
                },
            )?;
        }

        sheet.merge_range(CellRange::new(1, 1, 1, INDEX_HEADERS.len() as u32))?;
        sheet.freeze_panes = Some(FreezePanes::at(FIRST_DATA_ROW, 1));

        target.insert_sheet(0, sheet)?;
        info!("Index sheet '{}' lists {} sheets", name, records.len());
        Ok(Some(name))
    }
}

/// Longest displayed value in the column plus padding, capped
fn auto_width(sheet: &Worksheet, col: u32) -> f64 {
    let longest = sheet
        .cells()
        .filter(|((_, c), _)| *c == col)
        .map(|(_, cell)| cell.value.display_text().chars().count())
        .max()
        .unwrap_or(0);
    (longest + 2).min(MAX_AUTO_WIDTH) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .unwrap()
    }

    fn record(file_index: usize, file: &str, original: &str, new: &str) -> MergeRecord {
        MergeRecord {
            file_index,
            file_name: file.to_string(),
            original_sheet_name: original.to_string(),
            new_sheet_name: new.to_string(),
        }
    }

    fn target_with(names: &[&str]) -> TargetDocument {
        let mut target = TargetDocument::new();
        for name in names {
            target.push_sheet(Worksheet::new(*name)).unwrap();
        }
        target
    }

    #[test]
    fn test_layout() {
        let mut target = target_with(&["1_Data", "2_Data"]);
        let records = vec![
            record(1, "jan.xlsx", "Data", "1_Data"),
            record(2, "feb.xlsx", "Data", "2_Data"),
        ];

        let name = IndexBuilder::new()
            .build(&mut target, &records, timestamp())
            .unwrap();
        assert_eq!(name.as_deref(), Some("Index"));

        let index = &target.sheets()[0];
        assert_eq!(index.name, "Index");
        assert_eq!(index.cell(1, 1).unwrap().value, CellValue::from(INDEX_TITLE));
        assert_eq!(
            index.cell(2, 1).unwrap().value,
            CellValue::from("Generated on: 2024-03-09 14:05:00")
        );
        assert_eq!(index.merged_ranges(), &["A1:D1".parse::<CellRange>().unwrap()]);
        assert_eq!(index.freeze_panes, Some(FreezePanes::at(5, 1)));

        let header = index.cell(4, 4).unwrap();
        assert_eq!(header.value, CellValue::from("New Sheet"));
        assert_eq!(header.style.fill, Some(FillStyle::solid("C6EFCE")));
    }

    #[test]
    fn test_rows_follow_copy_order() {
        let mut target = target_with(&["2_B", "1_A", "1_C"]);
        let records = vec![
            record(1, "a.xlsx", "A", "1_A"),
            record(1, "a.xlsx", "C", "1_C"),
            record(2, "b.xlsx", "B", "2_B"),
        ];

        IndexBuilder::new()
            .build(&mut target, &records, timestamp())
            .unwrap();

        let index = target.sheet("Index").unwrap();
        let data_rows: Vec<_> = index
            .cells()
            .filter(|((row, col), _)| *row >= FIRST_DATA_ROW && *col == 4)
            .map(|(_, cell)| cell.value.display_text())
            .collect();
        assert_eq!(data_rows, vec!["1_A", "1_C", "2_B"]);
        assert_eq!(index.cell(7, 1).unwrap().value, CellValue::Number(2.0));
    }

    #[test]
    fn test_links_only_to_existing_sheets() {
        let mut target = target_with(&["1_Data"]);
        let records = vec![
            record(1, "a.xlsx", "Data", "1_Data"),
            record(2, "b.xlsx", "Gone", "2_Gone"),
        ];

        IndexBuilder::new()
            .build(&mut target, &records, timestamp())
            .unwrap();

        let index = target.sheet("Index").unwrap();
        let linked = index.cell(5, 4).unwrap();
        assert_eq!(linked.hyperlink, Some(Hyperlink::to_sheet("1_Data")));
        assert_eq!(
            linked.style.font.as_ref().and_then(|f| f.underline.as_deref()),
            Some("single")
        );
        assert!(index.cell(6, 4).unwrap().hyperlink.is_none());
    }

    #[test]
    fn test_column_widths() {
        let long_file = format!("{}.xlsx", "q".repeat(80));
        let mut target = target_with(&["1_Data"]);
        let records = vec![record(1, &long_file, "Data", "1_Data")];

        IndexBuilder::new()
            .build(&mut target, &records, timestamp())
            .unwrap();

        let index = target.sheet("Index").unwrap();
        let width = |col: u32| index.columns.get(&col).and_then(|c| c.width);
        // "Generated on: 2024-03-09 14:05:00" is the longest text in column A
        assert_eq!(width(1), Some(35.0));
        assert_eq!(width(2), Some(50.0));
        assert_eq!(width(3), Some(16.0));
    }

    #[test]
    fn test_name_avoids_existing_index_sheet() {
        let mut target = target_with(&["index"]);
        let records = vec![record(1, "a.xlsx", "Index", "index")];

        let name = IndexBuilder::new()
            .build(&mut target, &records, timestamp())
            .unwrap();
        assert_eq!(name.as_deref(), Some("Index_1"));
        assert_eq!(target.sheets()[0].name, "Index_1");
    }

    #[test]
    fn test_no_records_no_sheet() {
        let mut target = target_with(&["1_Data"]);
        let name = IndexBuilder::new().build(&mut target, &[], timestamp()).unwrap();
        assert!(name.is_none());
        assert_eq!(target.sheets().len(), 1);
    }
}
