//! `.xlsx` persistence backed by umya-spreadsheet.
//!
//! umya attaches a full `Style` to each conditional-format rule. On read those
//! styles are collected into the document's differential-style registry; on
//! write each rule's registry entry is turned back into a `Style`.
//!
//! Theme colors are resolved against the source workbook's theme while reading,
//! so the merged workbook only ever carries ARGB values.

use log::{debug, warn};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use umya_spreadsheet::structs::drawing::Theme;
use umya_spreadsheet::{
    reader, writer, Border, Color, ColorScale, ConditionalFormatValueObject,
    ConditionalFormatValueObjectValues, ConditionalFormatValues, ConditionalFormatting,
    ConditionalFormattingOperatorValues, ConditionalFormattingRule, DataBar, DataValidation,
    DataValidationOperatorValues, DataValidationValues, DataValidations, EnumTrait, Formula,
    HorizontalAlignmentValues, IconSet, OrientationValues, Pane, PaneStateValues, PaneValues,
    PatternValues, Protection, SheetView, Spreadsheet, Style, Table as XlsxTable, TableColumn,
    TableStyleInfo, TimePeriodValues, VerticalAlignmentValues,
};

use super::coords::{cell_ref, parse_cell_ref, CellRange};
use super::error::MergeError;
use super::model::{
    Cell, ColumnDimension, ConditionalFormat, ConditionalRule, DataValidationRule, FreezePanes,
    Orientation, PageSetup, PrintOptions, RowDimension, SheetState, SourceDocument, Table,
    TableStyle, TargetDocument, ValuePoint, ValueScale, Worksheet,
};
use super::store::WorkbookStore;
use super::styles::{
    AlignmentStyle, BorderEdge, BorderStyle, CellStyle, DifferentialStyle, DifferentialStyles,
    FillStyle, FontStyle, ProtectionStyle,
};
use super::types::{CellValue, CopyWarning, Feature};

/// Rule kinds whose `operator` attribute is meaningful
const OPERATOR_RULES: &[&str] = &["cellIs", "containsText", "notContainsText", "beginsWith", "endsWith"];

/// Reads and writes workbooks in the Office Open XML format
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxStore;

impl XlsxStore {
    pub fn new() -> Self {
        XlsxStore
    }
}

impl WorkbookStore for XlsxStore {
    fn open(&self, path: &Path, preserve_formulas: bool) -> Result<SourceDocument, MergeError> {
        let book = reader::xlsx::read(path).map_err(|e| MergeError::source_open(path, e.to_string()))?;
        let theme = book.get_theme();

        let mut dxfs = DifferentialStyles::new();
        let mut sheets = Vec::new();
        let mut warnings = Vec::new();
        for ws in book.get_sheet_collection() {
            let mut sheet_reader = SheetReader::new(ws.get_name(), theme);
            sheets.push(sheet_reader.read_sheet(ws, preserve_formulas, &mut dxfs));
            warnings.extend(sheet_reader.warnings);
        }

        Ok(SourceDocument {
            path: path.to_path_buf(),
            sheets,
            dxfs,
            warnings,
        })
    }

    fn save(&self, document: &TargetDocument, path: &Path) -> Result<(), MergeError> {
        let book = build_workbook(document).map_err(|reason| MergeError::save(path, reason))?;

        let partial = partial_path(path);
        // Surface lock and permission problems as I/O errors before umya writes
        File::create(&partial).map_err(|e| MergeError::save_io(path, "cannot create the output file", e))?;

        if let Err(e) = writer::xlsx::write(&book, &partial) {
            let _ = fs::remove_file(&partial);
            return Err(MergeError::save(path, e.to_string()));
        }
        if let Err(e) = fs::rename(&partial, path) {
            let _ = fs::remove_file(&partial);
            return Err(MergeError::save_io(path, "cannot replace the output file", e));
        }

        debug!("Wrote {} sheets to {}", document.sheets().len(), path.display());
        Ok(())
    }
}

/// Hidden sibling the workbook is written to before it replaces the output
fn partial_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", file_name))
}

// ==================== Reading ====================

/// Reads one worksheet into the model, recording content it cannot represent
struct SheetReader<'a> {
    sheet: String,
    theme: &'a Theme,
    warnings: Vec<CopyWarning>,
}

impl<'a> SheetReader<'a> {
    fn new(sheet: &str, theme: &'a Theme) -> Self {
        SheetReader {
            sheet: sheet.to_string(),
            theme,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, feature: Feature, location: Option<&str>, message: &str) {
        let warning = CopyWarning {
            sheet: self.sheet.clone(),
            feature,
            location: location.map(str::to_string),
            message: message.to_string(),
        };
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// ARGB value of a color, with theme references resolved
    fn color(&self, color: &Color) -> Option<String> {
        let value = color.get_argb_with_theme(self.theme);
        (!value.is_empty()).then(|| value.to_string())
    }

    /// Resolve a color the file states explicitly; failures are recorded
    fn stated_color(&mut self, color: Option<&Color>, feature: Feature, location: &str) -> Option<String> {
        let resolved = self.color(color?);
        if resolved.is_none() {
            self.warn(feature, Some(location), "color could not be resolved and was left unset");
        }
        resolved
    }

    fn read_sheet(
        &mut self,
        ws: &umya_spreadsheet::Worksheet,
        preserve_formulas: bool,
        dxfs: &mut DifferentialStyles,
    ) -> Worksheet {
        let mut sheet = Worksheet::new(ws.get_name());

        sheet.state = SheetState::from_str(ws.get_sheet_state());
        sheet.tab_color = self.stated_color(ws.get_tab_color(), Feature::TabColor, "tab");
        sheet.freeze_panes = read_freeze_panes(ws);
        sheet.page_setup = read_page_setup(ws);
        let print = ws.get_print_options();
        sheet.print_options = PrintOptions {
            horizontal_centered: *print.get_horizontal_centered(),
            vertical_centered: *print.get_vertical_centered(),
        };

        for column in ws.get_column_dimensions() {
            let width = *column.get_width();
            sheet.columns.insert(
                *column.get_col_num(),
                ColumnDimension {
                    width: (width > 0.0).then_some(width),
                    hidden: *column.get_hidden(),
                },
            );
        }
        for row in ws.get_row_dimensions() {
            if !*row.get_custom_height() && !*row.get_hidden() {
                continue;
            }
            let height = *row.get_height();
            sheet.rows.insert(
                *row.get_row_num(),
                RowDimension {
                    height: (height > 0.0).then_some(height),
                    hidden: *row.get_hidden(),
                },
            );
        }

        let mut cells: Vec<((u32, u32), Cell)> = Vec::new();
        for cell in ws.get_cell_collection() {
            let coordinate = cell.get_coordinate();
            let (row, col) = (*coordinate.get_row_num(), *coordinate.get_col_num());
            let location = cell_ref(row, col);
            let value = read_cell_value(cell, preserve_formulas);
            let style = self.cell_style(cell.get_style(), &location);
            cells.push(((row, col), Cell { value, style, hyperlink: None }));
        }
        cells.sort_by_key(|(key, _)| *key);
        for ((row, col), cell) in cells {
            match sheet.cell_mut(row, col) {
                Ok(slot) => *slot = cell,
                Err(e) => warn!("Ignoring cell in '{}': {}", ws.get_name(), e),
            }
        }

        for range in ws.get_merge_cells() {
            match range.get_range().parse::<CellRange>() {
                Ok(parsed) => {
                    if let Err(e) = sheet.merge_range(parsed) {
                        warn!("Ignoring merge in '{}': {}", ws.get_name(), e);
                    }
                }
                Err(e) => warn!("Ignoring merge in '{}': {}", ws.get_name(), e),
            }
        }

        if let Some(validations) = ws.get_data_validations() {
            sheet.data_validations = validations
                .get_data_validation_list()
                .iter()
                .map(read_data_validation)
                .collect();
        }

        for cf in ws.get_conditional_formatting_collection() {
            let format = self.conditional_format(cf, dxfs);
            sheet.conditional_formats.push(format);
        }

        sheet.tables = ws.get_tables().iter().map(read_table).collect();

        sheet
    }

    fn font(&self, font: &umya_spreadsheet::Font) -> FontStyle {
        let underline = font.get_underline();
        FontStyle {
            name: Some(font.get_name().to_string()).filter(|n| !n.is_empty()),
            size: Some(*font.get_size()).filter(|s| *s > 0.0),
            bold: *font.get_bold(),
            italic: *font.get_italic(),
            underline: (!underline.is_empty() && underline != "none").then(|| underline.to_string()),
            strikethrough: *font.get_strikethrough(),
            color: self.color(font.get_color()),
        }
    }

    fn border_edge(&self, border: &Border) -> Option<BorderEdge> {
        let style = border.get_border_style();
        if style.is_empty() || style == "none" {
            return None;
        }
        Some(BorderEdge {
            style: style.to_string(),
            color: self.color(border.get_color()),
        })
    }

    fn borders(&self, style: &Style) -> Option<BorderStyle> {
        let borders = style.get_borders()?;
        let border = BorderStyle {
            left: self.border_edge(borders.get_left()),
            right: self.border_edge(borders.get_right()),
            top: self.border_edge(borders.get_top()),
            bottom: self.border_edge(borders.get_bottom()),
        };
        (border != BorderStyle::default()).then_some(border)
    }

    fn fill(&mut self, style: &Style, feature: Feature, location: &str) -> Option<FillStyle> {
        let pattern = style.get_fill()?.get_pattern_fill()?;
        let kind = pattern.get_pattern_type().get_value_string();
        if kind == "none" {
            return None;
        }
        Some(FillStyle {
            pattern: kind.to_string(),
            foreground: self.stated_color(pattern.get_foreground_color(), feature, location),
            background: self.stated_color(pattern.get_background_color(), feature, location),
        })
    }

    fn cell_style(&mut self, style: &Style, location: &str) -> CellStyle {
        CellStyle {
            font: style.get_font().map(|f| self.font(f)),
            border: self.borders(style),
            fill: self.fill(style, Feature::Fill, location),
            number_format: style
                .get_number_format()
                .map(|f| f.get_format_code().to_string()),
            alignment: style.get_alignment().map(|a| AlignmentStyle {
                horizontal: Some(a.get_horizontal().get_value_string().to_string())
                    .filter(|h| h != "general"),
                vertical: Some(a.get_vertical().get_value_string().to_string())
                    .filter(|v| v != "bottom"),
                wrap_text: *a.get_wrap_text(),
                text_rotation: *a.get_text_rotation(),
            }),
            // Protection's getters take `&mut self`
            protection: style.get_protection().cloned().map(|mut p: Protection| ProtectionStyle {
                locked: *p.get_locked(),
                hidden: *p.get_hidden(),
            }),
        }
    }

    fn differential_style(&mut self, style: &Style, location: &str) -> DifferentialStyle {
        DifferentialStyle {
            font: style.get_font().map(|f| self.font(f)),
            fill: self.fill(style, Feature::ConditionalFormatting, location),
            border: self.borders(style),
            number_format: style
                .get_number_format()
                .map(|f| f.get_format_code().to_string()),
        }
    }

    fn scale<'c>(
        &mut self,
        points: impl IntoIterator<Item = &'c ConditionalFormatValueObject>,
        colors: impl IntoIterator<Item = &'c Color>,
        location: &str,
    ) -> ValueScale {
        let points = points
            .into_iter()
            .map(|point| ValuePoint {
                kind: point.get_type().get_value_string().to_string(),
                value: Some(point.get_val().to_string()).filter(|v| !v.is_empty()),
            })
            .collect();

        let mut resolved = Vec::new();
        for color in colors {
            if let Some(argb) = self.stated_color(Some(color), Feature::ConditionalFormatting, location) {
                resolved.push(argb);
            }
        }

        ValueScale {
            points,
            colors: resolved,
        }
    }

    fn conditional_format(&mut self, cf: &ConditionalFormatting, dxfs: &mut DifferentialStyles) -> ConditionalFormat {
        let sqref = cf.get_sequence_of_references().get_sqref();
        let mut rules = Vec::new();

        for rule in cf.get_conditional_collection() {
            let kind = rule.get_type().get_value_string().to_string();

            let scale = match kind.as_str() {
                "colorScale" => rule
                    .get_color_scale()
                    .map(|s| self.scale(s.get_cfvo_collection(), s.get_color_collection(), &sqref)),
                "dataBar" => rule
                    .get_data_bar()
                    .map(|s| self.scale(s.get_cfvo_collection(), s.get_color_collection(), &sqref)),
                "iconSet" => rule
                    .get_icon_set()
                    .map(|s| self.scale(s.get_cfvo_collection(), s.get_color_collection(), &sqref)),
                _ => None,
            };

            // An omitted attribute and an explicit "0" read the same
            let above_average = if kind == "aboveAverage" {
                let above = *rule.get_above_average();
                if !above {
                    self.warn(
                        Feature::ConditionalFormatting,
                        Some(&sqref),
                        "above/below direction is not readable; rule kept as above average",
                    );
                }
                above.then_some(true)
            } else {
                None
            };

            let rank = *rule.get_rank();
            let text = rule.get_text();
            let dxf_id = rule
                .get_style()
                .map(|style| self.differential_style(style, &sqref))
                .map(|style| dxfs.push(style));

            rules.push(ConditionalRule {
                operator: OPERATOR_RULES
                    .contains(&kind.as_str())
                    .then(|| rule.get_operator().get_value_string().to_string()),
                priority: *rule.get_priority(),
                stop_if_true: *rule.get_stop_if_true(),
                formula: rule.get_formula().map(|f| f.get_address_str()),
                dxf_id,
                text: (!text.is_empty()).then(|| text.to_string()),
                rank: (rank > 0).then_some(rank),
                percent: *rule.get_percent(),
                bottom: *rule.get_bottom(),
                above_average,
                time_period: (kind == "timePeriod")
                    .then(|| rule.get_time_period().get_value_string().to_string()),
                scale,
                kind,
            });
        }

        ConditionalFormat { sqref, rules }
    }
}

fn read_cell_value(cell: &umya_spreadsheet::Cell, preserve_formulas: bool) -> CellValue {
    let cached = typed_value(cell.get_data_type(), &cell.get_value());

    if !cell.is_formula() || !preserve_formulas {
        return cached;
    }

    let formula = cell.get_formula();
    CellValue::Formula {
        formula: formula.strip_prefix('=').unwrap_or(formula).to_string(),
        cached_value: (!cached.is_empty()).then(|| Box::new(cached)),
    }
}

fn typed_value(data_type: &str, raw: &str) -> CellValue {
    if raw.is_empty() {
        return CellValue::Empty;
    }
    match data_type {
        "n" => raw
            .parse::<f64>()
            .map(CellValue::Number)
            .unwrap_or_else(|_| CellValue::String(raw.to_string())),
        "b" => CellValue::Boolean(raw.eq_ignore_ascii_case("true") || raw == "1"),
        "e" => CellValue::Error(raw.to_string()),
        _ => CellValue::String(raw.to_string()),
    }
}

fn read_freeze_panes(ws: &umya_spreadsheet::Worksheet) -> Option<FreezePanes> {
    let view = ws.get_sheets_views().get_sheet_view_list().first()?;
    let pane = view.get_pane()?;
    if !pane.get_state().get_value_string().starts_with("frozen") {
        return None;
    }
    let (row, col) = parse_cell_ref(&pane.get_top_left_cell().get_coordinate())?;
    Some(FreezePanes::at(row, col))
}

fn read_page_setup(ws: &umya_spreadsheet::Worksheet) -> PageSetup {
    let setup = ws.get_page_setup();
    let orientation = Orientation::from_str(setup.get_orientation().get_value_string());
    let positive = |n: u32| (n > 0).then_some(n);

    PageSetup {
        orientation: (orientation != Orientation::Default).then_some(orientation),
        paper_size: positive(*setup.get_paper_size()),
        fit_to_width: positive(*setup.get_fit_to_width()),
        fit_to_height: positive(*setup.get_fit_to_height()),
    }
}

fn read_data_validation(dv: &DataValidation) -> DataValidationRule {
    let text = |s: &str| (!s.is_empty()).then(|| s.to_string());

    DataValidationRule {
        sqref: dv.get_sequence_of_references().get_sqref(),
        kind: dv.get_type().get_value_string().to_string(),
        operator: Some(dv.get_operator().get_value_string().to_string()),
        formula1: text(dv.get_formula1()),
        formula2: text(dv.get_formula2()),
        allow_blank: *dv.get_allow_blank(),
        show_input_message: *dv.get_show_input_message(),
        show_error_message: *dv.get_show_error_message(),
        prompt_title: text(dv.get_prompt_title()),
        prompt: text(dv.get_prompt()),
    }
}

fn read_table(table: &XlsxTable) -> Table {
    let (start, end) = table.get_area();
    Table {
        name: table.get_name().to_string(),
        range: CellRange::new(
            *start.get_row_num(),
            *start.get_col_num(),
            *end.get_row_num(),
            *end.get_col_num(),
        ),
        columns: table
            .get_columns()
            .iter()
            .map(|c| c.get_name().to_string())
            .collect(),
        style: table.get_style_info().map(|info| TableStyle {
            name: info.get_name().to_string(),
            show_first_column: info.is_show_first_col(),
            show_last_column: info.is_show_last_col(),
            show_row_stripes: info.is_show_row_stripes(),
            show_column_stripes: info.is_show_col_stripes(),
        }),
    }
}

// ==================== Writing ====================

fn build_workbook(document: &TargetDocument) -> Result<Spreadsheet, String> {
    let mut book = umya_spreadsheet::new_file_empty_worksheet();

    for sheet in document.sheets() {
        let ws = book
            .new_sheet(sheet.name.as_str())
            .map_err(|e| format!("Cannot create sheet '{}': {}", sheet.name, e))?;
        write_sheet(sheet, &document.dxfs, ws);
    }

    let first_visible = document
        .sheets()
        .iter()
        .position(|s| s.state == SheetState::Visible)
        .unwrap_or(0);
    book.get_workbook_view_mut().set_active_tab(first_visible as u32);

    Ok(book)
}

fn write_sheet(sheet: &Worksheet, dxfs: &DifferentialStyles, ws: &mut umya_spreadsheet::Worksheet) {
    if sheet.state != SheetState::Visible {
        ws.set_sheet_state(sheet.state.as_str().to_string());
    }
    if let Some(tab) = &sheet.tab_color {
        ws.set_tab_color(color_from(tab));
    }
    if let Some(panes) = sheet.freeze_panes {
        write_freeze_panes(panes, ws);
    }
    write_page_setup(&sheet.page_setup, ws);
    let print = ws.get_print_options_mut();
    print.set_horizontal_centered(sheet.print_options.horizontal_centered);
    print.set_vertical_centered(sheet.print_options.vertical_centered);

    for (col, dimension) in &sheet.columns {
        let column = ws.get_column_dimension_by_number_mut(col);
        if let Some(width) = dimension.width {
            column.set_width(width);
        }
        column.set_hidden(dimension.hidden);
    }
    for (row, dimension) in &sheet.rows {
        let target = ws.get_row_dimension_mut(row);
        if let Some(height) = dimension.height {
            target.set_height(height);
            target.set_custom_height(true);
        }
        target.set_hidden(dimension.hidden);
    }

    for ((row, col), cell) in sheet.cells() {
        let target = ws.get_cell_mut((col, row));
        write_cell_value(&cell.value, target);
        apply_cell_style(&cell.style, target.get_style_mut());
        if let Some(link) = &cell.hyperlink {
            let mut hyperlink = umya_spreadsheet::Hyperlink::default();
            hyperlink.set_url(link.location.as_str());
            hyperlink.set_location(true);
            target.set_hyperlink(hyperlink);
        }
    }

    for range in sheet.merged_ranges() {
        ws.add_merge_cells(range.to_string());
    }

    if !sheet.data_validations.is_empty() {
        let mut validations = DataValidations::default();
        for rule in &sheet.data_validations {
            validations.add_data_validation_list(build_data_validation(rule));
        }
        ws.set_data_validations(validations);
    }

    for format in &sheet.conditional_formats {
        ws.add_conditional_formatting_collection(build_conditional_format(format, dxfs));
    }

    for table in &sheet.tables {
        ws.add_table(build_table(table));
    }
}

fn write_cell_value(value: &CellValue, cell: &mut umya_spreadsheet::Cell) {
    match value {
        CellValue::Empty => {}
        CellValue::String(s) => {
            cell.set_value_string(s.as_str());
        }
        CellValue::Number(n) => {
            cell.set_value_number(*n);
        }
        CellValue::Boolean(b) => {
            cell.set_value_bool(*b);
        }
        CellValue::Error(e) => {
            cell.set_value(e.as_str());
        }
        CellValue::Formula { formula, cached_value } => {
            // The cached result has to be in place before the formula
            if let Some(cached) = cached_value.as_deref() {
                write_cell_value(cached, cell);
            }
            cell.set_formula(formula.as_str());
        }
    }
}

fn color_from(argb: &str) -> Color {
    let mut color = Color::default();
    color.set_argb(super::styles::to_argb(argb));
    color
}

fn write_font(font: &FontStyle, target: &mut umya_spreadsheet::Font) {
    if let Some(name) = &font.name {
        target.set_name(name.as_str());
    }
    if let Some(size) = font.size {
        target.set_size(size);
    }
    target.set_bold(font.bold);
    target.set_italic(font.italic);
    if let Some(underline) = &font.underline {
        target.set_underline(underline.as_str());
    }
    target.set_strikethrough(font.strikethrough);
    if let Some(color) = &font.color {
        target.set_color(color_from(color));
    }
}

fn write_border_edge(edge: &Option<BorderEdge>, target: &mut Border) {
    let Some(edge) = edge else { return };
    target.set_border_style(edge.style.as_str());
    if let Some(color) = &edge.color {
        target.set_color(color_from(color));
    }
}

fn write_borders(border: &BorderStyle, style: &mut Style) {
    let borders = style.get_borders_mut();
    write_border_edge(&border.left, borders.get_left_mut());
    write_border_edge(&border.right, borders.get_right_mut());
    write_border_edge(&border.top, borders.get_top_mut());
    write_border_edge(&border.bottom, borders.get_bottom_mut());
}

fn write_fill(fill: &FillStyle, target: &mut umya_spreadsheet::Fill) {
    let pattern = target.get_pattern_fill_mut();
    if let Ok(kind) = PatternValues::from_str(&fill.pattern) {
        pattern.set_pattern_type(kind);
    }
    if let Some(color) = &fill.foreground {
        pattern.set_foreground_color(color_from(color));
    }
    if let Some(color) = &fill.background {
        pattern.set_background_color(color_from(color));
    }
}

fn apply_cell_style(style: &CellStyle, target: &mut Style) {
    if let Some(font) = &style.font {
        write_font(font, target.get_font_mut());
    }
    if let Some(border) = &style.border {
        write_borders(border, target);
    }
    if let Some(fill) = &style.fill {
        write_fill(fill, target.get_fill_mut());
    }
    if let Some(code) = &style.number_format {
        target.get_number_format_mut().set_format_code(code.as_str());
    }
    if let Some(alignment) = &style.alignment {
        let out = target.get_alignment_mut();
        if let Some(h) = alignment.horizontal.as_deref().and_then(|h| HorizontalAlignmentValues::from_str(h).ok()) {
            out.set_horizontal(h);
        }
        if let Some(v) = alignment.vertical.as_deref().and_then(|v| VerticalAlignmentValues::from_str(v).ok()) {
            out.set_vertical(v);
        }
        out.set_wrap_text(alignment.wrap_text);
        out.set_text_rotation(alignment.text_rotation);
    }
    if let Some(protection) = style.protection {
        let mut out = Protection::default();
        out.set_locked(protection.locked);
        out.set_hidden(protection.hidden);
        target.set_protection(out);
    }
}

fn differential_to_style(style: &DifferentialStyle) -> Style {
    let mut out = Style::default();
    if let Some(font) = &style.font {
        write_font(font, out.get_font_mut());
    }
    if let Some(fill) = &style.fill {
        write_fill(fill, out.get_fill_mut());
    }
    if let Some(border) = &style.border {
        write_borders(border, &mut out);
    }
    if let Some(code) = &style.number_format {
        out.get_number_format_mut().set_format_code(code.as_str());
    }
    out
}

fn write_freeze_panes(panes: FreezePanes, ws: &mut umya_spreadsheet::Worksheet) {
    let mut pane = Pane::default();
    pane.set_horizontal_split(f64::from(panes.col - 1));
    pane.set_vertical_split(f64::from(panes.row - 1));
    pane.get_top_left_cell_mut().set_coordinate(panes.top_left_cell());
    pane.set_state(PaneStateValues::Frozen);
    pane.set_active_pane(match (panes.row > 1, panes.col > 1) {
        (true, true) => PaneValues::BottomRight,
        (true, false) => PaneValues::BottomLeft,
        _ => PaneValues::TopRight,
    });

    let views = ws.get_sheet_views_mut().get_sheet_view_list_mut();
    if views.is_empty() {
        views.push(SheetView::default());
    }
    views[0].set_pane(pane);
}

fn write_page_setup(setup: &PageSetup, ws: &mut umya_spreadsheet::Worksheet) {
    if setup.is_default() {
        return;
    }
    let out = ws.get_page_setup_mut();
    if let Some(orientation) = setup.orientation {
        if let Ok(value) = OrientationValues::from_str(orientation.as_str()) {
            out.set_orientation(value);
        }
    }
    if let Some(size) = setup.paper_size {
        out.set_paper_size(size);
    }
    if let Some(width) = setup.fit_to_width {
        out.set_fit_to_width(width);
    }
    if let Some(height) = setup.fit_to_height {
        out.set_fit_to_height(height);
    }
}

fn build_data_validation(rule: &DataValidationRule) -> DataValidation {
    let mut dv = DataValidation::default();
    match DataValidationValues::from_str(&rule.kind) {
        Ok(kind) => {
            dv.set_type(kind);
        }
        Err(_) => warn!("Unknown data validation type '{}'", rule.kind),
    }
    if let Some(op) = rule.operator.as_deref().and_then(|op| DataValidationOperatorValues::from_str(op).ok()) {
        dv.set_operator(op);
    }
    dv.get_sequence_of_references_mut().set_sqref(rule.sqref.as_str());
    dv.set_allow_blank(rule.allow_blank);
    if let Some(formula) = &rule.formula1 {
        dv.set_formula1(formula.as_str());
    }
    if let Some(formula) = &rule.formula2 {
        dv.set_formula2(formula.as_str());
    }
    dv.set_show_input_message(rule.show_input_message);
    if let Some(title) = &rule.prompt_title {
        dv.set_prompt_title(title.as_str());
    }
    if let Some(prompt) = &rule.prompt {
        dv.set_prompt(prompt.as_str());
    }
    dv.set_show_error_message(rule.show_error_message);
    dv
}

/// Attach the thresholds and colors of a `colorScale`, `dataBar` or `iconSet` rule
fn write_scale(kind: &str, scale: &ValueScale, rule: &mut ConditionalFormattingRule) -> Result<(), String> {
    let mut points = Vec::with_capacity(scale.points.len());
    for point in &scale.points {
        let value_kind = ConditionalFormatValueObjectValues::from_str(&point.kind)
            .map_err(|_| format!("unknown threshold type '{}'", point.kind))?;
        let mut out = ConditionalFormatValueObject::default();
        out.set_type(value_kind);
        if let Some(value) = &point.value {
            out.set_val(value.as_str());
        }
        points.push(out);
    }
    let colors = scale.colors.iter().map(|c| color_from(c));

    match kind {
        "colorScale" => {
            let mut out = ColorScale::default();
            for point in points {
                out.add_cfvo_collection(point);
            }
            for color in colors {
                out.add_color_collection(color);
            }
            rule.set_color_scale(out);
        }
        "dataBar" => {
            let mut out = DataBar::default();
            for point in points {
                out.add_cfvo_collection(point);
            }
            for color in colors {
                out.add_color_collection(color);
            }
            rule.set_data_bar(out);
        }
        "iconSet" => {
            let mut out = IconSet::default();
            for point in points {
                out.add_cfvo_collection(point);
            }
            for color in colors {
                out.add_color_collection(color);
            }
            rule.set_icon_set(out);
        }
        other => return Err(format!("{} rules carry no thresholds", other)),
    }
    Ok(())
}

fn build_conditional_format(format: &ConditionalFormat, dxfs: &DifferentialStyles) -> ConditionalFormatting {
    let mut cf = ConditionalFormatting::default();
    cf.get_sequence_of_references_mut().set_sqref(format.sqref.as_str());

    for rule in &format.rules {
        let mut out = ConditionalFormattingRule::default();
        match ConditionalFormatValues::from_str(&rule.kind) {
            Ok(kind) => {
                out.set_type(kind);
            }
            Err(_) => {
                warn!("Skipping conditional format rule of unknown type '{}'", rule.kind);
                continue;
            }
        }
        if let Some(op) = rule
            .operator
            .as_deref()
            .and_then(|op| ConditionalFormattingOperatorValues::from_str(op).ok())
        {
            out.set_operator(op);
        }
        out.set_priority(rule.priority);
        out.set_stop_if_true(rule.stop_if_true);

        if let Some(text) = &rule.text {
            out.set_text(text.as_str());
        }
        if let Some(rank) = rule.rank {
            out.set_rank(rank);
        }
        if rule.percent {
            out.set_percent(true);
        }
        if rule.bottom {
            out.set_bottom(true);
        }
        if let Some(above) = rule.above_average {
            out.set_above_average(above);
        }
        if let Some(period) = &rule.time_period {
            match TimePeriodValues::from_str(period) {
                Ok(value) => {
                    out.set_time_period(value);
                }
                Err(_) => {
                    warn!("Skipping timePeriod rule with unknown period '{}'", period);
                    continue;
                }
            }
        }
        if let Some(scale) = &rule.scale {
            if let Err(reason) = write_scale(&rule.kind, scale, &mut out) {
                warn!("Skipping {} rule on {}: {}", rule.kind, format.sqref, reason);
                continue;
            }
        }

        if let Some(text) = &rule.formula {
            let mut formula = Formula::default();
            formula.set_string_value(text.as_str());
            out.set_formula(formula);
        }
        if let Some(style) = rule.dxf_id.and_then(|id| dxfs.get(id)) {
            out.set_style(differential_to_style(style));
        }
        cf.add_conditional_collection(out);
    }

    cf
}

fn build_table(table: &Table) -> XlsxTable {
    let range = table.range;
    let start = cell_ref(range.first_row, range.first_col);
    let end = cell_ref(range.last_row, range.last_col);

    let mut out = XlsxTable::new(&table.name, (start.as_str(), end.as_str()));
    for column in &table.columns {
        out.add_column(TableColumn::new(column));
    }
    if let Some(style) = &table.style {
        out.set_style_info(Some(TableStyleInfo::new(
            &style.name,
            style.show_first_column,
            style.show_last_column,
            style.show_row_stripes,
            style.show_column_stripes,
        )));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::model::Hyperlink;
    use crate::merge::styles::to_argb;

    fn sample_document() -> TargetDocument {
        let mut sheet = Worksheet::new("1_Sales");
        sheet.set_value(1, 1, "Region".into()).unwrap();
        sheet.set_value(1, 2, "Amount".into()).unwrap();
        sheet.set_value(2, 1, "North".into()).unwrap();
        sheet.set_value(2, 2, CellValue::Number(40.0)).unwrap();
        sheet.set_value(3, 1, "South".into()).unwrap();
        sheet.set_value(3, 2, CellValue::Number(2.5)).unwrap();
        sheet
            .set_value(
                4,
                2,
                CellValue::Formula {
                    formula: "SUM(B2:B3)".to_string(),
                    cached_value: Some(Box::new(CellValue::Number(42.5))),
                },
            )
            .unwrap();
        sheet.cell_mut(1, 1).unwrap().style.font = Some(FontStyle {
            bold: true,
            ..Default::default()
        });
        sheet.merge_range("C1:D1".parse().unwrap()).unwrap();
        sheet.freeze_panes = Some(FreezePanes::at(2, 1));
        sheet.columns.insert(
            1,
            ColumnDimension {
                width: Some(18.0),
                hidden: false,
            },
        );

        let mut doc = TargetDocument::new();
        let dxf = doc.dxfs.push(DifferentialStyle {
            fill: Some(FillStyle::solid("FFC7CE")),
            ..Default::default()
        });
        sheet.conditional_formats.push(ConditionalFormat {
            sqref: "B2:B3".to_string(),
            rules: vec![ConditionalRule {
                kind: "cellIs".to_string(),
                operator: Some("greaterThan".to_string()),
                priority: 1,
                formula: Some("10".to_string()),
                dxf_id: Some(dxf),
                ..Default::default()
            }],
        });
        doc.push_sheet(sheet).unwrap();

        let mut index = Worksheet::new("Index");
        index.set_value(1, 1, "1_Sales".into()).unwrap();
        index.cell_mut(1, 1).unwrap().hyperlink = Some(Hyperlink::to_sheet("1_Sales"));
        doc.insert_sheet(0, index).unwrap();
        doc
    }

    #[test]
    fn test_save_then_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Merged.xlsx");
        let store = XlsxStore::new();

        store.save(&sample_document(), &path).unwrap();
        assert!(path.exists());
        assert!(!partial_path(&path).exists());

        let reopened = store.open(&path, true).unwrap();
        let names: Vec<_> = reopened.sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Index", "1_Sales"]);

        let sales = &reopened.sheets[1];
        assert_eq!(sales.cell(2, 2).unwrap().value, CellValue::Number(40.0));
        assert!(matches!(
            &sales.cell(4, 2).unwrap().value,
            CellValue::Formula { formula, .. } if formula == "SUM(B2:B3)"
        ));
        assert_eq!(sales.merged_ranges(), &["C1:D1".parse::<CellRange>().unwrap()]);
        assert_eq!(sales.freeze_panes, Some(FreezePanes::at(2, 1)));
        assert!(sales.cell(1, 1).unwrap().style.font.as_ref().unwrap().bold);

        assert_eq!(sales.conditional_formats.len(), 1);
        let dxf_id = sales.conditional_formats[0].rules[0].dxf_id.unwrap();
        assert!(reopened.dxfs.get(dxf_id).is_some());
    }

    #[test]
    fn test_open_without_formulas_gives_cached_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Merged.xlsx");
        let store = XlsxStore::new();
        store.save(&sample_document(), &path).unwrap();

        let reopened = store.open(&path, false).unwrap();
        let value = &reopened.sheets[1].cell(4, 2).unwrap().value;
        assert_eq!(*value, CellValue::Number(42.5));
    }

    #[test]
    fn test_formula_keeps_cached_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Merged.xlsx");
        let store = XlsxStore::new();
        store.save(&sample_document(), &path).unwrap();

        let reopened = store.open(&path, true).unwrap();
        match &reopened.sheets[1].cell(4, 2).unwrap().value {
            CellValue::Formula { cached_value, .. } => {
                assert_eq!(cached_value.as_deref(), Some(&CellValue::Number(42.5)));
            }
            other => panic!("expected a formula, got {:?}", other),
        }
    }

    #[test]
    fn test_theme_fill_resolved_and_copied() {
        use crate::merge::copier::SheetCopyEngine;

        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("themed.xlsx");
        let merged_path = dir.path().join("Merged.xlsx");

        let mut book = umya_spreadsheet::new_file();
        let mut accent = Color::default();
        accent.set_theme_index(4);
        let expected = accent.get_argb_with_theme(book.get_theme()).to_string();
        assert!(!expected.is_empty());
        {
            let ws = book.get_sheet_mut(&0).unwrap();
            let pattern = ws.get_style_mut("A1").get_fill_mut().get_pattern_fill_mut();
            pattern.set_pattern_type(PatternValues::Solid);
            pattern.set_foreground_color(accent);
            ws.get_cell_mut("A1").set_value_string("accent");
        }
        writer::xlsx::write(&book, &source_path).unwrap();

        let store = XlsxStore::new();
        let source = store.open(&source_path, true).unwrap();
        assert!(source.warnings.is_empty());
        let fill = source.sheets[0].cell(1, 1).unwrap().style.fill.clone().unwrap();
        assert_eq!(fill.foreground.as_deref(), Some(expected.as_str()));

        let mut target = TargetDocument::new();
        SheetCopyEngine::new(true)
            .copy_sheet(&source.sheets[0], &source.dxfs, &mut target, "1_Themed")
            .unwrap();
        store.save(&target, &merged_path).unwrap();

        let merged = store.open(&merged_path, true).unwrap();
        let fill = merged.sheets[0].cell(1, 1).unwrap().style.fill.clone().unwrap();
        assert_eq!(fill.pattern, "solid");
        assert_eq!(
            fill.foreground.map(|c| to_argb(&c)),
            Some(to_argb(&expected))
        );
    }

    #[test]
    fn test_scale_and_rank_rules_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Scores.xlsx");

        let mut book = umya_spreadsheet::new_file();
        {
            let ws = book.get_sheet_mut(&0).unwrap();
            for row in 1..=5u32 {
                ws.get_cell_mut((2, row)).set_value_number(f64::from(row));
            }

            let mut scale = ColorScale::default();
            for kind in ["min", "max"] {
                let mut point = ConditionalFormatValueObject::default();
                point.set_type(ConditionalFormatValueObjectValues::from_str(kind).unwrap());
                scale.add_cfvo_collection(point);
            }
            scale.add_color_collection(color_from("F8696B"));
            scale.add_color_collection(color_from("63BE7B"));
            let mut color_rule = ConditionalFormattingRule::default();
            color_rule.set_type(ConditionalFormatValues::from_str("colorScale").unwrap());
            color_rule.set_priority(1);
            color_rule.set_color_scale(scale);

            let mut top_rule = ConditionalFormattingRule::default();
            top_rule.set_type(ConditionalFormatValues::from_str("top10").unwrap());
            top_rule.set_priority(2);
            top_rule.set_rank(3);

            let mut cf = ConditionalFormatting::default();
            cf.get_sequence_of_references_mut().set_sqref("B1:B5");
            cf.add_conditional_collection(color_rule);
            cf.add_conditional_collection(top_rule);
            ws.add_conditional_formatting_collection(cf);
        }
        writer::xlsx::write(&book, &path).unwrap();

        let source = XlsxStore::new().open(&path, true).unwrap();
        assert!(source.warnings.is_empty());
        let rules = &source.sheets[0].conditional_formats[0].rules;
        assert_eq!(rules.len(), 2);

        assert_eq!(rules[0].kind, "colorScale");
        let scale = rules[0].scale.as_ref().unwrap();
        let kinds: Vec<_> = scale.points.iter().map(|p| p.kind.as_str()).collect();
        assert_eq!(kinds, vec!["min", "max"]);
        assert_eq!(scale.colors, vec!["FFF8696B".to_string(), "FF63BE7B".to_string()]);
        assert!(rules[0].validate().is_ok());

        assert_eq!(rules[1].kind, "top10");
        assert_eq!(rules[1].rank, Some(3));
        assert!(!rules[1].bottom);
        assert!(rules[1].scale.is_none());
    }

    #[test]
    fn test_scale_rule_written_with_thresholds() {
        let mut sheet = Worksheet::new("1_Scores");
        sheet.set_value(1, 1, CellValue::Number(1.0)).unwrap();
        sheet.conditional_formats.push(ConditionalFormat {
            sqref: "A1:A5".to_string(),
            rules: vec![ConditionalRule {
                kind: "dataBar".to_string(),
                priority: 1,
                scale: Some(ValueScale {
                    points: vec![
                        ValuePoint {
                            kind: "num".to_string(),
                            value: Some("0".to_string()),
                        },
                        ValuePoint {
                            kind: "max".to_string(),
                            value: None,
                        },
                    ],
                    colors: vec!["FF638EC6".to_string()],
                }),
                ..Default::default()
            }],
        });
        let mut doc = TargetDocument::new();
        doc.push_sheet(sheet).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Merged.xlsx");
        let store = XlsxStore::new();
        store.save(&doc, &path).unwrap();

        let reopened = store.open(&path, true).unwrap();
        let rule = &reopened.sheets[0].conditional_formats[0].rules[0];
        assert_eq!(rule.kind, "dataBar");
        let scale = rule.scale.as_ref().unwrap();
        assert_eq!(scale.points[0].value.as_deref(), Some("0"));
        assert_eq!(scale.colors, vec!["FF638EC6".to_string()]);
    }

    #[test]
    fn test_open_garbage_is_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        fs::write(&path, b"not a workbook").unwrap();

        let err = XlsxStore::new().open(&path, true).unwrap_err();
        assert!(matches!(err, MergeError::SourceOpen { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_save_into_missing_folder_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("Merged.xlsx");

        let err = XlsxStore::new().save(&sample_document(), &path).unwrap_err();
        assert!(matches!(err, MergeError::Save { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_typed_values() {
        assert_eq!(typed_value("n", "2.5"), CellValue::Number(2.5));
        assert_eq!(typed_value("b", "TRUE"), CellValue::Boolean(true));
        assert_eq!(typed_value("e", "#DIV/0!"), CellValue::Error("#DIV/0!".to_string()));
        assert_eq!(typed_value("s", ""), CellValue::Empty);
        assert_eq!(typed_value("s", "text"), CellValue::from("text"));
    }
}
