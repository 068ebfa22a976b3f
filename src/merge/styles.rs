//! Cell style facets and the differential-style registry.
//!
//! A cell carries a fixed set of optional facets. Each facet validates on its
//! own so that a malformed font never blocks the fill or border of the same cell.

use serde::{Deserialize, Serialize};

use super::error::MergeError;
use super::types::Feature;

/// Border styles a worksheet can express
pub const BORDER_STYLES: &[&str] = &[
    "none",
    "thin",
    "medium",
    "dashed",
    "dotted",
    "thick",
    "double",
    "hair",
    "mediumDashed",
    "dashDot",
    "mediumDashDot",
    "dashDotDot",
    "mediumDashDotDot",
    "slantDashDot",
];

const MAX_FONT_SIZE: f64 = 409.0;
const MAX_NUMBER_FORMAT_LEN: usize = 255;

/// Check an ARGB (or RGB) hex color string
pub fn validate_color(color: &str) -> Result<(), String> {
    let valid = matches!(color.len(), 6 | 8) && color.chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(format!("Invalid color '{}'", color))
    }
}

/// Normalize an RGB/ARGB string to 8-digit ARGB
pub fn to_argb(color: &str) -> String {
    let upper = color.trim_start_matches('#').to_ascii_uppercase();
    if upper.len() == 6 {
        format!("FF{}", upper)
    } else {
        upper
    }
}

fn validate_optional_color(color: &Option<String>) -> Result<(), String> {
    match color {
        Some(c) => validate_color(c),
        None => Ok(()),
    }
}

// ==================== Facets ====================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FontStyle {
    pub name: Option<String>,
    pub size: Option<f64>,
    pub bold: bool,
    pub italic: bool,
    /// `single`, `double`, ... or `None` for no underline
    pub underline: Option<String>,
    pub strikethrough: bool,
    pub color: Option<String>,
}

impl FontStyle {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.size {
            if !size.is_finite() || !(1.0..=MAX_FONT_SIZE).contains(&size) {
                return Err(format!("Font size {} out of range", size));
            }
        }
        validate_optional_color(&self.color)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderEdge {
    pub style: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BorderStyle {
    pub left: Option<BorderEdge>,
    pub right: Option<BorderEdge>,
    pub top: Option<BorderEdge>,
    pub bottom: Option<BorderEdge>,
}

impl BorderStyle {
    pub fn edges(&self) -> [(&'static str, Option<&BorderEdge>); 4] {
        [
            ("left", self.left.as_ref()),
            ("right", self.right.as_ref()),
            ("top", self.top.as_ref()),
            ("bottom", self.bottom.as_ref()),
        ]
    }

    pub fn validate(&self) -> Result<(), String> {
        for (side, edge) in self.edges() {
            let Some(edge) = edge else { continue };
            if !BORDER_STYLES.contains(&edge.style.as_str()) {
                return Err(format!("Unknown {} border style '{}'", side, edge.style));
            }
            validate_optional_color(&edge.color)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillStyle {
    /// Pattern type, e.g. `solid`, `gray125`
    pub pattern: String,
    pub foreground: Option<String>,
    pub background: Option<String>,
}

impl FillStyle {
    pub fn solid(color: &str) -> Self {
        FillStyle {
            pattern: "solid".to_string(),
            foreground: Some(to_argb(color)),
            background: Some(to_argb(color)),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pattern.is_empty() {
            return Err("Fill pattern is empty".to_string());
        }
        validate_optional_color(&self.foreground)?;
        validate_optional_color(&self.background)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlignmentStyle {
    pub horizontal: Option<String>,
    pub vertical: Option<String>,
    pub wrap_text: bool,
    pub text_rotation: u32,
}

impl AlignmentStyle {
    pub fn validate(&self) -> Result<(), String> {
        // 255 is the "stacked text" marker
        if self.text_rotation > 180 && self.text_rotation != 255 {
            return Err(format!("Text rotation {} out of range", self.text_rotation));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProtectionStyle {
    pub locked: bool,
    pub hidden: bool,
}

impl Default for ProtectionStyle {
    fn default() -> Self {
        ProtectionStyle {
            locked: true,
            hidden: false,
        }
    }
}

fn validate_number_format(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("Number format is empty".to_string());
    }
    if code.chars().count() > MAX_NUMBER_FORMAT_LEN {
        return Err("Number format is too long".to_string());
    }
    Ok(())
}

/// All style facets of one cell; absent facets mean "application default"
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CellStyle {
    pub font: Option<FontStyle>,
    pub border: Option<BorderStyle>,
    pub fill: Option<FillStyle>,
    pub number_format: Option<String>,
    pub alignment: Option<AlignmentStyle>,
    pub protection: Option<ProtectionStyle>,
}

/// Names each facet of [`CellStyle`] so they can be copied one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Font,
    Border,
    Fill,
    NumberFormat,
    Alignment,
    Protection,
}

impl Facet {
    pub const ALL: [Facet; 6] = [
        Facet::Font,
        Facet::Border,
        Facet::Fill,
        Facet::NumberFormat,
        Facet::Alignment,
        Facet::Protection,
    ];

    pub fn feature(&self) -> Feature {
        match self {
            Facet::Font => Feature::Font,
            Facet::Border => Feature::Border,
            Facet::Fill => Feature::Fill,
            Facet::NumberFormat => Feature::NumberFormat,
            Facet::Alignment => Feature::Alignment,
            Facet::Protection => Feature::Protection,
        }
    }

    pub fn is_present(&self, style: &CellStyle) -> bool {
        match self {
            Facet::Font => style.font.is_some(),
            Facet::Border => style.border.is_some(),
            Facet::Fill => style.fill.is_some(),
            Facet::NumberFormat => style.number_format.is_some(),
            Facet::Alignment => style.alignment.is_some(),
            Facet::Protection => style.protection.is_some(),
        }
    }

    /// Copy this facet from `source` into `target` if present and valid.
    ///
    /// Returns `Ok(false)` when the source has nothing to copy. On error the
    /// target facet is left untouched.
    pub fn copy(&self, source: &CellStyle, target: &mut CellStyle) -> Result<bool, MergeError> {
        let checked = |result: Result<(), String>| {
            result.map_err(|message| MergeError::feature(self.feature(), message))
        };

        match self {
            Facet::Font => {
                let Some(font) = &source.font else { return Ok(false) };
                checked(font.validate())?;
                target.font = Some(font.clone());
            }
            Facet::Border => {
                let Some(border) = &source.border else { return Ok(false) };
                checked(border.validate())?;
                target.border = Some(border.clone());
            }
            Facet::Fill => {
                let Some(fill) = &source.fill else { return Ok(false) };
                checked(fill.validate())?;
                target.fill = Some(fill.clone());
            }
            Facet::NumberFormat => {
                let Some(code) = &source.number_format else { return Ok(false) };
                checked(validate_number_format(code))?;
                target.number_format = Some(code.clone());
            }
            Facet::Alignment => {
                let Some(alignment) = &source.alignment else { return Ok(false) };
                checked(alignment.validate())?;
                target.alignment = Some(alignment.clone());
            }
            Facet::Protection => {
                let Some(protection) = source.protection else { return Ok(false) };
                target.protection = Some(protection);
            }
        }

        Ok(true)
    }
}

// ==================== Differential Styles ====================

/// Formatting overrides applied while a conditional-format rule matches
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DifferentialStyle {
    pub font: Option<FontStyle>,
    pub fill: Option<FillStyle>,
    pub border: Option<BorderStyle>,
    pub number_format: Option<String>,
}

impl DifferentialStyle {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(font) = &self.font {
            font.validate()?;
        }
        if let Some(fill) = &self.fill {
            fill.validate()?;
        }
        if let Some(border) = &self.border {
            border.validate()?;
        }
        if let Some(code) = &self.number_format {
            validate_number_format(code)?;
        }
        Ok(())
    }
}

/// Append-only, index-addressed list of differential styles owned by a document.
///
/// Entries are never removed or deduplicated, so an index handed out once stays
/// valid for the life of the document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DifferentialStyles {
    entries: Vec<DifferentialStyle>,
}

impl DifferentialStyles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a style and return its index
    pub fn push(&mut self, style: DifferentialStyle) -> usize {
        self.entries.push(style);
        self.entries.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&DifferentialStyle> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DifferentialStyle> {
        self.entries.iter()
    }
}
