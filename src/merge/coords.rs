use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest row number a worksheet can address
pub const MAX_ROW: u32 = 1_048_576;
/// Largest column number a worksheet can address (XFD)
pub const MAX_COL: u32 = 16_384;

/// Convert a 1-based column number to its letter form (1 -> A, 27 -> AA)
pub fn column_letter(col: u32) -> String {
    let mut result = String::new();
    let mut n = col;

    while n > 0 {
        n -= 1;
        let c = (b'A' + (n % 26) as u8) as char;
        result.insert(0, c);
        n /= 26;
    }

    result
}

/// Convert column letters to a 1-based column number (A -> 1, AA -> 27)
pub fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }

    let mut n: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        n = n * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }

    (n <= MAX_COL).then_some(n)
}

/// Format a 1-based (row, col) pair as an A1 reference
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", column_letter(col), row)
}

/// Parse an A1 reference (absolute markers allowed) into 1-based (row, col)
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let cleaned: String = reference.trim().chars().filter(|c| *c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);

    let col = column_number(letters)?;
    let row: u32 = digits.parse().ok()?;

    if row == 0 || row > MAX_ROW {
        return None;
    }

    Some((row, col))
}

/// Rectangular block of cells, 1-based and inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u32,
    pub last_row: u32,
    pub last_col: u32,
}

impl CellRange {
    pub fn new(first_row: u32, first_col: u32, last_row: u32, last_col: u32) -> Self {
        CellRange {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.first_row..=self.last_row).contains(&row)
            && (self.first_col..=self.last_col).contains(&col)
    }

    pub fn overlaps(&self, other: &CellRange) -> bool {
        self.first_row <= other.last_row
            && other.first_row <= self.last_row
            && self.first_col <= other.last_col
            && other.first_col <= self.last_col
    }

    pub fn is_single_cell(&self) -> bool {
        self.first_row == self.last_row && self.first_col == self.last_col
    }

    /// Top-left cell, the one that keeps its value when the range is merged
    pub fn anchor(&self) -> (u32, u32) {
        (self.first_row, self.first_col)
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single_cell() {
            write!(f, "{}", cell_ref(self.first_row, self.first_col))
        } else {
            write!(
                f,
                "{}:{}",
                cell_ref(self.first_row, self.first_col),
                cell_ref(self.last_row, self.last_col)
            )
        }
    }
}

impl FromStr for CellRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = match s.trim().split_once(':') {
            Some((start, end)) => (start, end),
            None => (s, s),
        };

        let (r1, c1) = parse_cell_ref(start).ok_or_else(|| format!("Invalid range: {}", s))?;
        let (r2, c2) = parse_cell_ref(end).ok_or_else(|| format!("Invalid range: {}", s))?;

        Ok(CellRange::new(r1, c1, r2, c2))
    }
}

/// Parse a space-separated list of ranges (the `sqref` form)
pub fn parse_sqref(sqref: &str) -> Result<Vec<CellRange>, String> {
    let ranges = sqref
        .split_whitespace()
        .map(CellRange::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if ranges.is_empty() {
        return Err("Empty range reference".to_string());
    }

    Ok(ranges)
}
