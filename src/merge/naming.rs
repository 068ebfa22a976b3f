use std::collections::HashSet;

use super::model::{FORBIDDEN_SHEET_CHARS, MAX_SHEET_NAME_LEN};

/// Longest table name a workbook accepts
pub const MAX_TABLE_NAME_LEN: usize = 255;

const FALLBACK_NAME: &str = "Sheet";

/// Which namespace a name is allocated in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameScope {
    Sheet,
    Table,
}

/// Produces unique names that satisfy a scope's length and character rules.
///
/// Allocation is deterministic: the same request against the same used-set
/// always yields the same name. Comparison against the used-set ignores ASCII
/// case, matching how workbooks resolve sheet and table names.
#[derive(Debug, Clone, Copy)]
pub struct NameAllocator {
    scope: NameScope,
    max_len: usize,
}

impl NameAllocator {
    pub const fn sheets() -> Self {
        NameAllocator {
            scope: NameScope::Sheet,
            max_len: MAX_SHEET_NAME_LEN,
        }
    }

    pub const fn tables() -> Self {
        NameAllocator {
            scope: NameScope::Table,
            max_len: MAX_TABLE_NAME_LEN,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Replace every character the scope does not allow with `_`
    pub fn sanitize(&self, raw: &str) -> String {
        match self.scope {
            NameScope::Sheet => raw
                .chars()
                .map(|c| if FORBIDDEN_SHEET_CHARS.contains(&c) { '_' } else { c })
                .collect(),
            NameScope::Table => {
                let cleaned: String = raw
                    .chars()
                    .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
                    .collect();
                match cleaned.chars().next() {
                    Some(first) if first.is_alphabetic() || first == '_' => cleaned,
                    _ => format!("_{}", cleaned),
                }
            }
        }
    }

    /// Sanitized `{prefix}{name}` cut to the length limit, keeping the prefix
    pub fn base_name(&self, prefix: &str, name: &str) -> String {
        let prefix = self.sanitize_prefix(prefix);
        let name = match self.scope {
            NameScope::Sheet => self.sanitize(name),
            // The prefix already decided the leading character
            NameScope::Table if !prefix.is_empty() => name
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
                .collect(),
            NameScope::Table => self.sanitize(name),
        };

        let prefix_len = prefix.chars().count();
        let room = self.max_len.saturating_sub(prefix_len).max(1);
        let prefix: String = prefix.chars().take(self.max_len - 1).collect();
        let base = format!("{}{}", prefix, truncate(&name, room));

        if base.is_empty() {
            return FALLBACK_NAME.to_string();
        }
        match self.scope {
            NameScope::Sheet => replace_edge_apostrophes(&base),
            NameScope::Table => base,
        }
    }

    fn sanitize_prefix(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            return String::new();
        }
        self.sanitize(prefix)
    }

    /// Allocate a name for `{prefix}{name}` that is not in `used`.
    ///
    /// Collisions get a `_1`, `_2`, ... suffix; the base is shortened so the
    /// suffix always fits inside the length limit.
    pub fn allocate(&self, prefix: &str, name: &str, used: &HashSet<String>) -> String {
        let taken: HashSet<String> = used.iter().map(|n| n.to_lowercase()).collect();
        let base = self.base_name(prefix, name);

        if !taken.contains(&base.to_lowercase()) {
            return base;
        }

        let mut n: usize = 1;
        loop {
            let suffix = format!("_{}", n);
            let room = self.max_len.saturating_sub(suffix.len());
            let candidate = format!("{}{}", truncate(&base, room), suffix);

            // A base that already ends in `_n` can reproduce itself; skip it
            if candidate != base && !taken.contains(&candidate.to_lowercase()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Workbooks reject sheet names that start or end with an apostrophe
fn replace_edge_apostrophes(name: &str) -> String {
    let last = name.chars().count().saturating_sub(1);
    name.chars()
        .enumerate()
        .map(|(i, c)| if c == '\'' && (i == 0 || i == last) { '_' } else { c })
        .collect()
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
