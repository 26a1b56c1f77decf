// 🧭 Column resolution - find "code" and "rate" columns despite header drift
//
// Ranked policy: exact header → substring → fixed position.
// The result says which rule fired so callers can tell a real match from
// a positional guess.

use serde::{Deserialize, Serialize};

// ============================================================================
// ALIASES
// ============================================================================

/// Names a semantic column is known by
#[derive(Debug, Clone, Copy)]
pub struct ColumnAliases {
    /// Whole-header matches, compared after trimming (ASCII case-insensitive)
    pub exact: &'static [&'static str],
    /// Fragments searched for inside the header
    pub substrings: &'static [&'static str],
}

pub const CODE_ALIASES: ColumnAliases = ColumnAliases {
    exact: &["基金代码", "证券代码", "代码", "fund_code", "code"],
    substrings: &["代码", "code"],
};

pub const RATE_ALIASES: ColumnAliases = ColumnAliases {
    exact: &["折算率", "折算率(%)", "折算率（%）", "conversion_rate", "rate"],
    substrings: &["折算率", "rate"],
};

pub const NAME_ALIASES: ColumnAliases = ColumnAliases {
    exact: &["基金简称", "基金名称", "证券简称", "简称", "fund_name", "name"],
    substrings: &["简称", "名称", "name"],
};

// ============================================================================
// RESOLUTION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolvedBy {
    ExactName,
    Substring,
    /// No header matched; index chosen by position
    Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnResolution {
    pub index: usize,
    /// Header text at `index`, if the sheet has one there
    pub header: Option<String>,
    pub resolved_by: ResolvedBy,
}

impl ColumnResolution {
    pub fn is_fallback(&self) -> bool {
        self.resolved_by == ResolvedBy::Position
    }
}

fn normalize(header: &str) -> String {
    header.trim().to_lowercase()
}

/// Resolve one column by name only
pub fn find_by_name(headers: &[String], aliases: &ColumnAliases) -> Option<ColumnResolution> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize(h)).collect();

    let exact = aliases.exact.iter().find_map(|alias| {
        let alias = normalize(alias);
        normalized.iter().position(|h| *h == alias)
    });
    if let Some(index) = exact {
        return Some(ColumnResolution {
            index,
            header: Some(headers[index].clone()),
            resolved_by: ResolvedBy::ExactName,
        });
    }

    let partial = aliases.substrings.iter().find_map(|fragment| {
        let fragment = normalize(fragment);
        normalized.iter().position(|h| h.contains(&fragment))
    });
    partial.map(|index| ColumnResolution {
        index,
        header: Some(headers[index].clone()),
        resolved_by: ResolvedBy::Substring,
    })
}

/// Resolve by name, falling back to `fallback_index`
pub fn resolve_column(
    headers: &[String],
    aliases: &ColumnAliases,
    fallback_index: usize,
) -> ColumnResolution {
    find_by_name(headers, aliases).unwrap_or_else(|| ColumnResolution {
        index: fallback_index,
        header: headers.get(fallback_index).cloned(),
        resolved_by: ResolvedBy::Position,
    })
}

/// Positional rate guess: third column when there are at least three, else second
pub fn rate_fallback_index(column_count: usize) -> usize {
    if column_count >= 3 {
        2
    } else {
        1
    }
}
