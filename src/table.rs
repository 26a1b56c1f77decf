// 📊 Accumulator table - one row per fund, one column per trading day
//
// Row identity comes from the fund list template and never changes.
// Date columns only ever change by wholesale replacement of the column
// for the date being (re)processed.

use crate::dates::TradeDate;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub const FUND_CODE_HEADER: &str = "fund_code";
pub const FUND_NAME_HEADER: &str = "fund_name";

// ============================================================================
// ROWS & COLUMNS
// ============================================================================

/// Identity row. `code` is nullable because template rows can be blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundRecord {
    pub code: Option<i64>,
    pub name: String,
}

impl FundRecord {
    pub fn new(code: i64, name: impl Into<String>) -> Self {
        FundRecord {
            code: Some(code),
            name: name.into(),
        }
    }
}

/// Values for one date, aligned with the table's fund rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateColumn {
    pub date: TradeDate,
    pub values: Vec<Option<i64>>,
}

impl DateColumn {
    pub fn non_null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// A persisted column that is neither identity nor a date (notes, tags).
/// Carried through every run untouched, as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraColumn {
    pub header: String,
    pub values: Vec<String>,
}

// ============================================================================
// COLUMN ORDER
// ============================================================================

/// Direction for date columns after the identity columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnOrder {
    /// Oldest date leftmost
    #[serde(alias = "asc")]
    Ascending,
    /// Newest date leftmost
    #[default]
    #[serde(alias = "desc")]
    Descending,
}

impl FromStr for ColumnOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "asc" | "ascending" => Ok(ColumnOrder::Ascending),
            "desc" | "descending" => Ok(ColumnOrder::Descending),
            other => Err(format!("unknown column order: {}", other)),
        }
    }
}

impl fmt::Display for ColumnOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnOrder::Ascending => f.write_str("ascending"),
            ColumnOrder::Descending => f.write_str("descending"),
        }
    }
}

// ============================================================================
// ACCUMULATOR TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorTable {
    funds: Vec<FundRecord>,
    extras: Vec<ExtraColumn>,
    columns: Vec<DateColumn>,
}

impl AccumulatorTable {
    /// Fresh table from the fund list: identity rows, no dates
    pub fn from_template(funds: Vec<FundRecord>) -> Self {
        AccumulatorTable {
            funds,
            extras: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Rebuild a persisted table; every column must match the row count
    pub fn from_parts(funds: Vec<FundRecord>, columns: Vec<DateColumn>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.values.len() != funds.len() {
                bail!(
                    "date column {} has {} values for {} funds",
                    column.date,
                    column.values.len(),
                    funds.len()
                );
            }
            if !seen.insert(column.date.clone()) {
                bail!("date column {} appears twice", column.date);
            }
        }
        Ok(AccumulatorTable {
            funds,
            extras: Vec::new(),
            columns,
        })
    }

    /// Attach non-date columns read back from a persisted table
    pub fn with_extra_columns(mut self, extras: Vec<ExtraColumn>) -> Result<Self> {
        for extra in &extras {
            if extra.values.len() != self.funds.len() {
                bail!(
                    "column {:?} has {} values for {} funds",
                    extra.header,
                    extra.values.len(),
                    self.funds.len()
                );
            }
        }
        self.extras = extras;
        Ok(self)
    }

    pub fn funds(&self) -> &[FundRecord] {
        &self.funds
    }

    pub fn extra_columns(&self) -> &[ExtraColumn] {
        &self.extras
    }

    pub fn date_columns(&self) -> &[DateColumn] {
        &self.columns
    }

    pub fn dates(&self) -> Vec<&TradeDate> {
        self.columns.iter().map(|c| &c.date).collect()
    }

    pub fn column(&self, date: &TradeDate) -> Option<&DateColumn> {
        self.columns.iter().find(|c| &c.date == date)
    }

    /// Newest date present, whatever the current column order
    pub fn latest_date(&self) -> Option<&TradeDate> {
        self.columns.iter().map(|c| &c.date).max()
    }

    /// Value for a fund code on a date (first row with that code)
    pub fn value(&self, code: i64, date: &TradeDate) -> Option<i64> {
        let row = self.funds.iter().position(|f| f.code == Some(code))?;
        self.column(date)?.values[row]
    }

    /// Project a code → rate mapping onto the fund rows.
    ///
    /// Funds missing from the mapping (or with a blank code) get no value.
    pub fn project(&self, rates: &BTreeMap<i64, Option<i64>>) -> Vec<Option<i64>> {
        self.funds
            .iter()
            .map(|fund| fund.code.and_then(|code| rates.get(&code).copied().flatten()))
            .collect()
    }

    /// Replace the column for `date` wholesale, or add it.
    ///
    /// Returns true when an existing column was overwritten. Other dates are
    /// never touched.
    pub fn upsert_column(&mut self, date: TradeDate, values: Vec<Option<i64>>) -> Result<bool> {
        if values.len() != self.funds.len() {
            bail!(
                "column {} has {} values for {} funds",
                date,
                values.len(),
                self.funds.len()
            );
        }

        if let Some(existing) = self.columns.iter_mut().find(|c| c.date == date) {
            existing.values = values;
            return Ok(true);
        }

        self.columns.push(DateColumn { date, values });
        Ok(false)
    }

    /// Append template funds whose code is not yet in the table.
    ///
    /// Existing rows keep their position; new rows get no value in any
    /// existing date column. Returns how many rows were added.
    pub fn append_missing_funds(&mut self, template: &[FundRecord]) -> usize {
        let mut known: HashSet<i64> = self.funds.iter().filter_map(|f| f.code).collect();
        let mut added = 0;

        for fund in template {
            let Some(code) = fund.code else { continue };
            if !known.insert(code) {
                continue;
            }
            self.funds.push(fund.clone());
            for column in &mut self.columns {
                column.values.push(None);
            }
            for extra in &mut self.extras {
                extra.values.push(String::new());
            }
            added += 1;
        }

        added
    }

    /// Canonical layout: identity columns, extra columns in their original
    /// order, then dates in `order`
    pub fn sort_columns(&mut self, order: ColumnOrder) {
        match order {
            ColumnOrder::Ascending => self.columns.sort_by(|a, b| a.date.cmp(&b.date)),
            ColumnOrder::Descending => self.columns.sort_by(|a, b| b.date.cmp(&a.date)),
        }
    }

    /// Header row as persisted
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![FUND_CODE_HEADER.to_string(), FUND_NAME_HEADER.to_string()];
        header.extend(self.extras.iter().map(|e| e.header.clone()));
        header.extend(self.columns.iter().map(|c| c.date.to_string()));
        header
    }
}

// ============================================================================
// TESTS
// ============================================================================
