// 📈 Summary builder - what the latest trading day looks like
//
// Read-side view of the table for the notifier: count and mean of the
// newest date's values, optionally a per-fund breakdown and a watch list.
// Pure; no I/O happens here.

use crate::dates::TradeDate;
use crate::table::AccumulatorTable;
use serde::{Deserialize, Serialize};

// ============================================================================
// OPTIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryOptions {
    /// Include one line per fund with a value
    pub list_rows: bool,
    /// Fund codes always reported, with or without a value
    pub watch_list: Vec<i64>,
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub code: Option<i64>,
    pub name: String,
    pub rate: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub code: i64,
    /// `None` when the code is not in the table at all
    pub name: Option<String>,
    pub rate: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    pub date: TradeDate,
    pub fund_count: usize,
    /// Funds with a value on `date`
    pub count: usize,
    /// Mean of those values, 2 decimals; `None` when `count` is 0
    pub mean: Option<f64>,
    pub rows: Vec<SummaryRow>,
    pub watch: Vec<WatchEntry>,
}

impl RateSummary {
    pub fn title(&self) -> String {
        format!("Bond ETF collateral rates {}", self.date)
    }

    pub fn summary(&self) -> String {
        match self.mean {
            Some(mean) => format!(
                "{}: {} of {} funds quoted, mean rate {:.2}",
                self.date, self.count, self.fund_count, mean
            ),
            None => format!(
                "{}: no fund quoted ({} funds listed)",
                self.date, self.fund_count
            ),
        }
    }

    /// Plain-text body handed to the notifier
    pub fn body(&self) -> String {
        let mut body = self.summary();

        if !self.rows.is_empty() {
            body.push_str("\n\n");
            for row in &self.rows {
                body.push_str(&format!("{}: {}\n", row.name, row.rate));
            }
        }

        if !self.watch.is_empty() {
            body.push_str("\nWatch list:\n");
            for entry in &self.watch {
                let name = entry.name.as_deref().unwrap_or("(not in fund list)");
                let rate = entry.rate.map_or_else(|| "-".to_string(), |r| r.to_string());
                body.push_str(&format!("{} {}: {}\n", entry.code, name, rate));
            }
        }

        body.trim_end().to_string()
    }
}

/// Round to 2 decimal places, ties to even like the per-fund rates
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

/// Summarize the newest date column; `None` when the table has no dates
pub fn build_summary(table: &AccumulatorTable, options: &SummaryOptions) -> Option<RateSummary> {
    let date = table.latest_date()?.clone();
    let column = table.column(&date)?;

    let present: Vec<(usize, i64)> = column
        .values
        .iter()
        .enumerate()
        .filter_map(|(row, v)| v.map(|rate| (row, rate)))
        .collect();

    let count = present.len();
    let mean = if count == 0 {
        None
    } else {
        let total: f64 = present.iter().map(|(_, rate)| *rate as f64).sum();
        Some(round2(total / count as f64))
    };

    let rows = if options.list_rows {
        present
            .iter()
            .map(|&(row, rate)| {
                let fund = &table.funds()[row];
                SummaryRow {
                    code: fund.code,
                    name: fund.name.clone(),
                    rate,
                }
            })
            .collect()
    } else {
        Vec::new()
    };

    let watch = options
        .watch_list
        .iter()
        .map(|&code| {
            let name = table
                .funds()
                .iter()
                .find(|f| f.code == Some(code))
                .map(|f| f.name.clone());
            WatchEntry {
                code,
                name,
                rate: table.value(code, &date),
            }
        })
        .collect();

    Some(RateSummary {
        date,
        fund_count: table.funds().len(),
        count,
        mean,
        rows,
        watch,
    })
}

// ============================================================================
// TESTS
// ============================================================================
