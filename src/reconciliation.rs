// ⚖️ Reconciliation Engine - per-date merge into the accumulated table
//
// For each trading day:
//   files (ordered by precedence) → code→rate maps → one combined map
//   combined map projected onto fund rows → that day's column, replaced wholesale
//
// A file that cannot be read is skipped; the rest of its date still merges.

use crate::dates::TradeDate;
use crate::grouper::DateGroups;
use crate::parser::{detect_exchange, get_parser, Exchange, DEFAULT_SHENZHEN_MARKERS};
use crate::table::AccumulatorTable;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// MERGE PRECEDENCE
// ============================================================================

/// Which file wins when one fund code shows up in several files of a day.
///
/// Files are merged in order and a later file overwrites an earlier one;
/// the policy only decides the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePrecedence {
    /// Plain file-name order
    #[default]
    FileName,
    /// Shenzhen files first, Shanghai files last (Shanghai wins)
    PrimaryWins,
    /// Shanghai files first, Shenzhen files last (Shenzhen wins)
    SecondaryWins,
}

impl MergePrecedence {
    fn rank(&self, exchange: Exchange) -> u8 {
        match (self, exchange) {
            (MergePrecedence::FileName, _) => 0,
            (MergePrecedence::PrimaryWins, Exchange::Shenzhen) => 0,
            (MergePrecedence::PrimaryWins, Exchange::Shanghai) => 1,
            (MergePrecedence::SecondaryWins, Exchange::Shanghai) => 0,
            (MergePrecedence::SecondaryWins, Exchange::Shenzhen) => 1,
        }
    }
}

// ============================================================================
// REPORTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileStatus {
    Merged {
        rows: usize,
        decoder: String,
        positional_fallback: bool,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub file: String,
    pub exchange: Exchange,
    pub status: FileStatus,
}

impl FileOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileStatus::Failed { .. })
    }
}

/// What happened to one date's column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMergeReport {
    pub date: TradeDate,
    /// In merge order
    pub files: Vec<FileOutcome>,
    /// An earlier run already had this date
    pub replaced_existing: bool,
    /// Funds that received a value
    pub matched: usize,
    /// Codes in the source files with no fund row in the table
    pub unmatched_codes: Vec<i64>,
}

impl DateMergeReport {
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_failed()).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {} files ({} failed), {} funds matched, {} codes not in fund list{}",
            self.date,
            self.files.len(),
            self.failed_files(),
            self.matched,
            self.unmatched_codes.len(),
            if self.replaced_existing {
                ", replaced existing column"
            } else {
                ""
            }
        )
    }
}

/// Combined rates for one date before projection
#[derive(Debug, Clone, PartialEq)]
pub struct CombinedRates {
    pub rates: BTreeMap<i64, Option<i64>>,
    pub files: Vec<FileOutcome>,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    /// Order of files within a date
    pub precedence: MergePrecedence,

    /// Filename fragments marking Shenzhen files
    pub shenzhen_markers: Vec<String>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            precedence: MergePrecedence::default(),
            shenzhen_markers: DEFAULT_SHENZHEN_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    pub fn with_settings(precedence: MergePrecedence, shenzhen_markers: Vec<String>) -> Self {
        ReconciliationEngine {
            precedence,
            shenzhen_markers,
        }
    }

    pub fn exchange_for(&self, path: &Path) -> Exchange {
        detect_exchange(path, &self.shenzhen_markers)
    }

    /// Files of one date in merge order (stable: file name breaks ties)
    pub fn order_files(&self, files: &[PathBuf]) -> Vec<(PathBuf, Exchange)> {
        let mut ordered: Vec<(PathBuf, Exchange)> = files
            .iter()
            .map(|p| (p.clone(), self.exchange_for(p)))
            .collect();

        ordered.sort_by(|(pa, ea), (pb, eb)| {
            self.precedence
                .rank(*ea)
                .cmp(&self.precedence.rank(*eb))
                .then_with(|| pa.file_name().cmp(&pb.file_name()))
        });
        ordered
    }

    /// Parse every file of a date and fold them into one map (later wins)
    pub fn combine(&self, files: &[PathBuf]) -> CombinedRates {
        let mut rates = BTreeMap::new();
        let mut outcomes = Vec::with_capacity(files.len());

        for (path, exchange) in self.order_files(files) {
            let file = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());

            match get_parser(exchange).parse(&path) {
                Ok(sheet) => {
                    let map = sheet.rate_map();
                    outcomes.push(FileOutcome {
                        file,
                        exchange,
                        status: FileStatus::Merged {
                            rows: map.len(),
                            decoder: sheet.decoder.clone(),
                            positional_fallback: sheet.used_positional_fallback(),
                        },
                    });
                    rates.extend(map);
                }
                Err(err) => {
                    warn!(
                        file = %file,
                        exchange = exchange.code(),
                        error = %err,
                        "skipping unreadable file; its codes stay empty for this date"
                    );
                    outcomes.push(FileOutcome {
                        file,
                        exchange,
                        status: FileStatus::Failed {
                            reason: err.to_string(),
                        },
                    });
                }
            }
        }

        CombinedRates {
            rates,
            files: outcomes,
        }
    }

    /// Merge one date into the table, replacing that date's column
    pub fn merge_date(
        &self,
        date: &TradeDate,
        files: &[PathBuf],
        table: &mut AccumulatorTable,
    ) -> Result<DateMergeReport> {
        let combined = self.combine(files);

        let values = table.project(&combined.rates);
        let matched = values.iter().filter(|v| v.is_some()).count();

        let known: BTreeSet<i64> = table.funds().iter().filter_map(|f| f.code).collect();
        let unmatched_codes: Vec<i64> = combined
            .rates
            .keys()
            .filter(|code| !known.contains(code))
            .copied()
            .collect();

        let replaced_existing = table.upsert_column(date.clone(), values)?;

        let report = DateMergeReport {
            date: date.clone(),
            files: combined.files,
            replaced_existing,
            matched,
            unmatched_codes,
        };
        info!("{}", report.summary());
        Ok(report)
    }

    /// Apply every date group, oldest first
    pub fn reconcile(
        &self,
        table: &mut AccumulatorTable,
        groups: &DateGroups,
    ) -> Result<Vec<DateMergeReport>> {
        groups
            .iter()
            .map(|(date, files)| self.merge_date(date, files, table))
            .collect()
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
