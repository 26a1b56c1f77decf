// 🏗️ Parser Framework - one parser per exchange layout
//
// Shanghai and Shenzhen publish the same facts (fund code → collateral
// conversion rate) in different shapes:
//   - Shanghai: 2 title rows before the header, rate already a percentage (85)
//   - Shenzhen: 4 title rows before the header, rate as a fraction (0.85)

use crate::columns::{
    rate_fallback_index, resolve_column, ColumnResolution, CODE_ALIASES, RATE_ALIASES,
};
use crate::error::{DecodeAttempt, ReadError};
use crate::sheet::{DecoderChain, HeaderedSheet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

// ============================================================================
// CORE TYPES
// ============================================================================

/// Exchange - which venue published the file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
}

impl Exchange {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            Exchange::Shanghai => "Shanghai Stock Exchange",
            Exchange::Shenzhen => "Shenzhen Stock Exchange",
        }
    }

    /// Short code for internal use
    pub fn code(&self) -> &str {
        match self {
            Exchange::Shanghai => "SSE",
            Exchange::Shenzhen => "SZSE",
        }
    }

    /// Rows above the header row
    pub fn header_offset(&self) -> usize {
        match self {
            Exchange::Shanghai => 2,
            Exchange::Shenzhen => 4,
        }
    }

    /// Multiplier that brings the published rate onto the percentage scale
    pub fn rate_scale(&self) -> f64 {
        match self {
            Exchange::Shanghai => 1.0,
            Exchange::Shenzhen => 100.0,
        }
    }
}

/// Default filename markers for Shenzhen files
pub const DEFAULT_SHENZHEN_MARKERS: &[&str] = &["深圳", "深交所", "深市", "szse", "shenzhen"];

/// Detect exchange from filename
///
/// # Strategy:
/// 1. Any Shenzhen marker in the file name (case-insensitive) → Shenzhen
/// 2. Everything else is treated as Shanghai
///
/// # Examples:
/// ```
/// use etf_pledge_tracker::{detect_exchange, Exchange};
/// use std::path::Path;
///
/// let markers = vec!["深交所".to_string()];
/// assert_eq!(detect_exchange(Path::new("深交所_20251124.xls"), &markers), Exchange::Shenzhen);
/// assert_eq!(detect_exchange(Path::new("上交所_20251124.xls"), &markers), Exchange::Shanghai);
/// ```
pub fn detect_exchange(file_path: &Path, shenzhen_markers: &[String]) -> Exchange {
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let is_shenzhen = shenzhen_markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .any(|m| filename.contains(&m));

    if is_shenzhen {
        Exchange::Shenzhen
    } else {
        Exchange::Shanghai
    }
}

/// One cleaned data row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub code: i64,
    /// Rate on the percentage scale, rounded; `None` when the cell was not numeric
    pub rate: Option<i64>,
    /// 1-based row number below the header
    pub row_number: usize,
}

/// Output of parsing one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSheet {
    pub exchange: Exchange,
    pub source_file: String,
    pub decoder: String,
    pub skipped_decoders: Vec<String>,
    pub code_column: ColumnResolution,
    pub rate_column: ColumnResolution,
    /// Cleaned rows in file order
    pub records: Vec<RateRecord>,
    /// Rows dropped because the code was not a number
    pub dropped_rows: usize,
}

impl RateSheet {
    /// code → rate; a code repeated within the file keeps its last row
    pub fn rate_map(&self) -> BTreeMap<i64, Option<i64>> {
        self.records.iter().map(|r| (r.code, r.rate)).collect()
    }

    pub fn used_positional_fallback(&self) -> bool {
        self.code_column.is_fallback() || self.rate_column.is_fallback()
    }
}

// ============================================================================
// PARSER TRAIT
// ============================================================================

/// ExchangeParser - one implementation per exchange layout
pub trait ExchangeParser: Send + Sync {
    /// Read and clean one file
    fn parse(&self, file_path: &Path) -> Result<RateSheet, ReadError>;

    /// Get the exchange this parser handles
    fn exchange(&self) -> Exchange;
}

/// Get appropriate parser for an exchange
pub fn get_parser(exchange: Exchange) -> Box<dyn ExchangeParser> {
    match exchange {
        Exchange::Shanghai => Box::new(ShanghaiParser::new()),
        Exchange::Shenzhen => Box::new(ShenzhenParser::new()),
    }
}

/// Round half to even, the way the upstream spreadsheets are rounded
pub fn round_rate(value: f64) -> i64 {
    value.round_ties_even() as i64
}

/// Shared cleaning for both layouts
pub fn clean_rows(
    sheet: &HeaderedSheet,
    exchange: Exchange,
) -> (ColumnResolution, ColumnResolution, Vec<RateRecord>, usize) {
    let code_column = resolve_column(&sheet.headers, &CODE_ALIASES, 0);
    let rate_column = resolve_column(
        &sheet.headers,
        &RATE_ALIASES,
        rate_fallback_index(sheet.column_count()),
    );

    let scale = exchange.rate_scale();
    let mut records = Vec::with_capacity(sheet.rows.len());
    let mut dropped_rows = 0;

    for row in 0..sheet.rows.len() {
        let Some(code) = sheet.cell(row, code_column.index).as_code() else {
            dropped_rows += 1;
            continue;
        };

        let rate = sheet
            .cell(row, rate_column.index)
            .as_f64()
            .map(|r| round_rate(r * scale));

        records.push(RateRecord {
            code,
            rate,
            row_number: row + 1,
        });
    }

    (code_column, rate_column, records, dropped_rows)
}

fn parse_with(
    chain: &DecoderChain,
    exchange: Exchange,
    file_path: &Path,
) -> Result<RateSheet, ReadError> {
    let decoded = chain.read_path(file_path, exchange.header_offset())?;
    let (code_column, rate_column, records, dropped_rows) = clean_rows(&decoded.sheet, exchange);

    let source_file = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.display().to_string());

    for (label, column) in [("code", &code_column), ("rate", &rate_column)] {
        if column.is_fallback() {
            warn!(
                file = %source_file,
                column = label,
                index = column.index,
                header = column.header.as_deref().unwrap_or(""),
                "no header matched; using positional column"
            );
        }
    }

    debug!(
        file = %source_file,
        exchange = exchange.code(),
        decoder = decoded.decoder,
        rows = records.len(),
        dropped = dropped_rows,
        "parsed rate sheet"
    );

    Ok(RateSheet {
        exchange,
        source_file,
        decoder: decoded.decoder.to_string(),
        skipped_decoders: decoded
            .failed_attempts
            .iter()
            .map(DecodeAttempt::to_string)
            .collect(),
        code_column,
        rate_column,
        records,
        dropped_rows,
    })
}

// ============================================================================
// PARSERS
// ============================================================================

/// Shanghai layout: header after 2 rows, rates already in percent
pub struct ShanghaiParser {
    chain: DecoderChain,
}

impl ShanghaiParser {
    pub fn new() -> Self {
        ShanghaiParser {
            chain: DecoderChain::standard(),
        }
    }
}

impl Default for ShanghaiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeParser for ShanghaiParser {
    fn parse(&self, file_path: &Path) -> Result<RateSheet, ReadError> {
        parse_with(&self.chain, Exchange::Shanghai, file_path)
    }

    fn exchange(&self) -> Exchange {
        Exchange::Shanghai
    }
}

/// Shenzhen layout: header after 4 rows, rates as fractions
pub struct ShenzhenParser {
    chain: DecoderChain,
}

impl ShenzhenParser {
    pub fn new() -> Self {
        ShenzhenParser {
            chain: DecoderChain::standard(),
        }
    }
}

impl Default for ShenzhenParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeParser for ShenzhenParser {
    fn parse(&self, file_path: &Path) -> Result<RateSheet, ReadError> {
        parse_with(&self.chain, Exchange::Shenzhen, file_path)
    }

    fn exchange(&self) -> Exchange {
        Exchange::Shenzhen
    }
}

// ============================================================================
// TESTS
// ============================================================================
