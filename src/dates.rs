// 📅 Trade dates - Filename date token → canonical column key
//
// Exchange files carry their trading day as an 8-digit token somewhere in
// the file name ("担保品折算率20251124.xls", "szse_20251124_rates.csv").
// The canonical key is "YYYY/MM/DD"; it doubles as the table header.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

fn date_token() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"[0-9]{8}").expect("static regex"))
}

// ============================================================================
// TRADE DATE
// ============================================================================

/// Canonical trading-day key (`YYYY/MM/DD`)
///
/// Ordering is lexical, which matches chronological order for the fixed
/// width format. No calendar validation happens on construction: a token
/// like `20251399` still produces `2025/13/99`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TradeDate(String);

impl TradeDate {
    /// Build from an 8-digit token by slicing 0..4, 4..6, 6..8
    pub fn from_token(token: &str) -> Option<Self> {
        if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(TradeDate(format!(
            "{}/{}/{}",
            &token[0..4],
            &token[4..6],
            &token[6..8]
        )))
    }

    /// Parse a persisted column header back into a date key.
    ///
    /// Accepts the canonical `YYYY/MM/DD` plus `YYYY-MM-DD` and a bare
    /// `YYYYMMDD`, which is what a spreadsheet round-trip tends to produce.
    pub fn parse_header(header: &str) -> Option<Self> {
        let header = header.trim();
        let digits: String = header.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() != 8 {
            return None;
        }

        let well_formed = match header.len() {
            8 => true,
            10 => {
                let bytes = header.as_bytes();
                let sep = bytes[4];
                (sep == b'/' || sep == b'-') && bytes[7] == sep
            }
            _ => false,
        };

        if well_formed {
            Self::from_token(&digits)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Calendar date, when the token happens to be a real day
    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.0, "%Y/%m/%d").ok()
    }
}

impl fmt::Display for TradeDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract the trading date from a file name.
///
/// The first 8-digit window wins; a longer run such as a timestamp
/// `20251124093000` yields its leading eight digits. Returns `None` when the
/// name carries no such run - callers decide whether that skips the file.
///
/// # Examples:
/// ```
/// use etf_pledge_tracker::extract_trade_date;
///
/// let date = extract_trade_date("上交所_20251124.xls").unwrap();
/// assert_eq!(date.as_str(), "2025/11/24");
/// assert!(extract_trade_date("fund_list.xlsx").is_none());
/// ```
pub fn extract_trade_date(file_name: &str) -> Option<TradeDate> {
    let m = date_token().find(file_name)?;
    TradeDate::from_token(m.as_str())
}

/// Same as [`extract_trade_date`] but looks only at the final path component
pub fn trade_date_for_path(path: &Path) -> Option<TradeDate> {
    let name = path.file_name()?.to_string_lossy();
    extract_trade_date(&name)
}
