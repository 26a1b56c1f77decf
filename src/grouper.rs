// 🗂️ Date grouper - input directory → files per trading day
//
// Shanghai and Shenzhen publish separate files for the same day; grouping
// by the date token lets one merge pass see both.

use crate::dates::{trade_date_for_path, TradeDate};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Extensions treated as spreadsheet-like input (compared case-insensitively)
pub const INPUT_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods", "csv", "tsv", "txt"];

/// Files for each date, dates ascending, files sorted by name within a date
pub type DateGroups = BTreeMap<TradeDate, Vec<PathBuf>>;

pub fn is_input_file(path: &Path) -> bool {
    let Some(ext) = path.extension() else {
        return false;
    };
    let ext = ext.to_string_lossy().to_lowercase();
    INPUT_EXTENSIONS.contains(&ext.as_str())
}

/// Scan `input_dir` and group input files by the date in their name.
///
/// A missing directory is created and yields no groups. Files without a
/// date token are skipped with a warning.
pub fn group_input_files(input_dir: &Path) -> Result<DateGroups> {
    if !input_dir.exists() {
        fs::create_dir_all(input_dir)
            .with_context(|| format!("Failed to create input dir: {}", input_dir.display()))?;
        info!(dir = %input_dir.display(), "input directory created; nothing to process");
        return Ok(DateGroups::new());
    }

    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to list input dir: {}", input_dir.display()))?;

    let mut groups = DateGroups::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to read entry in {}", input_dir.display()))?
            .path();

        if !path.is_file() || !is_input_file(&path) {
            continue;
        }

        // Spreadsheet lock files ("~$rates.xlsx") are never data
        if path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("~$"))
            .unwrap_or(false)
        {
            continue;
        }

        match trade_date_for_path(&path) {
            Some(date) => {
                if date.to_naive_date().is_none() {
                    warn!(
                        file = %path.display(),
                        date = %date,
                        "date token is not a calendar day; keeping it as written"
                    );
                }
                groups.entry(date).or_default().push(path);
            }
            None => warn!(file = %path.display(), "no 8-digit date in file name; skipping"),
        }
    }

    for files in groups.values_mut() {
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    }

    for (date, files) in &groups {
        info!(date = %date, files = files.len(), "found input files");
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), "x").unwrap();
    }

    #[test]
    fn test_missing_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("input");

        let groups = group_input_files(&input).unwrap();
        assert!(groups.is_empty());
        assert!(input.is_dir());
    }

    #[test]
    fn test_groups_by_date_ascending() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "上交所_20251124.xls");
        touch(dir.path(), "深交所_20251124.xlsx");
        touch(dir.path(), "上交所_20251121.xls");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "readme.md");
        touch(dir.path(), "~$上交所_20251124.xls");

        let groups = group_input_files(dir.path()).unwrap();
        let dates: Vec<_> = groups.keys().map(|d| d.as_str().to_string()).collect();
        assert_eq!(dates, vec!["2025/11/21", "2025/11/24"]);

        let day = &groups[&TradeDate::from_token("20251124").unwrap()];
        let names: Vec<_> = day
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["上交所_20251124.xls", "深交所_20251124.xlsx"]);
    }

    #[test]
    fn test_impossible_calendar_date_still_grouped() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "上交所_20251399.csv");

        let groups = group_input_files(dir.path()).unwrap();
        let date = groups.keys().next().unwrap();
        assert_eq!(date.as_str(), "2025/13/99");
        assert!(date.to_naive_date().is_none());
    }

    #[test]
    fn test_is_input_file() {
        assert!(is_input_file(Path::new("a_20251124.XLSX")));
        assert!(is_input_file(Path::new("a_20251124.csv")));
        assert!(!is_input_file(Path::new("a_20251124.pdf")));
        assert!(!is_input_file(Path::new("no_extension")));
    }
}
