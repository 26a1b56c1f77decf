// 💾 Table store - fund list template + persisted accumulator table
//
// Both files are plain one-sheet tables with a header row. The format is
// picked from the extension: `.csv` is written with the csv crate, anything
// else as an xlsx workbook. Reading goes through the same decoder chain as
// the exchange files, so a table hand-edited and re-saved as GBK text still
// loads.

use crate::columns::{resolve_column, CODE_ALIASES, NAME_ALIASES};
use crate::dates::TradeDate;
use crate::error::PipelineError;
use crate::parser::round_rate;
use crate::sheet::{DecoderChain, HeaderedSheet};
use crate::table::{AccumulatorTable, DateColumn, ExtraColumn, FundRecord};
use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Xlsx,
}

impl TableFormat {
    pub fn for_path(path: &Path) -> Self {
        let is_csv = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv {
            TableFormat::Csv
        } else {
            TableFormat::Xlsx
        }
    }
}

fn read_sheet(path: &Path) -> Result<HeaderedSheet> {
    let decoded = DecoderChain::standard()
        .read_path(path, 0)
        .with_context(|| format!("Failed to read table: {}", path.display()))?;
    Ok(decoded.sheet)
}

/// Identity columns of a sheet; name falls back to the column after the code
fn read_funds(sheet: &HeaderedSheet) -> (Vec<FundRecord>, usize, usize) {
    let code_col = resolve_column(&sheet.headers, &CODE_ALIASES, 0);
    let name_col = resolve_column(&sheet.headers, &NAME_ALIASES, code_col.index + 1);

    let funds = (0..sheet.rows.len())
        .map(|row| FundRecord {
            code: sheet.cell(row, code_col.index).as_code(),
            name: sheet.cell(row, name_col.index).as_text(),
        })
        .collect();

    (funds, code_col.index, name_col.index)
}

// ============================================================================
// TEMPLATE
// ============================================================================

/// Load the fund list (code, name) used to bootstrap the table.
///
/// A missing file is the one fatal condition of a run and comes back as
/// [`PipelineError::TemplateMissing`].
pub fn load_template(path: &Path) -> Result<Vec<FundRecord>> {
    if !path.is_file() {
        return Err(PipelineError::TemplateMissing(path.to_path_buf()).into());
    }

    let sheet = read_sheet(path)?;
    let (funds, _, _) = read_funds(&sheet);

    let funds: Vec<FundRecord> = funds
        .into_iter()
        .filter(|f| f.code.is_some() || !f.name.is_empty())
        .collect();

    let blank_codes = funds.iter().filter(|f| f.code.is_none()).count();
    if blank_codes > 0 {
        warn!(
            template = %path.display(),
            count = blank_codes,
            "template rows without a numeric fund code"
        );
    }

    info!(template = %path.display(), funds = funds.len(), "loaded fund list");
    Ok(funds)
}

// ============================================================================
// ACCUMULATOR TABLE
// ============================================================================

/// Load the persisted table, or `None` when there is none yet.
///
/// Codes are coerced back to integers (`511120.0` → `511120`). Columns whose
/// header is not a date (and repeats of a date already seen) are kept as
/// text and written back unchanged.
pub fn load_table(path: &Path) -> Result<Option<AccumulatorTable>> {
    if !path.exists() {
        return Ok(None);
    }

    let sheet = read_sheet(path)?;
    let (funds, code_idx, name_idx) = read_funds(&sheet);

    let mut columns: Vec<DateColumn> = Vec::new();
    let mut extras = Vec::new();
    for (idx, header) in sheet.headers.iter().enumerate() {
        if idx == code_idx || idx == name_idx {
            continue;
        }

        let date = TradeDate::parse_header(header)
            .filter(|date| !columns.iter().any(|c| &c.date == date));
        match date {
            Some(date) => {
                let values = (0..sheet.rows.len())
                    .map(|row| sheet.cell(row, idx).as_f64().map(round_rate))
                    .collect();
                columns.push(DateColumn { date, values });
            }
            None => {
                let values: Vec<String> = (0..sheet.rows.len())
                    .map(|row| sheet.cell(row, idx).as_text())
                    .collect();
                if header.is_empty() && values.iter().all(String::is_empty) {
                    continue;
                }
                warn!(
                    table = %path.display(),
                    header = %header,
                    "keeping non-date column as text"
                );
                extras.push(ExtraColumn {
                    header: header.clone(),
                    values,
                });
            }
        }
    }

    let table = AccumulatorTable::from_parts(funds, columns)
        .and_then(|table| table.with_extra_columns(extras))
        .with_context(|| format!("Inconsistent table: {}", path.display()))?;

    info!(
        table = %path.display(),
        funds = table.funds().len(),
        dates = table.date_columns().len(),
        extras = table.extra_columns().len(),
        "loaded accumulated table"
    );
    Ok(Some(table))
}

/// Write the table to `path`, replacing it only once the write succeeded
pub fn save_table(path: &Path, table: &AccumulatorTable) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let tmp = temp_sibling(path);
    match TableFormat::for_path(path) {
        TableFormat::Csv => write_csv(&tmp, table)?,
        TableFormat::Xlsx => write_xlsx(&tmp, table)?,
    }

    fs::rename(&tmp, path).with_context(|| {
        format!("Failed to move {} into place at {}", tmp.display(), path.display())
    })?;

    info!(
        table = %path.display(),
        funds = table.funds().len(),
        dates = table.date_columns().len(),
        "saved accumulated table"
    );
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "table".into());
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_csv(path: &Path, table: &AccumulatorTable) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(table.header())?;
    for (row, fund) in table.funds().iter().enumerate() {
        let mut record = vec![
            fund.code.map(|c| c.to_string()).unwrap_or_default(),
            fund.name.clone(),
        ];
        record.extend(table.extra_columns().iter().map(|e| e.values[row].clone()));
        record.extend(
            table
                .date_columns()
                .iter()
                .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(path: &Path, table: &AccumulatorTable) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();

    for (col, header) in table.header().iter().enumerate() {
        let col = u16::try_from(col).context("too many columns for a worksheet")?;
        sheet.write_string(0, col, header.as_str())?;
    }

    for (idx, fund) in table.funds().iter().enumerate() {
        let row = u32::try_from(idx + 1).context("too many rows for a worksheet")?;
        if let Some(code) = fund.code {
            sheet.write_number(row, 0, code as f64)?;
        }
        if !fund.name.is_empty() {
            sheet.write_string(row, 1, fund.name.as_str())?;
        }

        let extra_count = table.extra_columns().len();
        for (offset, extra) in table.extra_columns().iter().enumerate() {
            let text = &extra.values[idx];
            if !text.is_empty() {
                let col = u16::try_from(offset + 2).context("too many columns for a worksheet")?;
                sheet.write_string(row, col, text.as_str())?;
            }
        }

        for (offset, column) in table.date_columns().iter().enumerate() {
            if let Some(value) = column.values[idx] {
                let col = u16::try_from(offset + 2 + extra_count)
                    .context("too many columns for a worksheet")?;
                sheet.write_number(row, col, value as f64)?;
            }
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
