// 📄 Sheet decoding - bytes → rows of cells
//
// Exchange downloads are inconsistent: a ".xls" may be a real BIFF workbook,
// an xlsx, or tab-separated text in GBK wearing the wrong extension. Reading
// goes through an ordered chain of named decoders; the first one that yields
// a sheet with a header row at the requested offset wins, and every earlier
// failure is kept for diagnostics.

use crate::error::{DecodeAttempt, ReadError};
use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_auto_from_rs, Data, Reader};
use encoding_rs::Encoding;
use std::io::Cursor;
use std::path::Path;

// ============================================================================
// CELLS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Build from delimited text, unwrapping Excel's `="000123"` guard
    pub fn from_text(raw: &str) -> Self {
        let mut value = raw.trim();
        if let Some(inner) = value
            .strip_prefix("=\"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            value = inner.trim();
        }

        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Text rendering used for header matching (integral numbers drop ".0")
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                format!("{}", *n as i64)
            }
            CellValue::Number(n) => n.to_string(),
        }
    }

    /// Numeric coercion; anything unparseable becomes `None`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Empty => None,
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Number(_) => None,
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        }
    }

    /// Integer coercion for fund codes.
    ///
    /// Float renderings (`511120.0`) are accepted; values with a fractional
    /// part are not codes and yield `None`.
    pub fn as_code(&self) -> Option<i64> {
        if let CellValue::Text(s) = self {
            if let Ok(code) = s.trim().parse::<i64>() {
                return Some(code);
            }
        }

        let n = self.as_f64()?;
        if n.fract() != 0.0 || n.abs() > i64::MAX as f64 {
            return None;
        }
        Some(n as i64)
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::String(s) => CellValue::from_text(s),
            Data::Bool(b) => CellValue::Text(b.to_string()),
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from_text(s),
            Data::Error(_) | Data::Empty => CellValue::Empty,
        }
    }
}

// ============================================================================
// SHEETS
// ============================================================================

/// Rows as decoded, before the header row is located
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSheet {
    pub rows: Vec<Vec<CellValue>>,
}

impl RawSheet {
    /// Keep every row, blank ones included: workbook header offsets count
    /// physical sheet rows
    pub fn new(rows: Vec<Vec<CellValue>>) -> Self {
        RawSheet { rows }
    }

    /// Drop blank lines up front, the way delimited exports are read
    pub fn without_blank_rows(rows: Vec<Vec<CellValue>>) -> Self {
        RawSheet {
            rows: rows.into_iter().filter(|row| !is_blank_row(row)).collect(),
        }
    }

    /// Skip `offset` rows and treat the next one as the header row.
    ///
    /// Blank rows below the header are dropped.
    pub fn with_header(mut self, offset: usize) -> Result<HeaderedSheet> {
        if self.rows.len() <= offset {
            bail!(
                "expected a header row after skipping {} rows, sheet has only {} rows",
                offset,
                self.rows.len()
            );
        }

        let mut rows = self.rows.split_off(offset);
        let header_row = rows.remove(0);
        let headers: Vec<String> = header_row.iter().map(CellValue::as_text).collect();
        rows.retain(|row| !is_blank_row(row));

        Ok(HeaderedSheet { headers, rows })
    }
}

fn is_blank_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_empty)
}

/// A sheet with its header row identified
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl HeaderedSheet {
    /// Widest of header and data rows; ragged text files are common
    pub fn column_count(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }
}

// ============================================================================
// DECODERS
// ============================================================================

/// One way of turning file bytes into a sheet
pub trait SheetDecoder: Send + Sync {
    /// Stable label used in logs and error reports
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<RawSheet>;
}

/// Native workbooks (xls, xlsx, xlsb, ods) via calamine; first sheet only
pub struct WorkbookDecoder;

impl SheetDecoder for WorkbookDecoder {
    fn name(&self) -> &'static str {
        "workbook"
    }

    fn decode(&self, bytes: &[u8]) -> Result<RawSheet> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|e| anyhow!("not a workbook: {}", e))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("workbook has no sheets"))?
            .map_err(|e| anyhow!("failed to read first sheet: {}", e))?;

        // Ranges start at the first used cell; pad back out so row and
        // column positions line up with what a user sees in the sheet.
        let (row_pad, col_pad) = range
            .start()
            .map(|(row, col)| (row as usize, col as usize))
            .unwrap_or((0, 0));

        let mut rows: Vec<Vec<CellValue>> = vec![Vec::new(); row_pad];
        rows.extend(range.rows().map(|row| {
            std::iter::repeat(CellValue::Empty)
                .take(col_pad)
                .chain(row.iter().map(CellValue::from))
                .collect()
        }));

        Ok(RawSheet::new(rows))
    }
}

/// Delimited text in a fixed encoding; the delimiter is sniffed
pub struct DelimitedTextDecoder {
    label: &'static str,
    encoding: &'static Encoding,
}

impl DelimitedTextDecoder {
    pub fn utf8() -> Self {
        DelimitedTextDecoder {
            label: "text/utf-8",
            encoding: encoding_rs::UTF_8,
        }
    }

    /// GBK (decoded as its GB18030 superset), the usual mainland export encoding
    pub fn gbk() -> Self {
        DelimitedTextDecoder {
            label: "text/gbk",
            encoding: encoding_rs::GBK,
        }
    }

    fn decode_text<'a>(&self, bytes: &'a [u8]) -> Result<std::borrow::Cow<'a, str>> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = self
            .encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or_else(|| anyhow!("malformed {} byte sequence", self.encoding.name()))?;

        if text.contains('\0') {
            bail!("binary content (NUL bytes)");
        }
        Ok(text)
    }
}

const DELIMITER_CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Pick the candidate delimiter seen most often in the first lines
pub fn sniff_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(20)
        .collect();

    DELIMITER_CANDIDATES
        .iter()
        .map(|&d| {
            let count: usize = sample
                .iter()
                .map(|line| line.bytes().filter(|&b| b == d).count())
                .sum();
            (d, count)
        })
        .filter(|&(_, count)| count > 0)
        // max_by_key keeps the last maximum; reverse so earlier candidates win ties
        .rev()
        .max_by_key(|&(_, count)| count)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

impl SheetDecoder for DelimitedTextDecoder {
    fn name(&self) -> &'static str {
        self.label
    }

    fn decode(&self, bytes: &[u8]) -> Result<RawSheet> {
        let text = self.decode_text(bytes)?;
        let delimiter = sniff_delimiter(&text);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(text.as_bytes());

        let mut rows = Vec::new();
        for (line_num, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("malformed delimited record {}", line_num + 1))?;
            rows.push(record.iter().map(CellValue::from_text).collect());
        }

        if rows.is_empty() {
            bail!("no rows");
        }

        Ok(RawSheet::without_blank_rows(rows))
    }
}

// ============================================================================
// DECODER CHAIN
// ============================================================================

/// Result of a successful chain read
#[derive(Debug, Clone)]
pub struct DecodedSheet {
    pub sheet: HeaderedSheet,
    /// Which decoder produced the sheet
    pub decoder: &'static str,
    /// Decoders tried (and failed) before the winning one
    pub failed_attempts: Vec<DecodeAttempt>,
}

pub struct DecoderChain {
    decoders: Vec<Box<dyn SheetDecoder>>,
}

impl DecoderChain {
    /// workbook → UTF-8 text → GBK text
    pub fn standard() -> Self {
        DecoderChain {
            decoders: vec![
                Box::new(WorkbookDecoder),
                Box::new(DelimitedTextDecoder::utf8()),
                Box::new(DelimitedTextDecoder::gbk()),
            ],
        }
    }

    pub fn with_decoders(decoders: Vec<Box<dyn SheetDecoder>>) -> Self {
        DecoderChain { decoders }
    }

    pub fn read_path(&self, path: &Path, header_offset: usize) -> Result<DecodedSheet, ReadError> {
        let bytes = std::fs::read(path).map_err(|source| ReadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.read_bytes(path, &bytes, header_offset)
    }

    /// Try each decoder in order; a decoder only wins if the header row exists
    pub fn read_bytes(
        &self,
        path: &Path,
        bytes: &[u8],
        header_offset: usize,
    ) -> Result<DecodedSheet, ReadError> {
        let mut failed_attempts = Vec::new();

        for decoder in &self.decoders {
            let attempt = decoder
                .decode(bytes)
                .and_then(|raw| raw.with_header(header_offset));

            match attempt {
                Ok(sheet) => {
                    tracing::debug!(
                        file = %path.display(),
                        decoder = decoder.name(),
                        skipped = failed_attempts.len(),
                        "decoded sheet"
                    );
                    return Ok(DecodedSheet {
                        sheet,
                        decoder: decoder.name(),
                        failed_attempts,
                    });
                }
                Err(e) => failed_attempts.push(DecodeAttempt {
                    decoder: decoder.name(),
                    reason: format!("{:#}", e),
                }),
            }
        }

        Err(ReadError::Undecodable {
            path: path.to_path_buf(),
            attempts: failed_attempts,
        })
    }
}

impl Default for DecoderChain {
    fn default() -> Self {
        Self::standard()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    #[test]
    fn test_cell_from_text_unwraps_excel_guard() {
        assert_eq!(CellValue::from_text("=\"511120\""), text("511120"));
        assert_eq!(CellValue::from_text("  "), CellValue::Empty);
        assert_eq!(CellValue::from_text(" 85 "), text("85"));
    }

    #[test]
    fn test_cell_code_coercion() {
        assert_eq!(text("511120").as_code(), Some(511120));
        assert_eq!(text("511120.0").as_code(), Some(511120));
        assert_eq!(CellValue::Number(159400.0).as_code(), Some(159400));
        assert_eq!(CellValue::Number(159400.5).as_code(), None);
        assert_eq!(text("合计").as_code(), None);
        assert_eq!(CellValue::Empty.as_code(), None);
    }

    #[test]
    fn test_cell_numeric_coercion() {
        assert_eq!(text("0.6").as_f64(), Some(0.6));
        assert_eq!(text("-").as_f64(), None);
        assert_eq!(CellValue::Number(f64::NAN).as_f64(), None);
    }

    #[test]
    fn test_header_text_rendering() {
        assert_eq!(CellValue::Number(2025.0).as_text(), "2025");
        assert_eq!(CellValue::Number(0.5).as_text(), "0.5");
        assert_eq!(text(" 折算率 ").as_text(), "折算率");
    }

    #[test]
    fn test_with_header_skips_offset_rows() {
        let raw = RawSheet::new(vec![
            vec![text("title")],
            vec![text("as of 2025-11-24")],
            vec![text("代码"), text("名称"), text("折算率")],
            vec![text("511120"), text("Fund A"), text("85")],
        ]);
        let sheet = raw.with_header(2).unwrap();
        assert_eq!(sheet.headers, vec!["代码", "名称", "折算率"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.cell(0, 2), &text("85"));
        assert_eq!(sheet.cell(5, 5), &CellValue::Empty);
    }

    #[test]
    fn test_with_header_too_short() {
        let raw = RawSheet::new(vec![vec![text("only row")]]);
        assert!(raw.with_header(2).is_err());
    }

    #[test]
    fn test_text_rows_drop_blank_lines() {
        let raw = RawSheet::without_blank_rows(vec![
            vec![text("a")],
            vec![CellValue::Empty, text("  ")],
            vec![text("b")],
        ]);
        assert_eq!(raw.rows.len(), 2);
    }

    #[test]
    fn test_header_offset_counts_blank_rows() {
        let raw = RawSheet::new(vec![
            vec![text("title")],
            vec![],
            vec![text("代码"), text("折算率")],
            vec![text("511120"), text("85")],
            vec![CellValue::Empty, CellValue::Empty],
            vec![text("511130"), text("70")],
        ]);
        let sheet = raw.with_header(2).unwrap();
        assert_eq!(sheet.headers, vec!["代码", "折算率"]);
        // blank data rows below the header are dropped
        assert_eq!(sheet.rows.len(), 2);
        assert_eq!(sheet.cell(1, 0), &text("511130"));
    }

    #[test]
    fn test_sniff_delimiter() {
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter("a\tb\tc\n1\t2\t3\n"), b'\t');
        assert_eq!(sniff_delimiter("title only\n"), b',');
        assert_eq!(sniff_delimiter("a;b\n1;2,5\n"), b';');
    }

    #[test]
    fn test_utf8_decoder_reads_tabs() {
        let bytes = "标题\n\n代码\t名称\t折算率\n511120\tFund A\t85\n".as_bytes();
        let sheet = DelimitedTextDecoder::utf8().decode(bytes).unwrap();
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.rows[2][2], text("85"));
    }

    #[test]
    fn test_utf8_decoder_rejects_gbk_bytes() {
        let (gbk, _, _) = encoding_rs::GBK.encode("证券代码,折算率\n511120,85\n");
        assert!(DelimitedTextDecoder::utf8().decode(&gbk).is_err());

        let sheet = DelimitedTextDecoder::gbk().decode(&gbk).unwrap();
        assert_eq!(sheet.rows[0][0], text("证券代码"));
    }

    #[test]
    fn test_chain_falls_through_to_gbk() {
        let (gbk, _, _) = encoding_rs::GBK.encode("一\n二\n证券代码,名称,折算率\n511120,A,85\n");
        let chain = DecoderChain::standard();
        let decoded = chain
            .read_bytes(Path::new("rates_20251124.xls"), &gbk, 2)
            .unwrap();

        assert_eq!(decoded.decoder, "text/gbk");
        assert_eq!(decoded.failed_attempts.len(), 2);
        assert_eq!(decoded.failed_attempts[0].decoder, "workbook");
        assert_eq!(decoded.failed_attempts[1].decoder, "text/utf-8");
        assert_eq!(decoded.sheet.headers[0], "证券代码");
    }

    #[test]
    fn test_chain_reports_every_attempt() {
        let bytes = [0xFFu8, 0x00, 0xFE, 0x00, 0x81];
        let err = DecoderChain::standard()
            .read_bytes(Path::new("broken_20251124.xls"), &bytes, 2)
            .unwrap_err();

        let names: Vec<_> = err.attempts().iter().map(|a| a.decoder).collect();
        assert_eq!(names, vec!["workbook", "text/utf-8", "text/gbk"]);
    }

    #[test]
    fn test_missing_header_row_moves_to_next_decoder() {
        let chain = DecoderChain::with_decoders(vec![Box::new(DelimitedTextDecoder::utf8())]);
        let err = chain
            .read_bytes(Path::new("short_20251124.csv"), b"a,b\n", 4)
            .unwrap_err();
        assert!(err.to_string().contains("header row"));
    }

    #[test]
    fn test_workbook_decoder_reads_xlsx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sse_20251124.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "上海证券交易所").unwrap();
        sheet.write_string(2, 0, "证券代码").unwrap();
        sheet.write_string(2, 1, "证券简称").unwrap();
        sheet.write_string(2, 2, "折算率").unwrap();
        sheet.write_number(3, 0, 511120.0).unwrap();
        sheet.write_string(3, 1, "Fund A").unwrap();
        sheet.write_number(3, 2, 85.0).unwrap();
        workbook.save(&path).unwrap();

        // row 1 is blank but still counts toward the offset
        let decoded = DecoderChain::standard().read_path(&path, 2).unwrap();
        assert_eq!(decoded.decoder, "workbook");
        assert!(decoded.failed_attempts.is_empty());
        assert_eq!(decoded.sheet.headers, vec!["证券代码", "证券简称", "折算率"]);
        assert_eq!(decoded.sheet.cell(0, 0).as_code(), Some(511120));
    }

    #[test]
    fn test_workbook_leading_blank_rows_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("szse_20251124.xlsx");

        // nothing above row 3, so the used range starts there
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(3, 1, "证券代码").unwrap();
        sheet.write_string(3, 2, "折算率").unwrap();
        sheet.write_number(4, 1, 159400.0).unwrap();
        sheet.write_number(4, 2, 0.6).unwrap();
        workbook.save(&path).unwrap();

        let raw = WorkbookDecoder.decode(&fs_read(&path)).unwrap();
        assert_eq!(raw.rows.len(), 5);
        assert!(raw.rows[0].is_empty());

        let sheet = raw.with_header(3).unwrap();
        assert_eq!(sheet.headers, vec!["", "证券代码", "折算率"]);
        assert_eq!(sheet.cell(0, 1).as_code(), Some(159400));
    }

    fn fs_read(path: &Path) -> Vec<u8> {
        std::fs::read(path).unwrap()
    }
}
