// ETF Pledge Tracker - Core Library
// Exposes all modules for use in the CLI and tests

pub mod dates;
pub mod error;
pub mod sheet;          // Spreadsheet decoding (workbook, UTF-8 text, GBK text)
pub mod columns;        // Header drift: exact → substring → position
pub mod parser;         // Shanghai / Shenzhen layouts
pub mod table;          // Fund rows × date columns
pub mod store;          // Template + persisted table I/O
pub mod grouper;
pub mod reconciliation; // Per-date merge
pub mod summary;
pub mod notify;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use dates::{extract_trade_date, trade_date_for_path, TradeDate};
pub use error::{DecodeAttempt, PipelineError, ReadError};
pub use sheet::{
    CellValue, DecodedSheet, DecoderChain, DelimitedTextDecoder, HeaderedSheet, RawSheet,
    SheetDecoder, WorkbookDecoder,
};
pub use columns::{resolve_column, ColumnAliases, ColumnResolution, ResolvedBy};
pub use parser::{
    detect_exchange, get_parser, round_rate,
    Exchange, ExchangeParser, RateRecord, RateSheet,
    ShanghaiParser, ShenzhenParser,
};
pub use table::{AccumulatorTable, ColumnOrder, DateColumn, ExtraColumn, FundRecord};
pub use store::{load_table, load_template, save_table, TableFormat};
pub use grouper::{group_input_files, DateGroups};
pub use reconciliation::{
    DateMergeReport, FileOutcome, FileStatus, MergePrecedence, ReconciliationEngine,
};
pub use summary::{build_summary, RateSummary, SummaryOptions};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use config::Settings;
pub use pipeline::{run, RunOptions, RunOutcome, RunReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
