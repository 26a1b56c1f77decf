// End-to-end runs against temporary directories

use anyhow::{bail, Result};
use etf_pledge_tracker::{
    load_table, run, ColumnOrder, Notifier, PipelineError, RunOptions, RunOutcome, Settings,
    TradeDate,
};
use std::cell::RefCell;
use std::fs;
use std::path::Path;

const SSE_PREAMBLE: &str = "上海证券交易所\n债券ETF折算率\n证券代码,证券简称,折算率\n";
const SZSE_PREAMBLE: &str =
    "深圳证券交易所\n质押式回购\n标准券折算率\n2025年11月24日\n证券代码,证券简称,折算率\n";

/// Keeps every message instead of sending it
#[derive(Default)]
struct RecordingNotifier {
    sent: RefCell<Vec<(String, String, String)>>,
    fail: bool,
}

impl Notifier for RecordingNotifier {
    fn send(&self, target: &str, title: &str, body: &str) -> Result<()> {
        if self.fail {
            bail!("endpoint down");
        }
        self.sent
            .borrow_mut()
            .push((target.to_string(), title.to_string(), body.to_string()));
        Ok(())
    }
}

struct Workspace {
    _dir: tempfile::TempDir,
    settings: Settings,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut settings = Settings::default();
        settings.paths.input_dir = root.join("input");
        settings.paths.template = root.join("config").join("fund_list.csv");
        settings.paths.output = root.join("output").join("rates.csv");
        settings.notify.enabled = true;
        settings.notify.target = "token".to_string();

        fs::create_dir_all(root.join("config")).unwrap();
        fs::create_dir_all(&settings.paths.input_dir).unwrap();
        fs::write(
            &settings.paths.template,
            "基金代码,基金简称\n511120,Fund A\n159400,Fund B\n511380,Fund C\n",
        )
        .unwrap();

        Workspace { _dir: dir, settings }
    }

    fn input(&self, name: &str, content: &str) {
        fs::write(self.settings.paths.input_dir.join(name), content).unwrap();
    }

    fn output(&self) -> &Path {
        &self.settings.paths.output
    }
}

fn date(token: &str) -> TradeDate {
    TradeDate::from_token(token).unwrap()
}

fn run_quiet(settings: &Settings) -> RunOutcome {
    run(settings, &RecordingNotifier::default(), RunOptions::default()).unwrap()
}

fn updated(outcome: RunOutcome) -> etf_pledge_tracker::RunReport {
    match outcome {
        RunOutcome::Updated(report) => report,
        RunOutcome::NoInput => panic!("expected the table to be updated"),
    }
}

#[test]
fn test_two_exchanges_one_day() {
    let ws = Workspace::new();
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));
    ws.input("深交所_20251124.csv", &format!("{}159400,Fund B,0.6\n", SZSE_PREAMBLE));

    let notifier = RecordingNotifier::default();
    let report = updated(run(&ws.settings, &notifier, RunOptions::default()).unwrap());

    assert!(report.persisted);
    assert!(report.notified);

    let table = load_table(ws.output()).unwrap().unwrap();
    let d = date("20251124");
    assert_eq!(table.value(511120, &d), Some(85));
    assert_eq!(table.value(159400, &d), Some(60));
    assert_eq!(table.value(511380, &d), None);

    let sent = notifier.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "token");
    assert!(sent[0].2.contains("mean rate 72.50"));
    println!("✅ {}", sent[0].1);
}

#[test]
fn test_empty_input_is_success_without_side_effects() {
    let ws = Workspace::new();
    let notifier = RecordingNotifier::default();

    let outcome = run(&ws.settings, &notifier, RunOptions::default()).unwrap();

    assert!(matches!(outcome, RunOutcome::NoInput));
    assert!(!ws.output().exists());
    assert!(notifier.sent.borrow().is_empty());
}

#[test]
fn test_missing_template_is_fatal() {
    let ws = Workspace::new();
    fs::remove_file(&ws.settings.paths.template).unwrap();
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));

    let err = run(&ws.settings, &RecordingNotifier::default(), RunOptions::default()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::TemplateMissing(_))
    ));
    assert!(!ws.output().exists());
}

#[test]
fn test_unreadable_file_leaves_rest_of_date() {
    let ws = Workspace::new();
    fs::write(
        ws.settings.paths.input_dir.join("上交所_20251124.xls"),
        [0xFFu8, 0xFE, 0x00, 0x81, 0xFF],
    )
    .unwrap();
    ws.input("深交所_20251124.csv", &format!("{}159400,Fund B,0.6\n", SZSE_PREAMBLE));

    let report = updated(run_quiet(&ws.settings));
    assert_eq!(report.failed_files(), 1);

    let table = load_table(ws.output()).unwrap().unwrap();
    let d = date("20251124");
    assert_eq!(table.value(159400, &d), Some(60));
    assert_eq!(table.value(511120, &d), None);
}

#[test]
fn test_rerun_replaces_only_its_date() {
    let ws = Workspace::new();
    ws.input(
        "上交所_20251121.csv",
        &format!("{}511120,Fund A,80\n159400,Fund B,70\n", SSE_PREAMBLE),
    );
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));
    run_quiet(&ws.settings);

    // next day's drop: the 24th is republished with a new value
    fs::remove_file(ws.settings.paths.input_dir.join("上交所_20251121.csv")).unwrap();
    ws.input("上交所_20251124.csv", &format!("{}159400,Fund B,75\n", SSE_PREAMBLE));
    let report = updated(run_quiet(&ws.settings));
    assert!(report.dates[0].replaced_existing);

    let table = load_table(ws.output()).unwrap().unwrap();
    assert_eq!(table.date_columns().len(), 2);
    assert_eq!(table.value(511120, &date("20251121")), Some(80));
    assert_eq!(table.value(159400, &date("20251121")), Some(70));
    assert_eq!(table.value(511120, &date("20251124")), None);
    assert_eq!(table.value(159400, &date("20251124")), Some(75));
}

#[test]
fn test_column_order_policies() {
    for (order, expected) in [
        (ColumnOrder::Ascending, ["2025/11/21", "2025/11/24"]),
        (ColumnOrder::Descending, ["2025/11/24", "2025/11/21"]),
    ] {
        let mut ws = Workspace::new();
        ws.settings.columns.order = order;
        ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));
        ws.input("上交所_20251121.csv", &format!("{}511120,Fund A,80\n", SSE_PREAMBLE));

        let report = updated(run_quiet(&ws.settings));
        assert_eq!(report.summary.unwrap().date.as_str(), "2025/11/24");

        let header = fs::read_to_string(ws.output()).unwrap();
        let first_line = header.lines().next().unwrap();
        assert_eq!(
            first_line,
            format!("fund_code,fund_name,{},{}", expected[0], expected[1])
        );
    }
}

#[test]
fn test_notifier_failure_is_not_fatal() {
    let ws = Workspace::new();
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));

    let notifier = RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    };
    let report = updated(run(&ws.settings, &notifier, RunOptions::default()).unwrap());

    assert!(report.persisted);
    assert!(!report.notified);
    assert!(ws.output().exists());
}

#[test]
fn test_notifications_disabled() {
    let mut ws = Workspace::new();
    ws.settings.notify.enabled = false;
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));

    let notifier = RecordingNotifier::default();
    let report = updated(run(&ws.settings, &notifier, RunOptions::default()).unwrap());
    assert!(!report.notified);
    assert!(notifier.sent.borrow().is_empty());
}

#[test]
fn test_xlsx_table_survives_reload() {
    let mut ws = Workspace::new();
    ws.settings.paths.output = ws.settings.paths.output.with_extension("xlsx");
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));
    run_quiet(&ws.settings);

    ws.input("深交所_20251125.csv", &format!("{}159400,Fund B,0.625\n", SZSE_PREAMBLE));
    run_quiet(&ws.settings);

    let table = load_table(ws.output()).unwrap().unwrap();
    assert_eq!(table.funds()[0].code, Some(511120));
    assert_eq!(table.value(511120, &date("20251124")), Some(85));
    // 62.5 rounds half to even
    assert_eq!(table.value(159400, &date("20251125")), Some(62));
}

#[test]
fn test_saved_notes_column_survives_run() {
    let ws = Workspace::new();
    fs::create_dir_all(ws.output().parent().unwrap()).unwrap();
    fs::write(
        ws.output(),
        "fund_code,fund_name,备注,2025/11/21\n511120,Fund A,keep me,80\n",
    )
    .unwrap();
    ws.input("上交所_20251124.csv", &format!("{}511120,Fund A,85\n", SSE_PREAMBLE));

    run_quiet(&ws.settings);

    let saved = fs::read_to_string(ws.output()).unwrap();
    assert_eq!(
        saved,
        "fund_code,fund_name,备注,2025/11/24,2025/11/21\n511120,Fund A,keep me,85,80\n"
    );

    let table = load_table(ws.output()).unwrap().unwrap();
    assert_eq!(table.extra_columns()[0].header, "备注");
    assert_eq!(table.extra_columns()[0].values, vec!["keep me".to_string()]);
}
