// 🚚 Pipeline - one full accumulation run
//
// template → date groups → load/bootstrap table → per-date merge
//   → column sort → summary → save → notify
//
// Only a missing template aborts. Unreadable files are reported per date,
// and notifier failures are logged after the table is already on disk.

use crate::config::Settings;
use crate::grouper::group_input_files;
use crate::notify::Notifier;
use crate::reconciliation::{DateMergeReport, ReconciliationEngine};
use crate::store::{load_table, load_template, save_table};
use crate::summary::{build_summary, RateSummary};
use crate::table::{AccumulatorTable, FundRecord};
use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

/// Per-invocation switches that are not part of the persisted settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Process and summarize, but neither save nor notify
    pub dry_run: bool,
    /// Suppress notification even when settings enable it
    pub skip_notify: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dates: Vec<DateMergeReport>,
    pub summary: Option<RateSummary>,
    /// Table written to disk
    pub persisted: bool,
    /// Notifier called and succeeded
    pub notified: bool,
    /// Funds appended from the template to an existing table
    pub funds_added: usize,
}

impl RunReport {
    pub fn failed_files(&self) -> usize {
        self.dates.iter().map(|d| d.failed_files()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum RunOutcome {
    /// No dated input files; nothing was touched
    NoInput,
    Updated(RunReport),
}

/// Load the persisted table, or start a fresh one from the template
fn open_table(settings: &Settings, template: &[FundRecord]) -> Result<(AccumulatorTable, usize)> {
    match load_table(&settings.paths.output)? {
        Some(mut table) => {
            let added = if settings.merge.sync_template_funds {
                table.append_missing_funds(template)
            } else {
                0
            };
            if added > 0 {
                info!(added, "appended template funds missing from table");
            }
            Ok((table, added))
        }
        None => {
            info!(
                table = %settings.paths.output.display(),
                "no accumulated table yet; starting from fund list"
            );
            Ok((AccumulatorTable::from_template(template.to_vec()), 0))
        }
    }
}

pub fn run(
    settings: &Settings,
    notifier: &dyn Notifier,
    options: RunOptions,
) -> Result<RunOutcome> {
    let template = load_template(&settings.paths.template)?;

    let groups = group_input_files(&settings.paths.input_dir)?;
    if groups.is_empty() {
        info!(dir = %settings.paths.input_dir.display(), "no input files; nothing to do");
        return Ok(RunOutcome::NoInput);
    }

    let (mut table, funds_added) = open_table(settings, &template)?;

    let engine = ReconciliationEngine::with_settings(
        settings.merge.precedence,
        settings.exchange.shenzhen_markers.clone(),
    );
    let dates = engine.reconcile(&mut table, &groups)?;

    table.sort_columns(settings.columns.order);
    let summary = build_summary(&table, &settings.summary);

    let persisted = if options.dry_run {
        info!("dry run; table not saved");
        false
    } else {
        save_table(&settings.paths.output, &table)?;
        true
    };

    let mut notified = false;
    let wants_notify = settings.notify.enabled && !options.skip_notify && !options.dry_run;
    if let (true, Some(summary)) = (wants_notify, summary.as_ref()) {
        match notifier.send(&settings.notify.target, &summary.title(), &summary.body()) {
            Ok(()) => notified = true,
            Err(e) => warn!(error = %e, "notification failed; table already saved"),
        }
    }

    Ok(RunOutcome::Updated(RunReport {
        dates,
        summary,
        persisted,
        notified,
        funds_added,
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::LogNotifier;
    use std::fs;
    use std::path::Path;

    fn settings_in(root: &Path) -> Settings {
        let mut s = Settings::default();
        s.paths.input_dir = root.join("input");
        s.paths.template = root.join("fund_list.csv");
        s.paths.output = root.join("out").join("table.csv");
        s
    }

    #[test]
    fn test_bootstrap_from_template() {
        let root = tempfile::tempdir().unwrap();
        let s = settings_in(root.path());
        fs::write(&s.paths.template, "证券代码,证券简称\n511120,Fund A\n").unwrap();

        let (table, added) = open_table(&s, &load_template(&s.paths.template).unwrap()).unwrap();
        assert_eq!(table.funds(), &[FundRecord::new(511120, "Fund A")]);
        assert!(table.date_columns().is_empty());
        assert_eq!(added, 0);
    }

    #[test]
    fn test_sync_appends_new_template_funds() {
        let root = tempfile::tempdir().unwrap();
        let mut s = settings_in(root.path());
        s.merge.sync_template_funds = true;
        fs::create_dir_all(s.paths.output.parent().unwrap()).unwrap();
        fs::write(&s.paths.output, "fund_code,fund_name,2025/11/21\n511120,Fund A,80\n").unwrap();

        let template = vec![FundRecord::new(511120, "Fund A"), FundRecord::new(159400, "Fund B")];
        let (table, added) = open_table(&s, &template).unwrap();
        assert_eq!(added, 1);
        assert_eq!(table.funds()[1].code, Some(159400));
    }

    #[test]
    fn test_dry_run_does_not_save() {
        let root = tempfile::tempdir().unwrap();
        let s = settings_in(root.path());
        fs::write(&s.paths.template, "证券代码,证券简称\n511120,Fund A\n").unwrap();
        fs::create_dir_all(&s.paths.input_dir).unwrap();
        fs::write(
            s.paths.input_dir.join("上交所_20251124.csv"),
            "上海证券交易所\n折算率\n证券代码,证券简称,折算率\n511120,Fund A,85\n",
        )
        .unwrap();

        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let RunOutcome::Updated(report) = run(&s, &LogNotifier, options).unwrap() else {
            panic!("expected an update");
        };
        assert!(!report.persisted);
        assert!(!s.paths.output.exists());
        assert_eq!(report.summary.unwrap().mean, Some(85.0));
        println!("✅ dry run left {} untouched", s.paths.output.display());
    }
}
