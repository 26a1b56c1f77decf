use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etf_pledge_tracker::config::DEFAULT_CONFIG_PATH;
use etf_pledge_tracker::{
    build_summary, get_parser, load_table, run, ColumnOrder, LogNotifier, Notifier,
    ReconciliationEngine, RunOptions, RunOutcome, Settings, WebhookNotifier, VERSION,
};

/// Accumulate exchange bond-ETF collateral rates into one table
#[derive(Parser)]
#[command(name = "etf-pledge-tracker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML); missing file means defaults
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge every input file into the table, save it and notify
    Run {
        /// Directory scanned for dated exchange files
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Fund list (code, name) used to start a new table
        #[arg(long)]
        template: Option<PathBuf>,

        /// Accumulated table (.xlsx or .csv)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Date column order: asc or desc
        #[arg(long)]
        order: Option<ColumnOrder>,

        /// Do not send a notification
        #[arg(long)]
        no_notify: bool,

        /// Process and summarize without saving or notifying
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the latest-date summary of the saved table
    Summary,

    /// Parse one input file and show how it was read
    Inspect {
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!(version = VERSION, config = %cli.config.display(), "etf-pledge-tracker starting");
    let settings = Settings::load_or_default(&cli.config).with_env_override();

    match cli.command {
        None => run_command(settings, RunOptions::default(), false),
        Some(Commands::Run {
            input_dir,
            template,
            output,
            order,
            no_notify,
            dry_run,
            json,
        }) => {
            let mut settings = settings;
            if let Some(dir) = input_dir {
                settings.paths.input_dir = dir;
            }
            if let Some(template) = template {
                settings.paths.template = template;
            }
            if let Some(output) = output {
                settings.paths.output = output;
            }
            if let Some(order) = order {
                settings.columns.order = order;
            }
            let options = RunOptions {
                dry_run,
                skip_notify: no_notify,
            };
            run_command(settings, options, json)
        }
        Some(Commands::Summary) => summary_command(&settings),
        Some(Commands::Inspect { file }) => inspect_command(&settings, &file),
    }
}

fn notifier_for(settings: &Settings) -> Result<Box<dyn Notifier>> {
    if settings.notifications_active() {
        let notifier = WebhookNotifier::new(
            settings.notify.endpoint.clone(),
            Duration::from_secs(settings.notify.timeout_secs),
        )?;
        info!(endpoint = notifier.endpoint(), "notifications go to webhook");
        return Ok(Box::new(notifier));
    }
    if settings.notify.enabled {
        warn!("notifications enabled without a target; logging the message instead");
    }
    Ok(Box::new(LogNotifier))
}

fn run_command(settings: Settings, options: RunOptions, json: bool) -> Result<()> {
    let notifier = notifier_for(&settings)?;
    let outcome = run(&settings, notifier.as_ref(), options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        RunOutcome::NoInput => {
            println!("📭 No input files in {}", settings.paths.input_dir.display());
        }
        RunOutcome::Updated(report) => {
            println!("📊 Processed {} date(s)", report.dates.len());
            for date in &report.dates {
                println!("   {}", date.summary());
            }
            if let Some(summary) = &report.summary {
                println!("\n{}", summary.body());
            }
            if report.persisted {
                println!("\n💾 Saved {}", settings.paths.output.display());
            }
            if report.failed_files() > 0 {
                println!("⚠️  {} file(s) could not be read", report.failed_files());
            }
        }
    }
    Ok(())
}

fn summary_command(settings: &Settings) -> Result<()> {
    let table = load_table(&settings.paths.output)?
        .with_context(|| format!("No table at {}", settings.paths.output.display()))?;

    match build_summary(&table, &settings.summary) {
        Some(summary) => println!("{}\n\n{}", summary.title(), summary.body()),
        None => println!("Table has no date columns yet"),
    }
    Ok(())
}

fn inspect_command(settings: &Settings, file: &Path) -> Result<()> {
    let engine = ReconciliationEngine::with_settings(
        settings.merge.precedence,
        settings.exchange.shenzhen_markers.clone(),
    );
    let exchange = engine.exchange_for(file);
    info!(file = %file.display(), exchange = exchange.code(), "inspecting");

    let sheet = get_parser(exchange).parse(file)?;

    println!("📄 {}", sheet.source_file);
    println!("   Exchange:      {} ({})", exchange.name(), exchange.code());
    println!("   Decoder:       {}", sheet.decoder);
    for skipped in &sheet.skipped_decoders {
        println!("   Skipped:       {}", skipped);
    }
    println!(
        "   Code column:   #{} {:?} via {:?}",
        sheet.code_column.index, sheet.code_column.header, sheet.code_column.resolved_by
    );
    println!(
        "   Rate column:   #{} {:?} via {:?}",
        sheet.rate_column.index, sheet.rate_column.header, sheet.rate_column.resolved_by
    );
    println!("   Rows:          {} kept, {} dropped", sheet.records.len(), sheet.dropped_rows);
    println!();
    for record in &sheet.records {
        let rate = record.rate.map_or_else(|| "-".to_string(), |r| r.to_string());
        println!("   row {:>4}  {:06} → {}", record.row_number, record.code, rate);
    }
    Ok(())
}
