mod config;
mod device;
mod error;
mod jsonc;
mod review;
mod similarity;
mod template;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use config::{FileSettings, Overrides, Settings};
use device::DeviceSet;
use review::{AutoReviewer, ConsoleReviewer, Reviewer};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use template::{FollowUp, MasterTemplate, Outcome, TemplateSession};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// paramdedup - Deduplicate device configuration parameters into shared templates
#[derive(Parser)]
#[command(name = "paramdedup")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "Example:\n  paramdedup -f 0x0063 -t ge_template.json")]
struct Cli {
    /// Manufacturer folder to template
    #[arg(short, long)]
    folder: String,

    /// Name of the manufacturer-specific template file
    #[arg(short, long)]
    template: String,

    /// Directory holding the manufacturer folders [default: config/devices]
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Master template to reuse generic parameter definitions from
    #[arg(short, long)]
    master: Option<PathBuf>,

    /// Also offer parameters with other numbers whose labels are this similar (0.0 to 1.0)
    #[arg(long)]
    fuzzy: Option<f64>,

    /// Write parameters marked for follow-up to this JSON file
    #[arg(long)]
    follow_up: Option<PathBuf>,

    /// Patterns to exclude, relative to the folder (can be repeated)
    #[arg(short, long)]
    exclude: Vec<String>,

    /// Accept every candidate and derive import names from labels
    #[arg(short, long)]
    yes: bool,

    /// Keep earlier output instead of clearing the screen for each candidate
    #[arg(long)]
    no_clear: bool,

    /// Review without writing any file
    #[arg(long)]
    dry_run: bool,

    /// Config file path
    #[arg(short, long, default_value = ".paramdedup.toml")]
    config: PathBuf,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else if quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let start = Instant::now();

    let file = FileSettings::load(&cli.config)?;
    let overrides = Overrides {
        root: cli.root,
        master_template: cli.master,
        fuzzy_threshold: cli.fuzzy,
        follow_up: cli.follow_up,
        exclude: cli.exclude,
    };
    let settings = Settings::resolve(&cli.folder, &cli.template, overrides, file)?;
    let dir = settings.folder_dir();

    if !cli.quiet {
        println!("{} {}", "Templating".cyan().bold(), dir.display());
    }

    let master = settings
        .master_template
        .as_deref()
        .map(|path| {
            MasterTemplate::load(path)
                .with_context(|| format!("loading master template {}", path.display()))
        })
        .transpose()?;

    let mut set = DeviceSet::load(&dir, &settings.template_name, &settings.exclude_set()?)?;
    let template = set
        .load_template()
        .with_context(|| format!("loading template {}", set.template_path().display()))?;
    info!(
        devices = set.devices.len(),
        template_entries = template.len(),
        "starting review"
    );

    let mut session = TemplateSession::new(set, template, master, settings.fuzzy_threshold);
    let outcome = if cli.yes {
        session.run(&mut AutoReviewer)?
    } else {
        let stdin = io::stdin();
        let reviewer = ConsoleReviewer::new(stdin.lock(), io::stderr());
        let mut reviewer = if cli.no_clear { reviewer.without_clear() } else { reviewer };
        review_interactively(&mut session, &mut reviewer)?
    };

    if cli.dry_run {
        println!("{}", "Dry run, no files written.".yellow());
    } else {
        session.write().context("writing templated files")?;
    }

    write_follow_ups(&outcome.follow_ups, settings.follow_up.as_deref(), cli.dry_run)?;

    if !cli.quiet {
        print_summary(&session, &outcome, start);
    }
    Ok(())
}

fn review_interactively<R: Reviewer>(
    session: &mut TemplateSession,
    reviewer: &mut R,
) -> anyhow::Result<Outcome> {
    let outcome = session.run(reviewer)?;
    if outcome.quit_early {
        println!("{}", "Stopped early, saving what was reviewed so far.".yellow());
    }
    Ok(outcome)
}

fn write_follow_ups(
    follow_ups: &[FollowUp],
    path: Option<&Path>,
    dry_run: bool,
) -> anyhow::Result<()> {
    if follow_ups.is_empty() {
        return Ok(());
    }

    match path {
        Some(path) if !dry_run => {
            fs::write(path, serde_json::to_string_pretty(follow_ups)?)
                .with_context(|| format!("writing follow-up list {}", path.display()))?;
            println!(
                "{} {}",
                "Follow-up list written to".green(),
                path.display().to_string().cyan()
            );
        }
        _ => {
            println!("{}", "Follow up:".yellow().bold());
            for item in follow_ups {
                println!(
                    "  {} #{} {} {}",
                    item.device.cyan(),
                    item.param,
                    item.label.as_deref().unwrap_or(""),
                    item.file.dimmed()
                );
            }
        }
    }
    Ok(())
}

fn print_summary(session: &TemplateSession, outcome: &Outcome, start: Instant) {
    println!();
    println!("{}", "Template Statistics".green().bold());
    println!("  Devices:             {}", session.set.devices.len().to_string().cyan());
    println!("  Unreadable files:    {}", session.set.failed.to_string().cyan());
    println!("  Groups templated:    {}", outcome.groups.to_string().cyan());
    println!("  Parameters replaced: {}", outcome.replaced.to_string().cyan());
    println!("  Master references:   {}", outcome.master_refs.to_string().cyan());
    println!("  Template entries:    {}", session.template.len().to_string().cyan());
    println!("  Follow-ups:          {}", outcome.follow_ups.len().to_string().cyan());
    println!("  Time elapsed:        {:.2?}", start.elapsed());
    println!();
    println!("{}", "Finished".green());
}
