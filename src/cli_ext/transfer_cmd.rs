//! CLI command handlers for `send`, `retrieve` and `discover`.
//!
//! Resolves settings (flags > config > remembered preferences > defaults),
//! drives the orchestrator with an indicatif bar, prints one summary line and,
//! for retrieve, a table of the items that did not make it.

use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};
use tracing::{debug, instrument, warn};

use crate::cli::{AppContext, DiscoverArgs, RetrieveArgs, SendArgs, ShareArgs};
use crate::core::convention::ResultNameParser;
use crate::core::discovery;
use crate::core::orchestrator::{
    BatchSettings, Progress, RetrieveRequest, RetrieveSummary, SendRequest, SendSummary, TransferOrchestrator,
};
use crate::core::project::{JsonProject, ProjectEntry, ProjectImporter};
use crate::core::remote::NoRemote;
use crate::infra::config::{Config, expand_path, load_config};
use crate::infra::prefs::Preferences;

/// indicatif bar behind the orchestrator's progress sink.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(ctx: &AppContext, verb: &str) -> Self {
        if ctx.quiet {
            return Self { bar: ProgressBar::hidden() };
        }
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template(&format!("{{spinner:.green}} {verb} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {{msg}}"))
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl Progress for BarProgress {
    fn begin(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn item(&self, label: &str) {
        self.bar.inc(1);
        self.bar.set_message(label.to_string());
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// Everything a transfer command needs before talking to the orchestrator.
struct Resolved {
    config: Config,
    prefs: Preferences,
    prefs_path: PathBuf,
    root: PathBuf,
    username: Option<String>,
    host: Option<String>,
}

fn resolve(share: &ShareArgs, host: Option<&str>) -> Result<Resolved> {
    let config = load_config()?;
    let prefs_path = Preferences::default_path();
    let prefs = Preferences::load(&prefs_path);

    let root = share
        .root
        .clone()
        .or_else(|| config.share.root.clone())
        .ok_or_else(|| anyhow::anyhow!("no share root given; use --root or set share.root"))?;
    let root = expand_path(&root)?;

    let username = share.username.clone().or_else(|| prefs.username.clone());
    let host = host
        .map(str::to_string)
        .or_else(|| config.remote.host.clone())
        .or_else(|| prefs.host.clone());

    debug!(root = %root.display(), ?username, ?host, "resolved settings");
    Ok(Resolved { config, prefs, prefs_path, root, username, host })
}

fn batch_settings(resolved: &Resolved) -> BatchSettings {
    let share = &resolved.config.share;
    BatchSettings {
        root: resolved.root.clone(),
        code_length: share.code_length,
        result_extension: share.result_extension.clone(),
        report_suffix: share.report_suffix.clone(),
        log_suffix: share.log_suffix.clone(),
        min_similarity: resolved.config.matching.min_similarity,
        default_host: resolved.host.clone(),
    }
}

/// Ask on stdin, only when a person is there to answer.
fn prompt_username() -> Option<String> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        return None;
    }
    eprint!("Username on the share: ");
    std::io::stderr().flush().ok()?;

    let mut line = String::new();
    stdin.lock().read_line(&mut line).ok()?;
    let name = line.trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn remember(mut resolved: Resolved, username: &str, host: Option<&str>) {
    resolved.prefs.remember(Some(username), host);
    if let Err(e) = resolved.prefs.save(&resolved.prefs_path) {
        warn!(error = %e, "cannot remember username/host");
    }
}

fn open_project(path: Option<&Path>, config: &Config) -> Result<JsonProject> {
    let path = expand_path(path.unwrap_or(config.project.file.as_path()))?;
    JsonProject::open(&path).with_context(|| format!("Failed to open project {}", path.display()))
}

fn paint_ok(ctx: &AppContext, s: &str) -> String {
    if ctx.no_color { s.to_string() } else { s.green().to_string() }
}

fn paint_bad(ctx: &AppContext, s: &str) -> String {
    if ctx.no_color { s.to_string() } else { s.red().to_string() }
}

fn paint_warn(ctx: &AppContext, s: &str) -> String {
    if ctx.no_color { s.to_string() } else { s.yellow().to_string() }
}

/// Pick the entries named on the command line, in command-line order.
fn select_entries(project: &JsonProject, names: &[String], all: bool) -> Result<Vec<ProjectEntry>> {
    if all {
        return Ok(project.entries().to_vec());
    }

    let mut picked = Vec::with_capacity(names.len());
    let mut missing = Vec::new();
    for name in names {
        match project.find(name) {
            Some(entry) => picked.push(entry.clone()),
            None => missing.push(name.as_str()),
        }
    }
    if !missing.is_empty() {
        bail!("not in the project: {}", missing.join(", "));
    }
    Ok(picked)
}

#[instrument(skip_all, fields(all = args.all, names = args.names.len()))]
pub fn send_run(args: SendArgs, ctx: &AppContext) -> Result<()> {
    let resolved = resolve(&args.share, args.host.as_deref())?;
    let project = open_project(args.project.as_deref(), &resolved.config)?;
    let images = select_entries(&project, &args.names, args.all)?;

    let progress = BarProgress::new(ctx, "send");
    let orchestrator = TransferOrchestrator::new(batch_settings(&resolved), &NoRemote)
        .with_progress(&progress)
        .with_username_prompt(prompt_username);

    let summary = orchestrator.send(SendRequest {
        images,
        username: resolved.username.clone(),
        host: args.host.clone(),
        overwrite: args.overwrite,
    })?;

    print_send_summary(&summary, ctx);
    let (username, host) = (summary.username.clone(), summary.host.clone());
    remember(resolved, &username, host.as_deref());
    Ok(())
}

fn print_send_summary(summary: &SendSummary, ctx: &AppContext) {
    let line = summary.headline();
    if summary.failed() == 0 {
        println!("{} {}", paint_ok(ctx, "✓"), line);
    } else {
        println!("{} {}", paint_bad(ctx, "✗"), line);
    }

    if !ctx.quiet {
        for record in summary.records.iter().filter(|r| r.status.is_failed()) {
            println!("  {} {}", record.source, paint_bad(ctx, &record.status.to_string()));
        }
    }
    if summary.cancelled {
        println!("{}", paint_bad(ctx, "cancelled before all images were processed"));
    }
}

#[instrument(skip_all, fields(delete_deconvolved = args.delete_deconvolved, delete_raw = args.delete_raw))]
pub fn retrieve_run(args: RetrieveArgs, ctx: &AppContext) -> Result<()> {
    let resolved = resolve(&args.share, args.host.as_deref())?;
    let mut project = open_project(args.project.as_deref(), &resolved.config)?;

    let progress = BarProgress::new(ctx, "retrieve");
    let orchestrator = TransferOrchestrator::new(batch_settings(&resolved), &NoRemote)
        .with_progress(&progress)
        .with_username_prompt(prompt_username);

    let summary = orchestrator.retrieve(
        RetrieveRequest {
            username: resolved.username.clone(),
            host: args.host.clone(),
            delete_deconvolved: args.delete_deconvolved,
            delete_raw: args.delete_raw,
        },
        &mut project,
    )?;

    print_retrieve_summary(&summary, ctx);
    let (username, host) = (summary.username.clone(), summary.host.clone());
    remember(resolved, &username, host.as_deref());
    Ok(())
}

#[derive(Tabled)]
struct FailureRow {
    file: String,
    backend: String,
    stage: String,
    reason: String,
}

fn print_retrieve_summary(summary: &RetrieveSummary, ctx: &AppContext) {
    let line = summary.headline();
    let failures: Vec<FailureRow> = summary
        .failures()
        .map(|item| FailureRow {
            file: item
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| item.file.display().to_string()),
            backend: item.backend.map(|b| b.to_string()).unwrap_or_else(|| "?".to_string()),
            stage: item.stage.to_string(),
            reason: item.failure.clone().unwrap_or_default(),
        })
        .collect();

    if failures.is_empty() {
        println!("{} {}", paint_ok(ctx, "✓"), line);
    } else {
        println!("{} {}", paint_bad(ctx, "✗"), line);
        println!("{}", Table::new(failures));
    }

    if !ctx.quiet {
        for item in summary.items.iter().filter(|i| !i.warnings.is_empty()) {
            for w in &item.warnings {
                println!("  {} {}: {w}", paint_warn(ctx, "!"), item.file.display());
            }
        }
    }
    if summary.cancelled {
        println!("{}", paint_bad(ctx, "cancelled before all results were processed"));
    }
}

#[derive(Tabled)]
struct DiscoveredRow {
    tag: String,
    raw_name: String,
    code: String,
    file: String,
}

#[instrument(skip_all)]
pub fn discover_run(args: DiscoverArgs, ctx: &AppContext) -> Result<()> {
    let resolved = resolve(&args.share, None)?;
    let username = resolved
        .username
        .clone()
        .or_else(prompt_username)
        .ok_or_else(|| anyhow::anyhow!("no username given; use --username"))?;

    let share = &resolved.config.share;
    let parser = ResultNameParser::new(share.code_length)?;
    let files = discovery::try_discover(&resolved.root, &username, &share.result_extension)?;

    if files.is_empty() {
        if !ctx.quiet {
            println!("Nothing to retrieve for {username}");
        }
        return Ok(());
    }

    let rows: Vec<DiscoveredRow> = files
        .iter()
        .map(|f| {
            let (raw_name, code) = match parser.parse_path(&f.path) {
                Ok(n) => (n.raw_name, n.code),
                Err(_) => ("?".to_string(), "?".to_string()),
            };
            let tag = match f.backend() {
                Ok(_) => f.tag.clone(),
                Err(_) => format!("{} (unsupported)", f.tag),
            };
            DiscoveredRow {
                tag,
                raw_name,
                code,
                file: f
                    .path
                    .strip_prefix(&f.tag_folder)
                    .unwrap_or(&f.path)
                    .display()
                    .to_string(),
            }
        })
        .collect();

    println!("{}", Table::new(rows));
    if !ctx.quiet {
        println!("{} pending result(s)", files.len());
    }
    Ok(())
}
