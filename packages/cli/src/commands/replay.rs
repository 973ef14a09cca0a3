use super::{load_document, resolve_path};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use vellum_editor::{EditorConfig, Envelope, Repository};

#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Document snapshot (JSON)
    pub document: String,

    /// Envelope log, one JSON envelope per line
    pub log: String,

    /// Editor config file (defaults to vellum.config.json in the current directory)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Write the resulting document here instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,

    /// Stop at the first envelope that fails
    #[arg(long)]
    pub strict: bool,
}

/// Counts for one replay run
#[derive(Debug, Default, PartialEq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub partial: usize,
    pub failed: usize,
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let config = match &args.config {
        Some(path) => EditorConfig::from_path(&resolve_path(cwd, path))?,
        None => EditorConfig::load(cwd)?,
    };

    let doc_path = resolve_path(cwd, &args.document);
    let log_path = resolve_path(cwd, &args.log);
    let doc = load_document(&doc_path)?;
    let log = std::fs::read_to_string(&log_path)
        .with_context(|| format!("Cannot read log {}", log_path.display()))?;

    eprintln!("{}", "▶ Replaying envelopes...".bright_blue().bold());

    let mut repo = Repository::with_config(doc, config);
    let summary = replay_log(&mut repo, &log, args.strict)?;

    let exported = serde_json::to_string_pretty(&repo.export())?;
    match &args.output {
        Some(output) => {
            let out_path = resolve_path(cwd, output);
            std::fs::write(&out_path, exported)
                .with_context(|| format!("Cannot write {}", out_path.display()))?;
            eprintln!("   {} {}", "→".cyan(), out_path.display());
        }
        None => println!("{}", exported),
    }

    eprintln!();
    eprintln!(
        "✨ {} {} applied, {} partial, {} failed",
        "Done".green().bold(),
        summary.applied,
        summary.partial,
        summary.failed
    );

    Ok(())
}

/// Apply every envelope in `log` to `repo`, one transaction each.
/// Blank lines are ignored. A malformed line is an error in strict mode and
/// counted as failed otherwise.
pub fn replay_log(repo: &mut Repository, log: &str, strict: bool) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (number, line) in log.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let number = number + 1;

        let outcome = Envelope::from_json_line(line)
            .map_err(anyhow::Error::from)
            .and_then(|envelope| repo.apply(&envelope).map_err(anyhow::Error::from));

        match outcome {
            Ok(report) if report.is_complete() => {
                eprintln!("   {} {} ({} cmds)", "✓".green(), report.unit_id, report.applied);
                summary.applied += 1;
            }
            Ok(report) => {
                eprintln!(
                    "   {} {} skipped {}: {}",
                    "⚠".yellow(),
                    report.unit_id,
                    report.skipped.len(),
                    report.skipped.join("; ")
                );
                summary.partial += 1;
            }
            Err(err) => {
                if strict {
                    return Err(err.context(format!("line {}", number)));
                }
                eprintln!("   {} line {}: {}", "✗".red(), number, err);
                tracing::debug!("replay failed at line {}: {:?}", number, err);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
