//! Subcommand dispatch for the `neardupe` binary.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use yansi::Paint;

use crate::actions::{FileOperations, SystemFileOperations};
use crate::cli::{
    Cli, Commands, ConfigCommand, DeleteArgs, ExportArgs, ListArgs, OutputFormat, RescanArgs,
    ScanArgs,
};
use crate::config::Config;
use crate::duplicates::{DuplicateGroup, GroupId};
use crate::error::ExitCode;
use crate::fingerprint::ExtractorSet;
use crate::logging::init_logging;
use crate::output::{CsvOutput, JsonOutput};
use crate::progress::TerminalProgress;
use crate::scanner::RootPath;
use crate::session::{
    Progress, ScanEngine, ScanSession, SessionError, SessionId, SessionResult, SessionStatus,
};
use crate::signal::{install_handler, PauseOnInterrupt};
use crate::store::{FingerprintStore, RecordId};

/// Output switches shared by every subcommand.
#[derive(Debug, Clone, Copy)]
struct OutputMode {
    quiet: bool,
    accessible: bool,
}

/// Run the parsed command line. Returns the process exit code.
///
/// # Errors
///
/// Configuration, store and session errors, with context.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    if cli.no_color {
        yansi::disable();
    }
    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("Warning: logging unavailable: {e}");
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.database.clone() {
        config.database = Some(db);
    }
    let display = OutputMode {
        quiet: cli.quiet,
        accessible: cli.accessible,
    };

    match cli.command {
        Commands::Scan(args) => scan(config, args, display),
        Commands::Resume(args) => {
            let engine = open_engine(&config, display)?;
            let id = SessionId(args.id);
            engine.resume(id).with_context(|| format!("cannot resume session {id}"))?;
            drive(&engine, id, display)
        }
        Commands::Rescan(RescanArgs { id, force }) => {
            let engine = open_engine(&config, display)?;
            let id = SessionId(id);
            engine
                .rescan(id, force)
                .with_context(|| format!("cannot rescan session {id}"))?;
            drive(&engine, id, display)
        }
        Commands::Cancel(args) => {
            let engine = open_engine(&config, display)?;
            let id = SessionId(args.id);
            engine.cancel(id)?;
            engine.wait(id)?;
            println!("Session {id} cancelled");
            Ok(ExitCode::Success)
        }
        Commands::List(args) => {
            let engine = open_engine(&config, display)?;
            list(&engine, args)
        }
        Commands::Export(args) => {
            let engine = open_engine(&config, display)?;
            export(&engine, args)
        }
        Commands::Delete(args) => {
            let engine = open_engine(&config, display)?;
            delete(&engine, args)
        }
        Commands::ClearCache => {
            let removed = open_engine(&config, display)?.clear_cache()?;
            println!("Removed {removed} finished session(s)");
            Ok(ExitCode::Success)
        }
        Commands::Config(command) => configure(&config, cli.config.as_deref(), command),
    }
}

fn open_engine(config: &Config, display: OutputMode) -> Result<Arc<ScanEngine>> {
    config.validate()?;
    let path = config.database_path()?;
    let store = FingerprintStore::open(&path)
        .with_context(|| format!("cannot open fingerprint store {}", path.display()))?;
    let extractors = ExtractorSet::new(&config.extractor_settings());
    let progress = TerminalProgress::with_accessible(display.quiet, display.accessible);
    Ok(Arc::new(
        ScanEngine::new(Arc::new(store), Arc::new(extractors), config.engine_settings())
            .with_progress(Arc::new(progress)),
    ))
}

fn scan(mut config: Config, args: ScanArgs, display: OutputMode) -> Result<ExitCode> {
    if !args.types.is_empty() {
        config.families = args.types;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    config.ignore_patterns.extend(args.ignore_patterns);
    config.follow_symlinks |= args.follow_symlinks;

    let families = config.validate()?;
    let engine = open_engine(&config, display)?;
    let roots = args
        .paths
        .iter()
        .map(|p| RootPath::new(p, !args.no_recursive))
        .collect();
    let id = engine.create_session(roots, families, config.threshold)?;
    if !display.quiet {
        println!("Session {}", id.bold());
    }
    if args.no_start {
        return Ok(ExitCode::Success);
    }
    engine.start(id)?;
    drive(&engine, id, display)
}

/// Wait for a running session, pausing it on Ctrl+C, then report.
fn drive(engine: &Arc<ScanEngine>, id: SessionId, display: OutputMode) -> Result<ExitCode> {
    let handler = install_handler()
        .map_err(|e| log::warn!("{e}; Ctrl+C will terminate the scan"))
        .ok();
    let watch = handler
        .as_ref()
        .map(|h| PauseOnInterrupt::watch(h, Arc::clone(engine), id));
    let status = engine.wait(id);
    drop(watch);

    match status? {
        SessionStatus::Completed => {
            let session = engine.session(id)?;
            let progress = engine.get_progress(id)?;
            let groups = collect_groups(engine, &session, false)?;
            if !display.quiet {
                print_groups(&groups);
                print_summary(&progress, &groups);
            }
            Ok(exit_code(&progress, &groups))
        }
        SessionStatus::Paused => {
            eprintln!(
                "Session {id} paused. Continue with `neardupe resume {id}`."
            );
            Ok(ExitCode::Interrupted)
        }
        SessionStatus::Cancelled => {
            eprintln!("Session {id} cancelled");
            Ok(ExitCode::Interrupted)
        }
        other => {
            let session = engine.session(id)?;
            anyhow::bail!(
                "session {id} ended as {other}: {}",
                session.error.unwrap_or_else(|| "no detail recorded".into())
            )
        }
    }
}

fn collect_groups(
    engine: &ScanEngine,
    session: &ScanSession,
    preview: bool,
) -> SessionResult<Vec<DuplicateGroup>> {
    let mut all = Vec::new();
    for &family in &session.families {
        let groups = if preview {
            engine.preview_groups(session.id, family)?
        } else {
            engine.get_groups(session.id, family)?
        };
        all.extend(groups);
    }
    Ok(all)
}

fn exit_code(progress: &Progress, groups: &[DuplicateGroup]) -> ExitCode {
    if progress.errored > 0 {
        ExitCode::PartialSuccess
    } else if groups.is_empty() {
        ExitCode::NoDuplicates
    } else {
        ExitCode::Success
    }
}

fn list(engine: &ScanEngine, args: ListArgs) -> Result<ExitCode> {
    let Some(id) = args.id.map(SessionId) else {
        let sessions = engine.list_sessions()?;
        if sessions.is_empty() {
            println!("No sessions");
        }
        for session in &sessions {
            print_session(session);
        }
        return Ok(ExitCode::Success);
    };

    let session = engine.session(id)?;
    print_session(&session);
    let groups = match collect_groups(engine, &session, false) {
        Err(SessionError::NotReady { .. }) => {
            println!("{}", "Scan still running; showing groups found so far".dim());
            collect_groups(engine, &session, true)?
        }
        other => other?,
    };
    print_groups(&groups);
    print_summary(&engine.get_progress(id)?, &groups);

    if args.failed {
        for record in engine.failed_records(id)? {
            let reason = record
                .error
                .map(|e| format!("{}: {}", e.kind.as_str(), e.detail))
                .unwrap_or_default();
            println!(
                "  {} {} ({})",
                "failed".red(),
                record.identity.path.display(),
                reason
            );
        }
    }
    Ok(ExitCode::Success)
}

fn export(engine: &ScanEngine, args: ExportArgs) -> Result<ExitCode> {
    let id = SessionId(args.id);
    let session = engine.session(id)?;
    let progress = engine.get_progress(id)?;
    let groups = collect_groups(engine, &session, args.preview)
        .with_context(|| format!("cannot export session {id}"))?;
    let code = exit_code(&progress, &groups);

    let mut out: Box<dyn Write> = match args.output {
        Some(ref path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    match args.format {
        OutputFormat::Csv => CsvOutput::new(&groups).write_to(&mut out)?,
        OutputFormat::Json => JsonOutput::new(&session, &progress, &groups, code).write_to(&mut out, true)?,
    }
    out.flush()?;
    if let Some(path) = args.output {
        log::info!("Exported {} group(s) to {}", groups.len(), path.display());
    }
    Ok(ExitCode::Success)
}

fn delete(engine: &ScanEngine, args: DeleteArgs) -> Result<ExitCode> {
    let ops = if args.permanent {
        SystemFileOperations::permanent()
    } else {
        SystemFileOperations::trash()
    };
    let members: Vec<RecordId> = args.members.iter().copied().map(RecordId).collect();
    let group = GroupId(args.group);
    let report = engine
        .delete_members(group, &members, &ops as &dyn FileOperations)
        .with_context(|| format!("cannot delete from group {group}"))?;

    for skipped in &report.skipped {
        println!("  {} {}: {}", "skipped".yellow(), skipped.record.0, skipped.reason);
    }
    for failed in &report.failed {
        println!("  {} {}: {}", "failed".red(), failed.record.0, failed.reason);
    }
    println!("{}", report.summary());
    Ok(if report.all_succeeded() {
        ExitCode::Success
    } else {
        ExitCode::PartialSuccess
    })
}

fn configure(
    config: &Config,
    path: Option<&std::path::Path>,
    command: ConfigCommand,
) -> Result<ExitCode> {
    match command {
        ConfigCommand::Init { force } => {
            let target = match path {
                Some(p) => p.to_path_buf(),
                None => Config::config_path()?,
            };
            if target.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                );
            }
            let written = config.save(Some(&target))?;
            println!("Wrote {}", written.display());
        }
        ConfigCommand::Show => {
            print!(
                "{}",
                toml::to_string_pretty(config).context("cannot serialize configuration")?
            );
        }
    }
    Ok(ExitCode::Success)
}

fn print_session(session: &ScanSession) {
    let status = session.status.as_str();
    let status = match session.status {
        SessionStatus::Completed => status.green(),
        SessionStatus::Failed => status.red(),
        SessionStatus::Paused | SessionStatus::Cancelled => status.yellow(),
        _ => status.cyan(),
    };
    let families: Vec<&str> = session.families.iter().map(|f| f.as_str()).collect();
    let roots: Vec<String> = session
        .roots
        .iter()
        .map(|r| r.path.display().to_string())
        .collect();
    println!(
        "{:>5}  {:<11}  {:<30}  {:>5.2}  {}  {}",
        session.id.bold(),
        status,
        families.join(","),
        session.threshold,
        session.created_at.format("%Y-%m-%d %H:%M"),
        roots.join(" ")
    );
    if let Some(ref error) = session.error {
        println!("       {}", error.red());
    }
}

fn print_groups(groups: &[DuplicateGroup]) {
    for (idx, group) in groups.iter().enumerate() {
        let id = group
            .id
            .map_or_else(|| format!("#{}", idx + 1), |id| id.to_string());
        println!(
            "\n{} {} ({} files, {} reclaimable)",
            format!("Group {id}").bold(),
            group.family.as_str().dim(),
            group.len(),
            ByteSize(group.wasted_space())
        );
        for (pos, member) in group.members.iter().enumerate() {
            let marker = if pos == 0 { "*" } else { " " };
            println!(
                "  {} [{:>6}] {:>6.1}%  {:>10}  {}",
                marker.green(),
                member.record.0,
                member.score * 100.0,
                ByteSize(member.size).to_string(),
                member.path.display()
            );
        }
    }
}

fn print_summary(progress: &Progress, groups: &[DuplicateGroup]) {
    let wasted: u64 = groups.iter().map(DuplicateGroup::wasted_space).sum();
    println!(
        "\n{} files, {} group(s), {} reclaimable",
        progress.discovered,
        groups.len().bold(),
        ByteSize(wasted)
    );
    if progress.errored > 0 {
        println!(
            "{}",
            format!(
                "{} file(s) could not be fingerprinted ({} unreadable, {} unsupported, {} timed out)",
                progress.errored, progress.unreadable, progress.unsupported, progress.timed_out
            )
            .yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::ContentFamily;
    use crate::session::FamilyProgress;
    use crate::store::RecordId;
    use crate::duplicates::GroupMember;
    use chrono::Utc;
    use std::path::PathBuf;

    fn progress(failed: u64) -> Progress {
        let session = ScanSession {
            id: SessionId(1),
            roots: vec![RootPath::new("/data", true)],
            families: vec![ContentFamily::Code],
            threshold: 0.9,
            status: SessionStatus::Completed,
            enumerated: true,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        Progress::from_counts(
            &session,
            vec![FamilyProgress {
                family: Some(ContentFamily::Code),
                pending: 0,
                in_progress: 0,
                done: 4,
                failed,
            }],
            &[],
        )
    }

    fn one_group() -> Vec<DuplicateGroup> {
        vec![DuplicateGroup::new(
            ContentFamily::Code,
            vec![
                GroupMember::new(RecordId(1), PathBuf::from("/data/a.rs"), 10, 0),
                GroupMember::new(RecordId(2), PathBuf::from("/data/b.rs"), 10, 0),
            ],
        )]
    }

    #[test]
    fn test_exit_code_selection() {
        assert_eq!(exit_code(&progress(0), &one_group()), ExitCode::Success);
        assert_eq!(exit_code(&progress(0), &[]), ExitCode::NoDuplicates);
        assert_eq!(exit_code(&progress(2), &one_group()), ExitCode::PartialSuccess);
    }

    #[test]
    fn test_scan_and_export_through_cli() {
        use clap::Parser;

        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir(&data).unwrap();
        let source = "fn main() {\n    let total = 1 + 2;\n    println!(\"{total}\");\n}\n";
        std::fs::write(data.join("a.rs"), source).unwrap();
        std::fs::write(data.join("b.rs"), source).unwrap();
        let db = dir.path().join("store.db");
        let db_arg = db.to_string_lossy().to_string();
        let data_arg = data.to_string_lossy().to_string();

        let cli = Cli::try_parse_from([
            "neardupe", "-q", "--database", &db_arg, "scan", &data_arg, "--types", "code",
        ])
        .unwrap();
        assert_eq!(run_app(cli).unwrap(), ExitCode::Success);

        let out = dir.path().join("groups.csv");
        let out_arg = out.to_string_lossy().to_string();
        let cli = Cli::try_parse_from([
            "neardupe", "-q", "--database", &db_arg, "export", "1", "--format", "csv", "--output",
            &out_arg,
        ])
        .unwrap();
        assert_eq!(run_app(cli).unwrap(), ExitCode::Success);
        let csv = std::fs::read_to_string(out).unwrap();
        assert!(csv.contains("a.rs"));
        assert!(csv.contains("b.rs"));

        let cli =
            Cli::try_parse_from(["neardupe", "-q", "--database", &db_arg, "list", "1", "--failed"])
                .unwrap();
        assert_eq!(run_app(cli).unwrap(), ExitCode::Success);
    }
}
