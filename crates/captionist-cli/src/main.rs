use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use captionist_contracts::chat::{parse_command, SessionCommand, SESSION_HELP_COMMANDS};
use captionist_contracts::models::{ModelCatalog, SubmissionSettings, Tone};
use captionist_contracts::sessions::SeenImageCache;
use captionist_contracts::submissions::{fingerprint, AnalysisResult, CaptionStyle, ImageFile};
use captionist_contracts::CaptionError;
use captionist_engine::{
    default_backend_registry, revealed_prefix, EngineConfig, Orchestrator, Phase,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "captionist", version, about = "Describe and caption images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Describe one image and print its captions.
    Caption(CaptionArgs),
    /// Inspect or edit the caption service's history.
    History(HistoryArgs),
    /// Print the content fingerprint of an image.
    Fingerprint(FingerprintArgs),
    /// Interactive slash-command session.
    Session(SessionArgs),
}

#[derive(Debug, Args)]
struct BackendArgs {
    #[arg(long, default_value = "http")]
    backend: String,
    #[arg(long)]
    api_base: Option<String>,
    #[arg(long)]
    timeout_s: Option<u64>,
    #[arg(long)]
    state_dir: Option<PathBuf>,
    #[arg(long)]
    no_events: bool,
}

#[derive(Debug, Args)]
struct CaptionArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    tone: Option<String>,
    #[arg(long)]
    model: Option<String>,
    /// Type the result out at reveal pace.
    #[arg(long)]
    reveal: bool,
    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[command(subcommand)]
    action: HistoryAction,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    List,
    Show { id: String },
    Delete { id: String },
    Clear,
}

#[derive(Debug, Args)]
struct FingerprintArgs {
    path: PathBuf,
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct SessionArgs {
    #[command(flatten)]
    backend: BackendArgs,
}

const HISTORY_CAPTION_PREVIEW_CHARS: usize = 60;
const REVEAL_TICK: Duration = Duration::from_millis(15);

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("captionist error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Caption(args) => run_caption(args),
        Command::History(args) => run_history(args),
        Command::Fingerprint(args) => run_fingerprint(args),
        Command::Session(args) => run_session(args),
    }
}

fn load_config(args: &BackendArgs) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    if let Some(api_base) = args.api_base.as_deref() {
        config.api_base = api_base.trim().trim_end_matches('/').to_string();
    }
    if let Some(timeout_s) = args.timeout_s {
        config.request_timeout = Duration::from_secs(timeout_s.clamp(1, 600));
    }
    if let Some(state_dir) = args.state_dir.clone() {
        config.state_dir = state_dir;
    }
    config
}

fn build_orchestrator(args: &BackendArgs) -> Result<(Orchestrator, EngineConfig)> {
    let config = load_config(args);
    let registry = default_backend_registry(&config).context("caption backend setup failed")?;
    let backend = registry.get(&args.backend).ok_or_else(|| {
        anyhow!(
            "unknown backend '{}'. Use one of: {}",
            args.backend,
            registry.names().join(", ")
        )
    })?;

    tracing::debug!(
        backend = %args.backend,
        api_base = %config.api_base,
        state_dir = %config.state_dir.display(),
        "caption backend selected"
    );
    let mut orchestrator = Orchestrator::new(backend, &config)
        .with_seen_cache(SeenImageCache::new(config.seen_cache_path()));
    if !args.no_events {
        orchestrator = orchestrator.with_event_file(config.events_path());
    }
    Ok((orchestrator, config))
}

/// Upper bound for one describe-then-caption run, retries included.
fn settle_budget(config: &EngineConfig) -> Duration {
    let attempts = config.transport_retries + 1;
    config.request_timeout.saturating_mul(2 * attempts)
        + config.retry_backoff.saturating_mul(2 * attempts)
        + Duration::from_secs(5)
}

fn parse_settings(
    catalog: &ModelCatalog,
    tone: Option<&str>,
    model: Option<&str>,
) -> Result<SubmissionSettings> {
    let tone = Tone::parse(tone.unwrap_or_default()).map_err(|message| anyhow!(message))?;
    let model = catalog
        .resolve(model.unwrap_or_default())
        .map_err(|message| anyhow!(message))?;
    Ok(SubmissionSettings::new(tone, model))
}

fn run_caption(args: CaptionArgs) -> Result<i32> {
    let (mut orchestrator, config) = build_orchestrator(&args.backend)?;
    let settings = parse_settings(
        orchestrator.catalog(),
        args.tone.as_deref(),
        args.model.as_deref(),
    )?;

    if let Err(err) = open_file(&mut orchestrator, &args.image) {
        return Ok(report(&err));
    }
    orchestrator.start_analysis(settings)?;
    let phase = orchestrator.settle(settle_budget(&config));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result_json(&orchestrator))?);
        return Ok(if phase == Phase::Result { 0 } else { 1 });
    }
    match phase {
        Phase::Result if args.reveal => {
            play_reveal(&mut orchestrator)?;
            Ok(0)
        }
        Phase::Result => {
            if let Some(analysis) = orchestrator.machine().analysis() {
                print_analysis(analysis);
            }
            Ok(0)
        }
        _ => {
            print_failure(&orchestrator);
            Ok(1)
        }
    }
}

fn run_history(args: HistoryArgs) -> Result<i32> {
    let (mut orchestrator, _) = build_orchestrator(&args.backend)?;
    let outcome = match args.action {
        HistoryAction::List => orchestrator.refresh_history().map(|_| {
            print_history(&orchestrator);
        }),
        HistoryAction::Show { id } => orchestrator.open_history_entry(&id).map(|_| {
            print_history_view(&orchestrator);
        }),
        HistoryAction::Delete { id } => orchestrator
            .refresh_history()
            .and_then(|_| orchestrator.delete_history_entry(&id))
            .map(|_| println!("Deleted {id}.")),
        HistoryAction::Clear => orchestrator
            .clear_history()
            .map(|count| println!("Cleared {count} history entries.")),
    };
    Ok(match outcome {
        Ok(()) => 0,
        Err(err) => report(&err),
    })
}

fn run_fingerprint(args: FingerprintArgs) -> Result<i32> {
    let image = match ImageFile::from_path(&args.path).and_then(ImageFile::validate) {
        Ok(image) => image,
        Err(err) => return Ok(report(&err)),
    };
    let digest = fingerprint(image.bytes());
    println!(
        "{}  {} ({}, {} bytes)",
        digest,
        image.name(),
        image.media_type().mime(),
        image.len()
    );

    let mut config = EngineConfig::from_env();
    if let Some(state_dir) = args.state_dir {
        config.state_dir = state_dir;
    }
    let mut seen = SeenImageCache::new(config.seen_cache_path());
    if let Some(previous) = seen.lookup(&digest) {
        println!(
            "Seen {} time(s) since {}, last as {}.",
            previous.submissions, previous.first_seen, previous.file_name
        );
    }
    Ok(0)
}

fn run_session(args: SessionArgs) -> Result<i32> {
    let (mut orchestrator, config) = build_orchestrator(&args.backend)?;
    let mut settings = SubmissionSettings::default();
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Captionist session ({} backend). Type /help for commands.",
        orchestrator.backend_name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(line.trim_end_matches(['\n', '\r'])) {
            SessionCommand::Noop => {}
            SessionCommand::Open { path } => {
                if let Err(err) = open_file(&mut orchestrator, Path::new(&path)) {
                    report(&err);
                }
            }
            SessionCommand::SetTone { value } => match Tone::parse(&value) {
                Ok(tone) => {
                    settings.tone = tone;
                    println!("Tone: {}", settings.tone_key());
                }
                Err(message) => println!("{message}"),
            },
            SessionCommand::SetModel { value } => match orchestrator.catalog().resolve(&value) {
                Ok(model) => {
                    settings.model = model;
                    println!("Model: {}", settings.model_key());
                }
                Err(message) => println!("{message}"),
            },
            SessionCommand::Analyze => match orchestrator.start_analysis(settings) {
                Ok(_) => match orchestrator.settle(settle_budget(&config)) {
                    Phase::Result => play_reveal(&mut orchestrator)?,
                    _ => print_failure(&orchestrator),
                },
                Err(err) => println!("Cannot analyze: {err}. Open an image first."),
            },
            SessionCommand::Reset => {
                orchestrator.reset();
                println!("Cleared.");
            }
            SessionCommand::Status => print_status(&orchestrator, settings),
            SessionCommand::Captions => match orchestrator.machine().analysis() {
                Some(analysis) => print_analysis(analysis),
                None => println!("No captions yet."),
            },
            SessionCommand::History => match orchestrator.refresh_history() {
                Ok(_) => print_history(&orchestrator),
                Err(err) => {
                    report(&err);
                }
            },
            SessionCommand::Load { id } => match orchestrator.open_history_entry(&id) {
                Ok(_) => play_reveal(&mut orchestrator)?,
                Err(err) => {
                    report(&err);
                }
            },
            SessionCommand::Delete { id } => match orchestrator.delete_history_entry(&id) {
                Ok(()) => println!("Deleted {id}."),
                Err(err) => {
                    report(&err);
                }
            },
            SessionCommand::ClearHistory => match orchestrator.clear_history() {
                Ok(count) => println!("Cleared {count} history entries."),
                Err(err) => {
                    report(&err);
                }
            },
            SessionCommand::Help => println!("Commands: {}", SESSION_HELP_COMMANDS.join(" ")),
            SessionCommand::Quit => break,
            SessionCommand::MissingArgument { command } => {
                println!("/{command} requires an argument");
            }
            SessionCommand::Unknown { command, .. } => {
                println!("Unknown command /{command}. Type /help for commands.");
            }
        }
    }
    Ok(0)
}

fn open_file(orchestrator: &mut Orchestrator, path: &Path) -> Result<(), CaptionError> {
    let file = ImageFile::from_path(path)?;
    orchestrator.select_file(file)?;
    if let Some(submission) = orchestrator.machine().submission() {
        println!(
            "Loaded {} ({}, {} bytes, {}).",
            submission.file_name(),
            submission.image().media_type().mime(),
            submission.image().len(),
            submission.fingerprint().short()
        );
    }
    if let Some(seen) = orchestrator.seen_before() {
        println!(
            "Seen before as {} ({} submission(s) since {}).",
            seen.file_name, seen.submissions, seen.first_seen
        );
    }
    Ok(())
}

fn report(err: &CaptionError) -> i32 {
    eprintln!("{}", err.user_message());
    1
}

fn print_status(orchestrator: &Orchestrator, settings: SubmissionSettings) {
    let machine = orchestrator.machine();
    println!("State: {}", machine.phase());
    if let Some(submission) = machine.submission() {
        println!(
            "Image: {} ({})",
            submission.file_name(),
            submission.fingerprint().short()
        );
    }
    println!(
        "Tone: {}  Model: {}",
        settings.tone_key(),
        settings.model_key()
    );
    if let Some(failure) = machine.failure() {
        println!("Error: {}", failure.error.user_message());
    }
}

fn print_analysis(analysis: &AnalysisResult) {
    if analysis.duplicate_of.is_some() {
        println!("This image was analyzed before; reusing its description.\n");
    }
    println!("Description:\n{}\n", analysis.description.readable());
    if let Some(reasoning) = analysis.reasoning.as_deref() {
        println!("Reasoning:\n{reasoning}\n");
    }
    print_captions(analysis);
}

fn print_captions(analysis: &AnalysisResult) {
    println!("Captions:");
    for (key, text) in analysis.captions.iter() {
        if text.trim().is_empty() {
            continue;
        }
        let label = CaptionStyle::from_key(key)
            .map(CaptionStyle::label)
            .unwrap_or(key);
        println!("  {label}: {text}");
    }
    println!("\nPrimary: {}", analysis.primary_caption);
}

fn print_failure(orchestrator: &Orchestrator) {
    let machine = orchestrator.machine();
    if let Some(description) = machine.current_description() {
        println!("Description:\n{}\n", description.readable());
    }
    if let Some(failure) = machine.failure() {
        let stage = failure
            .stage
            .map(|stage| format!(" during {stage}"))
            .unwrap_or_default();
        eprintln!("Failed{stage}: {}", failure.error.user_message());
    }
}

fn print_history(orchestrator: &Orchestrator) {
    let history = orchestrator.history();
    if history.is_empty() {
        println!("No history yet.");
        return;
    }
    for entry in history.entries() {
        let preview = revealed_prefix(&entry.primary_caption, HISTORY_CAPTION_PREVIEW_CHARS);
        let ellipsis = if preview.len() < entry.primary_caption.len() {
            "…"
        } else {
            ""
        };
        println!(
            "{}  {}  {}  {preview}{ellipsis}",
            entry.id, entry.created_at, entry.source_file_name
        );
    }
}

fn print_history_view(orchestrator: &Orchestrator) {
    let Some(view) = orchestrator.machine().history_view() else {
        return;
    };
    println!("Image: {}", view.source_file_name);
    if let Some(fingerprint) = view.fingerprint.as_deref() {
        println!("Fingerprint: {fingerprint}");
    }
    if let Some(analysis) = orchestrator.machine().analysis() {
        println!();
        print_analysis(analysis);
    }
}

fn result_json(orchestrator: &Orchestrator) -> serde_json::Value {
    let machine = orchestrator.machine();
    let failure = machine.failure().map(|failure| {
        json!({
            "stage": failure.stage.map(|stage| stage.as_str()),
            "kind": failure.error.kind(),
            "message": failure.error.user_message(),
        })
    });
    let analysis = machine.analysis().map(|analysis| {
        json!({
            "captions": analysis.captions,
            "primary_caption": analysis.primary_caption,
            "reasoning": analysis.reasoning,
            "duplicate_of": analysis.duplicate_of,
        })
    });
    json!({
        "state": machine.phase().as_str(),
        "file_name": machine.submission().map(|submission| submission.file_name()),
        "fingerprint": machine.submission().map(|submission| submission.fingerprint().as_str()),
        "description": machine.current_description().map(|description| description.raw()),
        "result": analysis,
        "error": failure,
    })
}

/// Types the current result out at the scheduler's pace: description, then
/// reasoning, then the captions once their gate opens.
fn play_reveal(orchestrator: &mut Orchestrator) -> Result<()> {
    let Some(analysis) = orchestrator.machine().analysis().cloned() else {
        return Ok(());
    };
    if analysis.duplicate_of.is_some() {
        println!("This image was analyzed before; reusing its description.\n");
    }
    let description = analysis.description.readable();
    let reasoning = analysis.reasoning.clone().unwrap_or_default();
    let mut stdout = io::stdout();
    let mut description_shown = 0;
    let mut reasoning_shown = 0;

    writeln!(stdout, "Description:")?;
    loop {
        let Some(frame) = orchestrator.reveal_frame(Instant::now()) else {
            break;
        };
        if frame.description > description_shown {
            write!(
                stdout,
                "{}",
                reveal_slice(&description, description_shown, frame.description)
            )?;
            description_shown = frame.description;
        }
        let description_done = description_shown == frame.description_total;
        if description_done && frame.reasoning > reasoning_shown {
            if reasoning_shown == 0 {
                write!(stdout, "\n\nReasoning:\n")?;
            }
            write!(
                stdout,
                "{}",
                reveal_slice(&reasoning, reasoning_shown, frame.reasoning)
            )?;
            reasoning_shown = frame.reasoning;
        }
        stdout.flush()?;
        if frame.captions_visible && description_done && reasoning_shown == frame.reasoning_total
        {
            break;
        }
        thread::sleep(REVEAL_TICK);
    }
    writeln!(stdout, "\n")?;
    print_captions(&analysis);
    Ok(())
}

fn reveal_slice(text: &str, from: usize, to: usize) -> &str {
    let start = revealed_prefix(text, from).len();
    &revealed_prefix(text, to)[start..]
}
