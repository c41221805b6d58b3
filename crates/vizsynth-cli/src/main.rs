mod render;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use vizsynth_contracts::chat::{parse_intent, SaveTarget, CHAT_HELP_COMMANDS};
use vizsynth_contracts::events::EventWriter;
use vizsynth_contracts::runs::summary::{now_utc_iso, write_summary, RunSummary};
use vizsynth_contracts::synthesis::{
    IgnoreReason, RunToken, SynthesisPhase, SynthesisState, TOPIC_SUGGESTIONS,
};
use vizsynth_engine::gemini::{DEFAULT_IMAGE_MODEL, DEFAULT_SEARCH_MODEL};
use vizsynth_engine::{
    error_chain_text, GeminiConfig, RunOutcome, RunTicket, Submission, SynthesisEngine,
};

use crate::render::{render_saved, render_sources, render_state, render_suggestions, render_welcome};

const LOG_ENV: &str = "VIZSYNTH_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";
const ERROR_TEXT_MAX_CHARS: usize = 400;

#[derive(Debug, Parser)]
#[command(
    name = "vizsynth",
    version,
    about = "Search-grounded direct vs. conglomerate image synthesis"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Synthesize one topic and write images plus summary.json.
    Run(RunArgs),
    /// Interactive session: type topics, save results, reset.
    Chat(ChatArgs),
    /// Print the built-in topic suggestions.
    Suggestions,
}

#[derive(Debug, Clone, Args)]
struct BackendArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_SEARCH_MODEL)]
    search_model: String,
    #[arg(long, default_value = DEFAULT_IMAGE_MODEL)]
    image_model: String,
    /// Per-request timeout in seconds; unset means no timeout.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Use the offline backend instead of Gemini.
    #[arg(long)]
    dryrun: bool,
}

impl BackendArgs {
    fn events_path(&self) -> PathBuf {
        self.events
            .clone()
            .unwrap_or_else(|| self.out.join("events.jsonl"))
    }
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    topic: String,
    /// Skip writing the generated images.
    #[arg(long)]
    no_save: bool,
    #[command(flatten)]
    backend: BackendArgs,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[command(flatten)]
    backend: BackendArgs,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("vizsynth error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_synthesis(args),
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Suggestions => {
            print!("{}", render_suggestions());
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn build_engine(args: &BackendArgs) -> Result<SynthesisEngine> {
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events = EventWriter::with_random_session(args.events_path());
    info!(
        session = events.session_id(),
        events = %events.path().display(),
        dryrun = args.dryrun,
        "starting synthesis engine"
    );
    if args.dryrun {
        return SynthesisEngine::dryrun(events);
    }
    let mut config = GeminiConfig::from_env();
    config.search_model = args.search_model.clone();
    config.image_model = args.image_model.clone();
    config.request_timeout = args.timeout.map(Duration::from_secs);
    SynthesisEngine::gemini(config, events)
}

/// Exit code 0 when the run completed, 1 when it ended in an error state,
/// 2 when the topic was rejected before any request.
fn run_synthesis(args: RunArgs) -> Result<i32> {
    let engine = build_engine(&args.backend)?;
    let started_at = now_utc_iso();

    let (run, state) = match engine.synthesize(&args.topic)? {
        RunOutcome::Settled { run, state } => (run, state),
        RunOutcome::Ignored(reason) => {
            eprintln!("Nothing to synthesize: {}", describe_ignored(reason));
            return Ok(2);
        }
        RunOutcome::Superseded { run } => {
            anyhow::bail!("{run} was superseded before it settled");
        }
    };
    print!("{}", render_state(&state));

    let mut saved_paths = Vec::new();
    if state.phase() == SynthesisPhase::Completed && !args.no_save {
        let saved = engine.save_images(&args.backend.out, SaveTarget::Both)?;
        print!("{}", render_saved(&saved));
        saved_paths = saved.into_iter().map(|image| image.path).collect();
    }

    let summary = RunSummary::from_state(
        engine.event_writer().session_id(),
        Some(run.value()),
        &state,
        started_at,
        saved_paths,
    );
    let extra = backend_metadata(&args.backend);
    let summary_path = args.backend.out.join("summary.json");
    write_summary(&summary_path, &summary, extra.as_object())?;

    Ok(if state.phase() == SynthesisPhase::Completed {
        0
    } else {
        1
    })
}

fn backend_metadata(args: &BackendArgs) -> Value {
    if args.dryrun {
        return json!({ "backend": "dryrun" });
    }
    json!({
        "backend": "gemini",
        "search_model": args.search_model,
        "image_model": args.image_model,
    })
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let engine = build_engine(&args.backend)?;
    let out_dir = args.backend.out.clone();

    let stdin = io::stdin();
    let mut line = String::new();

    println!("Visual synthesis chat started. Type /help for commands.");
    print!("{}", render_welcome());

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

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "submit" => {
                let topic = intent.topic.clone().unwrap_or_default();
                start_run(&engine, &topic)?;
            }
            "suggest" => {
                let index = intent
                    .command_args
                    .get("index")
                    .and_then(Value::as_u64)
                    .and_then(|idx| usize::try_from(idx).ok());
                match index.and_then(|idx| TOPIC_SUGGESTIONS.get(idx.wrapping_sub(1))) {
                    Some(topic) => start_run(&engine, topic)?,
                    None => {
                        let arg = value_as_str(intent.command_args.get("arg"));
                        if !arg.is_empty() {
                            println!(
                                "/suggest expects a number between 1 and {}",
                                TOPIC_SUGGESTIONS.len()
                            );
                        }
                        print!("{}", render_suggestions());
                    }
                }
            }
            "save" => {
                let target = intent.save_target().unwrap_or(SaveTarget::Both);
                let dir = intent
                    .command_args
                    .get("dir")
                    .and_then(Value::as_str)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| out_dir.clone());
                save_from_chat(&engine, &dir, target);
            }
            "sources" => {
                let state = engine.snapshot()?;
                match state.search_result() {
                    Some(search) if !search.grounding_links.is_empty() => {
                        print!("{}", render_sources(search));
                    }
                    Some(_) => println!("The search cited no sources."),
                    None => println!("No search results yet."),
                }
            }
            "status" => {
                let state = engine.snapshot()?;
                println!("{}", describe_status(&state, engine.current_run()?));
                if matches!(
                    state,
                    SynthesisState::Completed { .. } | SynthesisState::Error { .. }
                ) {
                    print!("{}", render_state(&state));
                }
            }
            "reset" => {
                engine.reset()?;
                println!("Session reset.");
                print!("{}", render_welcome());
            }
            "quit" => break,
            "unknown" => {
                let command = value_as_str(intent.command_args.get("command"));
                println!("Unknown command: /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    if engine.snapshot()?.is_in_flight() {
        engine.reset()?;
    }
    Ok(())
}

/// Submit and drive the run on a worker thread so the prompt stays usable.
fn start_run(engine: &SynthesisEngine, topic: &str) -> Result<()> {
    match engine.submit(topic)? {
        Submission::Started(ticket) => {
            println!("Searching for \"{}\" ({})...", ticket.topic.trim(), ticket.run);
            let worker = engine.clone();
            thread::spawn(move || {
                let result = worker.drive(&ticket);
                report_run(&ticket, result);
            });
        }
        Submission::Ignored(reason) => {
            println!("{}", describe_ignored(reason));
        }
    }
    Ok(())
}

fn report_run(ticket: &RunTicket, result: Result<RunOutcome>) {
    let text = match result {
        Ok(RunOutcome::Settled { state, .. }) => format!("\n{}", render_state(&state)),
        Ok(RunOutcome::Superseded { run }) => {
            format!(
                "\n({run} for \"{}\" was superseded; its results were discarded)\n",
                ticket.topic.trim()
            )
        }
        Ok(RunOutcome::Ignored(_)) => return,
        Err(err) => format!(
            "\nRun aborted: {}\n",
            error_chain_text(&err, ERROR_TEXT_MAX_CHARS)
        ),
    };
    let mut stdout = io::stdout().lock();
    let _ = write!(stdout, "{text}> ");
    let _ = stdout.flush();
}

fn save_from_chat(engine: &SynthesisEngine, dir: &Path, target: SaveTarget) {
    match engine.save_images(dir, target) {
        Ok(saved) => print!("{}", render_saved(&saved)),
        Err(err) => println!(
            "Save failed: {}",
            error_chain_text(&err, ERROR_TEXT_MAX_CHARS)
        ),
    }
}

fn describe_ignored(reason: IgnoreReason) -> &'static str {
    match reason {
        IgnoreReason::BlankTopic => "enter a topic to visualize",
        IgnoreReason::RunInFlight => "a synthesis is already running; wait for it or /reset",
        IgnoreReason::StaleRun | IgnoreReason::UnexpectedPhase => "request ignored",
    }
}

fn describe_status(state: &SynthesisState, run: Option<RunToken>) -> String {
    let run = run.map(|run| format!(" ({run})")).unwrap_or_default();
    match state.topic() {
        Some(topic) => format!("Status: {}{run} for \"{}\"", state.phase(), topic.trim()),
        None => format!("Status: {}", state.phase()),
    }
}

fn value_as_str(value: Option<&Value>) -> &str {
    value.and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizsynth_contracts::events::read_event_types;

    fn backend(out: &Path) -> BackendArgs {
        BackendArgs {
            out: out.to_path_buf(),
            events: None,
            search_model: DEFAULT_SEARCH_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            timeout: None,
            dryrun: true,
        }
    }

    #[test]
    fn cli_parses_run_flags_with_defaults() -> Result<()> {
        let cli = Cli::try_parse_from([
            "vizsynth",
            "run",
            "--topic",
            "Dark Matter",
            "--out",
            "/tmp/vs",
            "--timeout",
            "30",
        ])?;
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.topic, "Dark Matter");
        assert_eq!(args.backend.search_model, "gemini-3-flash-preview");
        assert_eq!(args.backend.image_model, "gemini-2.5-flash-image");
        assert_eq!(args.backend.timeout, Some(30));
        assert!(!args.backend.dryrun);
        assert_eq!(
            args.backend.events_path(),
            PathBuf::from("/tmp/vs/events.jsonl")
        );
        Ok(())
    }

    #[test]
    fn dryrun_run_writes_images_and_summary() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let code = run_synthesis(RunArgs {
            topic: "The Silk Road".to_string(),
            no_save: false,
            backend: backend(temp.path()),
        })?;
        assert_eq!(code, 0);
        assert!(temp.path().join("direct-The Silk Road.png").is_file());
        assert!(temp.path().join("synthesis-The Silk Road.png").is_file());

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("summary.json"))?)?;
        assert_eq!(summary["phase"], "completed");
        assert_eq!(summary["backend"], "dryrun");
        assert_eq!(summary["visualizations"].as_array().map(Vec::len), Some(4));
        assert_eq!(summary["saved_images"].as_array().map(Vec::len), Some(2));

        let types = read_event_types(&temp.path().join("events.jsonl"))?;
        assert_eq!(types.first().map(String::as_str), Some("session_started"));
        assert_eq!(
            types.iter().filter(|value| *value == "image_saved").count(),
            2
        );
        Ok(())
    }

    #[test]
    fn refused_run_exits_with_error_code() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let code = run_synthesis(RunArgs {
            topic: "topics they refuse".to_string(),
            no_save: false,
            backend: backend(temp.path()),
        })?;
        assert_eq!(code, 1);
        assert!(!temp.path().join("direct-topics they refuse.png").exists());

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(temp.path().join("summary.json"))?)?;
        assert_eq!(summary["phase"], "error");
        assert!(summary["error"]
            .as_str()
            .unwrap_or_default()
            .starts_with("Model Refusal: "));
        assert!(summary["summary"].is_null());
        Ok(())
    }

    #[test]
    fn blank_topic_is_rejected_before_any_request() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let code = run_synthesis(RunArgs {
            topic: "   ".to_string(),
            no_save: false,
            backend: backend(temp.path()),
        })?;
        assert_eq!(code, 2);
        assert!(!temp.path().join("summary.json").exists());
        Ok(())
    }

    #[test]
    fn status_line_names_phase_run_and_topic() {
        let state = SynthesisState::Searching {
            topic: " Dark Matter ".to_string(),
        };
        assert_eq!(describe_status(&state, None), "Status: searching for \"Dark Matter\"");
        assert_eq!(describe_status(&SynthesisState::Idle, None), "Status: idle");
    }
}
