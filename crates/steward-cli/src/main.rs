//! Terminal data agent powered by steward-rs.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable.
//!
//! ```sh
//! # Interactive mode
//! steward --workdir /srv/app --sql-command 'mysql -B -e "$STEWARD_SQL" shop'
//!
//! # One-shot mode
//! steward --prompt "Which tables reference customers?"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use steward_cli::{CliConfig, Interrupts};
use steward_rs::prelude::*;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Terminal data agent powered by steward-rs.
#[derive(Parser)]
#[command(name = "steward", version)]
struct Cli {
    /// Initial prompt (one-shot mode). Without this, starts an interactive session.
    #[arg(long)]
    prompt: Option<String>,

    /// Working directory for commands and file operations.
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Model to use for completions.
    #[arg(long, default_value = steward_rs::DEFAULT_MODEL)]
    model: String,

    /// Maximum model round-trips per request.
    #[arg(long, default_value_t = 10)]
    max_iterations: u32,

    /// Context window size in tokens.
    #[arg(long, default_value_t = steward_rs::context::DEFAULT_CONTEXT_WINDOW)]
    context_window: usize,

    /// Seconds of command silence before asking whether to keep waiting.
    #[arg(long, default_value_t = 60)]
    idle_timeout: u64,

    /// Audit log of risk decisions (relative to the working directory).
    #[arg(long, default_value = ".steward/audit.log")]
    audit_log: PathBuf,

    /// Session file to load history from and save it to.
    #[arg(long)]
    session: Option<PathBuf>,

    /// Database client command; the SQL is passed in $STEWARD_SQL.
    #[arg(long)]
    sql_command: Option<String>,

    /// Directory of markdown skills.
    #[arg(long)]
    skills_dir: Option<PathBuf>,

    /// Do not register the http_request tool.
    #[arg(long)]
    no_http: bool,

    /// Debug-level logging.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> (CliConfig, Option<String>, bool) {
        let workdir = std::fs::canonicalize(&self.workdir).unwrap_or(self.workdir);
        let config = CliConfig {
            model: self.model,
            max_iterations: self.max_iterations,
            context_window: self.context_window,
            idle_timeout_secs: self.idle_timeout,
            workdir,
            audit_log: self.audit_log,
            session: self.session,
            sql_command: self.sql_command,
            skills_dir: self.skills_dir,
            http: !self.no_http,
        };
        (config, self.prompt, self.verbose)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "steward=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

/// Everything that lives for the whole session.
struct Session {
    client: OpenRouterClient,
    registry: ToolRegistry,
    agent_config: AgentConfig,
    skills: InMemorySkills,
    audit: FileAuditLog,
    cache: CompressionCache,
    ui: ConsoleUi,
    store: Option<FileSessionStore>,
    domain_context: String,
    prior: PriorHistory,
    interrupts: Interrupts,
}

impl Session {
    fn open(config: &CliConfig, api_key: String) -> Result<Self, String> {
        let client = OpenRouterClient::new(api_key)
            .map_err(|e| format!("failed to create API client: {e}"))?;
        let registry = config.build_registry()?;
        let skills = config
            .build_skills()
            .map_err(|e| format!("failed to load skills: {e}"))?;
        let agent_config = config.build_agent_config();
        let audit = FileAuditLog::new(config.audit_log_path());

        let store = config.session.clone().map(FileSessionStore::new);
        let prior = match &store {
            Some(store) => store.load().map_err(|e| e.to_string())?,
            None => PriorHistory::Empty,
        };
        tracing::debug!(
            "Session ready: {} tool(s), {} skill(s), prior history {}",
            registry.len(),
            skills.metadata().len(),
            if prior.is_empty() { "empty" } else { "loaded" }
        );

        Ok(Self {
            client,
            registry,
            agent_config,
            skills,
            audit,
            cache: CompressionCache::default(),
            ui: ConsoleUi::new(),
            store,
            domain_context: config.domain_context(),
            prior,
            interrupts: Interrupts::new(),
        })
    }

    /// Run one request. Ctrl-C cancels it without ending the session.
    async fn turn(&mut self, text: &str) -> Result<TurnOutcome, AgentError> {
        let cancel = self.interrupts.begin_turn();

        let input = TurnInput::new(text)
            .with_domain_context(self.domain_context.clone())
            .with_prior(self.prior.clone());
        let result = Orchestrator::new(
            &self.client,
            &self.registry,
            &self.agent_config,
            &self.ui,
            &self.audit,
            &cancel,
        )
        .with_skills(&self.skills)
        .with_compression_cache(&self.cache)
        .with_event_handler(&LoggingHandler)
        .run_turn(input)
        .await;
        self.interrupts.end_turn();

        if let Ok(outcome) = &result {
            self.prior = PriorHistory::Structured(outcome.messages.clone());
            if let Some(store) = &self.store
                && let Err(e) = store.save(&outcome.messages)
            {
                tracing::warn!("Failed to save session: {e}");
            }
        }
        result
    }
}

fn print_outcome(result: &Result<TurnOutcome, AgentError>) {
    match result {
        Ok(outcome) if !outcome.text.is_empty() => println!("{}", outcome.text),
        Ok(_) => {}
        Err(e) => eprintln!("Error: {e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let (config, prompt, verbose) = Cli::parse().into_config();
    init_tracing(verbose);

    let api_key = match std::env::var("OPENROUTER_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("Error: OPENROUTER_KEY environment variable is not set");
            return ExitCode::FAILURE;
        }
    };
    let mut session = match Session::open(&config, api_key) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = session.interrupts.listen();
    let code = run(&mut session, prompt).await;
    listener.abort();
    code
}

async fn run(session: &mut Session, prompt: Option<String>) -> ExitCode {
    if let Some(prompt) = prompt {
        let result = session.turn(&prompt).await;
        print_outcome(&result);
        return if result.is_ok() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    eprintln!("steward: type a request, or 'exit' to quit.");
    let quit = session.interrupts.quit_token();
    loop {
        eprint!("> ");
        let line = tokio::select! {
            biased;
            _ = quit.cancelled() => break,
            line = session.ui.read_line() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if matches!(text, "exit" | "quit") {
            break;
        }
        let result = session.turn(text).await;
        print_outcome(&result);
    }
    ExitCode::SUCCESS
}
