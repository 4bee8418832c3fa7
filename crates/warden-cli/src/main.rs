//! `warden` — the command-line entry point for the multi-agent
//! decompilation workflow: extract/claim/scratch/commit/workflow/state/
//! worktree/stub subcommands, plus a `daemon` mode for long-lived sessions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warden::error::WardenError;
use warden_core::model::FunctionStatus;

use warden_cli::context::{CliContext, ContextOverrides};
use warden_cli::{commands, output};

/// Multi-agent coordinator for a C decompilation project: tracks which
/// function each agent is working on, arbitrates claims on functions and
/// subdirectories, and drives the extract/compile/commit cycle.
#[derive(Parser)]
#[command(name = "warden", version, about)]
struct Cli {
    /// Emit machine-readable JSON instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as newline-delimited JSON instead of plain text.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Path to `config.toml`. Defaults to `~/.config/warden/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the splits JSON mapping function names to source files and
    /// addresses. Without this, address/source lookups from names alone.
    #[arg(long, global = true)]
    splits: Option<PathBuf>,

    /// Explicit scratch service base URL, overriding auto-detection.
    #[arg(long, global = true)]
    scratch_url: Option<String>,

    /// Decompilation project root. Defaults to the configured repo root.
    #[arg(long, global = true)]
    repo_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn overrides(&self) -> ContextOverrides {
        ContextOverrides {
            config_path: self.config.clone(),
            splits_path: self.splits.clone(),
            scratch_url: self.scratch_url.clone(),
            repo_root: self.repo_root.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract: list/inspect known functions and their source files.
    #[command(subcommand)]
    Extract(ExtractCommand),
    /// Scratch: create, compile, update, and search remote scratches.
    #[command(subcommand)]
    Scratch(ScratchCommand),
    /// Claim: reserve a function for the duration of one agent's work on it.
    #[command(subcommand)]
    Claim(ClaimCommand),
    /// Worktree: list git worktrees and manage subdirectory locks.
    #[command(subcommand)]
    Worktree(WorktreeCommand),
    /// Stub: locate and insert the sentinel comments placeholdering
    /// unimplemented functions.
    #[command(subcommand)]
    Stub(StubCommand),
    /// Commit: replace a function's implementation and commit the result.
    #[command(subcommand)]
    Commit(CommitCommand),
    /// Workflow: end-to-end orchestration across extract/compile/commit.
    #[command(subcommand)]
    Workflow(WorkflowCommand),
    /// State: cross-agent status, consistency checks, and audit history.
    #[command(subcommand)]
    State(StateCommand),
    /// Daemon: run a long-lived, socket-served instance of this CLI.
    #[command(subcommand)]
    Daemon(DaemonCommand),
}

#[derive(Subcommand)]
enum ExtractCommand {
    /// List known functions, optionally narrowed to one status.
    List {
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// List every distinct source file any known function references.
    Files,
    /// Resolve (registering if new) a function, optionally creating its scratch.
    Get {
        name: String,
        #[arg(long)]
        create_scratch: bool,
    },
}

#[derive(Subcommand)]
enum ScratchCommand {
    /// Find-or-create a scratch for a function.
    Create { name: String },
    /// Compile a function's scratch, optionally pushing new source first.
    Compile {
        name: String,
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Overwrite a scratch's source code without compiling.
    Update { name: String, source: PathBuf },
    /// Fetch a function's scratch as it stands on the remote service.
    Get { name: String },
    /// Search the remote service's scratch listing.
    Search {
        query: Option<String>,
        #[arg(long)]
        platform: Option<String>,
        #[arg(long)]
        compiler: Option<String>,
        #[arg(long, default_value_t = 50)]
        page_size: u32,
    },
    /// Preview the stripped context a new scratch would be created with.
    SearchContext { name: String },
}

#[derive(Subcommand)]
enum ClaimCommand {
    /// Claim a function for the invoking agent.
    Add { name: String },
    /// Release a claim. `--force` releases whoever holds it.
    Release {
        name: String,
        #[arg(long)]
        force: bool,
    },
    /// List every active claim.
    List,
}

#[derive(Subcommand)]
enum WorktreeCommand {
    /// List every git worktree under the repository root.
    List,
    /// Acquire (or renew) the lock on a subdirectory key.
    Lock {
        key: String,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        branch: Option<String>,
    },
    /// Release a subdirectory lock. `--force` releases whoever holds it.
    Unlock {
        key: String,
        #[arg(long)]
        force: bool,
    },
    /// Lock-holder/pending-commit status for every known subdirectory.
    Status,
}

#[derive(Subcommand)]
enum StubCommand {
    /// Insert a stub marker for a function at its resolved address.
    Add { function: String },
    /// List every stub marker and definition found in a source file.
    List { source_file: String },
    /// Check whether a function already has a marker or definition.
    Check { source_file: String, function: String },
}

#[derive(Subcommand)]
enum CommitCommand {
    /// Replace a function's implementation, verify it compiles, and commit.
    Apply {
        name: String,
        /// Path to a file containing the new source code.
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        diagnosis: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkflowCommand {
    /// Run the terminal commit step for a function, end to end.
    Finish {
        name: String,
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        diagnosis: Option<String>,
    },
}

#[derive(Subcommand)]
enum StateCommand {
    /// Cross-referenced agent/subdirectory/broken-build summary.
    Status,
    /// Find (and optionally fix) function rows with a stale stored status.
    Validate {
        #[arg(long)]
        fix: bool,
    },
    /// The audit log, optionally narrowed to one entity type and/or id.
    History {
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
    /// Every agent the registry has seen.
    Agents,
    /// Scratches that haven't been verified recently.
    Stale,
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Bind a Unix domain socket and serve requests until killed.
    Start {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum StatusArg {
    Unclaimed,
    Claimed,
    InProgress,
    Matched,
    Committed,
    CommittedNeedsFix,
    InReview,
    Merged,
}

impl From<StatusArg> for FunctionStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Unclaimed => Self::Unclaimed,
            StatusArg::Claimed => Self::Claimed,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Matched => Self::Matched,
            StatusArg::Committed => Self::Committed,
            StatusArg::CommittedNeedsFix => Self::CommittedNeedsFix,
            StatusArg::InReview => Self::InReview,
            StatusArg::Merged => Self::Merged,
        }
    }
}

fn read_source(path: &PathBuf) -> Result<String, WardenError> {
    Ok(std::fs::read_to_string(path)?)
}

fn run(cli: &Cli) -> Result<i32, WardenError> {
    // `daemon start` never opens a single-shot context; everything else does.
    if let Command::Daemon(DaemonCommand::Start { socket }) = &cli.command {
        let socket_path = socket.clone().unwrap_or_else(|| {
            warden::daemon::default_socket_path(&cli.repo_root.as_ref().map_or_else(
                || "default".to_owned(),
                |p| p.display().to_string(),
            ))
        });
        commands::daemon::start(&socket_path, cli.overrides())?;
        return Ok(0);
    }

    let mut ctx = CliContext::build(&cli.overrides())?;

    let code = match &cli.command {
        Command::Daemon(_) => unreachable!("handled above"),
        Command::Extract(sub) => match sub {
            ExtractCommand::List { status } => {
                output::finish(commands::extract::list(&ctx, (*status).map(Into::into)), cli.json)
            }
            ExtractCommand::Files => output::finish(commands::extract::files(&ctx), cli.json),
            ExtractCommand::Get { name, create_scratch } => {
                output::finish(commands::extract::get(&mut ctx, name, *create_scratch), cli.json)
            }
        },
        Command::Scratch(sub) => match sub {
            ScratchCommand::Create { name } => output::finish(commands::scratch::create(&mut ctx, name), cli.json),
            ScratchCommand::Compile { name, source } => {
                let source_code = source.as_ref().map(read_source).transpose();
                match source_code {
                    Ok(source_code) => output::finish(
                        commands::scratch::compile(&mut ctx, name, source_code.as_deref()),
                        cli.json,
                    ),
                    Err(err) => output::finish(Err::<(), _>(err), cli.json),
                }
            }
            ScratchCommand::Update { name, source } => match read_source(source) {
                Ok(code) => output::finish(commands::scratch::update(&mut ctx, name, &code), cli.json),
                Err(err) => output::finish(Err::<(), _>(err), cli.json),
            },
            ScratchCommand::Get { name } => output::finish(commands::scratch::get(&ctx, name), cli.json),
            ScratchCommand::Search { query, platform, compiler, page_size } => output::finish(
                commands::scratch::search(
                    &ctx,
                    query.as_deref(),
                    platform.as_deref(),
                    compiler.as_deref(),
                    *page_size,
                ),
                cli.json,
            ),
            ScratchCommand::SearchContext { name } => {
                output::finish(commands::scratch::search_context(&mut ctx, name), cli.json)
            }
        },
        Command::Claim(sub) => match sub {
            ClaimCommand::Add { name } => output::finish(commands::claim::add(&mut ctx, name), cli.json),
            ClaimCommand::Release { name, force } => {
                output::finish(commands::claim::release(&mut ctx, name, *force), cli.json)
            }
            ClaimCommand::List => output::finish(commands::claim::list(&ctx), cli.json),
        },
        Command::Worktree(sub) => match sub {
            WorktreeCommand::List => output::finish(commands::worktree::list(&ctx), cli.json),
            WorktreeCommand::Lock { key, path, branch } => output::finish(
                commands::worktree::lock(&mut ctx, key, path.as_deref(), branch.as_deref()),
                cli.json,
            ),
            WorktreeCommand::Unlock { key, force } => {
                output::finish(commands::worktree::unlock(&mut ctx, key, *force), cli.json)
            }
            WorktreeCommand::Status => output::finish(commands::worktree::status(&ctx), cli.json),
        },
        Command::Stub(sub) => match sub {
            StubCommand::Add { function } => output::finish(commands::stub::add(&ctx, function), cli.json),
            StubCommand::List { source_file } => output::finish(commands::stub::list(&ctx, source_file), cli.json),
            StubCommand::Check { source_file, function } => {
                output::finish(commands::stub::check(&ctx, source_file, function), cli.json)
            }
        },
        Command::Commit(CommitCommand::Apply { name, source, dry_run, force, diagnosis }) => {
            match read_source(source) {
                Ok(code) => output::finish(
                    commands::commit::apply(&mut ctx, name, &code, *dry_run, *force, diagnosis.as_deref()),
                    cli.json,
                ),
                Err(err) => output::finish(Err::<(), _>(err), cli.json),
            }
        }
        Command::Workflow(WorkflowCommand::Finish { name, source, force, diagnosis }) => match read_source(source) {
            Ok(code) => output::finish(
                commands::workflow::finish(&mut ctx, name, &code, *force, diagnosis.as_deref()),
                cli.json,
            ),
            Err(err) => output::finish(Err::<(), _>(err), cli.json),
        },
        Command::State(sub) => match sub {
            StateCommand::Status => output::finish(commands::state::status(&ctx), cli.json),
            StateCommand::Validate { fix } => output::finish(commands::state::validate(&mut ctx, *fix), cli.json),
            StateCommand::History { entity_type, entity_id, limit } => output::finish(
                commands::state::history(&ctx, entity_type.as_deref(), entity_id.as_deref(), *limit),
                cli.json,
            ),
            StateCommand::Agents => output::finish(commands::state::agents(&ctx), cli.json),
            StateCommand::Stale => output::finish(commands::state::stale(&ctx), cli.json),
        },
    };

    Ok(code)
}

fn main() {
    let cli = Cli::parse();
    warden::telemetry::init(cli.json_logs);

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            output::finish(Err::<(), _>(err), cli.json)
        }
    };

    std::process::exit(code);
}
