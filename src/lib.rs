//! agentflow — natural-language request routing and workflow graph orchestration.
//!
//! Text is classified, casual input is answered directly, and everything else
//! is either routed to a registered agent or run through a workflow graph.
//! The [`integration::IntegrationManager`] ties these together with external
//! capabilities and tracks every run as an execution record.

pub mod agent_core;
pub mod config;
pub mod failure;
pub mod integration;
pub mod workflow;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub use agent_core::{
    agent_fn, Agent, AgentDescriptor, AgentError, AgentKind, AgentRegistry, AgentResult,
    AgentRouter, InputClassifier, RoutingDecision, RoutingResult, TaskClassification, TaskType,
};
pub use config::{load_config, load_or_default, AgentflowConfig, ConfigError};
pub use failure::{ErrorKind, Failure};
pub use integration::{
    Capability, CapabilityKind, IntegratedRequest, IntegrationError, IntegrationManager,
    ProcessResult,
};
pub use workflow::{
    node_fn, CompiledWorkflow, EdgeCondition, RunControl, RunOptions, StatePatch, WorkflowBuilder,
    WorkflowEngine, WorkflowState,
};

/// Log file name inside the log directory.
pub const LOG_FILE_NAME: &str = "agentflow.log";

/// Rotated log files kept next to the live one.
pub const LOG_FILES_KEPT: u32 = 3;

/// Return the platform-standard data directory for agentflow.
///
/// - macOS: `~/Library/Application Support/agentflow/`
/// - Windows: `{FOLDERID_RoamingAppData}\agentflow\`
/// - Linux: `$XDG_DATA_HOME/agentflow/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.agentflow/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("agentflow");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".agentflow")
}

/// Path of the SQLite execution store inside `dir`, creating `dir` if needed.
pub fn store_path(dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(dir.join("agentflow.db"))
}

/// Initialize the tracing subscriber, writing structured logs to `log_dir`.
///
/// Previous logs are shifted to `agentflow.log.1` and up, keeping
/// [`LOG_FILES_KEPT`] generations, before a fresh `agentflow.log` is opened.
/// `RUST_LOG` overrides the default `agentflow=info,warn` filter. Fails if the
/// directory or file cannot be created, or a global subscriber is already set.
pub fn init_tracing(log_dir: &Path) -> io::Result<()> {
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_logs(&log_path, LOG_FILES_KEPT)?;
    let log_file = std::fs::File::create(&log_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentflow=info,warn"));

    // `File` is unbuffered, so each event reaches the OS as one write.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "agentflow: logging started"
    );
    Ok(())
}

/// `agentflow.log` with `.{generation}` appended.
fn rotated_path(base: &Path, generation: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{generation}"));
    PathBuf::from(name)
}

/// Shift `base` to `base.1`, `base.1` to `base.2` and so on, dropping the
/// generation past `keep`. Gaps in the chain are fine.
fn rotate_logs(base: &Path, keep: u32) -> io::Result<()> {
    let chain: Vec<PathBuf> = std::iter::once(base.to_path_buf())
        .chain((1..=keep).map(|generation| rotated_path(base, generation)))
        .collect();

    if let Some(oldest) = chain.last() {
        ignore_missing(std::fs::remove_file(oldest))?;
    }
    for pair in chain.windows(2).rev() {
        ignore_missing(std::fs::rename(&pair[0], &pair[1]))?;
    }
    Ok(())
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
