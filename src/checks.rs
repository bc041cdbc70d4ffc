use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::models::{Check, CheckOutcome};
use crate::runlog::{Category, RunLog};

// ── Command runner seam ─────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Zero exit status.
    pub success: bool,
    /// stdout and stderr, lossily decoded and concatenated.
    pub output: String,
}

/// Everything that talks to a DC goes through here, so tests can swap in
/// a canned transcript and count invocations.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<CommandOutput>;
}

/// Real implementation: spawn the admin tool and capture its output.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
        let out = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow!("failed to spawn {program}: {e}"))?;

        let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(CommandOutput {
            success: out.status.success(),
            output: text,
        })
    }
}

// ── Wait-with-timeout ───────────────────────────────────────────

/// Run one command on a detached task and wait at most `deadline`.
/// `None` means the deadline expired; the task keeps running in the
/// background (dropping the JoinHandle abandons, it does not cancel).
pub async fn run_with_deadline(
    runner: Arc<dyn CommandRunner>,
    program: String,
    args: Vec<String>,
    deadline: Duration,
) -> Option<anyhow::Result<CommandOutput>> {
    let handle = tokio::spawn(async move { runner.run(&program, &args).await });
    match tokio::time::timeout(deadline, handle).await {
        Ok(Ok(result)) => Some(result),
        Ok(Err(join_err)) => Some(Err(anyhow!("check task panicked: {join_err}"))),
        Err(_elapsed) => None,
    }
}

// ── Reachability probe ──────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub reachable: bool,
    /// Address echoed by ping, e.g. the bracketed IP on Windows.
    pub address: Option<String>,
}

/// Single ping; no retry. The branch for the whole target hangs on this.
pub async fn probe(
    runner: Arc<dyn CommandRunner>,
    host: &str,
    deadline: Duration,
) -> ProbeResult {
    let count_flag = if cfg!(windows) { "-n" } else { "-c" };
    let args = vec![count_flag.to_string(), "1".to_string(), host.to_string()];
    match run_with_deadline(runner, "ping".into(), args, deadline).await {
        Some(Ok(out)) => parse_ping(&out),
        Some(Err(e)) => {
            warn!("ping {host} failed to run: {e}");
            ProbeResult::default()
        }
        None => {
            debug!("ping {host} timed out");
            ProbeResult::default()
        }
    }
}

fn parse_ping(out: &CommandOutput) -> ProbeResult {
    let reachable = out.success && out.output.to_ascii_lowercase().contains("ttl=");
    let address = out
        .output
        .find('[')
        .and_then(|start| {
            let rest = &out.output[start + 1..];
            rest.find(']').map(|end| rest[..end].to_string())
        })
        .filter(|s| !s.is_empty());
    ProbeResult { reachable, address }
}

// ── Per-target check runner ─────────────────────────────────────

/// Run the static checklist against one reachable DC, sequentially, each
/// check bounded by `deadline`. Returns exactly one outcome per check.
pub async fn run_checks(
    runner: Arc<dyn CommandRunner>,
    host: &str,
    checklist: &[Check],
    deadline: Duration,
    log: &mut RunLog,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(checklist.len());
    for check in checklist {
        let (program, args) = check.command(host);
        let outcome = match run_with_deadline(runner.clone(), program, args, deadline).await {
            Some(Ok(out)) => {
                if check.passed(&out.output) {
                    CheckOutcome::Success
                } else {
                    CheckOutcome::Failure
                }
            }
            Some(Err(e)) => {
                log.warn(Category::Check, format!("{host} {}: {e}", check.label()));
                CheckOutcome::Failure
            }
            None => {
                log.warn(
                    Category::Check,
                    format!("{host} {}: no answer within deadline", check.label()),
                );
                CheckOutcome::Timeout
            }
        };
        debug!(host, check = check.label(), "{}", outcome.label());
        outcomes.push(outcome);
    }
    outcomes
}

/// Placeholder row for a DC that failed its reachability probe: every
/// column shows the fixed failure marker, nothing is executed.
pub fn offline_outcomes(checklist: &[Check]) -> Vec<CheckOutcome> {
    vec![CheckOutcome::Failure; checklist.len()]
}
