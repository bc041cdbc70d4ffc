use chrono::{DateTime, Utc};

// ── Check definitions ───────────────────────────────────────────

/// One column of the summary table. The checklist for a run is static:
/// service checks first, then dcdiag checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Windows service expected to be in the RUNNING state.
    Service { service: String },
    /// Named dcdiag test expected to report "passed test <name>".
    Diagnostic { test: String },
}

impl Check {
    /// Column header in the summary table.
    pub fn label(&self) -> &str {
        match self {
            Check::Service { service } => service,
            Check::Diagnostic { test } => test,
        }
    }

    /// Command line to run this check against `host`.
    pub fn command(&self, host: &str) -> (String, Vec<String>) {
        match self {
            Check::Service { service } => (
                "sc".into(),
                vec![format!("\\\\{host}"), "query".into(), service.clone()],
            ),
            Check::Diagnostic { test } => (
                "dcdiag".into(),
                vec![format!("/test:{test}"), format!("/s:{host}")],
            ),
        }
    }

    /// Success predicate over the check command's output. Only consulted
    /// when the command finished before the deadline.
    pub fn passed(&self, output: &str) -> bool {
        match self {
            Check::Service { .. } => output.contains("RUNNING"),
            Check::Diagnostic { test } => output.contains(&format!("passed test {test}")),
        }
    }
}

// ── Check outcome ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Success,
    Failure,
    Timeout,
}

impl CheckOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CheckOutcome::Success => "OK",
            CheckOutcome::Failure => "FAIL",
            CheckOutcome::Timeout => "TIMEOUT",
        }
    }

    /// Cell background in the summary table.
    pub fn color(&self) -> &'static str {
        match self {
            CheckOutcome::Success => "#b6e8b6",
            CheckOutcome::Failure => "#f1a1a1",
            CheckOutcome::Timeout => "#f5d78e",
        }
    }
}

// ── Inventory ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Forest {
    pub name: String,
    pub domains: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DomainController {
    pub hostname: String,
    pub domain: String,
    pub site: Option<String>,
}

/// Static attributes collected best-effort from a reachable DC.
/// Every field degrades independently; a failed lookup leaves `None`.
#[derive(Debug, Clone, Default)]
pub struct DcAttributes {
    pub os: Option<String>,
    pub site: Option<String>,
    pub address: Option<String>,
    pub sync_partners: Vec<String>,
    pub reported_time: Option<String>,
    pub highest_usn: Option<u64>,
}

// ── Per-run health record ───────────────────────────────────────

/// Everything the report renders for one domain controller.
/// `outcomes` holds exactly one entry per check in the run's checklist;
/// for an unreachable DC it is all-Failure placeholders and no check
/// command was ever issued.
#[derive(Debug, Clone)]
pub struct DcHealth {
    pub dc: DomainController,
    pub reachable: bool,
    pub outcomes: Vec<CheckOutcome>,
    pub attributes: DcAttributes,
    /// Count of error/critical System-log events in the trailing window,
    /// or an inline error string when the query itself failed.
    pub error_log: ErrorLogCell,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorLogCell {
    Count(u64),
    QueryError(String),
    /// DC never queried (unreachable).
    Skipped,
}

#[derive(Debug, Clone)]
pub struct DomainHealth {
    pub name: String,
    pub reachable: bool,
    pub controllers: Vec<DcHealth>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub forest: String,
    pub generated_at: DateTime<Utc>,
    pub domains: Vec<DomainHealth>,
}

impl RunReport {
    pub fn controllers(&self) -> impl Iterator<Item = &DcHealth> {
        self.domains.iter().flat_map(|d| d.controllers.iter())
    }
}
