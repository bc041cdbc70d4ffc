use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

// ── Severity / category tags ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn code(self) -> u8 {
        match self {
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Error => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Run,
    Discovery,
    Probe,
    Check,
    EventLog,
    Report,
    Mail,
    Vault,
}

impl Category {
    fn name(self) -> &'static str {
        match self {
            Category::Run => "Run",
            Category::Discovery => "Discovery",
            Category::Probe => "Probe",
            Category::Check => "Check",
            Category::EventLog => "EventLog",
            Category::Report => "Report",
            Category::Mail => "Mail",
            Category::Vault => "Vault",
        }
    }
}

// ── Run log ─────────────────────────────────────────────────────

/// Plain-text run log, one line per event:
/// `<time>: <code>-<Category>: <message>`.
///
/// The file is reset (or created) when the log is opened and the buffered
/// lines are written once at the end of the run — no shared handle is kept
/// open while checks execute. Every entry is mirrored to tracing.
pub struct RunLog {
    path: Option<PathBuf>,
    lines: Vec<String>,
}

impl RunLog {
    /// Open the log for a new run, truncating any previous file.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        File::create(path)
            .map_err(|e| anyhow::anyhow!("Failed to reset log at {}: {e}", path.display()))?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            lines: Vec::new(),
        })
    }

    /// Buffer-only log for tests and for modes that never flush.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            lines: Vec::new(),
        }
    }

    pub fn log(&mut self, severity: Severity, category: Category, message: impl AsRef<str>) {
        let message = message.as_ref();
        match severity {
            Severity::Info => info!("{}: {message}", category.name()),
            Severity::Warning => warn!("{}: {message}", category.name()),
            Severity::Error => error!("{}: {message}", category.name()),
        }
        let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        self.lines.push(format!(
            "{stamp}: {}-{}: {message}",
            severity.code(),
            category.name()
        ));
    }

    pub fn info(&mut self, category: Category, message: impl AsRef<str>) {
        self.log(Severity::Info, category, message);
    }

    pub fn warn(&mut self, category: Category, message: impl AsRef<str>) {
        self.log(Severity::Warning, category, message);
    }

    pub fn error(&mut self, category: Category, message: impl AsRef<str>) {
        self.log(Severity::Error, category, message);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Write every buffered line to the log file in one pass.
    pub fn flush(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = File::create(path)
            .map_err(|e| anyhow::anyhow!("Failed to write log at {}: {e}", path.display()))?;
        for line in &self.lines {
            writeln!(file, "{line}")?;
        }
        Ok(())
    }
}
