use serde::Deserialize;
use std::path::Path;

use crate::models::Check;

/// Root configuration loaded from `config.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mail: Option<MailConfig>,
    pub checks: ChecksConfig,
}

/// Mail submission settings. The password is not stored here — it is
/// unsealed from the credential file when a dispatch is actually attempted.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub to: String,
    pub from: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// Upgrade the connection with STARTTLS.
    #[serde(default)]
    pub starttls: bool,
    /// Log in before submitting; requires `username` and a sealed credential.
    #[serde(default)]
    pub authenticate: bool,
    #[serde(default)]
    pub username: String,
}

/// The static checklist: services first, then dcdiag tests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChecksConfig {
    pub services: Vec<String>,
    pub diagnostics: Vec<String>,
}

impl Default for ChecksConfig {
    fn default() -> Self {
        Self {
            services: vec![
                "Netlogon".into(),
                "NTDS".into(),
                "DNS".into(),
                "Kdc".into(),
                "DFSR".into(),
                "ADWS".into(),
            ],
            diagnostics: vec![
                "Replications".into(),
                "Advertising".into(),
                "Services".into(),
                "FsmoCheck".into(),
            ],
        }
    }
}

impl ChecksConfig {
    /// Materialize the checklist in report-column order.
    pub fn checklist(&self) -> Vec<Check> {
        let mut checks: Vec<Check> = self
            .services
            .iter()
            .map(|s| Check::Service { service: s.clone() })
            .collect();
        checks.extend(self.diagnostics.iter().map(|t| Check::Diagnostic { test: t.clone() }));
        checks
    }
}

impl AppConfig {
    /// Load and parse the config file. Falls back to `./config.toml` next to
    /// the executable if no explicit path is given; a missing file yields the
    /// built-in defaults (no mail section, standard checklist).
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => std::path::PathBuf::from(p),
            None => {
                // Look next to the executable first, then CWD
                let exe_dir = std::env::current_exe()
                    .ok()
                    .and_then(|p| p.parent().map(Path::to_path_buf));

                if let Some(dir) = exe_dir {
                    let candidate = dir.join("config.toml");
                    if candidate.exists() {
                        candidate
                    } else {
                        std::path::PathBuf::from("config.toml")
                    }
                } else {
                    std::path::PathBuf::from("config.toml")
                }
            }
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {e}", path.display()))?;

        let config: AppConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}

fn default_subject() -> String {
    "AD health report".into()
}

const fn default_smtp_port() -> u16 {
    25
}
