mod checks;
mod config;
mod eventlog;
mod inventory;
mod mailer;
mod models;
mod report;
mod runlog;
mod vault;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tracing::error;

use crate::checks::{CommandRunner, SystemCommandRunner};
use crate::config::AppConfig;
use crate::inventory::{DirectoryInventory, NltestInventory};
use crate::models::{
    Check, DcAttributes, DcHealth, DomainHealth, ErrorLogCell, Forest, RunReport,
};
use crate::runlog::{Category, RunLog};

#[derive(Parser, Debug)]
#[command(name = "dchealth")]
#[command(version)]
#[command(about = "Polls every domain controller in the forest and writes an HTML health report")]
struct Cli {
    /// Seal a mail password for the current user, then exit.
    #[arg(long, value_name = "SECRET")]
    set_mail_password: Option<String>,
    /// Write the report but skip mail delivery.
    #[arg(long)]
    no_email: bool,
    /// Config file; defaults to config.toml next to the executable.
    #[arg(long)]
    config: Option<String>,
    /// Report output path, overwritten each run.
    #[arg(long, default_value = "./dc-health-report.htm")]
    report: PathBuf,
    /// Run log path, reset each run.
    #[arg(long, default_value = "./dc-health.log")]
    log: PathBuf,
    /// Per-check timeout in seconds.
    #[arg(long, default_value_t = 60)]
    timeout: u64,
    /// Trailing window in days for the error-log query.
    #[arg(long, default_value_t = 1)]
    days: u32,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dchealth=info".into()),
        )
        .compact()
        .init();

    let cli = Cli::parse();

    // Password mode is exclusive with report generation and terminates
    // either way.
    if let Some(secret) = cli.set_mail_password.as_deref() {
        match vault::seal_to_file(secret, Path::new(vault::CREDENTIAL_PATH)) {
            Ok(()) => {
                println!(
                    "Mail credential sealed to {} for the current user on this machine.",
                    vault::CREDENTIAL_PATH
                );
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("Could not seal mail credential: {e}");
                error!("Vault: {e}");
                std::process::exit(1);
            }
        }
    }

    std::process::exit(run(cli).await);
}

/// The whole report run. Returns the process exit code: 0 on success or
/// skipped mail, 1 on unusable configuration or failed dispatch.
async fn run(cli: Cli) -> i32 {
    let mut log = match RunLog::create(&cli.log) {
        Ok(log) => log,
        Err(e) => {
            error!("{e}");
            RunLog::in_memory()
        }
    };
    log.info(Category::Run, "starting AD health run");

    let cfg = match AppConfig::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            log.error(Category::Run, format!("config unusable: {e:#}"));
            flush(&log);
            return 1;
        }
    };
    // Resolved up front so a missing [mail] section fails before the sweep.
    let mail = if cli.no_email {
        None
    } else {
        match cfg.mail.as_ref() {
            Some(mail) => Some(mail),
            None => {
                log.error(
                    Category::Mail,
                    "no [mail] section in config — add one or rerun with --no-email",
                );
                flush(&log);
                return 1;
            }
        }
    };

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner);
    let deadline = Duration::from_secs(cli.timeout);
    let inventory = NltestInventory::new(runner.clone(), deadline);
    let checklist = cfg.checks.checklist();

    let health = collect_health(
        &inventory,
        runner,
        &checklist,
        deadline,
        cli.days,
        &mut log,
    )
    .await;

    let html = report::render(&health, &checklist);
    if let Err(e) = std::fs::write(&cli.report, &html) {
        log.error(
            Category::Report,
            format!("could not write report to {}: {e}", cli.report.display()),
        );
        flush(&log);
        return 1;
    }
    log.info(
        Category::Report,
        format!("report written to {}", cli.report.display()),
    );

    let code = match mail {
        None => {
            log.info(Category::Mail, "mail delivery skipped by configuration");
            0
        }
        Some(mail) => deliver(mail, html, &mut log).await,
    };

    log.info(Category::Run, "run complete");
    flush(&log);
    code
}

/// Unseal the credential if needed and dispatch the report. Dispatch
/// failure is the one condition mapped to a non-zero exit.
async fn deliver(mail: &config::MailConfig, html: String, log: &mut RunLog) -> i32 {
    let password = if mail.authenticate {
        match vault::unseal_from_file(Path::new(vault::CREDENTIAL_PATH)) {
            Ok(p) => Some(p),
            Err(e) => {
                log.error(Category::Vault, format!("{e:#}"));
                log.error(Category::Mail, "dispatch aborted: no usable credential");
                return 1;
            }
        }
    } else {
        None
    };

    match mailer::send_report(mail, password, html).await {
        Ok(()) => {
            log.info(Category::Mail, format!("report mailed to {}", mail.to));
            0
        }
        Err(e) => {
            log.error(Category::Mail, format!("dispatch failed: {e:#}"));
            1
        }
    }
}

fn flush(log: &RunLog) {
    if let Err(e) = log.flush() {
        error!("could not write run log: {e}");
    }
}

/// Sequential sweep over the forest: probe each domain and DC once, run
/// the checklist against every reachable DC, collect attributes and the
/// error-log count. Nothing here aborts the run; failures degrade to
/// markers in the report.
async fn collect_health(
    inventory: &dyn DirectoryInventory,
    runner: Arc<dyn CommandRunner>,
    checklist: &[Check],
    deadline: Duration,
    days: u32,
    log: &mut RunLog,
) -> RunReport {
    let forest = match inventory.forest().await {
        Ok(forest) => forest,
        Err(e) => {
            log.warn(Category::Discovery, format!("forest discovery failed: {e:#}"));
            Forest {
                name: "unknown".into(),
                domains: Vec::new(),
            }
        }
    };
    log.info(
        Category::Discovery,
        format!("forest {} — {} domain(s)", forest.name, forest.domains.len()),
    );

    let mut domains = Vec::new();
    for domain_name in &forest.domains {
        let domain_probe = checks::probe(runner.clone(), domain_name, deadline).await;
        if !domain_probe.reachable {
            log.warn(
                Category::Probe,
                format!("domain {domain_name} did not answer its probe"),
            );
        }

        let dcs = match inventory.domain_controllers(domain_name).await {
            Ok(dcs) => dcs,
            Err(e) => {
                log.warn(
                    Category::Discovery,
                    format!("DC discovery for {domain_name} failed: {e:#}"),
                );
                Vec::new()
            }
        };

        let mut controllers = Vec::new();
        for dc in dcs {
            let probe = checks::probe(runner.clone(), &dc.hostname, deadline).await;
            let health = if probe.reachable {
                let outcomes =
                    checks::run_checks(runner.clone(), &dc.hostname, checklist, deadline, log)
                        .await;
                let mut attributes = inventory.attributes_of(&dc).await;
                if attributes.address.is_none() {
                    attributes.address = probe.address.clone();
                }
                let error_log =
                    eventlog::error_log_count(runner.clone(), &dc.hostname, days, deadline).await;
                if let ErrorLogCell::QueryError(reason) = &error_log {
                    log.warn(
                        Category::EventLog,
                        format!("{}: error-log query failed: {reason}", dc.hostname),
                    );
                }
                DcHealth {
                    dc,
                    reachable: true,
                    outcomes,
                    attributes,
                    error_log,
                }
            } else {
                log.warn(
                    Category::Probe,
                    format!("{} unreachable — all checks marked failed", dc.hostname),
                );
                DcHealth {
                    dc,
                    reachable: false,
                    outcomes: checks::offline_outcomes(checklist),
                    attributes: DcAttributes::default(),
                    error_log: ErrorLogCell::Skipped,
                }
            };
            controllers.push(health);
        }

        domains.push(DomainHealth {
            name: domain_name.clone(),
            reachable: domain_probe.reachable,
            controllers,
        });
    }

    RunReport {
        forest: forest.name,
        generated_at: Utc::now(),
        domains,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::test_support::FixedInventory;
    use crate::models::{CheckOutcome, DomainController};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers like a healthy forest, except hosts listed in `dead` never
    /// answer a ping. Records every invocation for call-count assertions.
    struct ForestRunner {
        dead: Vec<String>,
        broken_eventlog: bool,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl ForestRunner {
        fn new(dead: &[&str]) -> Self {
            Self {
                dead: dead.iter().map(|s| s.to_string()).collect(),
                broken_eventlog: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls_mentioning(&self, host: &str) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, args)| args.iter().any(|a| a.contains(host)))
                .map(|(program, _)| program.clone())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ForestRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
        ) -> anyhow::Result<checks::CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_string(), args.to_vec()));

            let output = match program {
                "ping" => {
                    let host = args.last().cloned().unwrap_or_default();
                    if self.dead.iter().any(|d| host.contains(d.as_str())) {
                        return Ok(checks::CommandOutput {
                            success: false,
                            output: "Request timed out.".into(),
                        });
                    }
                    format!("Pinging {host} [10.0.0.5] with 32 bytes of data:\nReply from 10.0.0.5: bytes=32 time=1ms TTL=128")
                }
                "sc" => "        STATE              : 4  RUNNING".into(),
                "dcdiag" => {
                    let test = args
                        .iter()
                        .find_map(|a| a.strip_prefix("/test:"))
                        .unwrap_or("Unknown");
                    format!("......................... DC passed test {test}")
                }
                "wevtutil" => {
                    if self.broken_eventlog {
                        return Ok(checks::CommandOutput {
                            success: false,
                            output: "Failed to read events. The RPC server is unavailable.".into(),
                        });
                    }
                    "<Event a='1'></Event>".into()
                }
                "net" => "Current time at \\\\dc is 8/30/2026 10:02:04 AM".into(),
                _ => String::new(),
            };
            Ok(checks::CommandOutput {
                success: true,
                output,
            })
        }
    }

    fn fixed_inventory() -> FixedInventory {
        let domain = "corp.example.com";
        let dc = |host: &str| DomainController {
            hostname: host.into(),
            domain: domain.into(),
            site: Some("Default-First-Site-Name".into()),
        };
        FixedInventory {
            forest: Forest {
                name: domain.into(),
                domains: vec![domain.into()],
            },
            controllers: vec![dc("dc1.example-int"), dc("dc2.example-int"), dc("dc3.example-int")],
        }
    }

    #[tokio::test]
    async fn three_dcs_one_unreachable() {
        let runner = Arc::new(ForestRunner::new(&["dc3"]));
        let inventory = fixed_inventory();
        let checklist = config::ChecksConfig::default().checklist();
        let mut log = RunLog::in_memory();

        let health = collect_health(
            &inventory,
            runner.clone(),
            &checklist,
            Duration::from_secs(5),
            1,
            &mut log,
        )
        .await;

        let controllers: Vec<_> = health.controllers().collect();
        assert_eq!(controllers.len(), 3);

        // Reachable DCs: one outcome per check, all Success here.
        for dc in &controllers[..2] {
            assert!(dc.reachable);
            assert_eq!(dc.outcomes.len(), 10);
            assert!(dc.outcomes.iter().all(|o| *o == CheckOutcome::Success));
            assert_eq!(dc.error_log, ErrorLogCell::Count(1));
            assert_eq!(dc.attributes.address.as_deref(), Some("10.0.0.5"));
        }

        // Unreachable DC: uniform failure placeholders, nothing queried.
        let dead = controllers[2];
        assert!(!dead.reachable);
        assert_eq!(dead.outcomes.len(), 10);
        assert!(dead.outcomes.iter().all(|o| *o == CheckOutcome::Failure));
        assert_eq!(dead.error_log, ErrorLogCell::Skipped);
        assert_eq!(runner.calls_mentioning("dc3"), vec!["ping"]);

        // The rendered report carries exactly one summary row per DC.
        let html = report::render(&health, &checklist);
        let summary = &html[..html.find("</table>").unwrap()];
        assert_eq!(summary.matches("<tr>").count(), 4);
    }

    #[tokio::test]
    async fn failed_error_log_query_is_logged_and_rendered() {
        let mut runner = ForestRunner::new(&[]);
        runner.broken_eventlog = true;
        let runner = Arc::new(runner);
        let inventory = fixed_inventory();
        let checklist = config::ChecksConfig::default().checklist();
        let mut log = RunLog::in_memory();

        let health = collect_health(
            &inventory,
            runner,
            &checklist,
            Duration::from_secs(5),
            1,
            &mut log,
        )
        .await;

        for dc in health.controllers() {
            match &dc.error_log {
                ErrorLogCell::QueryError(reason) => {
                    assert!(reason.contains("Failed to read events"))
                }
                other => panic!("expected QueryError, got {other:?}"),
            }
        }

        // Both logged with the severity/category tag and rendered inline.
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("2-EventLog: ") && l.contains("error-log query failed")));
        let html = report::render(&health, &checklist);
        assert!(html.contains("error: Failed to read events"));
    }

    #[tokio::test]
    async fn discovery_failure_still_produces_a_report() {
        struct NoForest;

        #[async_trait]
        impl DirectoryInventory for NoForest {
            async fn forest(&self) -> anyhow::Result<Forest> {
                Err(anyhow::anyhow!("directory unavailable"))
            }
            async fn domain_controllers(
                &self,
                _domain: &str,
            ) -> anyhow::Result<Vec<DomainController>> {
                Ok(Vec::new())
            }
            async fn attributes_of(&self, _dc: &DomainController) -> DcAttributes {
                DcAttributes::default()
            }
        }

        let runner = Arc::new(ForestRunner::new(&[]));
        let checklist = config::ChecksConfig::default().checklist();
        let mut log = RunLog::in_memory();
        let health = collect_health(
            &NoForest,
            runner,
            &checklist,
            Duration::from_secs(5),
            1,
            &mut log,
        )
        .await;

        assert_eq!(health.forest, "unknown");
        assert_eq!(health.controllers().count(), 0);
        assert!(log
            .lines()
            .iter()
            .any(|l| l.contains("2-Discovery: forest discovery failed")));
    }

    #[tokio::test]
    async fn no_email_run_writes_report_and_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = dir.path().join("report.htm");
        let log_path = dir.path().join("run.log");
        let cli = Cli {
            set_mail_password: None,
            no_email: true,
            config: Some(
                dir.path()
                    .join("missing-config.toml")
                    .to_string_lossy()
                    .into_owned(),
            ),
            report: report_path.clone(),
            log: log_path.clone(),
            timeout: 2,
            days: 1,
        };

        let code = run(cli).await;
        assert_eq!(code, 0);

        let html = std::fs::read_to_string(&report_path).unwrap();
        assert!(html.starts_with("<html>"));
        assert!(html.ends_with("</body></html>"));

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("1-Mail: mail delivery skipped by configuration"));
    }

    #[tokio::test]
    async fn failed_dispatch_exits_one_and_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        // Port 9 (discard) is not an SMTP listener; the connect fails fast.
        std::fs::write(
            &config_path,
            r#"
                [mail]
                to = "ops@example.com"
                from = "dchealth@example.com"
                server = "127.0.0.1"
                port = 9
            "#,
        )
        .unwrap();
        let log_path = dir.path().join("run.log");
        let cli = Cli {
            set_mail_password: None,
            no_email: false,
            config: Some(config_path.to_string_lossy().into_owned()),
            report: dir.path().join("report.htm"),
            log: log_path.clone(),
            timeout: 2,
            days: 1,
        };

        let code = run(cli).await;
        assert_eq!(code, 1);

        let log = std::fs::read_to_string(&log_path).unwrap();
        assert!(log.contains("3-Mail: dispatch failed"));
    }

    #[tokio::test]
    async fn mailing_without_mail_section_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            set_mail_password: None,
            no_email: false,
            config: Some(
                dir.path()
                    .join("missing-config.toml")
                    .to_string_lossy()
                    .into_owned(),
            ),
            report: dir.path().join("report.htm"),
            log: dir.path().join("run.log"),
            timeout: 2,
            days: 1,
        };

        assert_eq!(run(cli).await, 1);
    }
}
