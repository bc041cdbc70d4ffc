use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::debug;

use crate::checks::{run_with_deadline, CommandOutput, CommandRunner};
use crate::models::{DcAttributes, DomainController, Forest};

// ── Inventory seam ──────────────────────────────────────────────

/// Directory metadata source. The check runner and the renderer only see
/// this trait, so a test double can supply a fixed forest.
#[async_trait]
pub trait DirectoryInventory: Send + Sync {
    /// Forest name plus every domain in it.
    async fn forest(&self) -> anyhow::Result<Forest>;

    /// All domain controllers of one domain.
    async fn domain_controllers(&self, domain: &str)
        -> anyhow::Result<Vec<DomainController>>;

    /// Static attributes of one DC, best-effort: a failed lookup leaves
    /// its field empty and never fails the call.
    async fn attributes_of(&self, dc: &DomainController) -> DcAttributes;
}

// ── nltest / repadmin implementation ────────────────────────────

/// Discovers the forest with the stock admin toolchain: `nltest` for
/// trusts and DC lists, `repadmin` for replication state, `wmic` and
/// `net time` for per-DC attributes.
pub struct NltestInventory {
    runner: Arc<dyn CommandRunner>,
    deadline: Duration,
}

impl NltestInventory {
    pub fn new(runner: Arc<dyn CommandRunner>, deadline: Duration) -> Self {
        Self { runner, deadline }
    }

    async fn run(&self, program: &str, args: Vec<String>) -> anyhow::Result<CommandOutput> {
        match run_with_deadline(self.runner.clone(), program.into(), args, self.deadline).await {
            Some(result) => result,
            None => Err(anyhow!("{program} did not answer within the deadline")),
        }
    }
}

#[async_trait]
impl DirectoryInventory for NltestInventory {
    async fn forest(&self) -> anyhow::Result<Forest> {
        let out = self
            .run("nltest", vec!["/domain_trusts".into()])
            .await
            .context("enumerating domain trusts")?;
        if !out.success {
            return Err(anyhow!("nltest /domain_trusts exited with failure"));
        }
        parse_domain_trusts(&out.output)
    }

    async fn domain_controllers(
        &self,
        domain: &str,
    ) -> anyhow::Result<Vec<DomainController>> {
        let out = self
            .run("nltest", vec![format!("/dclist:{domain}")])
            .await
            .with_context(|| format!("listing DCs of {domain}"))?;
        if !out.success {
            return Err(anyhow!("nltest /dclist:{domain} exited with failure"));
        }
        Ok(parse_dclist(&out.output, domain))
    }

    async fn attributes_of(&self, dc: &DomainController) -> DcAttributes {
        let host = &dc.hostname;
        let mut attrs = DcAttributes {
            site: dc.site.clone(),
            ..DcAttributes::default()
        };

        match self
            .run(
                "wmic",
                vec![
                    format!("/node:{host}"),
                    "os".into(),
                    "get".into(),
                    "Caption".into(),
                    "/value".into(),
                ],
            )
            .await
        {
            Ok(out) if out.success => attrs.os = parse_wmic_caption(&out.output),
            Ok(_) | Err(_) => debug!("{host}: OS caption lookup failed"),
        }

        if attrs.site.is_none() {
            match self
                .run("nltest", vec![format!("/server:{host}"), "/dsgetsite".into()])
                .await
            {
                Ok(out) if out.success => attrs.site = parse_dsgetsite(&out.output),
                Ok(_) | Err(_) => debug!("{host}: site lookup failed"),
            }
        }

        match self
            .run("repadmin", vec!["/showrepl".into(), host.clone()])
            .await
        {
            Ok(out) if out.success => attrs.sync_partners = parse_showrepl_partners(&out.output),
            Ok(_) | Err(_) => debug!("{host}: replication partner lookup failed"),
        }

        match self
            .run(
                "repadmin",
                vec![
                    "/showutdvec".into(),
                    host.clone(),
                    domain_dn(&dc.domain),
                ],
            )
            .await
        {
            Ok(out) if out.success => attrs.highest_usn = parse_utdvec_max(&out.output),
            Ok(_) | Err(_) => debug!("{host}: USN vector lookup failed"),
        }

        match self
            .run("net", vec!["time".into(), format!("\\\\{host}")])
            .await
        {
            Ok(out) if out.success => attrs.reported_time = parse_net_time(&out.output),
            Ok(_) | Err(_) => debug!("{host}: remote time lookup failed"),
        }

        attrs
    }
}

// ── Output parsers ──────────────────────────────────────────────

/// `nltest /domain_trusts` lines look like
/// `    0: CORP corp.example.com (NT 5) (Forest Tree Root) (Primary Domain)`.
/// The DNS name is the first dotted token; the forest root carries the
/// `(Forest Tree Root)` flag.
fn parse_domain_trusts(output: &str) -> anyhow::Result<Forest> {
    let mut domains = Vec::new();
    let mut root = None;
    for line in output.lines() {
        let trimmed = line.trim();
        let Some((index, rest)) = trimmed.split_once(':') else {
            continue;
        };
        if !index.chars().all(|c| c.is_ascii_digit()) || index.is_empty() {
            continue;
        }
        let Some(dns) = rest.split_whitespace().find(|t| t.contains('.')) else {
            continue;
        };
        if trimmed.contains("(Forest Tree Root)") {
            root = Some(dns.to_string());
        }
        domains.push(dns.to_string());
    }
    if domains.is_empty() {
        return Err(anyhow!("no domains in nltest /domain_trusts output"));
    }
    let name = root.unwrap_or_else(|| domains[0].clone());
    Ok(Forest { name, domains })
}

/// `nltest /dclist:` lines carry `<hostname> [flags] Site: <site>`.
fn parse_dclist(output: &str, domain: &str) -> Vec<DomainController> {
    output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let site = trimmed.split_once("Site:").map(|(_, s)| s.trim().to_string());
            site.as_ref()?;
            let hostname = trimmed.split_whitespace().next()?.to_string();
            Some(DomainController {
                hostname,
                domain: domain.to_string(),
                site: site.filter(|s| !s.is_empty()),
            })
        })
        .collect()
}

/// `wmic os get Caption /value` prints `Caption=<os name>`.
fn parse_wmic_caption(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Caption="))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(String::from)
}

/// `nltest /dsgetsite` prints the site name on its own line followed by
/// the completion banner.
fn parse_dsgetsite(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("The command"))
        .map(String::from)
}

/// Inbound neighbors in `repadmin /showrepl` read
/// `        Default-First-Site-Name\DC2 via RPC`.
fn parse_showrepl_partners(output: &str) -> Vec<String> {
    let mut partners: Vec<String> = output
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            let (partner, _) = trimmed.split_once(" via ")?;
            if partner.contains('\\') {
                Some(partner.trim().to_string())
            } else {
                None
            }
        })
        .collect();
    partners.dedup();
    partners
}

/// `repadmin /showutdvec` rows read `<site>\<dc> @ USN <n> @ Time <stamp>`;
/// the DC's own high-water mark is the largest USN in the vector.
fn parse_utdvec_max(output: &str) -> Option<u64> {
    output
        .lines()
        .filter_map(|line| {
            let (_, rest) = line.split_once("@ USN")?;
            let number = rest.trim_start().split_whitespace().next()?;
            number.trim_end_matches(',').parse::<u64>().ok()
        })
        .max()
}

/// `net time \\dc` answers `Current time at \\DC1 is 8/30/2026 10:02:04 AM`.
fn parse_net_time(output: &str) -> Option<String> {
    output
        .lines()
        .find(|l| l.contains("Current time at"))
        .and_then(|l| l.split_once(" is ").map(|(_, t)| t.trim().to_string()))
        .filter(|t| !t.is_empty())
}

/// `corp.example.com` → `DC=corp,DC=example,DC=com`.
pub fn domain_dn(domain: &str) -> String {
    domain
        .split('.')
        .filter(|p| !p.is_empty())
        .map(|p| format!("DC={p}"))
        .collect::<Vec<_>>()
        .join(",")
}

// ── Test double ─────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fixed in-memory forest for orchestration tests.
    pub struct FixedInventory {
        pub forest: Forest,
        pub controllers: Vec<DomainController>,
    }

    #[async_trait]
    impl DirectoryInventory for FixedInventory {
        async fn forest(&self) -> anyhow::Result<Forest> {
            Ok(self.forest.clone())
        }

        async fn domain_controllers(
            &self,
            domain: &str,
        ) -> anyhow::Result<Vec<DomainController>> {
            Ok(self
                .controllers
                .iter()
                .filter(|dc| dc.domain == domain)
                .cloned()
                .collect())
        }

        async fn attributes_of(&self, dc: &DomainController) -> DcAttributes {
            DcAttributes {
                os: Some("Microsoft Windows Server 2022 Standard".into()),
                site: dc.site.clone(),
                ..DcAttributes::default()
            }
        }
    }
}
