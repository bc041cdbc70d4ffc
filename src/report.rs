use crate::models::{Check, DcHealth, ErrorLogCell, RunReport};

const OFFLINE: &str = "OFFLINE";
const OFFLINE_COLOR: &str = "#f1a1a1";

/// Render the whole report in one pass: header, summary table (one row
/// per DC, one column per check), then the forest → domain → DC detail
/// tree. Append-only; every opened tag is closed before return.
pub fn render(run: &RunReport, checklist: &[Check]) -> String {
    let mut html = String::with_capacity(16 * 1024);

    html.push_str("<html><head><title>AD health report</title><style>");
    html.push_str(
        "body{font-family:Segoe UI,Arial,sans-serif;font-size:13px;}\
         table{border-collapse:collapse;margin-bottom:12px;}\
         th,td{border:1px solid #777;padding:3px 8px;text-align:left;}\
         th{background:#dce6f1;}",
    );
    html.push_str("</style></head><body>");

    html.push_str("<h1>Active Directory health report</h1>");
    html.push_str(&format!(
        "<p>Forest: {} &middot; generated {}</p>",
        escape(&run.forest),
        run.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    push_summary_table(&mut html, run, checklist);

    // Detail tree
    html.push_str(&format!("<h2>Forest {}</h2>", escape(&run.forest)));
    for domain in &run.domains {
        html.push_str(&format!("<h3>Domain {}</h3>", escape(&domain.name)));
        if !domain.reachable {
            html.push_str(&format!(
                "<p><b style=\"color:#b00;\">{OFFLINE}</b></p>"
            ));
        }
        for dc in &domain.controllers {
            push_dc_detail(&mut html, dc);
        }
    }

    html.push_str("</body></html>");
    html
}

fn push_summary_table(html: &mut String, run: &RunReport, checklist: &[Check]) {
    html.push_str("<table><tr><th>Domain Controller</th><th>Domain</th>");
    for check in checklist {
        html.push_str(&format!("<th>{}</th>", escape(check.label())));
    }
    html.push_str("</tr>");

    for dc in run.controllers() {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td>",
            escape(&dc.dc.hostname),
            escape(&dc.dc.domain)
        ));
        for outcome in &dc.outcomes {
            html.push_str(&format!(
                "<td bgcolor=\"{}\">{}</td>",
                outcome.color(),
                outcome.label()
            ));
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
}

fn push_dc_detail(html: &mut String, dc: &DcHealth) {
    html.push_str(&format!("<h4>{}</h4>", escape(&dc.dc.hostname)));
    if !dc.reachable {
        html.push_str(&format!(
            "<p><b style=\"color:#b00;\">{OFFLINE}</b></p>"
        ));
        return;
    }

    let attrs = &dc.attributes;
    html.push_str("<table>");
    push_attr_row(html, "Operating system", attrs.os.as_deref());
    push_attr_row(html, "Site", attrs.site.as_deref());
    push_attr_row(html, "Address", attrs.address.as_deref());
    let partners = if attrs.sync_partners.is_empty() {
        None
    } else {
        Some(attrs.sync_partners.join(", "))
    };
    push_attr_row(html, "Sync partners", partners.as_deref());
    push_attr_row(html, "Reported time", attrs.reported_time.as_deref());
    let usn = attrs.highest_usn.map(|u| u.to_string());
    push_attr_row(html, "Highest USN", usn.as_deref());

    html.push_str("<tr><td>Error-log entries</td>");
    match &dc.error_log {
        ErrorLogCell::Count(n) => html.push_str(&format!("<td>{n}</td>")),
        ErrorLogCell::QueryError(reason) => html.push_str(&format!(
            "<td bgcolor=\"{OFFLINE_COLOR}\">error: {}</td>",
            escape(reason)
        )),
        ErrorLogCell::Skipped => html.push_str("<td>-</td>"),
    }
    html.push_str("</tr></table>");
}

fn push_attr_row(html: &mut String, label: &str, value: Option<&str>) {
    html.push_str(&format!(
        "<tr><td>{label}</td><td>{}</td></tr>",
        match value {
            Some(v) => escape(v),
            None => "unknown".to_string(),
        }
    ));
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckOutcome, DcAttributes, DomainController, DomainHealth};
    use chrono::Utc;

    fn checklist() -> Vec<Check> {
        let mut checks: Vec<Check> = ["Netlogon", "NTDS", "DNS", "Kdc", "DFSR", "ADWS"]
            .iter()
            .map(|s| Check::Service {
                service: s.to_string(),
            })
            .collect();
        for t in ["Replications", "Advertising", "Services", "FsmoCheck"] {
            checks.push(Check::Diagnostic { test: t.into() });
        }
        checks
    }

    fn dc(hostname: &str, reachable: bool, checks: usize) -> DcHealth {
        DcHealth {
            dc: DomainController {
                hostname: hostname.into(),
                domain: "corp.example.com".into(),
                site: Some("Default-First-Site-Name".into()),
            },
            reachable,
            outcomes: if reachable {
                vec![CheckOutcome::Success; checks]
            } else {
                vec![CheckOutcome::Failure; checks]
            },
            attributes: if reachable {
                DcAttributes {
                    os: Some("Windows Server 2022".into()),
                    site: Some("Default-First-Site-Name".into()),
                    address: Some("10.0.0.5".into()),
                    sync_partners: vec!["Default-First-Site-Name\\DC2".into()],
                    reported_time: Some("8/30/2026 10:02:04 AM".into()),
                    highest_usn: Some(482_113),
                }
            } else {
                DcAttributes::default()
            },
            error_log: if reachable {
                ErrorLogCell::Count(2)
            } else {
                ErrorLogCell::Skipped
            },
        }
    }

    fn three_dc_run() -> (RunReport, Vec<Check>) {
        let checks = checklist();
        let run = RunReport {
            forest: "corp.example.com".into(),
            generated_at: Utc::now(),
            domains: vec![DomainHealth {
                name: "corp.example.com".into(),
                reachable: true,
                controllers: vec![
                    dc("dc1.corp.example.com", true, checks.len()),
                    dc("dc2.corp.example.com", true, checks.len()),
                    dc("dc3.corp.example.com", false, checks.len()),
                ],
            }],
        };
        (run, checks)
    }

    /// Walks every tag and checks that closes match opens in LIFO order.
    fn assert_well_formed(html: &str) {
        let mut stack: Vec<String> = Vec::new();
        let mut rest = html;
        while let Some(start) = rest.find('<') {
            let tail = &rest[start + 1..];
            let end = tail.find('>').expect("unterminated tag");
            let tag = &tail[..end];
            rest = &tail[end + 1..];

            if let Some(name) = tag.strip_prefix('/') {
                let open = stack.pop().unwrap_or_else(|| {
                    panic!("close </{name}> with empty stack")
                });
                assert_eq!(open, name, "mismatched close </{name}>");
            } else {
                let name: String = tag
                    .split([' ', '\t', '\n'])
                    .next()
                    .unwrap()
                    .to_string();
                stack.push(name);
            }
        }
        assert!(stack.is_empty(), "unclosed tags: {stack:?}");
    }

    #[test]
    fn report_is_well_formed_html() {
        let (run, checks) = three_dc_run();
        let html = render(&run, &checks);
        assert_well_formed(&html);
    }

    #[test]
    fn summary_has_one_row_per_dc() {
        let (run, checks) = three_dc_run();
        let html = render(&run, &checks);
        let summary = &html[..html.find("</table>").unwrap()];
        // Header row plus three DC rows.
        assert_eq!(summary.matches("<tr>").count(), 4);
    }

    #[test]
    fn unreachable_dc_renders_uniform_failure_row_and_offline_detail() {
        let (run, checks) = three_dc_run();
        let html = render(&run, &checks);

        let row_start = html.find("dc3.corp.example.com").unwrap();
        let row = &html[row_start..row_start + html[row_start..].find("</tr>").unwrap()];
        assert_eq!(row.matches(">FAIL<").count(), checks.len());
        assert_eq!(row.matches(">OK<").count(), 0);

        assert!(html.contains(OFFLINE));
    }

    #[test]
    fn error_log_failure_is_rendered_inline() {
        let (mut run, checks) = three_dc_run();
        run.domains[0].controllers[0].error_log =
            ErrorLogCell::QueryError("The RPC server is unavailable".into());
        let html = render(&run, &checks);
        assert!(html.contains("error: The RPC server is unavailable"));
    }

    #[test]
    fn text_is_escaped() {
        let (mut run, checks) = three_dc_run();
        run.forest = "corp<script>".into();
        let html = render(&run, &checks);
        assert!(html.contains("corp&lt;script&gt;"));
        assert!(!html.contains("corp<script>"));
        assert_well_formed(&html);
    }
}
