use anyhow::{anyhow, Context};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::MailConfig;

/// Assemble the report mail: rendered HTML as the body, addresses and
/// subject from the static mail configuration.
fn build_message(cfg: &MailConfig, body_html: String) -> anyhow::Result<Message> {
    Message::builder()
        .from(
            cfg.from
                .parse()
                .with_context(|| format!("invalid from address '{}'", cfg.from))?,
        )
        .to(cfg
            .to
            .parse()
            .with_context(|| format!("invalid to address '{}'", cfg.to))?)
        .subject(cfg.subject.clone())
        .header(ContentType::TEXT_HTML)
        .body(body_html)
        .context("assembling report mail")
}

/// Submit the rendered report. `password` is the unsealed credential and
/// is only required when `authenticate` is set. Any error here is the one
/// condition that turns the process exit code non-zero.
pub async fn send_report(
    cfg: &MailConfig,
    password: Option<String>,
    body_html: String,
) -> anyhow::Result<()> {
    let message = build_message(cfg, body_html)?;

    let mut builder = if cfg.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.server)
            .with_context(|| format!("preparing STARTTLS transport to {}", cfg.server))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.server)
    };
    builder = builder.port(cfg.port);

    if cfg.authenticate {
        let password =
            password.ok_or_else(|| anyhow!("authentication enabled but no credential available"))?;
        builder = builder.credentials(Credentials::new(cfg.username.clone(), password));
    }

    let mailer = builder.build();
    mailer
        .send(message)
        .await
        .with_context(|| format!("submitting report to {}:{}", cfg.server, cfg.port))?;
    Ok(())
}
