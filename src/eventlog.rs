use std::sync::Arc;
use std::time::Duration;

use crate::checks::{run_with_deadline, CommandRunner};
use crate::models::ErrorLogCell;

const MILLIS_PER_DAY: u64 = 86_400_000;
/// Upper bound on fetched events; counting stops here either way.
const MAX_EVENTS: u32 = 512;

/// XPath filter for critical/error System events in the trailing window.
/// `timediff(@SystemTime)` measures backwards from now, so the window is
/// now back to now−days — the query cannot see the future.
fn window_query(days: u32) -> String {
    let ms = u64::from(days) * MILLIS_PER_DAY;
    format!(
        "*[System[(Level=1 or Level=2) and TimeCreated[timediff(@SystemTime) <= {ms}]]]"
    )
}

/// Each hit in `wevtutil /f:xml` output opens an `<Event>` element. The
/// name must end there: every event also nests `<EventID>`,
/// `<EventRecordID>` and `<EventData>` elements.
fn count_events(output: &str) -> u64 {
    output
        .match_indices("<Event")
        .filter(|(idx, matched)| {
            matches!(
                output.as_bytes().get(idx + matched.len()).copied(),
                Some(b' ' | b'>' | b'\t' | b'\r' | b'\n')
            )
        })
        .count() as u64
}

/// Count error/critical System-log events on `host` for the trailing
/// `days` window. Best-effort: any failure becomes an inline marker in
/// the report cell, never an aborted run.
pub async fn error_log_count(
    runner: Arc<dyn CommandRunner>,
    host: &str,
    days: u32,
    deadline: Duration,
) -> ErrorLogCell {
    let args = vec![
        "qe".to_string(),
        "System".to_string(),
        format!("/r:{host}"),
        "/f:xml".to_string(),
        format!("/c:{MAX_EVENTS}"),
        format!("/q:{}", window_query(days)),
    ];
    match run_with_deadline(runner, "wevtutil".into(), args, deadline).await {
        Some(Ok(out)) if out.success => ErrorLogCell::Count(count_events(&out.output)),
        Some(Ok(out)) => {
            let reason = out
                .output
                .lines()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("query failed")
                .trim()
                .to_string();
            ErrorLogCell::QueryError(reason)
        }
        Some(Err(e)) => ErrorLogCell::QueryError(e.to_string()),
        None => ErrorLogCell::QueryError("no answer within deadline".into()),
    }
}
