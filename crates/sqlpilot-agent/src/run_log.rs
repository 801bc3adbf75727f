use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sqlpilot_core::types::{RunEvent, RunId};

/// JSONL run logger.
///
/// Reads an EventBus subscription and writes one JSON object per line for a
/// single run. Lines are flushed as they are written, so a crash mid-run
/// leaves every earlier line intact.
pub struct RunLogger {
    log_dir: PathBuf,
    level: u8,
}

#[derive(Serialize)]
struct LogEntry {
    timestamp: String,
    run_id: String,
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl RunLogger {
    /// Logs land in `{log_dir}/{run_id}/{timestamp}.jsonl`.
    /// `level`: 1 = outcome only, 2 = also finished steps, 3 = everything.
    pub fn new(log_dir: PathBuf, level: u8) -> Self {
        Self { log_dir, level }
    }

    /// Run the logger as a background task until the run terminates or
    /// `cancel` fires. Events for other runs are ignored.
    ///
    /// `rx` must be subscribed before the run starts; events published
    /// earlier never reach it.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<RunEvent>,
        run_id: RunId,
        cancel: CancellationToken,
    ) {
        let run_dir = self.log_dir.join(&run_id.0);
        if let Err(e) = tokio::fs::create_dir_all(&run_dir).await {
            error!(error = %e, "Failed to create log directory");
            return;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let log_path = run_dir.join(format!("{}.jsonl", timestamp));

        let file = match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                error!(error = %e, path = %log_path.display(), "Failed to open log file");
                return;
            }
        };

        info!(path = %log_path.display(), "RunLogger started");
        let mut writer = tokio::io::BufWriter::new(file);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            if event.run_id() != &run_id {
                                continue;
                            }
                            if let Some(entry) = self.event_to_entry(&event) {
                                if let Ok(json) = serde_json::to_string(&entry) {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    if let Err(e) = writer.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                            }
                            if event.is_terminal() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        writer.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
    }

    /// None when the event is filtered out by level.
    fn event_to_entry(&self, event: &RunEvent) -> Option<LogEntry> {
        let detail = match event {
            RunEvent::RunTerminated {
                outcome, snapshot, ..
            } => serde_json::json!({
                "outcome": outcome,
                "iteration": snapshot.get("iteration"),
                "sql_query": snapshot.get("sql_query"),
                "final_answer": snapshot.get("final_answer").map(|v| truncate_json(v, 500)),
            }),
            RunEvent::StepFinished {
                elapsed_ms,
                snapshot,
                ..
            } if self.level >= 2 => serde_json::json!({
                "elapsed_ms": elapsed_ms,
                "version": snapshot.get("version"),
                "error": snapshot.get("error"),
            }),
            RunEvent::StepStarted { .. } if self.level >= 3 => serde_json::Value::Null,
            RunEvent::StepProgress { message, .. } if self.level >= 3 => {
                serde_json::json!({ "message": truncate_str(message, 200) })
            }
            _ => return None,
        };

        Some(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            run_id: event.run_id().0.clone(),
            event_type: event.kind(),
            step: event.step().map(|s| s.as_str()),
            detail: (!detail.is_null()).then_some(detail),
        })
    }
}

fn truncate_json(value: &serde_json::Value, max_len: usize) -> String {
    let s = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.len() <= max_len {
        s
    } else {
        format!("{}...", truncate_str(&s, max_len))
    }
}

/// Cut at a char boundary at or below `max_len` bytes.
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
