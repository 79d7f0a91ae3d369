//! Recurring workflow scheduler.
//!
//! Translates a restricted schedule expression into a fixed millisecond
//! interval and fires a caller-supplied callback on that cadence until the
//! workflow is unscheduled. At most one live timer exists per workflow id;
//! re-scheduling cancels the previous timer first.
//!
//! `daily at HH:MM` and `weekly on <day>` are parsed and validated but the
//! clock-time/day component does not align the firing: the interval is a
//! flat 24 h / 7×24 h from registration. Tests pin this behavior.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;
const WEEK_MS: u64 = 7 * DAY_MS;

const DAY_NAMES: &[&str] = &[
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Async callback fired on every schedule tick.
pub type ScheduleCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

/// Externally visible state of one scheduled workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    pub workflow_id: String,
    pub expression: String,
    pub interval_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

struct ScheduleEntry {
    expression: String,
    interval_ms: u64,
    last_run: Option<DateTime<Utc>>,
    next_run: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// Interval scheduler: one tokio task per scheduled workflow.
pub struct Scheduler {
    entries: Arc<RwLock<HashMap<String, ScheduleEntry>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Parse a schedule expression into its firing interval.
    ///
    /// Supported: `every N minutes`, `every N hours`, `daily at HH:MM`,
    /// `weekly on <day-name>`.
    pub fn parse_expression(expression: &str) -> Result<u64, EngineError> {
        let lowered = expression.trim().to_lowercase();
        let parts: Vec<&str> = lowered.split_whitespace().collect();

        let parse_error = || EngineError::ScheduleParse {
            expression: expression.to_string(),
        };

        match parts.as_slice() {
            ["every", n, unit @ ("minute" | "minutes")] | ["every", n, unit @ ("hour" | "hours")] => {
                let count: u64 = n.parse().map_err(|_| parse_error())?;
                if count == 0 {
                    return Err(parse_error());
                }
                let per_unit = if unit.starts_with("minute") {
                    MINUTE_MS
                } else {
                    HOUR_MS
                };
                Ok(count * per_unit)
            }
            ["daily", "at", clock] => {
                let (hours, minutes) = clock.split_once(':').ok_or_else(parse_error)?;
                let hours: u32 = hours.parse().map_err(|_| parse_error())?;
                let minutes: u32 = minutes.parse().map_err(|_| parse_error())?;
                if hours >= 24 || minutes >= 60 {
                    return Err(parse_error());
                }
                // clock time validated but not honored: flat 24h cadence
                Ok(DAY_MS)
            }
            ["weekly", "on", day] => {
                if !DAY_NAMES.contains(day) {
                    return Err(parse_error());
                }
                // day validated but not honored: flat 7-day cadence
                Ok(WEEK_MS)
            }
            _ => Err(parse_error()),
        }
    }

    /// Start (or replace) the recurring timer for a workflow.
    ///
    /// Idempotent per id: any previous timer for the same workflow is
    /// cancelled before the new one starts, so at most one timer is ever
    /// live per id.
    pub async fn schedule(
        &self,
        workflow_id: &str,
        expression: &str,
        callback: ScheduleCallback,
    ) -> Result<(), EngineError> {
        let interval_ms = Self::parse_expression(expression)?;

        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.remove(workflow_id) {
            previous.handle.abort();
            tracing::debug!("🛑 replaced schedule for workflow '{}'", workflow_id);
        }

        let id = workflow_id.to_string();
        let entries_ref = Arc::clone(&self.entries);
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            loop {
                tokio::time::sleep(period).await;

                let now = Utc::now();
                {
                    let mut map = entries_ref.write().await;
                    if let Some(entry) = map.get_mut(&id) {
                        entry.last_run = Some(now);
                        entry.next_run = now + chrono::Duration::milliseconds(interval_ms as i64);
                    }
                }

                tracing::debug!("⏰ schedule fired for workflow '{}'", id);
                if let Err(e) = callback().await {
                    // one failing run must not stop future firings
                    tracing::error!("scheduled run of workflow '{}' failed: {:#}", id, e);
                }
            }
        });

        entries.insert(
            workflow_id.to_string(),
            ScheduleEntry {
                expression: expression.to_string(),
                interval_ms,
                last_run: None,
                next_run: Utc::now() + chrono::Duration::milliseconds(interval_ms as i64),
                handle,
            },
        );

        tracing::info!(
            "⏰ scheduled workflow '{}': {} ({}ms)",
            workflow_id,
            expression,
            interval_ms
        );
        Ok(())
    }

    /// Cancel and remove a workflow's timer. Returns whether one existed.
    pub async fn unschedule(&self, workflow_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        match entries.remove(workflow_id) {
            Some(entry) => {
                entry.handle.abort();
                tracing::info!("🗑️ unscheduled workflow '{}'", workflow_id);
                true
            }
            None => false,
        }
    }

    pub async fn contains(&self, workflow_id: &str) -> bool {
        self.entries.read().await.contains_key(workflow_id)
    }

    pub async fn snapshot(&self) -> Vec<ScheduleInfo> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| ScheduleInfo {
                workflow_id: id.clone(),
                expression: entry.expression.clone(),
                interval_ms: entry.interval_ms,
                last_run: entry.last_run,
                next_run: entry.next_run,
            })
            .collect()
    }

    /// Cancel every timer. Used at shutdown.
    pub async fn shutdown(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            entry.handle.abort();
        }
        tracing::info!("⏹️ scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
