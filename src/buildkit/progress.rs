use super::status::{SolveStatus, Vertex};
use crate::protocol::SOURCE_BUILDKIT;
use crate::session::Outbox;
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const LOG_TRIM: &[char] = &['\r', '\n'];
const LINE_END_TRIM: &[char] = &['\u{b}', '\u{c}', '\r'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VertexState {
    New,
    Start,
    Done,
    Cached,
}

impl VertexState {
    fn of(vertex: &Vertex) -> Self {
        if vertex.cached {
            VertexState::Cached
        } else if vertex.completed.is_some() {
            VertexState::Done
        } else if vertex.started.is_some() {
            VertexState::Start
        } else {
            VertexState::New
        }
    }

    fn label(&self) -> &'static str {
        match self {
            VertexState::New => "NEW",
            VertexState::Start => "START",
            VertexState::Done => "DONE",
            VertexState::Cached => "CACHED",
        }
    }
}

/// Renders build progress into numbered log lines
///
/// Vertices are numbered in the order they are first seen, starting at 1.
/// One tracker lives for exactly one solve.
pub struct StatusTracker {
    /// Display number per vertex digest
    numbers: HashMap<String, i64>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            numbers: HashMap::new(),
        }
    }

    /// Spawn a task rendering every event from `events` into `outbox`
    ///
    /// The task ends when the sending side of `events` is dropped.
    pub fn spawn(outbox: Outbox, events: mpsc::Receiver<SolveStatus>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tracker = StatusTracker::new();
            tracker.run(outbox, events).await;
        })
    }

    pub async fn run(&mut self, outbox: Outbox, mut events: mpsc::Receiver<SolveStatus>) {
        let mut batches = 0usize;

        while let Some(status) = events.recv().await {
            batches += 1;
            for line in self.render(&status) {
                if let Err(e) = outbox.send_log(SOURCE_BUILDKIT, line).await {
                    warn!("send log stream send: {}", e);
                }
            }
        }

        debug!(
            "Build status stream ended after {} batches, {} vertices",
            batches,
            self.numbers.len()
        );
    }

    /// Render one batch of progress into display lines
    pub fn render(&mut self, status: &SolveStatus) -> Vec<String> {
        let mut lines = Vec::new();

        for warning in &status.warnings {
            let short = String::from_utf8_lossy(&warning.short);
            lines.push(format!("Warning: {}", short.trim_end()));
        }

        for vertex in &status.vertexes {
            let number = self.number_for(&vertex.digest);
            let state = VertexState::of(vertex);
            let duration = match (vertex.started, vertex.completed) {
                (Some(started), Some(completed)) => {
                    (completed - started).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0
                }
                _ => 0.0,
            };

            if duration < 0.01 {
                lines.push(format!("#{} {:>6} {}", number, state.label(), vertex.name));
            } else {
                lines.push(format!(
                    "#{} {:>6} {:.2}s {}",
                    number,
                    state.label(),
                    duration,
                    vertex.name
                ));
            }
        }

        // Only a record repeating its immediate predecessor is dropped
        let mut prev: Option<(&str, DateTime<Utc>)> = None;
        for log in &status.logs {
            let key = (log.vertex.as_str(), log.timestamp);
            if prev == Some(key) {
                continue;
            }
            prev = Some(key);

            let number = self.numbers.get(&log.vertex).copied().unwrap_or(-1);

            let data = std::str::from_utf8(&log.data)
                .map(Cow::Borrowed)
                .unwrap_or_else(|_| String::from_utf8_lossy(&log.data));

            for line in data.trim_end_matches(LOG_TRIM).split('\n') {
                lines.push(format!(
                    "#{} {:>6} {}",
                    number,
                    "LOG",
                    line.trim_end_matches(LINE_END_TRIM)
                ));
            }
        }

        lines
    }

    /// Display number of a vertex, assigning the next one on first sight
    fn number_for(&mut self, digest: &str) -> i64 {
        let next = self.numbers.len() as i64 + 1;
        *self.numbers.entry(digest.to_string()).or_insert(next)
    }
}
