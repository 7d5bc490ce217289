//! Progress events for a generation run.
//!
//! A run publishes typed events through a [`ProgressReporter`] into a single
//! ordered tokio queue; the consumer reads them from the matching
//! [`ProgressStream`]. Every envelope carries a strictly increasing `seq`,
//! and a stream ends with exactly one terminal event: `finished`, `error`,
//! or the consumer-side `timeout`.
//!
//! A stream may also be given a heartbeat interval. While the run is silent
//! the consumer then yields `heartbeat` envelopes, which keep long-lived
//! connections open without counting as run activity: they repeat the `seq`
//! of the last delivered event and never push back the idle deadline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A phase began.
    PhaseStart { id: String, label: String },
    /// A phase ended.
    PhaseEnd { id: String, summary: String },
    /// Free-text progress inside a phase.
    Log { phase_id: String, message: String },
    /// A labelled measurement inside a phase.
    Metric {
        phase_id: String,
        label: String,
        value: String,
    },
    /// A quality loop is starting another attempt.
    Retry { attempt: u32, reason: String },
    /// The run completed; terminal.
    Finished { result: serde_json::Value },
    /// The run failed; terminal.
    Error { message: String },
    /// The stream went silent for too long; terminal, consumer side only.
    Timeout { message: String, idle_secs: u64 },
    /// The run is still going but has been quiet for `idle_ms`; consumer
    /// side only.
    Heartbeat { idle_ms: u64 },
}

impl ProgressEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Error { .. } | Self::Timeout { .. }
        )
    }

    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PhaseStart { .. } => "phase_start",
            Self::PhaseEnd { .. } => "phase_end",
            Self::Log { .. } => "log",
            Self::Metric { .. } => "metric",
            Self::Retry { .. } => "retry",
            Self::Finished { .. } => "finished",
            Self::Error { .. } => "error",
            Self::Timeout { .. } => "timeout",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// An event stamped with its position and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    /// Strictly increasing within a run, starting at 1.
    pub seq: u64,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

impl ProgressEnvelope {
    /// Formats the envelope as one Server-Sent Events frame.
    pub fn to_sse_line(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("event: {}\ndata: {}\n\n", self.event.kind(), json),
            Err(err) => format!(
                "event: error\ndata: {{\"type\":\"error\",\"message\":\"unserializable event: {}\"}}\n\n",
                err
            ),
        }
    }
}

#[derive(Debug, Default)]
struct ReporterState {
    seq: u64,
    terminated: bool,
}

#[derive(Debug)]
struct ReporterInner {
    sender: Option<mpsc::UnboundedSender<ProgressEnvelope>>,
    state: Mutex<ReporterState>,
    started: Instant,
}

/// Producer handle passed explicitly to every graph node.
///
/// Cloning is cheap; all clones share one sequence counter and one queue.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

impl ProgressReporter {
    fn with_sender(sender: Option<mpsc::UnboundedSender<ProgressEnvelope>>) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                sender,
                state: Mutex::new(ReporterState::default()),
                started: Instant::now(),
            }),
        }
    }

    /// A reporter that only counts events, for blocking runs.
    pub fn disabled() -> Self {
        Self::with_sender(None)
    }

    /// Publishes an event. Returns false once a terminal event was sent;
    /// later events, terminal or not, are dropped.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        let Ok(mut state) = self.inner.state.lock() else {
            tracing::error!("Progress reporter lock poisoned, dropping event");
            return false;
        };
        if state.terminated {
            tracing::debug!(kind = event.kind(), "Dropping event after terminal event");
            return false;
        }
        state.seq += 1;
        state.terminated = event.is_terminal();

        let envelope = ProgressEnvelope {
            seq: state.seq,
            elapsed_ms: self.inner.started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            event,
        };
        // Sent under the lock so queue order matches seq order.
        if let Some(sender) = &self.inner.sender {
            if sender.send(envelope).is_err() {
                tracing::trace!("Progress consumer gone, event discarded");
            }
        }
        true
    }

    pub fn phase_start(&self, id: &str, label: &str) {
        self.emit(ProgressEvent::PhaseStart {
            id: id.to_string(),
            label: label.to_string(),
        });
    }

    pub fn phase_end(&self, id: &str, summary: impl Into<String>) {
        self.emit(ProgressEvent::PhaseEnd {
            id: id.to_string(),
            summary: summary.into(),
        });
    }

    pub fn log(&self, phase_id: &str, message: impl Into<String>) {
        self.emit(ProgressEvent::Log {
            phase_id: phase_id.to_string(),
            message: message.into(),
        });
    }

    pub fn metric(&self, phase_id: &str, label: &str, value: impl ToString) {
        self.emit(ProgressEvent::Metric {
            phase_id: phase_id.to_string(),
            label: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn retry(&self, attempt: u32, reason: impl Into<String>) {
        self.emit(ProgressEvent::Retry {
            attempt,
            reason: reason.into(),
        });
    }

    /// Sends the `finished` terminal event.
    pub fn finish(&self, result: serde_json::Value) -> bool {
        self.emit(ProgressEvent::Finished { result })
    }

    /// Sends the `error` terminal event.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(ProgressEvent::Error {
            message: message.into(),
        })
    }

    /// Whether a terminal event has been sent.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().map(|s| s.terminated).unwrap_or(true)
    }

    /// Number of events sent so far.
    pub fn sent(&self) -> u64 {
        self.inner.state.lock().map(|s| s.seq).unwrap_or(0)
    }
}

/// Consumer side of a progress channel.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: mpsc::UnboundedReceiver<ProgressEnvelope>,
    idle_timeout: Duration,
    /// Moved forward only by events from the run.
    idle_deadline: Instant,
    heartbeat: Option<Duration>,
    started: Instant,
    last_seq: u64,
    done: bool,
}

impl ProgressStream {
    /// Emits a `heartbeat` envelope after every `interval` without run
    /// events. A zero interval disables heartbeats.
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Waits for the next event.
    ///
    /// Returns `None` after the terminal event. If the run sends nothing
    /// within the idle timeout a `timeout` envelope is returned instead; if
    /// the producer disappears without a terminal event an `error` envelope
    /// is returned. With a heartbeat configured, quiet periods shorter than
    /// the idle timeout yield `heartbeat` envelopes.
    pub async fn next_event(&mut self) -> Option<ProgressEnvelope> {
        if self.done {
            return None;
        }

        let remaining = self.idle_deadline.saturating_duration_since(Instant::now());
        let wait = match self.heartbeat {
            Some(interval) => remaining.min(interval),
            None => remaining,
        };

        match tokio::time::timeout(wait, self.receiver.recv()).await {
            Ok(Some(envelope)) => {
                self.last_seq = envelope.seq;
                self.done = envelope.event.is_terminal();
                self.idle_deadline = Instant::now() + self.idle_timeout;
                Some(envelope)
            }
            Ok(None) => {
                self.done = true;
                tracing::warn!("Progress producer dropped before a terminal event");
                Some(self.synthesize(ProgressEvent::Error {
                    message: "generation stopped without reporting a result".to_string(),
                }))
            }
            Err(_) if Instant::now() < self.idle_deadline => {
                let left = self.idle_deadline.saturating_duration_since(Instant::now());
                let idle_ms = self.idle_timeout.saturating_sub(left).as_millis() as u64;
                tracing::trace!(idle_ms, "Progress heartbeat");
                Some(ProgressEnvelope {
                    seq: self.last_seq,
                    elapsed_ms: self.started.elapsed().as_millis() as u64,
                    timestamp: Utc::now(),
                    event: ProgressEvent::Heartbeat { idle_ms },
                })
            }
            Err(_) => {
                self.done = true;
                let idle_secs = self.idle_timeout.as_secs();
                tracing::warn!(idle_secs, "Progress stream idle timeout");
                Some(self.synthesize(ProgressEvent::Timeout {
                    message: format!("no progress for {} seconds", idle_secs),
                    idle_secs,
                }))
            }
        }
    }

    fn synthesize(&mut self, event: ProgressEvent) -> ProgressEnvelope {
        self.last_seq += 1;
        ProgressEnvelope {
            seq: self.last_seq,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
            event,
        }
    }

    /// Drains the stream into a vector, ending at the terminal event.
    pub async fn collect_all(mut self) -> Vec<ProgressEnvelope> {
        let mut events = Vec::new();
        while let Some(envelope) = self.next_event().await {
            events.push(envelope);
        }
        events
    }

    /// Adapts the stream into a `futures::Stream` ending after the terminal event.
    pub fn into_stream(mut self) -> impl Stream<Item = ProgressEnvelope> + Send {
        async_stream::stream! {
            while let Some(envelope) = self.next_event().await {
                yield envelope;
            }
        }
    }
}

/// Creates a connected reporter and stream.
pub fn progress_channel(idle_timeout: Duration) -> (ProgressReporter, ProgressStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let reporter = ProgressReporter::with_sender(Some(sender));
    let started = reporter.inner.started;
    let stream = ProgressStream {
        receiver,
        idle_timeout,
        idle_deadline: started + idle_timeout,
        heartbeat: None,
        started,
        last_seq: 0,
        done: false,
    };
    (reporter, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_sequence_and_single_terminal() {
        let (reporter, stream) = progress_channel(Duration::from_secs(5));
        reporter.phase_start("generator", "Question Generator");
        reporter.log("generator", "working");
        reporter.metric("generator", "Questions", 3);
        assert!(reporter.finish(serde_json::json!({"ok": true})));
        assert!(!reporter.fail("late failure"));
        assert!(!reporter.finish(serde_json::Value::Null));
        drop(reporter);

        let events = stream.collect_all().await;
        assert_eq!(events.len(), 4);
        assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
        assert_eq!(events[0].seq, 1);
        assert_eq!(events.iter().filter(|e| e.event.is_terminal()).count(), 1);
        assert_eq!(events[3].event.kind(), "finished");
    }

    #[tokio::test]
    async fn test_order_preserved_across_tasks() {
        let (reporter, stream) = progress_channel(Duration::from_secs(5));
        let producer = reporter.clone();
        let task = tokio::spawn(async move {
            for i in 0..200 {
                producer.log("worker", format!("step {i}"));
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            producer.finish(serde_json::Value::Null);
        });

        let events: Vec<_> = stream.into_stream().collect().await;
        task.await.expect("producer task");
        assert_eq!(events.len(), 201);
        for (i, envelope) in events.iter().enumerate() {
            assert_eq!(envelope.seq, i as u64 + 1);
        }
        match &events[5].event {
            ProgressEvent::Log { message, .. } => assert_eq!(message, "step 5"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_idle_timeout_is_distinct_terminal() {
        let (reporter, mut stream) = progress_channel(Duration::from_millis(50));
        reporter.log("generator", "started");

        let first = stream.next_event().await.expect("first event");
        assert_eq!(first.event.kind(), "log");

        let timeout = stream.next_event().await.expect("timeout event");
        assert!(matches!(timeout.event, ProgressEvent::Timeout { .. }));
        assert_eq!(timeout.seq, 2);
        assert!(stream.next_event().await.is_none());
        drop(reporter);
    }

    #[tokio::test]
    async fn test_heartbeats_fill_silence_without_delaying_timeout() {
        let (reporter, stream) = progress_channel(Duration::from_millis(200));
        let mut stream = stream.with_heartbeat(Duration::from_millis(20));
        reporter.log("generator", "waiting on the model");

        let first = stream.next_event().await.expect("first event");
        assert_eq!(first.seq, 1);

        let rest = tokio::time::timeout(Duration::from_secs(5), stream.collect_all())
            .await
            .expect("idle timeout still fires while heartbeats flow");
        let (last, heartbeats) = rest.split_last().expect("terminal event");
        assert!(matches!(last.event, ProgressEvent::Timeout { .. }));
        assert_eq!(last.seq, 2);
        assert!(heartbeats.len() >= 2);
        for envelope in heartbeats {
            assert!(matches!(envelope.event, ProgressEvent::Heartbeat { idle_ms } if idle_ms < 200));
            assert!(!envelope.event.is_terminal());
            assert_eq!(envelope.seq, 1);
        }
        drop(reporter);
    }

    #[tokio::test]
    async fn test_run_events_follow_heartbeats() {
        let (reporter, stream) = progress_channel(Duration::from_secs(5));
        let mut stream = stream.with_heartbeat(Duration::from_millis(10));
        let producer = reporter.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            producer.log("review", "scored");
            producer.finish(serde_json::Value::Null);
        });

        let heartbeat = stream.next_event().await.expect("heartbeat");
        assert!(matches!(heartbeat.event, ProgressEvent::Heartbeat { .. }));
        assert_eq!(heartbeat.seq, 0);

        let events = stream.collect_all().await;
        task.await.expect("producer task");
        let run_events: Vec<_> = events
            .iter()
            .filter(|e| e.event.kind() != "heartbeat")
            .collect();
        assert_eq!(run_events.len(), 2);
        assert_eq!(run_events[0].seq, 1);
        assert_eq!(run_events[1].event.kind(), "finished");
    }

    #[test]
    fn test_heartbeat_sse_line() {
        let envelope = ProgressEnvelope {
            seq: 3,
            elapsed_ms: 42_000,
            timestamp: Utc::now(),
            event: ProgressEvent::Heartbeat { idle_ms: 15_000 },
        };
        let line = envelope.to_sse_line();
        assert!(line.starts_with("event: heartbeat\ndata: {"));
        assert!(line.contains("\"type\":\"heartbeat\""));
        assert!(line.contains("\"idle_ms\":15000"));
        assert!(line.contains("\"elapsed_ms\":42000"));
    }

    #[tokio::test]
    async fn test_dropped_producer_yields_error() {
        let (reporter, stream) = progress_channel(Duration::from_secs(5));
        reporter.log("generator", "started");
        drop(reporter);

        let events = stream.collect_all().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event.kind(), "error");
    }

    #[tokio::test]
    async fn test_disabled_reporter_counts() {
        let reporter = ProgressReporter::disabled();
        reporter.log("x", "y");
        reporter.fail("boom");
        assert_eq!(reporter.sent(), 2);
        assert!(reporter.is_terminated());
    }

    #[test]
    fn test_sse_line_shape() {
        let envelope = ProgressEnvelope {
            seq: 7,
            elapsed_ms: 12,
            timestamp: Utc::now(),
            event: ProgressEvent::Retry {
                attempt: 2,
                reason: "score 0.50 below 0.70".to_string(),
            },
        };
        let line = envelope.to_sse_line();
        assert!(line.starts_with("event: retry\ndata: {"));
        assert!(line.ends_with("\n\n"));
        assert!(line.contains("\"type\":\"retry\""));
        assert!(line.contains("\"seq\":7"));

        let json = line
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .expect("data line");
        let parsed: ProgressEnvelope = serde_json::from_str(json).expect("round trip");
        assert_eq!(parsed.event, envelope.event);
    }
}
