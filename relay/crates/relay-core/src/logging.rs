//! Relay lifecycle event log
//!
//! Structured history of lifecycle transitions, kept by the isolate host.
//! Per-command activity goes to the `log` facade only; this log is for the
//! rarer events a supervisor wants to inspect or dump afterwards.
//!
//! Log Levels:
//! - WARN: Anomalies (worker panics)
//! - INFO: Runtimes and workers coming and going
//! - DEBUG: Isolates and groups coming and going
//! - TRACE: Batch-update requests

use std::collections::VecDeque;
use std::time::Instant;

use serde::Serialize;

use crate::isolate::{IsolateId, ThreadGroupId};
use crate::runtime::{DetachOutcome, RuntimeId, TeardownReport, ThreadKey};

/// Log level for relay events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A thread went RuntimeActive
    RuntimeCreated {
        thread: ThreadKey,
        runtime: RuntimeId,
    },

    /// A thread's runtime was torn down
    RuntimeReleased { report: TeardownReport },

    /// Worker thread started for a group
    WorkerSpawned {
        group: ThreadGroupId,
        thread: ThreadKey,
    },

    /// Worker thread joined
    WorkerJoined { group: ThreadGroupId },

    /// Worker thread died
    WorkerFailed { group: ThreadGroupId, reason: String },

    /// Isolate created
    IsolateAdded {
        isolate: IsolateId,
        group: ThreadGroupId,
        dedicated: bool,
    },

    /// Isolate removed
    IsolateRemoved {
        isolate: IsolateId,
        group: ThreadGroupId,
        outcome: DetachOutcome,
        dropped_commands: u64,
    },

    /// Last isolate of a group removed
    GroupDisposed { group: ThreadGroupId },

    /// Pipeline asked the host for a consumption pass
    BatchRequested { isolate: IsolateId, dedicated: bool },

    /// Host disposed; unread payloads left in active were released
    HostDisposed {
        isolates: usize,
        workers: usize,
        payloads_released: usize,
    },
}

impl RelayEvent {
    /// Level this event is logged at
    pub fn level(&self) -> LogLevel {
        match self {
            RelayEvent::WorkerFailed { .. } => LogLevel::Warn,
            RelayEvent::RuntimeCreated { .. }
            | RelayEvent::RuntimeReleased { .. }
            | RelayEvent::WorkerSpawned { .. }
            | RelayEvent::WorkerJoined { .. }
            | RelayEvent::HostDisposed { .. } => LogLevel::Info,
            RelayEvent::IsolateAdded { .. }
            | RelayEvent::IsolateRemoved { .. }
            | RelayEvent::GroupDisposed { .. } => LogLevel::Debug,
            RelayEvent::BatchRequested { .. } => LogLevel::Trace,
        }
    }
}

impl std::fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayEvent::RuntimeCreated { thread, runtime } => {
                write!(f, "[relay] {} active on {}", runtime, thread)
            },
            RelayEvent::RuntimeReleased { report } => write!(
                f,
                "[relay] {} on {} released ({} names, {} factories, {} wires)",
                report.runtime,
                report.thread,
                report.strings_released,
                report.factories_released,
                report.wires_released
            ),
            RelayEvent::WorkerSpawned { group, thread } => {
                write!(f, "[relay] worker {} spawned for {}", thread, group)
            },
            RelayEvent::WorkerJoined { group } => {
                write!(f, "[relay] worker for {} joined", group)
            },
            RelayEvent::WorkerFailed { group, reason } => {
                write!(f, "[relay] worker for {} failed: {}", group, reason)
            },
            RelayEvent::IsolateAdded {
                isolate,
                group,
                dedicated,
            } => write!(
                f,
                "[relay] {} added to {} ({})",
                isolate,
                group,
                if *dedicated { "dedicated" } else { "shared" }
            ),
            RelayEvent::IsolateRemoved {
                isolate,
                group,
                outcome,
                dropped_commands,
            } => write!(
                f,
                "[relay] {} removed from {} ({:?}, {} commands dropped)",
                isolate, group, outcome, dropped_commands
            ),
            RelayEvent::GroupDisposed { group } => write!(f, "[relay] {} disposed", group),
            RelayEvent::BatchRequested { isolate, dedicated } => write!(
                f,
                "[relay] batch update requested by {} (dedicated={})",
                isolate, dedicated
            ),
            RelayEvent::HostDisposed {
                isolates,
                workers,
                payloads_released,
            } => write!(
                f,
                "[relay] host disposed ({} isolates, {} workers, {} payloads released)",
                isolates, workers, payloads_released
            ),
        }
    }
}

/// Event log configuration
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Events above this level are discarded
    pub level: LogLevel,

    /// Events kept; the oldest are evicted first
    pub capacity: usize,

    /// Echo kept events through the `log` facade
    pub echo: bool,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            capacity: 1024,
            echo: false,
        }
    }
}

/// Bounded in-memory event history
#[derive(Debug)]
pub struct EventLog {
    config: EventLogConfig,
    events: VecDeque<(Instant, RelayEvent)>,
    enabled: bool,
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Self {
        Self {
            events: VecDeque::with_capacity(config.capacity.min(1024)),
            config,
            enabled: true,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record an event
    pub fn log(&mut self, event: RelayEvent) {
        if !self.enabled {
            return;
        }

        let level = event.level();
        if level > self.config.level {
            return;
        }

        if self.config.echo {
            log::log!(level.into(), "{}", event);
        }

        if self.config.capacity == 0 {
            return;
        }
        while self.events.len() >= self.config.capacity {
            self.events.pop_front();
        }
        self.events.push_back((Instant::now(), event));
    }

    /// Events in arrival order
    pub fn events(&self) -> impl Iterator<Item = &RelayEvent> {
        self.events.iter().map(|(_, event)| event)
    }

    /// Events with their timestamps
    pub fn entries(&self) -> impl Iterator<Item = &(Instant, RelayEvent)> {
        self.events.iter()
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// One line per event
    pub fn render_human(&self) -> String {
        let mut out = String::new();
        for (_, event) in &self.events {
            out.push_str(&event.to_string());
            out.push('\n');
        }
        out
    }

    /// One JSON object per line
    pub fn render_json(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for (_, event) in &self.events {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EventLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(raw: u64) -> RelayEvent {
        RelayEvent::IsolateAdded {
            isolate: IsolateId::new(raw),
            group: ThreadGroupId::new(1),
            dedicated: true,
        }
    }

    #[test]
    fn test_event_log_basic() {
        let mut log = EventLog::default();
        log.log(added(1));
        assert_eq!(log.event_count(), 1);
    }

    #[test]
    fn test_event_log_disable() {
        let mut log = EventLog::default();
        log.disable();
        log.log(added(1));
        assert_eq!(log.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let mut log = EventLog::new(EventLogConfig {
            level: LogLevel::Info,
            ..Default::default()
        });
        log.log(added(1));
        log.log(RelayEvent::WorkerJoined {
            group: ThreadGroupId::new(1),
        });
        assert_eq!(log.event_count(), 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut log = EventLog::new(EventLogConfig {
            capacity: 2,
            ..Default::default()
        });
        for raw in 1..=3 {
            log.log(added(raw));
        }
        let kept: Vec<_> = log.events().cloned().collect();
        assert_eq!(kept, vec![added(2), added(3)]);
    }

    #[test]
    fn test_json_rendering() {
        let mut log = EventLog::default();
        log.log(added(7));
        let json = log.render_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
        assert_eq!(value["type"], "isolate_added");
        assert_eq!(value["isolate"], 7);
        assert_eq!(value["dedicated"], true);
    }

    #[test]
    fn test_human_rendering() {
        let mut log = EventLog::default();
        log.log(RelayEvent::GroupDisposed {
            group: ThreadGroupId::new(4),
        });
        assert_eq!(log.render_human(), "[relay] group#4 disposed\n");
    }
}
