//! Simulate command implementation.
//!
//! Spins up an isolate host, gives every group its worker and isolates, has
//! each isolate record a stream of event-wiring commands with periodic
//! finish markers, and drains everything on this thread as the host would.
//! Every AddEvent carries its sequence number in the event name, so the
//! consumer can check per-isolate order and that nothing was lost or
//! duplicated.

use std::collections::BTreeMap;
use std::thread;
use std::time::{Duration, Instant};

use relay_core::{
    CommandRecord, IsolateCommand, IsolateConfig, IsolateHost, IsolateId, PipelineStats,
    RelayConfig, RelayEvent, ThreadGroupId,
};
use serde::Serialize;

use crate::commands::ReportFormat;
use crate::config::WorkloadConfig;
use crate::error::{RelayctlError, Result};

/// Prefix of every simulated event type; the sequence number follows it.
const EVENT_PREFIX: &str = "sim.";

/// Consumer back-off while no batch update is pending.
const IDLE_BACKOFF: Duration = Duration::from_micros(200);

/// Arguments for the simulate command.
#[derive(Debug, Clone)]
pub struct SimulateArgs {
    pub workload: WorkloadConfig,
    pub relay: RelayConfig,
    pub format: ReportFormat,
    /// Include the host's lifecycle event log in the report.
    pub show_events: bool,
    pub verbose: bool,
}

/// Per-isolate outcome.
#[derive(Debug, Clone, Serialize)]
pub struct IsolateReport {
    pub isolate: IsolateId,
    pub group: ThreadGroupId,
    pub dedicated: bool,
    pub records: u64,
    pub batches: u64,
    pub stats: PipelineStats,
}

/// What a simulation run produced.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub groups: u32,
    pub dedicated_isolates: u64,
    pub shared_isolates: u64,
    pub commands_per_isolate: u64,
    pub records_consumed: u64,
    pub batches_consumed: u64,
    pub batch_updates: u64,
    pub elapsed_ms: f64,
    pub records_per_sec: f64,
    pub pipeline: PipelineStats,
    pub isolates: Vec<IsolateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<RelayEvent>>,
}

/// Consumer-side bookkeeping for one isolate.
#[derive(Debug)]
struct Tally {
    group: ThreadGroupId,
    dedicated: bool,
    expected_records: u64,
    next_sequence: u64,
    records: u64,
    batches: u64,
}

impl Tally {
    fn check(&mut self, isolate: IsolateId, record: &CommandRecord) -> Result<()> {
        match record.command() {
            Some(IsolateCommand::AddEvent) => {
                // SAFETY: every record is consumed exactly once, here.
                let payload = unsafe { record.take_payload() }.ok_or_else(|| {
                    RelayctlError::Verification(format!("{}: AddEvent without payload", isolate))
                })?;
                let name = payload.to_string_lossy();
                let sequence = parse_sequence(&name).ok_or_else(|| {
                    RelayctlError::Verification(format!(
                        "{}: unexpected event type {:?}",
                        isolate, name
                    ))
                })?;
                if sequence != self.next_sequence {
                    return Err(RelayctlError::Verification(format!(
                        "{}: expected command {} but received {}",
                        isolate, self.next_sequence, sequence
                    )));
                }
                self.next_sequence += 1;
            },
            Some(_) => {},
            None => {
                return Err(RelayctlError::Verification(format!(
                    "{}: unknown command code {}",
                    isolate, record.kind
                )));
            },
        }
        self.records += 1;
        Ok(())
    }
}

/// Simulate command handler.
pub struct SimulateCommand {
    args: SimulateArgs,
}

impl SimulateCommand {
    /// Create a new SimulateCommand.
    pub fn new(args: SimulateArgs) -> Self {
        Self { args }
    }

    /// Run the workload and verify what the consumer saw.
    pub fn run(&self) -> Result<SimulationReport> {
        let workload = &self.args.workload;
        workload.validate()?;

        let mut host = IsolateHost::new(self.args.relay.clone())?;
        let mut tallies = self.create_isolates(&mut host)?;

        let started = Instant::now();
        for &id in tallies.keys() {
            let targets = workload.targets_per_isolate;
            let commands = workload.commands_per_isolate;
            let finish_every = workload.finish_every;
            host.post_to_isolate(id, move |isolate| {
                record_workload(isolate, targets, commands, finish_every)
            })?;
        }

        let (batch_updates, records_consumed) = self.consume(&mut host, &mut tallies)?;
        let elapsed = started.elapsed();
        verify(workload, &tallies)?;

        let mut isolates = Vec::with_capacity(tallies.len());
        let mut pipeline = PipelineStats::default();
        for (&id, tally) in &tallies {
            let stats = host.stats(id)?;
            pipeline += stats;
            isolates.push(IsolateReport {
                isolate: id,
                group: tally.group,
                dedicated: tally.dedicated,
                records: tally.records,
                batches: tally.batches,
                stats,
            });
        }

        for &id in tallies.keys() {
            let mut removal = host.remove_isolate(id)?;
            let leftover = removal.reader.release_unread();
            if leftover > 0 {
                tracing::warn!("{} left {} unread payloads", id, leftover);
            }
        }
        host.dispose()?;

        let elapsed_secs = elapsed.as_secs_f64();
        Ok(SimulationReport {
            groups: workload.groups,
            dedicated_isolates: u64::from(workload.groups) * u64::from(workload.isolates_per_group),
            shared_isolates: u64::from(workload.shared_isolates),
            commands_per_isolate: workload.commands_per_isolate,
            records_consumed,
            batches_consumed: tallies.values().map(|tally| tally.batches).sum(),
            batch_updates,
            elapsed_ms: elapsed_secs * 1000.0,
            records_per_sec: if elapsed_secs > 0.0 {
                records_consumed as f64 / elapsed_secs
            } else {
                0.0
            },
            pipeline,
            isolates,
            events: self
                .args
                .show_events
                .then(|| host.events().events().cloned().collect()),
        })
    }

    fn create_isolates(&self, host: &mut IsolateHost) -> Result<BTreeMap<IsolateId, Tally>> {
        let workload = &self.args.workload;
        let expected_records = expected_records_per_isolate(workload);
        let mut tallies = BTreeMap::new();
        tracing::info!(
            "Simulating {} isolates, {} records each",
            workload.isolate_count(),
            expected_records
        );

        let dedicated = (1..=workload.groups).flat_map(|group| {
            (0..workload.isolates_per_group)
                .map(move |_| IsolateConfig::dedicated(ThreadGroupId::new(group)))
        });
        let shared = (0..workload.shared_isolates).map(|_| IsolateConfig::shared());

        for config in dedicated.chain(shared) {
            let id = host.add_isolate(config)?;
            if self.args.verbose {
                tracing::debug!("Created {} ({:?})", id, config);
            }
            tallies.insert(
                id,
                Tally {
                    group: host.group_of(id).unwrap_or(ThreadGroupId::HOST),
                    dedicated: config.dedicated,
                    expected_records,
                    next_sequence: 0,
                    records: 0,
                    batches: 0,
                },
            );
        }
        Ok(tallies)
    }

    /// Drain batches as updates arrive until every expected record is in.
    ///
    /// Returns the number of batch updates polled and records consumed.
    fn consume(
        &self,
        host: &mut IsolateHost,
        tallies: &mut BTreeMap<IsolateId, Tally>,
    ) -> Result<(u64, u64)> {
        let expected: u64 = tallies.values().map(|tally| tally.expected_records).sum();
        let timeout = Duration::from_secs(self.args.workload.timeout_secs);
        let deadline = Instant::now() + timeout;

        let mut updates_polled = 0u64;
        let mut consumed = 0u64;
        while consumed < expected {
            let updates = host.poll_batch_updates();
            if updates.is_empty() {
                if Instant::now() >= deadline {
                    return Err(RelayctlError::Verification(format!(
                        "timed out after {}s with {} of {} records consumed",
                        timeout.as_secs(),
                        consumed,
                        expected
                    )));
                }
                thread::sleep(IDLE_BACKOFF);
                continue;
            }
            updates_polled += updates.len() as u64;

            let mut pending: Vec<_> = updates.iter().map(|update| update.isolate).collect();
            pending.sort();
            pending.dedup();
            for id in pending {
                let tally = tallies.get_mut(&id).ok_or_else(|| {
                    RelayctlError::Verification(format!("update from unknown {}", id))
                })?;
                consumed += drain_isolate(host, id, tally)?;
            }
        }
        Ok((updates_polled, consumed))
    }
}

/// Take every visible batch of `id`, checking each record.
fn drain_isolate(host: &mut IsolateHost, id: IsolateId, tally: &mut Tally) -> Result<u64> {
    let reader = host.reader(id)?;
    let mut drained = 0u64;
    loop {
        let batch = reader.read_active();
        if batch.is_empty() {
            return Ok(drained);
        }
        for record in batch.records() {
            tally.check(id, record)?;
        }
        tally.batches += 1;
        drained += batch.len() as u64;
        reader.clear_active();
    }
}

/// Producer side, run on the isolate's own thread.
fn record_workload(
    isolate: &mut relay_core::Isolate,
    targets: u32,
    commands: u64,
    finish_every: u64,
) {
    let context = isolate.context_mut();
    let mut handles = Vec::with_capacity(targets as usize);
    for _ in 0..targets {
        match context.create_event_target() {
            Ok(handle) => handles.push(handle),
            Err(e) => tracing::warn!("{}: creating event target failed: {}", context.isolate(), e),
        }
    }

    if !handles.is_empty() {
        for sequence in 0..commands {
            let target = handles[(sequence % handles.len() as u64) as usize];
            if let Err(e) = context.add_event_listener(target, &event_name(sequence)) {
                tracing::warn!("{}: add_event_listener failed: {}", context.isolate(), e);
            }
            if finish_every > 0 && (sequence + 1) % finish_every == 0 {
                context.finish_recording();
            }
        }
    }
    context.finish_recording();
}

fn event_name(sequence: u64) -> String {
    format!("{}{}", EVENT_PREFIX, sequence)
}

fn parse_sequence(name: &str) -> Option<u64> {
    name.strip_prefix(EVENT_PREFIX)?.parse().ok()
}

/// Records one isolate produces: targets, commands, finish markers.
fn expected_records_per_isolate(workload: &WorkloadConfig) -> u64 {
    let finishes = match workload.finish_every {
        0 => 1,
        every => workload.commands_per_isolate / every + 1,
    };
    u64::from(workload.targets_per_isolate) + workload.commands_per_isolate + finishes
}

fn verify(workload: &WorkloadConfig, tallies: &BTreeMap<IsolateId, Tally>) -> Result<()> {
    for (id, tally) in tallies {
        if tally.next_sequence != workload.commands_per_isolate {
            return Err(RelayctlError::Verification(format!(
                "{}: received {} of {} commands",
                id, tally.next_sequence, workload.commands_per_isolate
            )));
        }
        if tally.records != tally.expected_records {
            return Err(RelayctlError::Verification(format!(
                "{}: received {} records, expected {}",
                id, tally.records, tally.expected_records
            )));
        }
    }
    Ok(())
}

/// Print a report in the requested format.
pub fn print_report(report: &SimulationReport, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        ReportFormat::Text => print!("{}", render_text(report)),
    }
    Ok(())
}

fn render_text(report: &SimulationReport) -> String {
    let stats = &report.pipeline;
    let mut out = String::new();
    out.push_str("Simulation completed: no commands lost, order preserved\n");
    out.push_str(&format!("  groups:            {}\n", report.groups));
    out.push_str(&format!(
        "  isolates:          {} dedicated, {} shared\n",
        report.dedicated_isolates, report.shared_isolates
    ));
    out.push_str(&format!(
        "  commands:          {} per isolate\n",
        report.commands_per_isolate
    ));
    out.push_str(&format!("  records consumed:  {}\n", report.records_consumed));
    out.push_str(&format!(
        "  batches consumed:  {} ({} update requests)\n",
        report.batches_consumed, report.batch_updates
    ));
    out.push_str(&format!(
        "  promotions:        {} (mean {:.1} records)\n",
        stats.promotions,
        stats.mean_promotion_size()
    ));
    out.push_str(&format!(
        "  folds:             {} swap, {} append\n",
        stats.swap_folds, stats.append_folds
    ));
    out.push_str(&format!(
        "  elapsed:           {:.2} ms ({:.0} records/s)\n",
        report.elapsed_ms, report.records_per_sec
    ));
    if let Some(events) = &report.events {
        out.push_str("Events:\n");
        for event in events {
            out.push_str(&format!("  {}\n", event));
        }
    }
    out
}

/// Execute the simulate command.
pub fn run_simulate(args: SimulateArgs) -> Result<()> {
    let format = args.format;
    let report = SimulateCommand::new(args).run()?;
    print_report(&report, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(workload: WorkloadConfig) -> SimulateArgs {
        SimulateArgs {
            workload,
            relay: RelayConfig {
                initial_command_capacity: 16,
                sync_buffer_size: 8,
                ..RelayConfig::default()
            },
            format: ReportFormat::Json,
            show_events: true,
            verbose: false,
        }
    }

    fn small_workload() -> WorkloadConfig {
        WorkloadConfig {
            groups: 2,
            isolates_per_group: 2,
            shared_isolates: 1,
            commands_per_isolate: 200,
            finish_every: 32,
            targets_per_isolate: 4,
            timeout_secs: 30,
        }
    }

    #[test]
    fn test_sequence_names_roundtrip() {
        assert_eq!(parse_sequence(&event_name(42)), Some(42));
        assert_eq!(parse_sequence("click"), None);
        assert_eq!(parse_sequence("sim.x"), None);
    }

    #[test]
    fn test_expected_records() {
        let workload = small_workload();
        // 4 targets + 200 commands + 6 periodic finishes + final finish
        assert_eq!(expected_records_per_isolate(&workload), 4 + 200 + 7);

        let workload = WorkloadConfig {
            finish_every: 0,
            ..small_workload()
        };
        assert_eq!(expected_records_per_isolate(&workload), 4 + 200 + 1);
    }

    #[test]
    fn test_simulation_verifies_everything() {
        let report = SimulateCommand::new(args(small_workload())).run().unwrap();
        assert_eq!(report.dedicated_isolates, 4);
        assert_eq!(report.shared_isolates, 1);
        assert_eq!(report.isolates.len(), 5);
        assert_eq!(report.records_consumed, 5 * (4 + 200 + 7));
        assert_eq!(report.pipeline.recorded, report.records_consumed);
        assert_eq!(report.pipeline.dropped, 0);

        let events = report.events.unwrap();
        assert!(matches!(events.last(), Some(RelayEvent::HostDisposed { .. })));
    }

    #[test]
    fn test_only_final_finish_marker() {
        let workload = WorkloadConfig {
            groups: 1,
            isolates_per_group: 1,
            commands_per_isolate: 50,
            finish_every: 0,
            ..small_workload()
        };
        let report = SimulateCommand::new(args(workload)).run().unwrap();
        assert_eq!(report.records_consumed, 2 * (4 + 50 + 1));
    }

    #[test]
    fn test_invalid_workload_rejected() {
        let workload = WorkloadConfig {
            groups: 0,
            shared_isolates: 0,
            ..small_workload()
        };
        let err = SimulateCommand::new(args(workload)).run().unwrap_err();
        assert!(matches!(err, RelayctlError::Config(_)));
    }

    #[test]
    fn test_text_report_mentions_totals() {
        let report = SimulateCommand::new(args(small_workload())).run().unwrap();
        let text = render_text(&report);
        assert!(text.contains("no commands lost"));
        assert!(text.contains("4 dedicated, 1 shared"));
        assert!(text.contains("Events:"));
    }
}
