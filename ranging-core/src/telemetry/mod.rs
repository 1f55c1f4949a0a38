//! Telemetry event catalog and the ring buffer shared by firmware and host targets.
//!
//! The core never prints. Everything worth a diagnostic line (issued commands,
//! consumed completions, failures, lookup misses, operator prompts, distance
//! reports) becomes a [`TelemetryRecord`] in a fixed-size
//! [`heapless::HistoryBuf`]. Front ends drain new records by id and render them
//! with whatever logger the target provides.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::config::ConfigId;
use crate::events::CsEventKind;
use crate::filter::MAX_DISTANCE_CHANNELS;
use crate::procedure::{ConnHandle, Step, Tick};

/// Monotonically increasing record identifier (wraps).
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEventKind {
    /// A negotiation command was handed to the link.
    CommandIssued(Step),
    /// The link refused a negotiation command.
    CommandFailed(Step),
    /// A completion was consumed by the state machine.
    StepCompleted(Step),
    /// A completion carried a non-zero HCI status.
    EventFailed(CsEventKind),
    /// Data arrived for a connection without a control record.
    /// `None` marks remote step data rather than an HCI event.
    LookupMiss(Option<CsEventKind>),
    /// Ranging data referenced a configuration that is no longer valid.
    StaleConfig,
    /// Manual mode is waiting for the operator to trigger this step.
    OperatorPrompt(Step),
    ConfigCreated,
    ConfigRemoved,
    RangingStarted,
    RangingStopped,
    ProcedureAborted,
    /// Step data could not be assembled into a procedure.
    AssemblyFailed,
    DistanceReported,
    EstimateFailed,
    PoolExhausted,
    RegistryFull,
    Disconnected,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::CommandIssued(step) => write!(f, "command-issued {step}"),
            TelemetryEventKind::CommandFailed(step) => write!(f, "command-failed {step}"),
            TelemetryEventKind::StepCompleted(step) => write!(f, "step-completed {step}"),
            TelemetryEventKind::EventFailed(kind) => write!(f, "event-failed ({kind})"),
            TelemetryEventKind::LookupMiss(Some(kind)) => write!(f, "lookup-miss ({kind})"),
            TelemetryEventKind::LookupMiss(None) => f.write_str("lookup-miss (remote data)"),
            TelemetryEventKind::StaleConfig => f.write_str("stale-config"),
            TelemetryEventKind::OperatorPrompt(step) => write!(f, "operator-prompt {step}"),
            TelemetryEventKind::ConfigCreated => f.write_str("config-created"),
            TelemetryEventKind::ConfigRemoved => f.write_str("config-removed"),
            TelemetryEventKind::RangingStarted => f.write_str("ranging-started"),
            TelemetryEventKind::RangingStopped => f.write_str("ranging-stopped"),
            TelemetryEventKind::ProcedureAborted => f.write_str("procedure-aborted"),
            TelemetryEventKind::AssemblyFailed => f.write_str("assembly-failed"),
            TelemetryEventKind::DistanceReported => f.write_str("distance"),
            TelemetryEventKind::EstimateFailed => f.write_str("estimate-failed"),
            TelemetryEventKind::PoolExhausted => f.write_str("pool-exhausted"),
            TelemetryEventKind::RegistryFull => f.write_str("registry-full"),
            TelemetryEventKind::Disconnected => f.write_str("disconnected"),
        }
    }
}

impl TelemetryEventKind {
    /// Returns `true` for events that indicate something went wrong.
    #[must_use]
    pub const fn is_fault(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::CommandFailed(_)
                | TelemetryEventKind::EventFailed(_)
                | TelemetryEventKind::EstimateFailed
                | TelemetryEventKind::PoolExhausted
                | TelemetryEventKind::RegistryFull
        )
    }

    /// Returns `true` for events a front end should surface as warnings.
    #[must_use]
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::LookupMiss(_)
                | TelemetryEventKind::StaleConfig
                | TelemetryEventKind::ProcedureAborted
                | TelemetryEventKind::AssemblyFailed
        )
    }
}

/// Filtered distances of one procedure.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DistanceTelemetry {
    pub procedure_counter: u16,
    pub count: u8,
    pub meters: [f32; MAX_DISTANCE_CHANNELS],
}

impl DistanceTelemetry {
    /// Distances that were actually produced.
    #[must_use]
    pub fn distances(&self) -> &[f32] {
        let count = usize::from(self.count).min(MAX_DISTANCE_CHANNELS);
        &self.meters[..count]
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    /// HCI status code of a failed completion.
    Status(u8),
    /// Configuration the event refers to.
    Config(ConfigId),
    /// Procedure counter the event refers to.
    Procedure(u16),
    /// Non-zero code returned by the distance estimator.
    EstimateError(i32),
    /// Filtered distance report.
    Distance(DistanceTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

impl fmt::Display for TelemetryPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Status(status) => write!(f, "status=0x{status:02x}"),
            TelemetryPayload::Config(id) => write!(f, "config={id}"),
            TelemetryPayload::Procedure(counter) => write!(f, "procedure={counter}"),
            TelemetryPayload::EstimateError(code) => write!(f, "code={code}"),
            TelemetryPayload::Distance(report) => {
                write!(f, "procedure={}", report.procedure_counter)?;
                for meters in report.distances() {
                    write!(f, " {meters:.2}m")?;
                }
                Ok(())
            }
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp: Tick,
    pub conn: Option<ConnHandle>,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.timestamp)?;
        if let Some(conn) = self.conn {
            write!(f, " conn={conn}")?;
        }
        write!(f, " {}", self.event)?;
        if !matches!(self.details, TelemetryPayload::None) {
            write!(f, " {}", self.details)?;
        }
        Ok(())
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryRecorder<CAPACITY> {
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    /// Records with an id at or after `cursor`, oldest first.
    ///
    /// Front ends keep `next_event_id()` as their cursor between drains.
    pub fn since(&self, cursor: EventId) -> impl Iterator<Item = &TelemetryRecord> {
        let newest = self.next_event_id;
        self.oldest_first()
            .filter(move |record| newest.wrapping_sub(record.id) <= newest.wrapping_sub(cursor))
    }

    /// Identifier the next recorded event will receive.
    #[must_use]
    pub const fn next_event_id(&self) -> EventId {
        self.next_event_id
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        conn: Option<ConnHandle>,
        details: TelemetryPayload,
        timestamp: Tick,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            conn,
            event,
            details,
        });

        id
    }

    /// Records an event about `conn` without extra payload.
    pub fn record_for(
        &mut self,
        conn: ConnHandle,
        event: TelemetryEventKind,
        timestamp: Tick,
    ) -> EventId {
        self.record(event, Some(conn), TelemetryPayload::none(), timestamp)
    }

    /// Records a completion that the controller reported with a failure status.
    pub fn record_event_failure(
        &mut self,
        conn: ConnHandle,
        kind: CsEventKind,
        status: u8,
        timestamp: Tick,
    ) -> EventId {
        self.record(
            TelemetryEventKind::EventFailed(kind),
            Some(conn),
            TelemetryPayload::Status(status),
            timestamp,
        )
    }

    /// Records a filtered distance report.
    pub fn record_distance(
        &mut self,
        conn: ConnHandle,
        procedure_counter: u16,
        meters: &[f32],
        timestamp: Tick,
    ) -> EventId {
        let mut report = DistanceTelemetry {
            procedure_counter,
            count: 0,
            meters: [0.0; MAX_DISTANCE_CHANNELS],
        };
        for (slot, value) in report.meters.iter_mut().zip(meters) {
            *slot = *value;
            report.count += 1;
        }

        self.record(
            TelemetryEventKind::DistanceReported,
            Some(conn),
            TelemetryPayload::Distance(report),
            timestamp,
        )
    }
}

impl<const CAPACITY: usize> Default for TelemetryRecorder<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
