//! Negotiation state machine.
//!
//! One call to [`advance`] is one driver-loop pass over one record: consume at
//! most one pending completion, then issue at most one command.

use core::fmt;

use crate::config::RangingSettings;
use crate::hci::CsCommand;
use crate::telemetry::{TelemetryEventKind, TelemetryPayload, TelemetryRecorder};

use super::{ConnHandle, ProcedureRecord, Step, Tick};

/// How the link layer accepted a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandStatus {
    /// The completion will arrive later as an event.
    Pending,
    /// The command completed locally; no event will follow.
    Completed,
}

/// Transport failures reported by a [`CsCommandSink`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The outbound queue is full.
    Busy,
    /// The connection is gone.
    Disconnected,
    /// The controller rejected the command with an HCI status.
    Rejected(u8),
}

impl LinkError {
    /// HCI-style status code for telemetry.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            LinkError::Busy => 0x0C,
            LinkError::Disconnected => 0x02,
            LinkError::Rejected(status) => status,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Busy => f.write_str("link busy"),
            LinkError::Disconnected => f.write_str("link disconnected"),
            LinkError::Rejected(status) => write!(f, "command rejected (0x{status:02x})"),
        }
    }
}

/// Link-layer seam: hands one CS command to the controller.
pub trait CsCommandSink {
    fn send(&mut self, conn: ConnHandle, command: &CsCommand) -> Result<CommandStatus, LinkError>;
}

/// What a single pass did to one record.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PassReport {
    pub consumed: Option<Step>,
    pub issued: Option<Step>,
    pub prompted: Option<Step>,
    pub failed: Option<LinkError>,
}

impl PassReport {
    #[must_use]
    pub const fn is_quiet(&self) -> bool {
        self.consumed.is_none() && self.issued.is_none()
    }
}

/// Builds the command that performs `step` for `record`.
#[must_use]
pub fn command_for(step: Step, record: &ProcedureRecord, settings: &RangingSettings) -> CsCommand {
    match step {
        Step::Capabilities => CsCommand::ReadRemoteCapabilities,
        Step::DefaultSettings => CsCommand::SetDefaultSettings(settings.default_settings),
        Step::FaeExchange => CsCommand::ReadRemoteFaeTable,
        Step::CreateConfig => CsCommand::CreateConfig {
            config_id: record.config_id(),
            role: record.cs_role(),
            params: settings.create_config,
        },
        Step::SecurityEnable => CsCommand::SecurityEnable,
        Step::ProcedureParams => CsCommand::SetProcedureParams {
            config_id: record.config_id(),
            params: settings.procedure,
        },
        Step::ProcedureEnable => CsCommand::ProcedureEnable {
            config_id: record.config_id(),
            enable: record.enable_requested(),
        },
        Step::RemoveConfig => CsCommand::RemoveConfig {
            config_id: record.remove_target(),
        },
    }
}

/// Reaction to a consumed completion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Reaction {
    Schedule(Step),
    Prompt(Step),
    Wait,
}

fn react(completed: Step, record: &ProcedureRecord, settings: &RangingSettings) -> Reaction {
    let manual = settings.negotiation.manual_trigger;
    let central = record.is_central();

    match completed {
        Step::Capabilities => Reaction::Schedule(Step::DefaultSettings),
        Step::DefaultSettings => Reaction::Schedule(Step::FaeExchange),
        Step::FaeExchange if manual => Reaction::Prompt(Step::CreateConfig),
        Step::FaeExchange if central => Reaction::Schedule(Step::CreateConfig),
        // Security is only ever started by the central.
        Step::CreateConfig if central => Reaction::Schedule(Step::SecurityEnable),
        Step::SecurityEnable if manual => Reaction::Prompt(Step::ProcedureParams),
        Step::SecurityEnable => Reaction::Schedule(Step::ProcedureParams),
        Step::ProcedureParams if central => Reaction::Schedule(Step::ProcedureEnable),
        Step::FaeExchange
        | Step::CreateConfig
        | Step::ProcedureParams
        | Step::ProcedureEnable
        | Step::RemoveConfig => Reaction::Wait,
    }
}

/// Runs one pass of the state machine over `record`.
pub fn advance<S, const TELEMETRY: usize>(
    record: &mut ProcedureRecord,
    settings: &RangingSettings,
    sink: &mut S,
    telemetry: &mut TelemetryRecorder<TELEMETRY>,
    now: Tick,
) -> PassReport
where
    S: CsCommandSink + ?Sized,
{
    let conn = record.conn();
    let mut report = PassReport::default();

    if let Some(completed) = record.pop_completed() {
        record.touch(now);
        report.consumed = Some(completed);
        telemetry.record_for(conn, TelemetryEventKind::StepCompleted(completed), now);

        match react(completed, record, settings) {
            Reaction::Schedule(step) => record.schedule(step),
            Reaction::Prompt(step) => {
                report.prompted = Some(step);
                telemetry.record_for(conn, TelemetryEventKind::OperatorPrompt(step), now);
            }
            Reaction::Wait => {}
        }
    }

    let Some(step) = record.take_next() else {
        return report;
    };

    record.touch(now);
    let command = command_for(step, record, settings);
    match sink.send(conn, &command) {
        Ok(status) => {
            report.issued = Some(step);
            telemetry.record_for(conn, TelemetryEventKind::CommandIssued(step), now);
            if status == CommandStatus::Completed {
                record.mark_completed(step);
            }
        }
        Err(error) => {
            report.failed = Some(error);
            telemetry.record(
                TelemetryEventKind::CommandFailed(step),
                Some(conn),
                TelemetryPayload::Status(error.code()),
                now,
            );
        }
    }

    report
}
