//! Console command dispatcher.
//!
//! Parsed commands become operator triggers on a [`RangingControl`]
//! implementation, normally the [`RangingController`] itself. The trait seam
//! lets front-ends wrap the controller (or a mock in tests) without the
//! dispatcher knowing about estimators or telemetry capacity.

use core::fmt;

use crate::config::ConfigId;
use crate::controller::{RangingController, TriggerError};
use crate::procedure::{ConnHandle, CsRole, Step};
use crate::ranging::DistanceEstimator;

use super::catalog::{self, CommandSpec};
use super::grammar::{self, Command, ConfigCommand, RemoveCommand};
use super::status::{ConnectionStatus, StatusReport};

/// Command execution successes.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    /// A negotiation step was scheduled for the next driver-loop pass.
    Scheduled { conn: ConnHandle, step: Step },
    Status(StatusReport),
    /// `None` lists the whole catalog.
    Help(Option<&'static CommandSpec>),
}

/// Errors surfaced while executing a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError<'a> {
    Parse(grammar::ParseError<'a>),
    Trigger(TriggerError),
    UnknownTopic(&'a str),
}

impl<'a> From<grammar::ParseError<'a>> for CommandError<'a> {
    fn from(error: grammar::ParseError<'a>) -> Self {
        Self::Parse(error)
    }
}

impl From<TriggerError> for CommandError<'_> {
    fn from(error: TriggerError) -> Self {
        Self::Trigger(error)
    }
}

impl fmt::Display for CommandError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Parse(error) => error.fmt(f),
            CommandError::Trigger(error) => error.fmt(f),
            CommandError::UnknownTopic(topic) => write!(f, "no help for `{topic}`"),
        }
    }
}

/// Operator-facing controls the console drives.
pub trait RangingControl {
    fn start(&mut self, conn: ConnHandle) -> Result<(), TriggerError>;

    fn create_config(
        &mut self,
        conn: ConnHandle,
        id: Option<ConfigId>,
        role: Option<CsRole>,
    ) -> Result<(), TriggerError>;

    fn set_procedure_params(&mut self, conn: ConnHandle) -> Result<(), TriggerError>;

    fn enable(&mut self, conn: ConnHandle, enable: bool) -> Result<(), TriggerError>;

    fn remove_config(&mut self, conn: ConnHandle, id: ConfigId) -> Result<(), TriggerError>;

    /// Status for every active connection in slot order.
    fn status(&self) -> StatusReport;
}

impl<E, const TELEMETRY: usize> RangingControl for RangingController<E, TELEMETRY>
where
    E: DistanceEstimator,
{
    fn start(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        RangingController::start(self, conn)
    }

    fn create_config(
        &mut self,
        conn: ConnHandle,
        id: Option<ConfigId>,
        role: Option<CsRole>,
    ) -> Result<(), TriggerError> {
        RangingController::create_config(self, conn, id, role)
    }

    fn set_procedure_params(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        RangingController::set_procedure_params(self, conn)
    }

    fn enable(&mut self, conn: ConnHandle, enable: bool) -> Result<(), TriggerError> {
        RangingController::enable(self, conn, enable)
    }

    fn remove_config(&mut self, conn: ConnHandle, id: ConfigId) -> Result<(), TriggerError> {
        RangingController::remove_config(self, conn, id)
    }

    fn status(&self) -> StatusReport {
        self.pool()
            .records()
            .map(ConnectionStatus::from_record)
            .collect()
    }
}

impl<T> RangingControl for &mut T
where
    T: RangingControl + ?Sized,
{
    fn start(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        (**self).start(conn)
    }

    fn create_config(
        &mut self,
        conn: ConnHandle,
        id: Option<ConfigId>,
        role: Option<CsRole>,
    ) -> Result<(), TriggerError> {
        (**self).create_config(conn, id, role)
    }

    fn set_procedure_params(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        (**self).set_procedure_params(conn)
    }

    fn enable(&mut self, conn: ConnHandle, enable: bool) -> Result<(), TriggerError> {
        (**self).enable(conn, enable)
    }

    fn remove_config(&mut self, conn: ConnHandle, id: ConfigId) -> Result<(), TriggerError> {
        (**self).remove_config(conn, id)
    }

    fn status(&self) -> StatusReport {
        (**self).status()
    }
}

/// Dispatches console commands into a [`RangingControl`].
pub struct CommandExecutor<C> {
    control: C,
}

impl<C> CommandExecutor<C> {
    /// Creates a new executor around the provided control surface.
    #[must_use]
    pub const fn new(control: C) -> Self {
        Self { control }
    }

    #[must_use]
    pub const fn control(&self) -> &C {
        &self.control
    }

    pub fn control_mut(&mut self) -> &mut C {
        &mut self.control
    }

    /// Consumes the executor and yields the inner control surface.
    #[must_use]
    pub fn into_inner(self) -> C {
        self.control
    }
}

impl<C> CommandExecutor<C>
where
    C: RangingControl,
{
    /// Parses and executes one console line.
    pub fn execute<'a>(&mut self, line: &'a str) -> Result<CommandOutcome, CommandError<'a>> {
        let command = grammar::parse(line)?;
        self.dispatch(command)
    }

    fn dispatch<'a>(&mut self, command: Command<'a>) -> Result<CommandOutcome, CommandError<'a>> {
        let (conn, step) = match command {
            Command::Start(conn) => {
                self.control.start(conn)?;
                (conn, Step::Capabilities)
            }
            Command::Config(ConfigCommand { conn, id, role }) => {
                self.control.create_config(conn, id, role)?;
                (conn, Step::CreateConfig)
            }
            Command::Params(conn) => {
                self.control.set_procedure_params(conn)?;
                (conn, Step::ProcedureParams)
            }
            Command::Enable(conn) => {
                self.control.enable(conn, true)?;
                (conn, Step::ProcedureEnable)
            }
            Command::Disable(conn) => {
                self.control.enable(conn, false)?;
                (conn, Step::ProcedureEnable)
            }
            Command::Remove(RemoveCommand { conn, id }) => {
                self.control.remove_config(conn, id)?;
                (conn, Step::RemoveConfig)
            }
            Command::Status(filter) => return self.status(filter),
            Command::Help(help) => {
                return match help.topic {
                    None => Ok(CommandOutcome::Help(None)),
                    Some(topic) => catalog::find(topic)
                        .map(|spec| CommandOutcome::Help(Some(spec)))
                        .ok_or(CommandError::UnknownTopic(topic)),
                };
            }
        };
        Ok(CommandOutcome::Scheduled { conn, step })
    }

    fn status<'a>(
        &self,
        filter: Option<ConnHandle>,
    ) -> Result<CommandOutcome, CommandError<'a>> {
        let mut report = self.control.status();
        if let Some(conn) = filter {
            report.retain(|status| status.conn == conn);
            if report.is_empty() {
                return Err(TriggerError::UnknownConnection(conn).into());
            }
        }
        Ok(CommandOutcome::Status(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MainMode, RangingSettings};
    use crate::procedure::LinkRole;
    use crate::ranging::{EstimateError, Estimates, ProcedureData};

    #[derive(Default)]
    struct MockControl {
        calls: heapless::Vec<(&'static str, u16), 8>,
        enabled: Option<bool>,
        config: Option<(Option<ConfigId>, Option<CsRole>)>,
    }

    impl MockControl {
        fn push(&mut self, name: &'static str, conn: ConnHandle) {
            self.calls.push((name, conn.raw())).expect("call log capacity");
        }
    }

    impl RangingControl for MockControl {
        fn start(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
            self.push("start", conn);
            Ok(())
        }

        fn create_config(
            &mut self,
            conn: ConnHandle,
            id: Option<ConfigId>,
            role: Option<CsRole>,
        ) -> Result<(), TriggerError> {
            self.push("config", conn);
            self.config = Some((id, role));
            Ok(())
        }

        fn set_procedure_params(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
            self.push("params", conn);
            Ok(())
        }

        fn enable(&mut self, conn: ConnHandle, enable: bool) -> Result<(), TriggerError> {
            self.push("enable", conn);
            self.enabled = Some(enable);
            Ok(())
        }

        fn remove_config(&mut self, _conn: ConnHandle, id: ConfigId) -> Result<(), TriggerError> {
            Err(TriggerError::UnknownConfig(id))
        }

        fn status(&self) -> StatusReport {
            StatusReport::new()
        }
    }

    struct NoEstimator;

    impl DistanceEstimator for NoEstimator {
        fn estimate(
            &mut self,
            _conn: ConnHandle,
            _local: &ProcedureData,
            _remote: &ProcedureData,
            _mode: MainMode,
        ) -> Result<Estimates, EstimateError> {
            Ok(Estimates::new())
        }
    }

    fn conn(raw: u16) -> ConnHandle {
        ConnHandle::new(raw).expect("valid handle")
    }

    #[test]
    fn dispatches_triggers_to_control() {
        let mut executor = CommandExecutor::new(MockControl::default());
        assert_eq!(
            executor.execute("start 7"),
            Ok(CommandOutcome::Scheduled {
                conn: conn(7),
                step: Step::Capabilities,
            })
        );
        executor
            .execute("config 7 id=1 role=reflector")
            .expect("config accepted");
        executor.execute("disable 7").expect("disable accepted");

        let control = executor.into_inner();
        assert_eq!(control.calls.as_slice(), &[("start", 7), ("config", 7), ("enable", 7)]);
        assert_eq!(control.config, Some((Some(1), Some(CsRole::Reflector))));
        assert_eq!(control.enabled, Some(false));
    }

    #[test]
    fn surfaces_trigger_errors() {
        let mut executor = CommandExecutor::new(MockControl::default());
        assert_eq!(
            executor.execute("remove 3 id=2"),
            Err(CommandError::Trigger(TriggerError::UnknownConfig(2)))
        );
    }

    #[test]
    fn help_resolves_topics() {
        let mut executor = CommandExecutor::new(MockControl::default());
        assert_eq!(executor.execute("help"), Ok(CommandOutcome::Help(None)));
        assert!(matches!(
            executor.execute("help enable"),
            Ok(CommandOutcome::Help(Some(spec))) if spec.name == "enable"
        ));
        assert_eq!(
            executor.execute("help bogus"),
            Err(CommandError::UnknownTopic("bogus"))
        );
    }

    #[test]
    fn parse_errors_are_wrapped() {
        let mut executor = CommandExecutor::new(MockControl::default());
        assert!(matches!(
            executor.execute("enable"),
            Err(CommandError::Parse(_))
        ));
    }

    #[test]
    fn drives_real_controller() {
        let mut controller: RangingController<NoEstimator, 16> =
            RangingController::new(RangingSettings::manual(), NoEstimator);
        controller
            .on_ranging_supported(conn(4), LinkRole::Central)
            .expect("allocate");

        let mut executor = CommandExecutor::new(&mut controller);
        executor.execute("params 4").expect("params accepted");
        let Ok(CommandOutcome::Status(report)) = executor.execute("status 4") else {
            panic!("status should succeed");
        };
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].next, Some(Step::ProcedureParams));
        assert_eq!(
            executor.execute("status 5"),
            Err(CommandError::Trigger(TriggerError::UnknownConnection(conn(5))))
        );

        assert_eq!(
            controller.record(conn(4)).and_then(|record| record.next_action()),
            Some(Step::ProcedureParams)
        );
    }
}
