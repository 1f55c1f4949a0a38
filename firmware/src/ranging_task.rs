//! Cooperative driver loop around the ranging controller.
//!
//! Each wake-up drains link notices, HCI events and console bytes, then runs
//! driver-loop passes until no record makes progress. Commands leave through
//! the [`ChannelCommandSink`]; completions come back as events. Telemetry
//! recorded during the wake-up is logged at the end of it.

use cs_ranging_core::RangingController;
use cs_ranging_core::config::{MainMode, RangingSettings};
use cs_ranging_core::hci::decode_event;
use cs_ranging_core::procedure::{ConnHandle, MAX_CONNECTIONS, Step};
use cs_ranging_core::ranging::{DistanceEstimator, EstimateError, Estimates, ProcedureData};
use cs_ranging_core::repl::commands::CommandExecutor;
use cs_ranging_core::telemetry::EventId;
use embassy_futures::select::select3;

use crate::console::{ConsoleLine, ConsoleReceiver, ConsoleResponse, LineAssembler, render};
use crate::link::{ChannelCommandSink, EventReceiver, HciQueues, LinkNotice, NoticeReceiver};
use crate::log;

/// Upper bound on passes per wake-up: every record can walk the whole step list.
const MAX_PASSES_PER_POLL: usize = MAX_CONNECTIONS * Step::COUNT;

/// Estimator used until a vendor ranging library is linked in.
///
/// Reports an error for every procedure, so distances never reach the filter.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableEstimator;

impl DistanceEstimator for UnavailableEstimator {
    fn estimate(
        &mut self,
        _conn: ConnHandle,
        _local: &ProcedureData,
        _remote: &ProcedureData,
        _mode: MainMode,
    ) -> Result<Estimates, EstimateError> {
        Err(EstimateError(-1))
    }
}

pub struct RangingTask<'a, E> {
    controller: RangingController<E>,
    sink: ChannelCommandSink<'a>,
    events: EventReceiver<'a>,
    notices: NoticeReceiver<'a>,
    console: ConsoleReceiver<'a>,
    line: LineAssembler,
    telemetry_cursor: EventId,
}

impl<'a, E> RangingTask<'a, E>
where
    E: DistanceEstimator,
{
    pub fn new(
        settings: RangingSettings,
        estimator: E,
        queues: &'a HciQueues,
        console: ConsoleReceiver<'a>,
    ) -> Self {
        Self {
            controller: RangingController::new(settings, estimator),
            sink: ChannelCommandSink::new(queues.commands.sender()),
            events: queues.events.receiver(),
            notices: queues.notices.receiver(),
            console,
            line: LineAssembler::new(),
            telemetry_cursor: 0,
        }
    }

    /// Drains every queued input, then runs passes until quiet.
    ///
    /// Returns the number of passes that made progress.
    pub fn poll(&mut self) -> usize {
        while let Ok(notice) = self.notices.try_receive() {
            self.on_notice(notice);
        }
        while let Ok(packet) = self.events.try_receive() {
            match decode_event(&packet) {
                Ok(event) => {
                    if let Some(report) = self.controller.handle_event(&event) {
                        log::distance(&report);
                    }
                }
                Err(error) => log::decode_error(error),
            }
        }
        while let Ok(chunk) = self.console.try_receive() {
            for byte in chunk {
                match self.line.ingest(byte) {
                    Ok(Some(line)) => self.on_console(&line),
                    Ok(None) => {}
                    Err(error) => log::console_error(error),
                }
            }
        }
        let progressed = self.run_passes();
        self.drain_telemetry();
        progressed
    }

    /// Runs forever, waking whenever any input channel has data.
    pub async fn run(&mut self) -> ! {
        loop {
            self.poll();
            select3(
                self.notices.ready_to_receive(),
                self.events.ready_to_receive(),
                self.console.ready_to_receive(),
            )
            .await;
        }
    }

    fn run_passes(&mut self) -> usize {
        let mut progressed = 0;
        while progressed < MAX_PASSES_PER_POLL {
            let passes = self.controller.tick(&mut self.sink);
            if passes.is_empty() {
                break;
            }
            for (conn, report) in &passes {
                log::pass(*conn, report);
            }
            progressed += 1;
        }
        progressed
    }

    fn drain_telemetry(&mut self) {
        let telemetry = self.controller.telemetry();
        for record in telemetry.since(self.telemetry_cursor) {
            log::telemetry(record);
        }
        self.telemetry_cursor = telemetry.next_event_id();
    }

    fn on_notice(&mut self, notice: LinkNotice) {
        match notice {
            LinkNotice::RangingSupported { conn, role } => {
                if let Err(error) = self.controller.on_ranging_supported(conn, role) {
                    log::pool_error(error);
                }
            }
            LinkNotice::Disconnected(conn) => {
                self.controller.on_disconnect(conn);
            }
            LinkNotice::RemoteData {
                conn,
                procedure_counter,
                steps,
            } => {
                if let Some(report) = self.controller.submit_remote(conn, procedure_counter, &steps)
                {
                    log::distance(&report);
                }
            }
        }
    }

    fn on_console(&mut self, line: &ConsoleLine) {
        let mut executor = CommandExecutor::new(&mut self.controller);
        let result = executor.execute(line);
        let mut response = ConsoleResponse::new();
        // A truncated response still carries the leading lines.
        let _ = render(&result, &mut response);
        log::console(&response);
    }
}
