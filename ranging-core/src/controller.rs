//! Top-level ranging controller: record pool, configuration registry,
//! event dispatch and the cooperative driver loop.

use core::fmt;

use heapless::Vec;

use crate::config::{ConfigId, ConfigRegistry, CsConfig, RangingSettings};
use crate::events::{ConfigAction, CsEvent, Route, STATUS_SUCCESS, route};
use crate::filter::MAX_DISTANCE_CHANNELS;
use crate::procedure::{
    ConnHandle, CsCommandSink, CsRole, LinkRole, MAX_CONNECTIONS, PassReport, PoolError,
    ProcedurePool, ProcedureRecord, Step, Tick, advance,
};
use crate::ranging::{AssemblyStatus, DistanceEstimator, DistanceReport, ProcedureData};
use crate::telemetry::{
    TELEMETRY_RING_CAPACITY, TelemetryEventKind, TelemetryPayload, TelemetryRecorder,
};

/// Records advanced by one driver-loop pass.
pub type TickReport = Vec<(ConnHandle, PassReport), MAX_CONNECTIONS>;

/// Errors surfaced by operator-triggered steps.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerError {
    /// No control record exists for the connection.
    UnknownConnection(ConnHandle),
    /// The step may only be issued by the link central.
    CentralOnly(Step),
    /// The configuration is not registered for the connection.
    UnknownConfig(ConfigId),
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerError::UnknownConnection(conn) => {
                write!(f, "no ranging procedure on connection {conn}")
            }
            TriggerError::CentralOnly(step) => write!(f, "{step} is issued by the central only"),
            TriggerError::UnknownConfig(id) => write!(f, "configuration {id} is not registered"),
        }
    }
}

/// Channel Sounding ranging controller for every active connection.
pub struct RangingController<E, const TELEMETRY: usize = TELEMETRY_RING_CAPACITY> {
    settings: RangingSettings,
    pool: ProcedurePool,
    registry: ConfigRegistry,
    telemetry: TelemetryRecorder<TELEMETRY>,
    estimator: E,
    now: Tick,
}

impl<E, const TELEMETRY: usize> RangingController<E, TELEMETRY>
where
    E: DistanceEstimator,
{
    #[must_use]
    pub fn new(settings: RangingSettings, estimator: E) -> Self {
        Self {
            settings,
            pool: ProcedurePool::new(),
            registry: ConfigRegistry::new(),
            telemetry: TelemetryRecorder::new(),
            estimator,
            now: 0,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &RangingSettings {
        &self.settings
    }

    /// Switches between automatic and operator-driven negotiation.
    pub fn set_manual_trigger(&mut self, manual: bool) {
        self.settings.negotiation.manual_trigger = manual;
    }

    #[must_use]
    pub const fn pool(&self) -> &ProcedurePool {
        &self.pool
    }

    #[must_use]
    pub const fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryRecorder<TELEMETRY> {
        &self.telemetry
    }

    #[must_use]
    pub const fn estimator(&self) -> &E {
        &self.estimator
    }

    pub fn estimator_mut(&mut self) -> &mut E {
        &mut self.estimator
    }

    /// Advisory tick advanced once per driver-loop pass.
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.now
    }

    #[must_use]
    pub fn record(&self, conn: ConnHandle) -> Option<&ProcedureRecord> {
        self.pool.find(conn)
    }

    /// Allocates a control record once the peer is known to support ranging.
    ///
    /// With `auto_start` set the capability exchange is issued on the next pass.
    pub fn on_ranging_supported(
        &mut self,
        conn: ConnHandle,
        link_role: LinkRole,
    ) -> Result<usize, PoolError> {
        let mut record = ProcedureRecord::new(
            conn,
            link_role,
            self.settings.negotiation.default_config_id,
            self.settings.filter,
            self.now,
        );
        if self.settings.negotiation.auto_start {
            record.schedule(Step::Capabilities);
        }

        self.pool.allocate(record).inspect_err(|error| {
            if *error == PoolError::PoolFull {
                self.telemetry
                    .record_for(conn, TelemetryEventKind::PoolExhausted, self.now);
            }
        })
    }

    /// Tears down everything held for `conn`.
    ///
    /// Returns `true` when a control record was released.
    pub fn on_disconnect(&mut self, conn: ConnHandle) -> bool {
        let released = self.pool.release(conn).is_some();
        let configs = self.registry.invalidate_connection(conn);
        if released || configs > 0 {
            self.telemetry
                .record_for(conn, TelemetryEventKind::Disconnected, self.now);
        }
        released
    }

    /// Schedules `step` for the next pass, replacing any pending action.
    pub fn trigger(&mut self, conn: ConnHandle, step: Step) -> Result<(), TriggerError> {
        let record = self
            .pool
            .find_mut(conn)
            .ok_or(TriggerError::UnknownConnection(conn))?;
        if step == Step::SecurityEnable && !record.is_central() {
            return Err(TriggerError::CentralOnly(step));
        }
        record.schedule(step);
        Ok(())
    }

    /// Starts negotiation from the capability exchange.
    pub fn start(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        self.trigger(conn, Step::Capabilities)
    }

    /// Creates configuration `id` (or the record's current one).
    pub fn create_config(
        &mut self,
        conn: ConnHandle,
        id: Option<ConfigId>,
        role: Option<CsRole>,
    ) -> Result<(), TriggerError> {
        let record = self
            .pool
            .find_mut(conn)
            .ok_or(TriggerError::UnknownConnection(conn))?;
        if let Some(id) = id {
            record.set_config_id(id);
        }
        if let Some(role) = role {
            record.set_cs_role(role);
        }
        record.schedule(Step::CreateConfig);
        Ok(())
    }

    /// Sends the procedure parameters for the active configuration.
    pub fn set_procedure_params(&mut self, conn: ConnHandle) -> Result<(), TriggerError> {
        self.trigger(conn, Step::ProcedureParams)
    }

    /// Requests the ranging procedure to start or stop.
    pub fn enable(&mut self, conn: ConnHandle, enable: bool) -> Result<(), TriggerError> {
        let record = self
            .pool
            .find_mut(conn)
            .ok_or(TriggerError::UnknownConnection(conn))?;
        record.request_enable(enable);
        record.schedule(Step::ProcedureEnable);
        Ok(())
    }

    /// Removes a registered configuration.
    pub fn remove_config(&mut self, conn: ConnHandle, id: ConfigId) -> Result<(), TriggerError> {
        if self.registry.find(conn, id).is_none() {
            return Err(if self.pool.find(conn).is_some() {
                TriggerError::UnknownConfig(id)
            } else {
                TriggerError::UnknownConnection(conn)
            });
        }
        let record = self
            .pool
            .find_mut(conn)
            .ok_or(TriggerError::UnknownConnection(conn))?;
        record.request_remove(id);
        record.schedule(Step::RemoveConfig);
        Ok(())
    }

    /// One cooperative scheduler pass over every active record.
    pub fn tick<S>(&mut self, sink: &mut S) -> TickReport
    where
        S: CsCommandSink + ?Sized,
    {
        self.now = self.now.wrapping_add(1);

        let mut passes = TickReport::new();
        for record in self.pool.records_mut() {
            let report = advance(record, &self.settings, sink, &mut self.telemetry, self.now);
            if !report.is_quiet() || report.failed.is_some() {
                let pushed = passes.push((record.conn(), report));
                debug_assert!(pushed.is_ok(), "tick report holds one entry per pool slot");
            }
        }
        passes
    }

    /// Dispatches one decoded HCI event.
    ///
    /// Returns a distance report when the event completed a procedure.
    pub fn handle_event(&mut self, event: &CsEvent<'_>) -> Option<DistanceReport> {
        let conn = event.conn();
        let kind = event.kind();

        if self.pool.find(conn).is_none() {
            self.telemetry.record(
                TelemetryEventKind::LookupMiss(Some(kind)),
                Some(conn),
                TelemetryPayload::none(),
                self.now,
            );
            return None;
        }

        if route(kind) == Route::RangingData {
            return self.on_ranging_data(event);
        }

        let record = self.pool.find_mut(conn)?;
        match event.status() {
            Some(status) if status != STATUS_SUCCESS => {
                self.telemetry
                    .record_event_failure(conn, kind, status, self.now);
                return None;
            }
            _ => {}
        }

        match event {
            CsEvent::Capabilities(complete) => {
                record.set_remote_capabilities(complete.capabilities);
            }
            CsEvent::Config(complete) => match complete.action {
                ConfigAction::Created => {
                    let config = CsConfig {
                        conn,
                        id: complete.config_id,
                        main_mode: complete.main_mode,
                        sub_mode: complete.sub_mode,
                        role: complete.role,
                        rtt_type: complete.rtt_type,
                    };
                    if self.registry.add(config).is_err() {
                        self.telemetry.record(
                            TelemetryEventKind::RegistryFull,
                            Some(conn),
                            TelemetryPayload::Config(complete.config_id),
                            self.now,
                        );
                        return None;
                    }
                    record.set_config_id(complete.config_id);
                    record.set_cs_role(complete.role);
                    self.telemetry.record(
                        TelemetryEventKind::ConfigCreated,
                        Some(conn),
                        TelemetryPayload::Config(complete.config_id),
                        self.now,
                    );
                }
                ConfigAction::Removed => {
                    self.registry.invalidate(conn, complete.config_id);
                    self.telemetry.record(
                        TelemetryEventKind::ConfigRemoved,
                        Some(conn),
                        TelemetryPayload::Config(complete.config_id),
                        self.now,
                    );
                }
            },
            CsEvent::ProcedureEnable(complete) => {
                record.set_ranging_enabled(complete.enabled);
                let event = if complete.enabled {
                    TelemetryEventKind::RangingStarted
                } else {
                    TelemetryEventKind::RangingStopped
                };
                self.telemetry.record(
                    event,
                    Some(conn),
                    TelemetryPayload::Config(complete.config_id),
                    self.now,
                );
            }
            CsEvent::FaeTable(_)
            | CsEvent::SecurityEnable(_)
            | CsEvent::SubeventResult(_)
            | CsEvent::SubeventResultContinue(_) => {}
        }

        if let Some(step) = event.completed_step() {
            record.mark_completed(step);
        }
        None
    }

    /// Accepts the peer's step data for `procedure_counter`.
    ///
    /// Called by the Ranging Service client once the peer's data has arrived.
    pub fn submit_remote(
        &mut self,
        conn: ConnHandle,
        procedure_counter: u16,
        steps: &[u8],
    ) -> Option<DistanceReport> {
        let Some(record) = self.pool.find_mut(conn) else {
            self.telemetry.record(
                TelemetryEventKind::LookupMiss(None),
                Some(conn),
                TelemetryPayload::Procedure(procedure_counter),
                self.now,
            );
            return None;
        };

        let config_id = record.config_id();
        if self.registry.find(conn, config_id).is_none() {
            self.telemetry.record(
                TelemetryEventKind::StaleConfig,
                Some(conn),
                TelemetryPayload::Config(config_id),
                self.now,
            );
            return None;
        }

        match record.ranging.submit_remote(procedure_counter, config_id, steps) {
            Ok(AssemblyStatus::Ready) => self.estimate(conn),
            Ok(_) => None,
            Err(_) => {
                self.telemetry.record(
                    TelemetryEventKind::AssemblyFailed,
                    Some(conn),
                    TelemetryPayload::Procedure(procedure_counter),
                    self.now,
                );
                None
            }
        }
    }

    fn on_ranging_data(&mut self, event: &CsEvent<'_>) -> Option<DistanceReport> {
        let conn = event.conn();
        let (config_id, counter) = match event {
            CsEvent::SubeventResult(result) => (result.config_id, Some(result.procedure_counter)),
            CsEvent::SubeventResultContinue(result) => (result.config_id, None),
            _ => return None,
        };

        if self.registry.find(conn, config_id).is_none() {
            self.telemetry.record(
                TelemetryEventKind::StaleConfig,
                Some(conn),
                TelemetryPayload::Config(config_id),
                self.now,
            );
            return None;
        }

        let record = self.pool.find_mut(conn)?;
        let session = &mut record.ranging;
        let status = match event {
            CsEvent::SubeventResult(result) => session.on_subevent_result(result),
            CsEvent::SubeventResultContinue(result) => session.on_subevent_continue(result),
            _ => return None,
        };
        let counter = counter
            .or_else(|| session.local().map(ProcedureData::procedure_counter))
            .unwrap_or_default();

        if status == Ok(AssemblyStatus::Waiting) && record.cs_role() == CsRole::Reflector {
            // The initiator computes distance; the reflector's half is published
            // by the Ranging Service and not kept here.
            record.ranging.discard_local();
            return None;
        }

        match status {
            Ok(AssemblyStatus::Ready) => self.estimate(conn),
            Ok(AssemblyStatus::Aborted) => {
                self.telemetry.record(
                    TelemetryEventKind::ProcedureAborted,
                    Some(conn),
                    TelemetryPayload::Procedure(counter),
                    self.now,
                );
                None
            }
            Ok(_) => None,
            Err(_) => {
                self.telemetry.record(
                    TelemetryEventKind::AssemblyFailed,
                    Some(conn),
                    TelemetryPayload::Procedure(counter),
                    self.now,
                );
                None
            }
        }
    }

    fn estimate(&mut self, conn: ConnHandle) -> Option<DistanceReport> {
        let record = self.pool.find_mut(conn)?;
        let (local, remote) = record.ranging.take_ready()?;
        let counter = local.procedure_counter();
        let Some(config) = self.registry.find(conn, local.config_id()).copied() else {
            self.telemetry.record(
                TelemetryEventKind::StaleConfig,
                Some(conn),
                TelemetryPayload::Config(local.config_id()),
                self.now,
            );
            return None;
        };

        let estimates = match self
            .estimator
            .estimate(conn, &local, &remote, config.main_mode)
        {
            Ok(estimates) if !estimates.is_empty() => estimates,
            Ok(_) => return None,
            Err(error) => {
                self.telemetry.record(
                    TelemetryEventKind::EstimateFailed,
                    Some(conn),
                    TelemetryPayload::EstimateError(error.0),
                    self.now,
                );
                return None;
            }
        };

        let report = record
            .ranging
            .filter(conn, config.id, counter, &estimates);
        let filtered: Vec<f32, MAX_DISTANCE_CHANNELS> = report.filtered().collect();
        self.telemetry
            .record_distance(conn, counter, &filtered, self.now);
        Some(report)
    }
}
