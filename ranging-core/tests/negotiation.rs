use cs_ranging_core::config::{ConfigId, MainMode, RangingSettings, RttType, SubMode};
use cs_ranging_core::events::{
    CapabilitiesComplete, ConfigAction, ConfigComplete, CsEvent, DoneStatus,
    ProcedureEnableComplete, STATUS_SUCCESS, StatusComplete, SubeventResult, SubeventSteps,
};
use cs_ranging_core::hci::CsCommand;
use cs_ranging_core::procedure::{
    CommandStatus, ConnHandle, CsCommandSink, CsRole, LinkError, LinkRole, PoolError,
    RemoteCapabilities, Step,
};
use cs_ranging_core::ranging::{DistanceEstimator, EstimateError, Estimates, ProcedureData};
use cs_ranging_core::telemetry::{TelemetryEventKind, TelemetryPayload};
use cs_ranging_core::RangingController;
use heapless::Vec as HeaplessVec;

const MEASUREMENT: [u8; 5] = [0x02, 20, 2, 0xFA, 0x00];

/// Records every command and completes the two locally-answered ones.
#[derive(Default)]
struct ScriptedSink {
    sent: HeaplessVec<(u16, u16), 32>,
}

impl ScriptedSink {
    fn opcodes_for(&self, raw: u16) -> impl Iterator<Item = u16> + '_ {
        self.sent
            .iter()
            .filter(move |(conn, _)| *conn == raw)
            .map(|(_, opcode)| *opcode)
    }
}

impl CsCommandSink for ScriptedSink {
    fn send(&mut self, conn: ConnHandle, command: &CsCommand) -> Result<CommandStatus, LinkError> {
        self.sent
            .push((conn.raw(), command.opcode()))
            .expect("sink capacity");
        match command {
            CsCommand::SetDefaultSettings(_) | CsCommand::SetProcedureParams { .. } => {
                Ok(CommandStatus::Completed)
            }
            _ => Ok(CommandStatus::Pending),
        }
    }
}

struct FixedEstimator(f32);

impl DistanceEstimator for FixedEstimator {
    fn estimate(
        &mut self,
        _conn: ConnHandle,
        _local: &ProcedureData,
        _remote: &ProcedureData,
        _mode: MainMode,
    ) -> Result<Estimates, EstimateError> {
        let mut estimates = Estimates::new();
        estimates.push(self.0).map_err(|_| EstimateError(-1))?;
        Ok(estimates)
    }
}

fn conn(raw: u16) -> ConnHandle {
    ConnHandle::new(raw).expect("valid handle")
}

fn controller() -> RangingController<FixedEstimator> {
    RangingController::new(RangingSettings::DEFAULT, FixedEstimator(2.5))
}

fn capabilities(raw: u16) -> CsEvent<'static> {
    CsEvent::Capabilities(CapabilitiesComplete {
        status: STATUS_SUCCESS,
        conn: conn(raw),
        capabilities: RemoteCapabilities {
            num_configs_supported: 4,
            max_consecutive_procedures: 0,
            num_antennas: 1,
            max_antenna_paths: 1,
            roles_supported: 0x03,
            modes_supported: 0x01,
        },
    })
}

fn config_created(raw: u16, id: ConfigId) -> CsEvent<'static> {
    config_created_as(raw, id, CsRole::Initiator)
}

fn config_created_as(raw: u16, id: ConfigId, role: CsRole) -> CsEvent<'static> {
    CsEvent::Config(ConfigComplete {
        status: STATUS_SUCCESS,
        conn: conn(raw),
        config_id: id,
        action: ConfigAction::Created,
        main_mode: MainMode::Pbr,
        sub_mode: SubMode::None,
        role,
        rtt_type: RttType::AccessAddressOnly,
    })
}

fn procedure_enabled(raw: u16, id: ConfigId) -> CsEvent<'static> {
    CsEvent::ProcedureEnable(ProcedureEnableComplete {
        status: STATUS_SUCCESS,
        conn: conn(raw),
        config_id: id,
        enabled: true,
        tone_antenna_config_selection: 0,
        selected_tx_power: 0,
        subevent_len: 6_750,
        subevents_per_event: 1,
        subevent_interval: 0,
        event_interval: 2,
        procedure_interval: 10,
        procedure_count: 0,
        max_procedure_len: 0x2710,
    })
}

fn status_complete(raw: u16) -> StatusComplete {
    StatusComplete {
        status: STATUS_SUCCESS,
        conn: conn(raw),
    }
}

/// Ticks until a pass makes no progress; returns the number of passes that did.
fn run_until_quiet<S: CsCommandSink>(
    controller: &mut RangingController<FixedEstimator>,
    sink: &mut S,
) -> usize {
    let mut passes = 0;
    while !controller.tick(sink).is_empty() {
        passes += 1;
        assert!(passes < 32, "driver loop did not settle");
    }
    passes
}

fn negotiate_central(controller: &mut RangingController<FixedEstimator>, raw: u16) -> ScriptedSink {
    let mut sink = ScriptedSink::default();
    controller
        .on_ranging_supported(conn(raw), LinkRole::Central)
        .expect("allocate");
    run_until_quiet(controller, &mut sink);

    let config_id = controller.record(conn(raw)).expect("record").config_id();
    for event in [
        capabilities(raw),
        CsEvent::FaeTable(status_complete(raw)),
        config_created(raw, config_id),
        CsEvent::SecurityEnable(status_complete(raw)),
        procedure_enabled(raw, config_id),
    ] {
        assert!(controller.handle_event(&event).is_none());
        run_until_quiet(controller, &mut sink);
    }
    sink
}

#[test]
fn capability_completion_advances_only_its_own_connection() {
    let mut controller = controller();
    let mut sink = ScriptedSink::default();
    controller
        .on_ranging_supported(conn(7), LinkRole::Central)
        .expect("allocate 7");
    controller
        .on_ranging_supported(conn(9), LinkRole::Central)
        .expect("allocate 9");

    let passes = controller.tick(&mut sink);
    assert_eq!(passes.len(), 2);
    assert!(passes.iter().all(|(_, report)| report.issued == Some(Step::Capabilities)));
    let record_9_before = controller.record(conn(9)).expect("record 9").clone();
    assert!(record_9_before.is_idle());

    controller.handle_event(&capabilities(7));

    let passes = controller.tick(&mut sink);
    assert_eq!(passes.len(), 1, "conn 9 must stay quiet");
    let (handle, report) = passes[0];
    assert_eq!(handle, conn(7));
    assert_eq!(report.consumed, Some(Step::Capabilities));
    assert_eq!(report.issued, Some(Step::DefaultSettings));
    let record_7 = controller.record(conn(7)).expect("record 7");
    assert_eq!(
        record_7.pending_completions().copied().collect::<HeaplessVec<Step, 8>>(),
        [Step::DefaultSettings]
    );

    let passes = controller.tick(&mut sink);
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].1.consumed, Some(Step::DefaultSettings));
    assert_eq!(passes[0].1.issued, Some(Step::FaeExchange));

    let record_9 = controller.record(conn(9)).expect("record 9");
    assert!(record_9.is_idle());
    assert!(record_9.remote_capabilities().is_none());
    assert_eq!(record_9.touched_at(), record_9_before.touched_at());
    assert_eq!(
        sink.opcodes_for(9).collect::<HeaplessVec<u16, 8>>(),
        [CsCommand::READ_REMOTE_CAPABILITIES]
    );
}

#[test]
fn each_pass_issues_and_consumes_at_most_once_per_record() {
    let mut controller = controller();
    let mut sink = ScriptedSink::default();
    controller
        .on_ranging_supported(conn(3), LinkRole::Central)
        .expect("allocate");
    controller.tick(&mut sink);

    // Completions for several steps arrive between passes.
    controller.handle_event(&capabilities(3));
    controller.handle_event(&CsEvent::FaeTable(status_complete(3)));
    assert_eq!(
        controller
            .record(conn(3))
            .expect("record")
            .pending_completions()
            .count(),
        2
    );

    let mut issued_before = sink.sent.len();
    for _ in 0..6 {
        let passes = controller.tick(&mut sink);
        assert!(passes.len() <= 1);
        assert!(sink.sent.len() - issued_before <= 1);
        issued_before = sink.sent.len();
    }
}

#[test]
fn central_negotiation_reaches_ranging() {
    let mut controller = controller();
    let sink = negotiate_central(&mut controller, 11);

    assert_eq!(
        sink.opcodes_for(11).collect::<HeaplessVec<u16, 8>>(),
        [
            CsCommand::READ_REMOTE_CAPABILITIES,
            CsCommand::SET_DEFAULT_SETTINGS,
            CsCommand::READ_REMOTE_FAE_TABLE,
            CsCommand::CREATE_CONFIG,
            CsCommand::SECURITY_ENABLE,
            CsCommand::SET_PROCEDURE_PARAMS,
            CsCommand::PROCEDURE_ENABLE,
        ]
    );
    let record = controller.record(conn(11)).expect("record");
    assert!(record.ranging_enabled());
    assert!(record.is_idle());
    assert!(controller.registry().find(conn(11), record.config_id()).is_some());
}

#[test]
fn peripheral_waits_for_the_central_to_create_a_config() {
    let mut controller = controller();
    let mut sink = ScriptedSink::default();
    controller
        .on_ranging_supported(conn(4), LinkRole::Peripheral)
        .expect("allocate");
    run_until_quiet(&mut controller, &mut sink);
    controller.handle_event(&capabilities(4));
    run_until_quiet(&mut controller, &mut sink);
    controller.handle_event(&CsEvent::FaeTable(status_complete(4)));
    run_until_quiet(&mut controller, &mut sink);

    assert_eq!(
        sink.opcodes_for(4).last(),
        Some(CsCommand::READ_REMOTE_FAE_TABLE)
    );
    assert!(controller.record(conn(4)).expect("record").is_idle());
}

#[test]
fn manual_trigger_pauses_for_operator() {
    let mut controller = RangingController::new(RangingSettings::manual(), FixedEstimator(1.0));
    let mut sink = ScriptedSink::default();
    controller
        .on_ranging_supported(conn(6), LinkRole::Central)
        .expect("allocate");
    run_until_quiet(&mut controller, &mut sink);
    controller.handle_event(&capabilities(6));
    run_until_quiet(&mut controller, &mut sink);
    controller.handle_event(&CsEvent::FaeTable(status_complete(6)));

    let passes = controller.tick(&mut sink);
    assert_eq!(passes[0].1.prompted, Some(Step::CreateConfig));
    assert_eq!(passes[0].1.issued, None);
    assert!(controller.record(conn(6)).expect("record").is_idle());

    controller
        .create_config(conn(6), Some(2), None)
        .expect("operator trigger");
    let passes = controller.tick(&mut sink);
    assert_eq!(passes[0].1.issued, Some(Step::CreateConfig));
    assert_eq!(sink.opcodes_for(6).last(), Some(CsCommand::CREATE_CONFIG));
}

#[test]
fn disconnect_releases_everything_for_the_connection() {
    let mut controller = controller();
    negotiate_central(&mut controller, 12);
    assert_eq!(controller.registry().len(), 1);

    assert!(controller.on_disconnect(conn(12)));
    assert!(controller.record(conn(12)).is_none());
    assert!(controller.registry().is_empty());
    assert!(controller.pool().slots().iter().all(|slot| slot.is_free()));
    assert!(!controller.on_disconnect(conn(12)));

    // A fresh record starts from scratch.
    controller
        .on_ranging_supported(conn(12), LinkRole::Peripheral)
        .expect("reallocate");
    let record = controller.record(conn(12)).expect("record");
    assert!(!record.ranging_enabled());
    assert!(record.remote_capabilities().is_none());
    assert_eq!(record.next_action(), Some(Step::Capabilities));
}

#[test]
fn one_record_per_connection() {
    let mut controller = controller();
    controller
        .on_ranging_supported(conn(8), LinkRole::Central)
        .expect("allocate");
    assert_eq!(
        controller.on_ranging_supported(conn(8), LinkRole::Peripheral),
        Err(PoolError::AlreadyAllocated(conn(8)))
    );
    assert_eq!(controller.pool().active_count(), 1);
}

#[test]
fn completed_procedure_produces_a_filtered_distance() {
    let mut controller = controller();
    negotiate_central(&mut controller, 5);
    let config_id = controller.record(conn(5)).expect("record").config_id();

    let local = CsEvent::SubeventResult(SubeventResult {
        conn: conn(5),
        config_id,
        start_acl_conn_event: 0,
        procedure_counter: 1,
        frequency_compensation: 0xC000,
        reference_power_level: -20,
        data: SubeventSteps {
            procedure_done: DoneStatus::Complete,
            subevent_done: DoneStatus::Complete,
            abort_reason: 0,
            num_antenna_paths: 1,
            num_steps: 1,
            steps: &MEASUREMENT,
        },
    });
    assert!(controller.handle_event(&local).is_none());

    let report = controller
        .submit_remote(conn(5), 1, &MEASUREMENT)
        .expect("both halves present");
    assert_eq!(report.conn, conn(5));
    assert_eq!(report.procedure_counter, 1);
    assert_eq!(report.channels.len(), 1);
    assert!((report.channels[0].raw - 2.5).abs() < f32::EPSILON);
    let filtered = report.channels[0].filtered.expect("plausible sample");
    assert!(filtered > 0.0 && filtered < 2.5);
}

#[test]
fn ranging_data_for_unknown_config_is_not_computed() {
    let mut controller = controller();
    negotiate_central(&mut controller, 2);

    let stale = CsEvent::SubeventResult(SubeventResult {
        conn: conn(2),
        config_id: 3,
        start_acl_conn_event: 0,
        procedure_counter: 9,
        frequency_compensation: 0,
        reference_power_level: 0,
        data: SubeventSteps {
            procedure_done: DoneStatus::Complete,
            subevent_done: DoneStatus::Complete,
            abort_reason: 0,
            num_antenna_paths: 1,
            num_steps: 1,
            steps: &MEASUREMENT,
        },
    });
    assert!(controller.handle_event(&stale).is_none());
    assert!(controller.submit_remote(conn(2), 9, &MEASUREMENT).is_none());
}

fn complete_subevent(raw: u16, config_id: ConfigId, procedure_counter: u16) -> CsEvent<'static> {
    CsEvent::SubeventResult(SubeventResult {
        conn: conn(raw),
        config_id,
        start_acl_conn_event: 0,
        procedure_counter,
        frequency_compensation: 0xC000,
        reference_power_level: -20,
        data: SubeventSteps {
            procedure_done: DoneStatus::Complete,
            subevent_done: DoneStatus::Complete,
            abort_reason: 0,
            num_antenna_paths: 1,
            num_steps: 1,
            steps: &MEASUREMENT,
        },
    })
}

#[test]
fn config_created_on_full_registry_is_not_adopted() {
    let mut controller = controller();
    let mut sink = ScriptedSink::default();
    for raw in 1..=4 {
        controller
            .on_ranging_supported(conn(raw), LinkRole::Central)
            .expect("allocate");
        for id in 0..4 {
            controller.handle_event(&config_created(raw, id));
        }
    }
    run_until_quiet(&mut controller, &mut sink);
    assert_eq!(controller.registry().len(), controller.registry().capacity());

    let before = controller.record(conn(1)).expect("record").config_id();
    assert!(controller.handle_event(&config_created(1, 4)).is_none());

    let record = controller.record(conn(1)).expect("record");
    assert_eq!(record.config_id(), before);
    assert!(
        !record
            .pending_completions()
            .any(|step| *step == Step::CreateConfig)
    );
    assert!(controller.registry().find(conn(1), 4).is_none());
    let latest = controller.telemetry().latest().expect("telemetry recorded");
    assert!(matches!(latest.event, TelemetryEventKind::RegistryFull));
    assert_eq!(latest.conn, Some(conn(1)));
    assert_eq!(latest.details, TelemetryPayload::Config(4));
}

#[test]
fn reflector_discards_its_completed_local_half() {
    let mut controller = controller();
    controller
        .on_ranging_supported(conn(3), LinkRole::Peripheral)
        .expect("allocate");
    controller.handle_event(&config_created_as(3, 0, CsRole::Reflector));
    let record = controller.record(conn(3)).expect("record");
    assert_eq!(record.cs_role(), CsRole::Reflector);
    assert!(controller.registry().find(conn(3), 0).is_some());

    assert!(controller.handle_event(&complete_subevent(3, 0, 1)).is_none());
    assert!(
        controller
            .record(conn(3))
            .expect("record")
            .ranging()
            .local()
            .is_none()
    );

    // Peer data for the same procedure has no local half to pair with.
    assert!(controller.submit_remote(conn(3), 1, &MEASUREMENT).is_none());
    assert!(
        !controller
            .telemetry()
            .oldest_first()
            .any(|record| matches!(record.event, TelemetryEventKind::DistanceReported))
    );
}

#[test]
fn tick_reports_every_active_record() {
    let mut controller = controller();
    let mut sink = ScriptedSink::default();
    for raw in [20, 21, 22, 23] {
        controller
            .on_ranging_supported(conn(raw), LinkRole::Central)
            .expect("allocate");
    }

    let passes = controller.tick(&mut sink);
    assert_eq!(passes.len(), controller.pool().capacity());
    assert!(
        passes
            .iter()
            .all(|(_, report)| report.issued == Some(Step::Capabilities))
    );
}
