//! Simulated controller and peer device.
//!
//! [`SimPeer`] accepts every CS command the ranging controller issues, encodes
//! it the way it would travel over HCI and answers with the LE Meta event a
//! cooperative peer would produce. Step data for simulated procedures carries
//! the distance in centimeters so [`SimEstimator`] can recover it.

use std::collections::{BTreeMap, VecDeque};

use cs_ranging_core::config::{ConfigId, MainMode, RttType, SubMode};
use cs_ranging_core::events::{
    CapabilitiesComplete, ConfigAction, ConfigComplete, CsEvent, DoneStatus,
    ProcedureEnableComplete, STATUS_SUCCESS, StatusComplete, SubeventResult,
    SubeventResultContinue, SubeventSteps,
};
use cs_ranging_core::hci::{CsCommand, EventPacket, encode_event};
use cs_ranging_core::procedure::{
    CommandStatus, ConnHandle, CsCommandSink, CsRole, LinkError, RemoteCapabilities,
};
use cs_ranging_core::ranging::{DistanceEstimator, EstimateError, Estimates, ProcedureData};

/// HCI "unspecified error" used when a packet cannot be built.
const STATUS_UNSPECIFIED: u8 = 0x1F;

/// Mode-2 (phase-based ranging) step type.
const MODE_PBR: u8 = 0x02;
/// Mode-0 (calibration) step type.
const MODE_CALIBRATION: u8 = 0x00;

const PEER_CAPABILITIES: RemoteCapabilities = RemoteCapabilities {
    num_configs_supported: 4,
    max_consecutive_procedures: 0,
    num_antennas: 1,
    max_antenna_paths: 1,
    roles_supported: 0x03,
    modes_supported: 0x01,
};

#[derive(Clone, Copy, Debug, Default)]
struct PeerLink {
    config_id: ConfigId,
    ranging: bool,
    procedure_counter: u16,
}

/// One simulated procedure queued by [`SimPeer::queue_procedure`].
#[derive(Clone, Debug)]
pub struct SimulatedProcedure {
    pub procedure_counter: u16,
    /// Step data the peer publishes out of band.
    pub remote_steps: Vec<u8>,
}

#[derive(Default)]
pub struct SimPeer {
    links: BTreeMap<ConnHandle, PeerLink>,
    inbound: VecDeque<EventPacket>,
    fail_next: Option<LinkError>,
    sent: Vec<String>,
}

impl SimPeer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, conn: ConnHandle) {
        self.links.insert(conn, PeerLink::default());
    }

    pub fn disconnect(&mut self, conn: ConnHandle) -> bool {
        self.links.remove(&conn).is_some()
    }

    /// Makes the next command fail with `error`.
    pub fn fail_next(&mut self, error: LinkError) {
        self.fail_next = Some(error);
    }

    /// Next event packet the controller would deliver.
    pub fn pop_event(&mut self) -> Option<EventPacket> {
        self.inbound.pop_front()
    }

    /// Transmit log lines accumulated since the last drain.
    pub fn drain_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// Queues the local subevent results for one procedure measuring `meters`.
    pub fn queue_procedure(
        &mut self,
        conn: ConnHandle,
        meters: f32,
    ) -> Result<SimulatedProcedure, String> {
        let link = self
            .links
            .get_mut(&conn)
            .ok_or_else(|| format!("no simulated link on conn {conn}"))?;
        if !link.ranging {
            return Err(format!("ranging is not enabled on conn {conn}"));
        }
        let procedure_counter = link.procedure_counter;
        link.procedure_counter = link.procedure_counter.wrapping_add(1);
        let config_id = link.config_id;

        let measurement = distance_step(meters, 20);
        let calibration = [MODE_CALIBRATION, 2, 0];

        let first = CsEvent::SubeventResult(SubeventResult {
            conn,
            config_id,
            start_acl_conn_event: procedure_counter.wrapping_mul(4),
            procedure_counter,
            frequency_compensation: 0xC000,
            reference_power_level: -20,
            data: SubeventSteps {
                procedure_done: DoneStatus::Partial,
                subevent_done: DoneStatus::Complete,
                abort_reason: 0,
                num_antenna_paths: 1,
                num_steps: 1,
                steps: &calibration,
            },
        });
        let last = CsEvent::SubeventResultContinue(SubeventResultContinue {
            conn,
            config_id,
            data: SubeventSteps {
                procedure_done: DoneStatus::Complete,
                subevent_done: DoneStatus::Complete,
                abort_reason: 0,
                num_antenna_paths: 1,
                num_steps: 1,
                steps: &measurement,
            },
        });
        for event in [first, last] {
            let packet = encode_event(&event).map_err(|err| err.to_string())?;
            self.inbound.push_back(packet);
        }

        Ok(SimulatedProcedure {
            procedure_counter,
            remote_steps: distance_step(meters, 20).to_vec(),
        })
    }

    fn response(&mut self, conn: ConnHandle, command: &CsCommand) -> Option<CsEvent<'static>> {
        let link = self.links.get_mut(&conn)?;
        let status = STATUS_SUCCESS;
        match *command {
            CsCommand::ReadRemoteCapabilities => Some(CsEvent::Capabilities(CapabilitiesComplete {
                status,
                conn,
                capabilities: PEER_CAPABILITIES,
            })),
            CsCommand::SecurityEnable => Some(CsEvent::SecurityEnable(StatusComplete { status, conn })),
            CsCommand::ReadRemoteFaeTable => Some(CsEvent::FaeTable(StatusComplete { status, conn })),
            CsCommand::SetDefaultSettings(_) | CsCommand::SetProcedureParams { .. } => None,
            CsCommand::CreateConfig {
                config_id,
                role,
                params,
            } => {
                link.config_id = config_id;
                Some(CsEvent::Config(ConfigComplete {
                    status,
                    conn,
                    config_id,
                    action: ConfigAction::Created,
                    main_mode: params.main_mode,
                    sub_mode: params.sub_mode,
                    role,
                    rtt_type: params.rtt_type,
                }))
            }
            CsCommand::RemoveConfig { config_id } => Some(CsEvent::Config(ConfigComplete {
                status,
                conn,
                config_id,
                action: ConfigAction::Removed,
                main_mode: MainMode::Pbr,
                sub_mode: SubMode::None,
                role: CsRole::Initiator,
                rtt_type: RttType::AccessAddressOnly,
            })),
            CsCommand::ProcedureEnable { config_id, enable } => {
                link.ranging = enable;
                Some(CsEvent::ProcedureEnable(ProcedureEnableComplete {
                    status,
                    conn,
                    config_id,
                    enabled: enable,
                    tone_antenna_config_selection: 0,
                    selected_tx_power: 0,
                    subevent_len: 6_750,
                    subevents_per_event: 1,
                    subevent_interval: 0,
                    event_interval: 2,
                    procedure_interval: 10,
                    procedure_count: 0,
                    max_procedure_len: 0x2710,
                }))
            }
        }
    }
}

impl CsCommandSink for SimPeer {
    fn send(&mut self, conn: ConnHandle, command: &CsCommand) -> Result<CommandStatus, LinkError> {
        if let Some(error) = self.fail_next.take() {
            return Err(error);
        }
        if !self.links.contains_key(&conn) {
            return Err(LinkError::Disconnected);
        }

        let packet = command
            .encode(conn)
            .map_err(|_| LinkError::Rejected(STATUS_UNSPECIFIED))?;
        self.sent.push(format!(
            "TX opcode=0x{:04x} {} conn={conn} len={}",
            command.opcode(),
            command.step(),
            packet.len()
        ));

        match self.response(conn, command) {
            Some(event) => {
                let packet =
                    encode_event(&event).map_err(|_| LinkError::Rejected(STATUS_UNSPECIFIED))?;
                self.inbound.push_back(packet);
                Ok(CommandStatus::Pending)
            }
            None => Ok(CommandStatus::Completed),
        }
    }
}

fn distance_step(meters: f32, channel: u8) -> [u8; 5] {
    // Saturating float-to-int conversion; negative input clamps to zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let centimeters = (meters * 100.0).round() as u16;
    let [lo, hi] = centimeters.to_le_bytes();
    [MODE_PBR, channel, 2, lo, hi]
}

/// Recovers the first mode-2 distance in `steps`, in meters.
fn first_distance(steps: &[u8]) -> Option<f32> {
    let mut rest = steps;
    while let [mode, _channel, len, tail @ ..] = rest {
        let len = usize::from(*len);
        let data = tail.get(..len)?;
        if let ([lo, hi], MODE_PBR) = (data, *mode) {
            return Some(f32::from(u16::from_le_bytes([*lo, *hi])) / 100.0);
        }
        rest = &tail[len..];
    }
    None
}

/// Estimator that averages the distances both halves carry.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimEstimator {
    estimates: u32,
}

impl SimEstimator {
    #[must_use]
    pub const fn estimates(&self) -> u32 {
        self.estimates
    }
}

impl DistanceEstimator for SimEstimator {
    fn estimate(
        &mut self,
        _conn: ConnHandle,
        local: &ProcedureData,
        remote: &ProcedureData,
        _mode: MainMode,
    ) -> Result<Estimates, EstimateError> {
        let local = first_distance(local.steps()).ok_or(EstimateError(-2))?;
        let remote = first_distance(remote.steps()).ok_or(EstimateError(-3))?;
        self.estimates += 1;
        let mut estimates = Estimates::new();
        estimates
            .push((local + remote) / 2.0)
            .map_err(|_| EstimateError(-1))?;
        Ok(estimates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_survives_step_encoding() {
        let mut steps = vec![MODE_CALIBRATION, 2, 0];
        steps.extend_from_slice(&distance_step(3.25, 40));
        assert_eq!(first_distance(&steps), Some(3.25));
        assert_eq!(first_distance(&[MODE_PBR, 2, 4, 0]), None);
    }

    #[test]
    fn unknown_link_is_disconnected() {
        let mut peer = SimPeer::new();
        let conn = ConnHandle::new(1).expect("valid handle");
        assert_eq!(
            peer.send(conn, &CsCommand::SecurityEnable),
            Err(LinkError::Disconnected)
        );
    }

    #[test]
    fn synchronous_commands_complete_without_event() {
        let mut peer = SimPeer::new();
        let conn = ConnHandle::new(1).expect("valid handle");
        peer.connect(conn);
        let settings = cs_ranging_core::config::DefaultSettings::DEFAULT;
        assert_eq!(
            peer.send(conn, &CsCommand::SetDefaultSettings(settings)),
            Ok(CommandStatus::Completed)
        );
        assert!(peer.pop_event().is_none());
        assert_eq!(peer.drain_sent().len(), 1);
    }
}
