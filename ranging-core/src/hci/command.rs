//! Outgoing LE CS commands (OGF 0x08).

use heapless::Vec;

use super::{EncodeError, PacketWriter, patch_length};
use crate::config::{ConfigId, CreateConfigParams, DefaultSettings, ProcedureParams};
use crate::procedure::{ConnHandle, CsRole, Step};

/// Opcode plus parameter-length octet.
pub const COMMAND_HEADER_LEN: usize = 3;

/// Largest encoded command (Create-Configuration).
pub const MAX_COMMAND_LEN: usize = COMMAND_HEADER_LEN + 28;

/// Encoded HCI command packet.
pub type CommandPacket = Vec<u8, MAX_COMMAND_LEN>;

const OGF_LE: u16 = 0x08;

const fn opcode(ocf: u16) -> u16 {
    (OGF_LE << 10) | ocf
}

/// One outgoing CS command. The connection handle is supplied at encode time.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CsCommand {
    ReadRemoteCapabilities,
    SecurityEnable,
    SetDefaultSettings(DefaultSettings),
    ReadRemoteFaeTable,
    CreateConfig {
        config_id: ConfigId,
        role: CsRole,
        params: CreateConfigParams,
    },
    RemoveConfig {
        config_id: ConfigId,
    },
    SetProcedureParams {
        config_id: ConfigId,
        params: ProcedureParams,
    },
    ProcedureEnable {
        config_id: ConfigId,
        enable: bool,
    },
}

impl CsCommand {
    pub const READ_REMOTE_CAPABILITIES: u16 = opcode(0x008A);
    pub const SECURITY_ENABLE: u16 = opcode(0x008C);
    pub const SET_DEFAULT_SETTINGS: u16 = opcode(0x008D);
    pub const READ_REMOTE_FAE_TABLE: u16 = opcode(0x008E);
    pub const CREATE_CONFIG: u16 = opcode(0x0090);
    pub const REMOVE_CONFIG: u16 = opcode(0x0091);
    pub const SET_PROCEDURE_PARAMS: u16 = opcode(0x0093);
    pub const PROCEDURE_ENABLE: u16 = opcode(0x0094);

    #[must_use]
    pub const fn opcode(&self) -> u16 {
        match self {
            CsCommand::ReadRemoteCapabilities => Self::READ_REMOTE_CAPABILITIES,
            CsCommand::SecurityEnable => Self::SECURITY_ENABLE,
            CsCommand::SetDefaultSettings(_) => Self::SET_DEFAULT_SETTINGS,
            CsCommand::ReadRemoteFaeTable => Self::READ_REMOTE_FAE_TABLE,
            CsCommand::CreateConfig { .. } => Self::CREATE_CONFIG,
            CsCommand::RemoveConfig { .. } => Self::REMOVE_CONFIG,
            CsCommand::SetProcedureParams { .. } => Self::SET_PROCEDURE_PARAMS,
            CsCommand::ProcedureEnable { .. } => Self::PROCEDURE_ENABLE,
        }
    }

    /// Negotiation step this command performs.
    #[must_use]
    pub const fn step(&self) -> Step {
        match self {
            CsCommand::ReadRemoteCapabilities => Step::Capabilities,
            CsCommand::SecurityEnable => Step::SecurityEnable,
            CsCommand::SetDefaultSettings(_) => Step::DefaultSettings,
            CsCommand::ReadRemoteFaeTable => Step::FaeExchange,
            CsCommand::CreateConfig { .. } => Step::CreateConfig,
            CsCommand::RemoveConfig { .. } => Step::RemoveConfig,
            CsCommand::SetProcedureParams { .. } => Step::ProcedureParams,
            CsCommand::ProcedureEnable { .. } => Step::ProcedureEnable,
        }
    }

    /// Encodes the command packet addressed to `conn`.
    pub fn encode(&self, conn: ConnHandle) -> Result<CommandPacket, EncodeError> {
        let mut out = PacketWriter::<MAX_COMMAND_LEN>::new();
        out.u16(self.opcode())?;
        out.u8(0)?;
        out.u16(conn.raw())?;

        match self {
            CsCommand::ReadRemoteCapabilities
            | CsCommand::SecurityEnable
            | CsCommand::ReadRemoteFaeTable => {}
            CsCommand::SetDefaultSettings(settings) => {
                out.u8(settings.role_enable())?;
                out.u8(settings.sync_antenna_selection)?;
                out.i8(settings.max_tx_power_dbm)?;
            }
            CsCommand::CreateConfig {
                config_id,
                role,
                params,
            } => {
                out.u8(*config_id)?;
                out.u8(params.create_context)?;
                out.u8(params.main_mode.to_raw())?;
                out.u8(params.sub_mode.to_raw())?;
                out.u8(params.min_main_mode_steps)?;
                out.u8(params.max_main_mode_steps)?;
                out.u8(params.main_mode_repetition)?;
                out.u8(params.mode_0_steps)?;
                out.u8(role.to_raw())?;
                out.u8(params.rtt_type.to_raw())?;
                out.u8(params.sync_phy)?;
                out.slice(&params.channel_map)?;
                out.u8(params.channel_map_repetition)?;
                out.u8(params.channel_selection_type)?;
                out.u8(params.ch3c_shape)?;
                out.u8(params.ch3c_jump)?;
                // reserved
                out.u8(0)?;
            }
            CsCommand::RemoveConfig { config_id } => out.u8(*config_id)?,
            CsCommand::SetProcedureParams { config_id, params } => {
                out.u8(*config_id)?;
                out.u16(params.max_procedure_len)?;
                out.u16(params.min_procedure_interval)?;
                out.u16(params.max_procedure_interval)?;
                out.u16(params.max_procedure_count)?;
                out.u24(params.min_subevent_len)?;
                out.u24(params.max_subevent_len)?;
                out.u8(params.tone_antenna_config_selection)?;
                out.u8(params.phy)?;
                out.u8(params.tx_power_delta)?;
                out.u8(params.preferred_peer_antenna)?;
                out.u8(params.snr_control_initiator)?;
                out.u8(params.snr_control_reflector)?;
            }
            CsCommand::ProcedureEnable { config_id, enable } => {
                out.u8(*config_id)?;
                out.u8(u8::from(*enable))?;
            }
        }

        patch_length(&mut out, 2)?;
        Ok(out.finish())
    }
}
