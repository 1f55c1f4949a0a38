//! Inbound LE Meta sub-events for Channel Sounding.

use heapless::Vec;
use winnow::binary::{le_i8, le_u8, le_u16, le_u24};
use winnow::error::ContextError;
use winnow::prelude::*;
use winnow::token::take;

use super::{DecodeError, EncodeError, PacketWriter, patch_length};
use crate::config::{MainMode, RttType, SubMode};
use crate::events::{
    CapabilitiesComplete, ConfigAction, ConfigComplete, CsEvent, CsEventKind, DoneStatus,
    ProcedureEnableComplete, StatusComplete, SubeventResult, SubeventResultContinue,
    SubeventSteps,
};
use crate::procedure::{ConnHandle, CsRole, RemoteCapabilities};

/// HCI event code of the LE Meta event.
pub const LE_META_EVENT: u8 = 0x3E;

/// Event code, parameter length and up to 255 parameter bytes.
pub const MAX_EVENT_LEN: usize = 2 + 255;

/// Encoded HCI event packet.
pub type EventPacket = Vec<u8, MAX_EVENT_LEN>;

/// Decodes a complete LE Meta event packet (event code first).
pub fn decode_event(packet: &[u8]) -> Result<CsEvent<'_>, DecodeError> {
    let (&code, rest) = packet.split_first().ok_or(DecodeError::NotLeMeta(0))?;
    if code != LE_META_EVENT {
        return Err(DecodeError::NotLeMeta(code));
    }
    let (&declared, params) = rest.split_first().ok_or(DecodeError::LengthMismatch {
        declared: 0,
        actual: 0,
    })?;
    if usize::from(declared) != params.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: params.len(),
        });
    }
    decode_subevent(params)
}

/// Decodes LE Meta parameters starting at the sub-event code.
pub fn decode_subevent(params: &[u8]) -> Result<CsEvent<'_>, DecodeError> {
    let (&code, body) = params
        .split_first()
        .ok_or(DecodeError::UnknownSubevent(0))?;
    let kind = CsEventKind::from_subevent_code(code).ok_or(DecodeError::UnknownSubevent(code))?;
    let mut reader = Reader::new(body, kind);

    let event = match kind {
        CsEventKind::CapabilitiesComplete => {
            let status = reader.u8()?;
            let conn = reader.handle()?;
            let capabilities = RemoteCapabilities {
                num_configs_supported: reader.u8()?,
                max_consecutive_procedures: reader.u16()?,
                num_antennas: reader.u8()?,
                max_antenna_paths: reader.u8()?,
                roles_supported: reader.u8()?,
                modes_supported: reader.u8()?,
            };
            CsEvent::Capabilities(CapabilitiesComplete {
                status,
                conn,
                capabilities,
            })
        }
        CsEventKind::FaeTableComplete => CsEvent::FaeTable(reader.status_complete()?),
        CsEventKind::SecurityEnableComplete => CsEvent::SecurityEnable(reader.status_complete()?),
        CsEventKind::ConfigComplete => CsEvent::Config(reader.config_complete()?),
        CsEventKind::ProcedureEnableComplete => {
            CsEvent::ProcedureEnable(reader.procedure_enable_complete()?)
        }
        CsEventKind::SubeventResult => {
            let conn = reader.handle()?;
            let config_id = reader.u8()?;
            let start_acl_conn_event = reader.u16()?;
            let procedure_counter = reader.u16()?;
            let frequency_compensation = reader.u16()?;
            let reference_power_level = reader.i8()?;
            let data = reader.steps()?;
            CsEvent::SubeventResult(SubeventResult {
                conn,
                config_id,
                start_acl_conn_event,
                procedure_counter,
                frequency_compensation,
                reference_power_level,
                data,
            })
        }
        CsEventKind::SubeventResultContinue => {
            let conn = reader.handle()?;
            let config_id = reader.u8()?;
            let data = reader.steps()?;
            CsEvent::SubeventResultContinue(SubeventResultContinue {
                conn,
                config_id,
                data,
            })
        }
    };

    Ok(event)
}

/// Field reader that adapts `winnow` parser failures to [`DecodeError`].
struct Reader<'a> {
    input: &'a [u8],
    kind: CsEventKind,
}

impl<'a> Reader<'a> {
    const fn new(input: &'a [u8], kind: CsEventKind) -> Self {
        Self { input, kind }
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated(self.kind)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        le_u8
            .parse_next(&mut self.input)
            .map_err(|_: ContextError| self.truncated())
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        le_i8
            .parse_next(&mut self.input)
            .map_err(|_: ContextError| self.truncated())
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        le_u16
            .parse_next(&mut self.input)
            .map_err(|_: ContextError| self.truncated())
    }

    fn u24(&mut self) -> Result<u32, DecodeError> {
        le_u24
            .parse_next(&mut self.input)
            .map_err(|_: ContextError| self.truncated())
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        take(len)
            .parse_next(&mut self.input)
            .map_err(|_: ContextError| self.truncated())
    }

    fn handle(&mut self) -> Result<ConnHandle, DecodeError> {
        let raw = self.u16()?;
        ConnHandle::from_wire(raw).ok_or(DecodeError::InvalidHandle(raw & 0x0FFF))
    }

    fn status_complete(&mut self) -> Result<StatusComplete, DecodeError> {
        let status = self.u8()?;
        let conn = self.handle()?;
        Ok(StatusComplete { status, conn })
    }

    fn config_complete(&mut self) -> Result<ConfigComplete, DecodeError> {
        let status = self.u8()?;
        let conn = self.handle()?;
        let config_id = self.u8()?;
        let action =
            ConfigAction::from_raw(self.u8()?).ok_or(DecodeError::InvalidField(self.kind))?;
        let main_mode = MainMode::from_raw(self.u8()?);
        let sub_mode = SubMode::from_raw(self.u8()?);
        // min/max main mode steps, main mode repetition, mode 0 steps
        self.bytes(4)?;
        let role = CsRole::from_raw(self.u8()?).ok_or(DecodeError::InvalidField(self.kind))?;
        let rtt_type = RttType::from_raw(self.u8()?);

        Ok(ConfigComplete {
            status,
            conn,
            config_id,
            action,
            main_mode,
            sub_mode,
            role,
            rtt_type,
        })
    }

    fn procedure_enable_complete(&mut self) -> Result<ProcedureEnableComplete, DecodeError> {
        let status = self.u8()?;
        let conn = self.handle()?;
        let config_id = self.u8()?;
        let enabled = match self.u8()? {
            0x00 => false,
            0x01 => true,
            _ => return Err(DecodeError::InvalidField(self.kind)),
        };

        Ok(ProcedureEnableComplete {
            status,
            conn,
            config_id,
            enabled,
            tone_antenna_config_selection: self.u8()?,
            selected_tx_power: self.i8()?,
            subevent_len: self.u24()?,
            subevents_per_event: self.u8()?,
            subevent_interval: self.u16()?,
            event_interval: self.u16()?,
            procedure_interval: self.u16()?,
            procedure_count: self.u16()?,
            max_procedure_len: self.u16()?,
        })
    }

    /// Reads the status octets and walks every reported step.
    fn steps(&mut self) -> Result<SubeventSteps<'a>, DecodeError> {
        let procedure_done = DoneStatus::from_raw(self.u8()?);
        let subevent_done = DoneStatus::from_raw(self.u8()?);
        let abort_reason = self.u8()?;
        let num_antenna_paths = self.u8()?;
        let num_steps = self.u8()?;

        let start = self.input;
        for _ in 0..num_steps {
            let _mode = self.u8()?;
            let _channel = self.u8()?;
            let len = self.u8()?;
            self.bytes(usize::from(len))?;
        }
        let consumed = start.len() - self.input.len();

        Ok(SubeventSteps {
            procedure_done,
            subevent_done,
            abort_reason,
            num_antenna_paths,
            num_steps,
            steps: &start[..consumed],
        })
    }
}

/// Encodes `event` as a complete LE Meta event packet.
///
/// Fields the decoder skips are written as zero.
pub fn encode_event(event: &CsEvent<'_>) -> Result<EventPacket, EncodeError> {
    let mut out = PacketWriter::<MAX_EVENT_LEN>::new();
    out.u8(LE_META_EVENT)?;
    out.u8(0)?;
    out.u8(event.kind().subevent_code())?;

    match event {
        CsEvent::Capabilities(event) => {
            out.u8(event.status)?;
            out.u16(event.conn.raw())?;
            let caps = &event.capabilities;
            out.u8(caps.num_configs_supported)?;
            out.u16(caps.max_consecutive_procedures)?;
            out.u8(caps.num_antennas)?;
            out.u8(caps.max_antenna_paths)?;
            out.u8(caps.roles_supported)?;
            out.u8(caps.modes_supported)?;
        }
        CsEvent::FaeTable(event) | CsEvent::SecurityEnable(event) => {
            out.u8(event.status)?;
            out.u16(event.conn.raw())?;
        }
        CsEvent::Config(event) => {
            out.u8(event.status)?;
            out.u16(event.conn.raw())?;
            out.u8(event.config_id)?;
            out.u8(event.action.to_raw())?;
            out.u8(event.main_mode.to_raw())?;
            out.u8(event.sub_mode.to_raw())?;
            out.slice(&[0; 4])?;
            out.u8(event.role.to_raw())?;
            out.u8(event.rtt_type.to_raw())?;
        }
        CsEvent::ProcedureEnable(event) => {
            out.u8(event.status)?;
            out.u16(event.conn.raw())?;
            out.u8(event.config_id)?;
            out.u8(u8::from(event.enabled))?;
            out.u8(event.tone_antenna_config_selection)?;
            out.i8(event.selected_tx_power)?;
            out.u24(event.subevent_len)?;
            out.u8(event.subevents_per_event)?;
            out.u16(event.subevent_interval)?;
            out.u16(event.event_interval)?;
            out.u16(event.procedure_interval)?;
            out.u16(event.procedure_count)?;
            out.u16(event.max_procedure_len)?;
        }
        CsEvent::SubeventResult(event) => {
            out.u16(event.conn.raw())?;
            out.u8(event.config_id)?;
            out.u16(event.start_acl_conn_event)?;
            out.u16(event.procedure_counter)?;
            out.u16(event.frequency_compensation)?;
            out.i8(event.reference_power_level)?;
            write_steps(&mut out, &event.data)?;
        }
        CsEvent::SubeventResultContinue(event) => {
            out.u16(event.conn.raw())?;
            out.u8(event.config_id)?;
            write_steps(&mut out, &event.data)?;
        }
    }

    patch_length(&mut out, 1)?;
    Ok(out.finish())
}

fn write_steps(
    out: &mut PacketWriter<MAX_EVENT_LEN>,
    data: &SubeventSteps<'_>,
) -> Result<(), EncodeError> {
    out.u8(data.procedure_done.to_raw())?;
    out.u8(data.subevent_done.to_raw())?;
    out.u8(data.abort_reason)?;
    out.u8(data.num_antenna_paths)?;
    out.u8(data.num_steps)?;
    out.slice(data.steps)
}
