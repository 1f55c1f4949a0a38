//! Inbound Channel Sounding notifications and their routing.
//!
//! Every LE CS sub-event maps onto exactly one [`Route`]: either a negotiation
//! step completion or the ranging-data path. The mapping is an exhaustive
//! match so a new event kind cannot be left unrouted.

use core::fmt;

use crate::config::{ConfigId, MainMode, RttType, SubMode};
use crate::procedure::{ConnHandle, CsRole, RemoteCapabilities, Step};

/// HCI status code for success.
pub const STATUS_SUCCESS: u8 = 0x00;

/// LE CS sub-event kinds consumed by the controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsEventKind {
    CapabilitiesComplete,
    FaeTableComplete,
    SecurityEnableComplete,
    ConfigComplete,
    ProcedureEnableComplete,
    SubeventResult,
    SubeventResultContinue,
}

impl CsEventKind {
    pub const ALL: [CsEventKind; 7] = [
        CsEventKind::CapabilitiesComplete,
        CsEventKind::FaeTableComplete,
        CsEventKind::SecurityEnableComplete,
        CsEventKind::ConfigComplete,
        CsEventKind::ProcedureEnableComplete,
        CsEventKind::SubeventResult,
        CsEventKind::SubeventResultContinue,
    ];

    /// LE Meta sub-event code carried on the wire.
    #[must_use]
    pub const fn subevent_code(self) -> u8 {
        match self {
            CsEventKind::CapabilitiesComplete => 0x2C,
            CsEventKind::FaeTableComplete => 0x2D,
            CsEventKind::SecurityEnableComplete => 0x2E,
            CsEventKind::ConfigComplete => 0x2F,
            CsEventKind::ProcedureEnableComplete => 0x30,
            CsEventKind::SubeventResult => 0x31,
            CsEventKind::SubeventResultContinue => 0x32,
        }
    }

    #[must_use]
    pub const fn from_subevent_code(code: u8) -> Option<Self> {
        match code {
            0x2C => Some(CsEventKind::CapabilitiesComplete),
            0x2D => Some(CsEventKind::FaeTableComplete),
            0x2E => Some(CsEventKind::SecurityEnableComplete),
            0x2F => Some(CsEventKind::ConfigComplete),
            0x30 => Some(CsEventKind::ProcedureEnableComplete),
            0x31 => Some(CsEventKind::SubeventResult),
            0x32 => Some(CsEventKind::SubeventResultContinue),
            _ => None,
        }
    }
}

impl fmt::Display for CsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match label(*self) {
            Some(text) => f.write_str(text),
            None => write!(f, "subevent 0x{:02x}", self.subevent_code()),
        }
    }
}

/// Destination for an inbound event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Route {
    /// Completion of a negotiation step.
    Negotiation(Step),
    /// Step data for the ranging session.
    RangingData,
}

/// Maps an event kind to its consumer.
#[must_use]
pub const fn route(kind: CsEventKind) -> Route {
    match kind {
        CsEventKind::CapabilitiesComplete => Route::Negotiation(Step::Capabilities),
        CsEventKind::FaeTableComplete => Route::Negotiation(Step::FaeExchange),
        CsEventKind::SecurityEnableComplete => Route::Negotiation(Step::SecurityEnable),
        CsEventKind::ConfigComplete => Route::Negotiation(Step::CreateConfig),
        CsEventKind::ProcedureEnableComplete => Route::Negotiation(Step::ProcedureEnable),
        CsEventKind::SubeventResult | CsEventKind::SubeventResultContinue => Route::RangingData,
    }
}

/// Log label for an event kind. Per-subevent data is too frequent to label.
#[must_use]
pub const fn label(kind: CsEventKind) -> Option<&'static str> {
    match kind {
        CsEventKind::CapabilitiesComplete => Some("remote capabilities read"),
        CsEventKind::FaeTableComplete => Some("remote FAE table read"),
        CsEventKind::SecurityEnableComplete => Some("security enabled"),
        CsEventKind::ConfigComplete => Some("configuration complete"),
        CsEventKind::ProcedureEnableComplete => Some("procedure enable complete"),
        CsEventKind::SubeventResult | CsEventKind::SubeventResultContinue => None,
    }
}

/// Capability-Read-Complete payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CapabilitiesComplete {
    pub status: u8,
    pub conn: ConnHandle,
    pub capabilities: RemoteCapabilities,
}

/// Completion that only carries a status and connection.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusComplete {
    pub status: u8,
    pub conn: ConnHandle,
}

/// Whether a configuration was created or removed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigAction {
    Removed,
    Created,
}

impl ConfigAction {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            ConfigAction::Removed => 0x00,
            ConfigAction::Created => 0x01,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(ConfigAction::Removed),
            0x01 => Some(ConfigAction::Created),
            _ => None,
        }
    }
}

/// Configuration-Complete payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigComplete {
    pub status: u8,
    pub conn: ConnHandle,
    pub config_id: ConfigId,
    pub action: ConfigAction,
    pub main_mode: MainMode,
    pub sub_mode: SubMode,
    pub role: CsRole,
    pub rtt_type: RttType,
}

/// Procedure-Enable-Complete payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcedureEnableComplete {
    pub status: u8,
    pub conn: ConnHandle,
    pub config_id: ConfigId,
    pub enabled: bool,
    pub tone_antenna_config_selection: u8,
    pub selected_tx_power: i8,
    pub subevent_len: u32,
    pub subevents_per_event: u8,
    pub subevent_interval: u16,
    pub event_interval: u16,
    pub procedure_interval: u16,
    pub procedure_count: u16,
    pub max_procedure_len: u16,
}

/// Procedure-done / subevent-done status nibble.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DoneStatus {
    Complete,
    Partial,
    Aborted,
    Reserved(u8),
}

impl DoneStatus {
    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code & 0x0F {
            0x0 => DoneStatus::Complete,
            0x1 => DoneStatus::Partial,
            0xF => DoneStatus::Aborted,
            other => DoneStatus::Reserved(other),
        }
    }

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            DoneStatus::Complete => 0x0,
            DoneStatus::Partial => 0x1,
            DoneStatus::Aborted => 0xF,
            DoneStatus::Reserved(code) => code,
        }
    }
}

/// Step data shared by both subevent result events.
///
/// `steps` holds the reported steps verbatim: mode, channel, length, data.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubeventSteps<'a> {
    pub procedure_done: DoneStatus,
    pub subevent_done: DoneStatus,
    pub abort_reason: u8,
    pub num_antenna_paths: u8,
    pub num_steps: u8,
    pub steps: &'a [u8],
}

/// Subevent-Result payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubeventResult<'a> {
    pub conn: ConnHandle,
    pub config_id: ConfigId,
    pub start_acl_conn_event: u16,
    pub procedure_counter: u16,
    pub frequency_compensation: u16,
    pub reference_power_level: i8,
    pub data: SubeventSteps<'a>,
}

/// Subevent-Result-Continue payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SubeventResultContinue<'a> {
    pub conn: ConnHandle,
    pub config_id: ConfigId,
    pub data: SubeventSteps<'a>,
}

/// Decoded inbound CS notification. Step data borrows from the packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CsEvent<'a> {
    Capabilities(CapabilitiesComplete),
    FaeTable(StatusComplete),
    SecurityEnable(StatusComplete),
    Config(ConfigComplete),
    ProcedureEnable(ProcedureEnableComplete),
    SubeventResult(SubeventResult<'a>),
    SubeventResultContinue(SubeventResultContinue<'a>),
}

impl CsEvent<'_> {
    #[must_use]
    pub const fn kind(&self) -> CsEventKind {
        match self {
            CsEvent::Capabilities(_) => CsEventKind::CapabilitiesComplete,
            CsEvent::FaeTable(_) => CsEventKind::FaeTableComplete,
            CsEvent::SecurityEnable(_) => CsEventKind::SecurityEnableComplete,
            CsEvent::Config(_) => CsEventKind::ConfigComplete,
            CsEvent::ProcedureEnable(_) => CsEventKind::ProcedureEnableComplete,
            CsEvent::SubeventResult(_) => CsEventKind::SubeventResult,
            CsEvent::SubeventResultContinue(_) => CsEventKind::SubeventResultContinue,
        }
    }

    #[must_use]
    pub const fn conn(&self) -> ConnHandle {
        match self {
            CsEvent::Capabilities(event) => event.conn,
            CsEvent::FaeTable(event) | CsEvent::SecurityEnable(event) => event.conn,
            CsEvent::Config(event) => event.conn,
            CsEvent::ProcedureEnable(event) => event.conn,
            CsEvent::SubeventResult(event) => event.conn,
            CsEvent::SubeventResultContinue(event) => event.conn,
        }
    }

    /// HCI status, for the completion events that carry one.
    #[must_use]
    pub const fn status(&self) -> Option<u8> {
        match self {
            CsEvent::Capabilities(event) => Some(event.status),
            CsEvent::FaeTable(event) | CsEvent::SecurityEnable(event) => Some(event.status),
            CsEvent::Config(event) => Some(event.status),
            CsEvent::ProcedureEnable(event) => Some(event.status),
            CsEvent::SubeventResult(_) | CsEvent::SubeventResultContinue(_) => None,
        }
    }

    /// Negotiation step this event completes, if it completes one.
    ///
    /// A removal notification completes [`Step::RemoveConfig`] rather than
    /// the creation step its kind routes to.
    #[must_use]
    pub const fn completed_step(&self) -> Option<Step> {
        match (self, route(self.kind())) {
            (
                CsEvent::Config(ConfigComplete {
                    action: ConfigAction::Removed,
                    ..
                }),
                _,
            ) => Some(Step::RemoveConfig),
            (_, Route::Negotiation(step)) => Some(step),
            (_, Route::RangingData) => None,
        }
    }
}
