//! Ranging configuration registry and negotiation parameters.
//!
//! [`ConfigRegistry`] tracks every (connection, configuration id) pair the
//! controller reports as created on the link. Entries are invalidated in place
//! when the controller reports removal; a later add may reuse the slot.
//!
//! [`RangingSettings`] groups the parameters the state machine places into
//! outgoing commands. Defaults mirror the values used for phase-based ranging
//! with RTT assistance on a single antenna path.

use core::fmt;

use crate::filter::FilterSettings;
use crate::procedure::{ConnHandle, CsRole, MAX_CONNECTIONS};

/// Number of configurations a single connection may hold.
pub const CONFIGS_PER_CONNECTION: usize = 4;

/// Total registry capacity.
pub const CONFIG_REGISTRY_CAPACITY: usize = MAX_CONNECTIONS * CONFIGS_PER_CONNECTION;

/// Identifier of a CS configuration on one connection (0..=3).
pub type ConfigId = u8;

/// CS main mode selected for a configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MainMode {
    /// Mode 1: round-trip time.
    Rtt,
    /// Mode 2: phase-based ranging.
    Pbr,
    /// Mode 3: RTT and PBR interleaved.
    RttAndPbr,
    Unknown(u8),
}

impl MainMode {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            MainMode::Rtt => 0x01,
            MainMode::Pbr => 0x02,
            MainMode::RttAndPbr => 0x03,
            MainMode::Unknown(code) => code,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            0x01 => MainMode::Rtt,
            0x02 => MainMode::Pbr,
            0x03 => MainMode::RttAndPbr,
            other => MainMode::Unknown(other),
        }
    }
}

/// CS sub mode; `None` encodes the "unused" value `0xFF`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SubMode {
    None,
    Mode(u8),
}

impl SubMode {
    const UNUSED: u8 = 0xFF;

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            SubMode::None => Self::UNUSED,
            SubMode::Mode(code) => code,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            Self::UNUSED => SubMode::None,
            other => SubMode::Mode(other),
        }
    }
}

/// Round-trip-time measurement variant.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RttType {
    AccessAddressOnly,
    Sounding32BitFractional,
    Sounding96BitFractional,
    Random32Bit,
    Random64Bit,
    Random96Bit,
    Random128Bit,
    Unknown(u8),
}

impl RttType {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RttType::AccessAddressOnly => 0x00,
            RttType::Sounding32BitFractional => 0x01,
            RttType::Sounding96BitFractional => 0x02,
            RttType::Random32Bit => 0x03,
            RttType::Random64Bit => 0x04,
            RttType::Random96Bit => 0x05,
            RttType::Random128Bit => 0x06,
            RttType::Unknown(code) => code,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            0x00 => RttType::AccessAddressOnly,
            0x01 => RttType::Sounding32BitFractional,
            0x02 => RttType::Sounding96BitFractional,
            0x03 => RttType::Random32Bit,
            0x04 => RttType::Random64Bit,
            0x05 => RttType::Random96Bit,
            0x06 => RttType::Random128Bit,
            other => RttType::Unknown(other),
        }
    }
}

/// Negotiated parameters of one configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CsConfig {
    pub conn: ConnHandle,
    pub id: ConfigId,
    pub main_mode: MainMode,
    pub sub_mode: SubMode,
    pub role: CsRole,
    pub rtt_type: RttType,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum ConfigSlot {
    Invalid,
    Valid(CsConfig),
}

/// Errors reported by [`ConfigRegistry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegistryError {
    /// Every slot holds a valid configuration.
    Full,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Full => f.write_str("configuration registry full"),
        }
    }
}

/// Fixed pool of configurations created on the link.
#[derive(Clone, Debug)]
pub struct ConfigRegistry<const CAPACITY: usize = CONFIG_REGISTRY_CAPACITY> {
    slots: [ConfigSlot; CAPACITY],
}

impl<const CAPACITY: usize> ConfigRegistry<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [ConfigSlot::Invalid; CAPACITY],
        }
    }

    /// Stores `config`, replacing a valid entry for the same pair if present.
    pub fn add(&mut self, config: CsConfig) -> Result<(), RegistryError> {
        if let Some(existing) = self.slots.iter_mut().find(|slot| {
            matches!(slot, ConfigSlot::Valid(entry) if entry.conn == config.conn && entry.id == config.id)
        }) {
            *existing = ConfigSlot::Valid(config);
            return Ok(());
        }

        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, ConfigSlot::Invalid))
            .ok_or(RegistryError::Full)?;
        *slot = ConfigSlot::Valid(config);
        Ok(())
    }

    /// Looks up the valid configuration for `(conn, id)`.
    #[must_use]
    pub fn find(&self, conn: ConnHandle, id: ConfigId) -> Option<&CsConfig> {
        self.iter()
            .find(|config| config.conn == conn && config.id == id)
    }

    /// Marks the configuration for `(conn, id)` invalid.
    ///
    /// Returns the invalidated entry, or `None` when no valid entry matched.
    pub fn invalidate(&mut self, conn: ConnHandle, id: ConfigId) -> Option<CsConfig> {
        self.slots.iter_mut().find_map(|slot| match *slot {
            ConfigSlot::Valid(entry) if entry.conn == conn && entry.id == id => {
                *slot = ConfigSlot::Invalid;
                Some(entry)
            }
            _ => None,
        })
    }

    /// Invalidates every configuration owned by `conn`; returns how many.
    pub fn invalidate_connection(&mut self, conn: ConnHandle) -> usize {
        let mut removed = 0;
        for slot in &mut self.slots {
            if matches!(slot, ConfigSlot::Valid(entry) if entry.conn == conn) {
                *slot = ConfigSlot::Invalid;
                removed += 1;
            }
        }
        removed
    }

    /// Iterates over valid configurations in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &CsConfig> {
        self.slots.iter().filter_map(|slot| match slot {
            ConfigSlot::Valid(config) => Some(config),
            ConfigSlot::Invalid => None,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }
}

impl<const CAPACITY: usize> Default for ConfigRegistry<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters of the Set-Default-Settings command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DefaultSettings {
    pub initiator_enabled: bool,
    pub reflector_enabled: bool,
    pub sync_antenna_selection: u8,
    pub max_tx_power_dbm: i8,
}

impl DefaultSettings {
    pub const DEFAULT: Self = Self {
        initiator_enabled: true,
        reflector_enabled: true,
        sync_antenna_selection: 0x01,
        max_tx_power_dbm: 20,
    };

    /// Encodes the role enable bitfield (bit 0 initiator, bit 1 reflector).
    #[must_use]
    pub const fn role_enable(&self) -> u8 {
        (self.initiator_enabled as u8) | ((self.reflector_enabled as u8) << 1)
    }
}

/// Number of bytes in the CS channel map.
pub const CHANNEL_MAP_LEN: usize = 10;

/// Parameters of the Create-Configuration command, minus id and role.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CreateConfigParams {
    pub main_mode: MainMode,
    pub sub_mode: SubMode,
    pub min_main_mode_steps: u8,
    pub max_main_mode_steps: u8,
    pub main_mode_repetition: u8,
    pub mode_0_steps: u8,
    pub rtt_type: RttType,
    pub sync_phy: u8,
    pub channel_map: [u8; CHANNEL_MAP_LEN],
    pub channel_map_repetition: u8,
    pub channel_selection_type: u8,
    pub ch3c_shape: u8,
    pub ch3c_jump: u8,
    pub create_context: u8,
}

impl CreateConfigParams {
    pub const DEFAULT: Self = Self {
        main_mode: MainMode::Pbr,
        sub_mode: SubMode::None,
        min_main_mode_steps: 2,
        max_main_mode_steps: 5,
        main_mode_repetition: 0,
        mode_0_steps: 3,
        rtt_type: RttType::AccessAddressOnly,
        sync_phy: 0x01,
        // Channels 2..=76 usable; 23..=25 and 77..=78 masked per the CS channel table.
        channel_map: [0xFC, 0xFF, 0x7F, 0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x1F],
        channel_map_repetition: 1,
        channel_selection_type: 0x00,
        ch3c_shape: 0x00,
        ch3c_jump: 2,
        create_context: 0x01,
    };
}

/// Parameters of the Set-Procedure-Parameters command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProcedureParams {
    pub max_procedure_len: u16,
    pub min_procedure_interval: u16,
    pub max_procedure_interval: u16,
    /// `0` requests procedures until explicitly disabled.
    pub max_procedure_count: u16,
    /// Microseconds, 24-bit on the wire.
    pub min_subevent_len: u32,
    /// Microseconds, 24-bit on the wire.
    pub max_subevent_len: u32,
    pub tone_antenna_config_selection: u8,
    pub phy: u8,
    pub tx_power_delta: u8,
    pub preferred_peer_antenna: u8,
    pub snr_control_initiator: u8,
    pub snr_control_reflector: u8,
}

impl ProcedureParams {
    pub const DEFAULT: Self = Self {
        max_procedure_len: 0x2710,
        min_procedure_interval: 10,
        max_procedure_interval: 10,
        max_procedure_count: 0,
        min_subevent_len: 6_750,
        max_subevent_len: 6_750,
        tone_antenna_config_selection: 0x00,
        phy: 0x01,
        tx_power_delta: 0x80,
        preferred_peer_antenna: 0x01,
        snr_control_initiator: 0xFF,
        snr_control_reflector: 0xFF,
    };
}

/// Behavioural switches for the negotiation state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NegotiationSettings {
    /// Stop after the FAE and security steps and wait for an operator command.
    pub manual_trigger: bool,
    /// Begin the capability exchange as soon as a record is allocated.
    pub auto_start: bool,
    /// Configuration id used for automatically created configurations.
    pub default_config_id: ConfigId,
}

impl NegotiationSettings {
    pub const DEFAULT: Self = Self {
        manual_trigger: false,
        auto_start: true,
        default_config_id: 0,
    };
}

/// Every tunable the ranging controller consumes.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RangingSettings {
    pub negotiation: NegotiationSettings,
    pub default_settings: DefaultSettings,
    pub create_config: CreateConfigParams,
    pub procedure: ProcedureParams,
    pub filter: FilterSettings,
}

impl RangingSettings {
    pub const DEFAULT: Self = Self {
        negotiation: NegotiationSettings::DEFAULT,
        default_settings: DefaultSettings::DEFAULT,
        create_config: CreateConfigParams::DEFAULT,
        procedure: ProcedureParams::DEFAULT,
        filter: FilterSettings::DEFAULT,
    };

    /// Defaults with the operator-driven manual trigger enabled.
    #[must_use]
    pub const fn manual() -> Self {
        let mut settings = Self::DEFAULT;
        settings.negotiation.manual_trigger = true;
        settings
    }
}

impl Default for RangingSettings {
    fn default() -> Self {
        Self::DEFAULT
    }
}
