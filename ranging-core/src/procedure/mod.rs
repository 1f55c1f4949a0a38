//! Per-connection procedure control records and the fixed slot pool.
//!
//! A [`ProcedureRecord`] exists for every connection that is negotiating or
//! running a Channel Sounding procedure. Records live in a [`ProcedurePool`]
//! of [`MAX_CONNECTIONS`] tagged slots; a slot is either free or owned by a
//! single connection handle for its whole lifetime.

use core::fmt;

use heapless::Deque;

use crate::config::ConfigId;
use crate::filter::FilterSettings;
use crate::ranging::RangingSession;

pub mod machine;

pub use machine::{CommandStatus, CsCommandSink, LinkError, PassReport, advance};

/// Number of connections that may negotiate ranging concurrently.
pub const MAX_CONNECTIONS: usize = 4;

/// Largest connection handle the HCI allows.
pub const MAX_CONN_HANDLE: u16 = 0x0EFF;

/// Advisory timestamp measured in driver-loop passes.
pub type Tick = u32;

/// HCI connection handle (0x0000..=0x0EFF).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(u16);

impl ConnHandle {
    /// Wraps `raw`, rejecting values outside the HCI handle range.
    #[must_use]
    pub const fn new(raw: u16) -> Option<Self> {
        if raw <= MAX_CONN_HANDLE {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Wraps the low 12 bits of a handle field read from an HCI packet.
    #[must_use]
    pub const fn from_wire(raw: u16) -> Option<Self> {
        Self::new(raw & 0x0FFF)
    }

    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of the local device within the CS exchange.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsRole {
    Initiator,
    Reflector,
}

impl CsRole {
    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            CsRole::Initiator => 0x00,
            CsRole::Reflector => 0x01,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(CsRole::Initiator),
            0x01 => Some(CsRole::Reflector),
            _ => None,
        }
    }
}

impl fmt::Display for CsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsRole::Initiator => f.write_str("initiator"),
            CsRole::Reflector => f.write_str("reflector"),
        }
    }
}

/// Role of the local device on the underlying link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkRole {
    Central,
    Peripheral,
}

impl LinkRole {
    /// CS role conventionally paired with this link role.
    #[must_use]
    pub const fn default_cs_role(self) -> CsRole {
        match self {
            LinkRole::Central => CsRole::Initiator,
            LinkRole::Peripheral => CsRole::Reflector,
        }
    }
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Central => f.write_str("central"),
            LinkRole::Peripheral => f.write_str("peripheral"),
        }
    }
}

/// One outgoing negotiation step; also names the completion it produces.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Capabilities,
    DefaultSettings,
    FaeExchange,
    CreateConfig,
    SecurityEnable,
    ProcedureParams,
    ProcedureEnable,
    RemoveConfig,
}

impl Step {
    /// Total number of distinct steps.
    pub const COUNT: usize = 8;

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Step::Capabilities => "capabilities",
            Step::DefaultSettings => "default-settings",
            Step::FaeExchange => "fae-exchange",
            Step::CreateConfig => "create-config",
            Step::SecurityEnable => "security-enable",
            Step::ProcedureParams => "procedure-params",
            Step::ProcedureEnable => "procedure-enable",
            Step::RemoveConfig => "remove-config",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Remote capability summary captured from the capability exchange.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RemoteCapabilities {
    pub num_configs_supported: u8,
    pub max_consecutive_procedures: u16,
    pub num_antennas: u8,
    pub max_antenna_paths: u8,
    pub roles_supported: u8,
    pub modes_supported: u8,
}

/// Completion queue sized so every step can be pending at once.
pub type CompletionQueue = Deque<Step, { Step::COUNT }>;

/// Negotiation bookkeeping for one connection.
#[derive(Clone, Debug)]
pub struct ProcedureRecord {
    conn: ConnHandle,
    config_id: ConfigId,
    cs_role: CsRole,
    link_role: LinkRole,
    next: Option<Step>,
    completed: CompletionQueue,
    touched_at: Tick,
    enable_requested: bool,
    remove_target: ConfigId,
    ranging_enabled: bool,
    remote_caps: Option<RemoteCapabilities>,
    pub(crate) ranging: RangingSession,
}

impl ProcedureRecord {
    /// Creates an idle record for `conn`.
    #[must_use]
    pub fn new(
        conn: ConnHandle,
        link_role: LinkRole,
        config_id: ConfigId,
        filter: FilterSettings,
        now: Tick,
    ) -> Self {
        Self {
            conn,
            config_id,
            cs_role: link_role.default_cs_role(),
            link_role,
            next: None,
            completed: Deque::new(),
            touched_at: now,
            enable_requested: true,
            remove_target: config_id,
            ranging_enabled: false,
            remote_caps: None,
            ranging: RangingSession::new(filter),
        }
    }

    #[must_use]
    pub const fn conn(&self) -> ConnHandle {
        self.conn
    }

    #[must_use]
    pub const fn config_id(&self) -> ConfigId {
        self.config_id
    }

    pub fn set_config_id(&mut self, id: ConfigId) {
        self.config_id = id;
    }

    #[must_use]
    pub const fn cs_role(&self) -> CsRole {
        self.cs_role
    }

    pub fn set_cs_role(&mut self, role: CsRole) {
        self.cs_role = role;
    }

    #[must_use]
    pub const fn link_role(&self) -> LinkRole {
        self.link_role
    }

    #[must_use]
    pub const fn is_central(&self) -> bool {
        matches!(self.link_role, LinkRole::Central)
    }

    /// Step the next driver-loop pass will issue, if any.
    #[must_use]
    pub const fn next_action(&self) -> Option<Step> {
        self.next
    }

    /// Schedules `step` for the next pass, replacing any pending action.
    pub fn schedule(&mut self, step: Step) {
        self.next = Some(step);
    }

    pub(crate) fn take_next(&mut self) -> Option<Step> {
        self.next.take()
    }

    /// Returns `true` when no command is scheduled and no completion is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.next.is_none() && self.completed.is_empty()
    }

    /// Queues a completion for `step` unless one is already pending.
    ///
    /// Returns `false` when the completion was already queued.
    pub fn mark_completed(&mut self, step: Step) -> bool {
        if self.completed.iter().any(|pending| *pending == step) {
            return false;
        }
        // Capacity equals the number of distinct steps, so this cannot fail.
        self.completed.push_back(step).is_ok()
    }

    pub(crate) fn pop_completed(&mut self) -> Option<Step> {
        self.completed.pop_front()
    }

    /// Pending completions in arrival order.
    pub fn pending_completions(&self) -> impl Iterator<Item = &Step> {
        self.completed.iter()
    }

    #[must_use]
    pub const fn touched_at(&self) -> Tick {
        self.touched_at
    }

    pub(crate) fn touch(&mut self, now: Tick) {
        self.touched_at = now;
    }

    /// Enable state the next Procedure-Enable command requests.
    #[must_use]
    pub const fn enable_requested(&self) -> bool {
        self.enable_requested
    }

    pub fn request_enable(&mut self, enable: bool) {
        self.enable_requested = enable;
    }

    /// Configuration the next Remove-Configuration command removes.
    #[must_use]
    pub const fn remove_target(&self) -> ConfigId {
        self.remove_target
    }

    pub fn request_remove(&mut self, id: ConfigId) {
        self.remove_target = id;
    }

    #[must_use]
    pub const fn ranging_enabled(&self) -> bool {
        self.ranging_enabled
    }

    pub(crate) fn set_ranging_enabled(&mut self, enabled: bool) {
        self.ranging_enabled = enabled;
        if enabled {
            self.ranging.reset();
        }
    }

    #[must_use]
    pub const fn remote_capabilities(&self) -> Option<&RemoteCapabilities> {
        self.remote_caps.as_ref()
    }

    pub(crate) fn set_remote_capabilities(&mut self, caps: RemoteCapabilities) {
        self.remote_caps = Some(caps);
    }

    #[must_use]
    pub const fn ranging(&self) -> &RangingSession {
        &self.ranging
    }
}

/// Slot state within the [`ProcedurePool`].
#[derive(Clone, Debug, Default)]
pub enum Slot {
    #[default]
    Free,
    Active(ProcedureRecord),
}

impl Slot {
    #[must_use]
    pub const fn is_free(&self) -> bool {
        matches!(self, Slot::Free)
    }

    #[must_use]
    pub const fn record(&self) -> Option<&ProcedureRecord> {
        match self {
            Slot::Active(record) => Some(record),
            Slot::Free => None,
        }
    }

    pub fn record_mut(&mut self) -> Option<&mut ProcedureRecord> {
        match self {
            Slot::Active(record) => Some(record),
            Slot::Free => None,
        }
    }
}

/// Errors surfaced while allocating a record.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PoolError {
    /// The connection already owns a record.
    AlreadyAllocated(ConnHandle),
    /// Every slot is in use.
    PoolFull,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::AlreadyAllocated(conn) => {
                write!(f, "connection {conn} already has a procedure record")
            }
            PoolError::PoolFull => f.write_str("procedure record pool full"),
        }
    }
}

/// Fixed pool of procedure records indexed by slot.
#[derive(Clone, Debug)]
pub struct ProcedurePool<const CAPACITY: usize = MAX_CONNECTIONS> {
    slots: [Slot; CAPACITY],
}

impl<const CAPACITY: usize> ProcedurePool<CAPACITY> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Slot::Free),
        }
    }

    /// Claims the first free slot for `record`.
    ///
    /// Returns the slot index on success.
    pub fn allocate(&mut self, record: ProcedureRecord) -> Result<usize, PoolError> {
        let conn = record.conn();
        if self.find(conn).is_some() {
            return Err(PoolError::AlreadyAllocated(conn));
        }

        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_free())
            .ok_or(PoolError::PoolFull)?;
        *slot = Slot::Active(record);
        Ok(index)
    }

    /// Releases the record owned by `conn`, returning it if one existed.
    pub fn release(&mut self, conn: ConnHandle) -> Option<ProcedureRecord> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.record().is_some_and(|record| record.conn() == conn))?;
        match core::mem::take(slot) {
            Slot::Active(record) => Some(record),
            Slot::Free => None,
        }
    }

    #[must_use]
    pub fn find(&self, conn: ConnHandle) -> Option<&ProcedureRecord> {
        self.records().find(|record| record.conn() == conn)
    }

    pub fn find_mut(&mut self, conn: ConnHandle) -> Option<&mut ProcedureRecord> {
        self.records_mut().find(|record| record.conn() == conn)
    }

    /// Active records in slot order.
    pub fn records(&self) -> impl Iterator<Item = &ProcedureRecord> {
        self.slots.iter().filter_map(Slot::record)
    }

    /// Mutable active records in slot order.
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut ProcedureRecord> {
        self.slots.iter_mut().filter_map(Slot::record_mut)
    }

    #[must_use]
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records().count()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        CAPACITY
    }
}

impl<const CAPACITY: usize> Default for ProcedurePool<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(raw: u16) -> ProcedureRecord {
        let conn = ConnHandle::new(raw).expect("valid handle");
        ProcedureRecord::new(conn, LinkRole::Central, 0, FilterSettings::DEFAULT, 0)
    }

    #[test]
    fn handle_zero_is_a_real_connection() {
        let mut pool = ProcedurePool::<2>::new();
        let index = pool.allocate(record(0)).expect("allocate handle 0");
        assert_eq!(index, 0);
        assert!(pool.find(ConnHandle::new(0).expect("valid handle")).is_some());
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn handle_range_is_enforced() {
        assert!(ConnHandle::new(0x0EFF).is_some());
        assert!(ConnHandle::new(0x0F00).is_none());
        assert_eq!(ConnHandle::from_wire(0x3007).map(ConnHandle::raw), Some(7));
    }

    #[test]
    fn release_frees_slot_for_reuse() {
        let mut pool = ProcedurePool::<1>::new();
        pool.allocate(record(5)).expect("allocate");
        assert_eq!(pool.allocate(record(6)), Err(PoolError::PoolFull));

        let released = pool
            .release(ConnHandle::new(5).expect("valid handle"))
            .expect("record released");
        assert_eq!(released.conn().raw(), 5);
        assert!(pool.slots()[0].is_free());
        assert_eq!(pool.allocate(record(6)), Ok(0));
    }

    #[test]
    fn completions_are_deduplicated_and_fifo() {
        let mut record = record(1);
        assert!(record.mark_completed(Step::FaeExchange));
        assert!(record.mark_completed(Step::Capabilities));
        assert!(!record.mark_completed(Step::FaeExchange));

        assert_eq!(record.pop_completed(), Some(Step::FaeExchange));
        assert_eq!(record.pop_completed(), Some(Step::Capabilities));
        assert_eq!(record.pop_completed(), None);
    }

    #[test]
    fn every_step_fits_in_the_completion_queue() {
        let mut record = record(1);
        let steps = [
            Step::Capabilities,
            Step::DefaultSettings,
            Step::FaeExchange,
            Step::CreateConfig,
            Step::SecurityEnable,
            Step::ProcedureParams,
            Step::ProcedureEnable,
            Step::RemoveConfig,
        ];
        for step in steps {
            assert!(record.mark_completed(step));
        }
        assert_eq!(record.pending_completions().count(), Step::COUNT);
    }
}
