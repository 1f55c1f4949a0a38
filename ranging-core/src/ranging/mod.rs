//! Ranging data assembly and distance reporting.
//!
//! Local step data arrives as Subevent-Result events followed by any number of
//! Subevent-Result-Continue events until the procedure-done status reads
//! complete. The peer's step data for the same procedure counter is submitted
//! by the Ranging Service client. Once both halves are present the pair is
//! handed to a [`DistanceEstimator`] and the results pass through the
//! session's [`FilterBank`].

use core::fmt;

use heapless::Vec;

use crate::config::{ConfigId, MainMode};
use crate::events::{DoneStatus, SubeventResult, SubeventResultContinue, SubeventSteps};
use crate::filter::{FilterBank, FilterSettings, MAX_DISTANCE_CHANNELS};
use crate::procedure::ConnHandle;

/// Bytes of step data retained per procedure half.
pub const PROCEDURE_DATA_CAPACITY: usize = 1024;

/// Raw distance estimates for one procedure.
pub type Estimates = Vec<f32, MAX_DISTANCE_CHANNELS>;

/// Non-zero status returned by the distance estimator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EstimateError(pub i32);

impl fmt::Display for EstimateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "distance estimator failed with code {}", self.0)
    }
}

/// External routine converting paired step data into distances.
pub trait DistanceEstimator {
    /// Returns one to three raw distances in meters.
    fn estimate(
        &mut self,
        conn: ConnHandle,
        local: &ProcedureData,
        remote: &ProcedureData,
        mode: MainMode,
    ) -> Result<Estimates, EstimateError>;
}

/// Errors raised while assembling step data.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssemblyError {
    /// A continuation arrived without a procedure in progress.
    NoProcedure,
    /// Step data exceeded [`PROCEDURE_DATA_CAPACITY`].
    Overflow,
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::NoProcedure => f.write_str("continuation without a procedure"),
            AssemblyError::Overflow => f.write_str("procedure step data overflow"),
        }
    }
}

/// Step data for one half of one procedure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcedureData {
    procedure_counter: u16,
    config_id: ConfigId,
    num_antenna_paths: u8,
    num_steps: u16,
    steps: Vec<u8, PROCEDURE_DATA_CAPACITY>,
    complete: bool,
}

impl ProcedureData {
    #[must_use]
    pub const fn new(procedure_counter: u16, config_id: ConfigId, num_antenna_paths: u8) -> Self {
        Self {
            procedure_counter,
            config_id,
            num_antenna_paths,
            num_steps: 0,
            steps: Vec::new(),
            complete: false,
        }
    }

    /// Builds a complete half from bytes received out of band.
    pub fn from_remote(
        procedure_counter: u16,
        config_id: ConfigId,
        steps: &[u8],
    ) -> Result<Self, AssemblyError> {
        let mut data = Self::new(procedure_counter, config_id, 0);
        data.steps
            .extend_from_slice(steps)
            .map_err(|_| AssemblyError::Overflow)?;
        data.complete = true;
        Ok(data)
    }

    #[must_use]
    pub const fn procedure_counter(&self) -> u16 {
        self.procedure_counter
    }

    #[must_use]
    pub const fn config_id(&self) -> ConfigId {
        self.config_id
    }

    #[must_use]
    pub const fn num_antenna_paths(&self) -> u8 {
        self.num_antenna_paths
    }

    /// Steps reported so far (zero for remote halves).
    #[must_use]
    pub const fn num_steps(&self) -> u16 {
        self.num_steps
    }

    #[must_use]
    pub fn steps(&self) -> &[u8] {
        &self.steps
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    fn append(&mut self, data: &SubeventSteps<'_>) -> Result<(), AssemblyError> {
        self.steps
            .extend_from_slice(data.steps)
            .map_err(|_| AssemblyError::Overflow)?;
        self.num_steps = self.num_steps.saturating_add(u16::from(data.num_steps));
        self.num_antenna_paths = data.num_antenna_paths;
        Ok(())
    }
}

/// Outcome of feeding one event into the session.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AssemblyStatus {
    /// More subevents are expected.
    InProgress,
    /// This half is complete; the other half is still missing.
    Waiting,
    /// Both halves of the same procedure are present.
    Ready,
    /// The procedure was aborted and its data discarded.
    Aborted,
}

/// Distance of one channel within a report.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ChannelDistance {
    pub raw: f32,
    /// `None` until the channel has seen a plausible sample.
    pub filtered: Option<f32>,
}

/// Filtered result of one completed procedure.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceReport {
    pub conn: ConnHandle,
    pub config_id: ConfigId,
    pub procedure_counter: u16,
    pub channels: Vec<ChannelDistance, MAX_DISTANCE_CHANNELS>,
}

impl DistanceReport {
    /// Filtered distances of the channels that produced one.
    pub fn filtered(&self) -> impl Iterator<Item = f32> + '_ {
        self.channels.iter().filter_map(|channel| channel.filtered)
    }
}

/// Per-connection ranging state: assembly buffers and filters.
#[derive(Clone, Debug)]
pub struct RangingSession {
    local: Option<ProcedureData>,
    remote: Option<ProcedureData>,
    filters: FilterBank,
}

impl RangingSession {
    #[must_use]
    pub const fn new(settings: FilterSettings) -> Self {
        Self {
            local: None,
            remote: None,
            filters: FilterBank::new(settings),
        }
    }

    /// Drops any partial data and clears filter history.
    pub fn reset(&mut self) {
        self.local = None;
        self.remote = None;
        self.filters.reset();
    }

    #[must_use]
    pub const fn local(&self) -> Option<&ProcedureData> {
        self.local.as_ref()
    }

    #[must_use]
    pub const fn remote(&self) -> Option<&ProcedureData> {
        self.remote.as_ref()
    }

    #[must_use]
    pub const fn filters(&self) -> &FilterBank {
        &self.filters
    }

    /// Starts (or restarts) the local half for the event's procedure counter.
    pub fn on_subevent_result(
        &mut self,
        event: &SubeventResult<'_>,
    ) -> Result<AssemblyStatus, AssemblyError> {
        let restart = self.local.as_ref().is_none_or(|local| {
            local.is_complete() || local.procedure_counter() != event.procedure_counter
        });
        if restart {
            self.local = Some(ProcedureData::new(
                event.procedure_counter,
                event.config_id,
                event.data.num_antenna_paths,
            ));
        }
        self.append_local(&event.data)
    }

    /// Appends continuation data to the local half in progress.
    pub fn on_subevent_continue(
        &mut self,
        event: &SubeventResultContinue<'_>,
    ) -> Result<AssemblyStatus, AssemblyError> {
        match &self.local {
            Some(local) if !local.is_complete() => self.append_local(&event.data),
            _ => Err(AssemblyError::NoProcedure),
        }
    }

    /// Stores the peer's half of `procedure_counter`.
    pub fn submit_remote(
        &mut self,
        procedure_counter: u16,
        config_id: ConfigId,
        steps: &[u8],
    ) -> Result<AssemblyStatus, AssemblyError> {
        self.remote = Some(ProcedureData::from_remote(
            procedure_counter,
            config_id,
            steps,
        )?);
        if self
            .local
            .as_ref()
            .is_some_and(|local| local.is_complete() && local.procedure_counter() != procedure_counter)
        {
            self.local = None;
        }
        Ok(self.status())
    }

    /// Removes and returns both halves when they belong to the same procedure.
    pub fn take_ready(&mut self) -> Option<(ProcedureData, ProcedureData)> {
        if self.status() != AssemblyStatus::Ready {
            return None;
        }
        Some((self.local.take()?, self.remote.take()?))
    }

    /// Discards a completed local half, used when no peer data will follow.
    pub fn discard_local(&mut self) -> Option<ProcedureData> {
        self.local.take()
    }

    /// Runs raw estimates through the filter bank.
    pub fn filter(
        &mut self,
        conn: ConnHandle,
        config_id: ConfigId,
        procedure_counter: u16,
        estimates: &[f32],
    ) -> DistanceReport {
        let mut channels = Vec::new();
        for (index, raw) in estimates.iter().take(MAX_DISTANCE_CHANNELS).enumerate() {
            let filtered = self.filters.apply(index, *raw);
            let pushed = channels.push(ChannelDistance { raw: *raw, filtered });
            debug_assert!(pushed.is_ok(), "input is capped at MAX_DISTANCE_CHANNELS");
        }
        DistanceReport {
            conn,
            config_id,
            procedure_counter,
            channels,
        }
    }

    fn append_local(&mut self, data: &SubeventSteps<'_>) -> Result<AssemblyStatus, AssemblyError> {
        let local = self.local.as_mut().ok_or(AssemblyError::NoProcedure)?;
        match data.procedure_done {
            DoneStatus::Aborted => {
                self.local = None;
                return Ok(AssemblyStatus::Aborted);
            }
            DoneStatus::Complete => {
                local.append(data)?;
                local.complete = true;
            }
            DoneStatus::Partial | DoneStatus::Reserved(_) => local.append(data)?,
        }

        let counter = local.procedure_counter();
        if local.is_complete()
            && self
                .remote
                .as_ref()
                .is_some_and(|remote| remote.procedure_counter() != counter)
        {
            self.remote = None;
        }
        Ok(self.status())
    }

    fn status(&self) -> AssemblyStatus {
        match (&self.local, &self.remote) {
            (Some(local), Some(remote))
                if local.is_complete() && local.procedure_counter() == remote.procedure_counter() =>
            {
                AssemblyStatus::Ready
            }
            (Some(local), _) if !local.is_complete() => AssemblyStatus::InProgress,
            _ => AssemblyStatus::Waiting,
        }
    }
}

impl Default for RangingSession {
    fn default() -> Self {
        Self::new(FilterSettings::DEFAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnHandle {
        ConnHandle::new(7).expect("valid handle")
    }

    fn steps(done: DoneStatus, bytes: &[u8]) -> SubeventSteps<'_> {
        SubeventSteps {
            procedure_done: done,
            subevent_done: DoneStatus::Complete,
            abort_reason: 0,
            num_antenna_paths: 1,
            num_steps: 1,
            steps: bytes,
        }
    }

    fn result(counter: u16, done: DoneStatus, bytes: &[u8]) -> SubeventResult<'_> {
        SubeventResult {
            conn: conn(),
            config_id: 0,
            start_acl_conn_event: 0,
            procedure_counter: counter,
            frequency_compensation: 0,
            reference_power_level: 0,
            data: steps(done, bytes),
        }
    }

    #[test]
    fn local_and_remote_halves_pair_up() {
        let mut session = RangingSession::default();
        let first = result(4, DoneStatus::Partial, &[0x02, 0x05, 0x01, 0xAA]);
        assert_eq!(session.on_subevent_result(&first), Ok(AssemblyStatus::InProgress));

        let tail = SubeventResultContinue {
            conn: conn(),
            config_id: 0,
            data: steps(DoneStatus::Complete, &[0x02, 0x06, 0x01, 0xBB]),
        };
        assert_eq!(session.on_subevent_continue(&tail), Ok(AssemblyStatus::Waiting));
        assert_eq!(session.submit_remote(4, 0, &[1, 2, 3]), Ok(AssemblyStatus::Ready));

        let (local, remote) = session.take_ready().expect("ready pair");
        assert_eq!(local.steps().len(), 8);
        assert_eq!(local.num_steps(), 2);
        assert_eq!(remote.steps(), &[1, 2, 3]);
        assert!(session.local().is_none());
    }

    #[test]
    fn aborted_procedure_is_discarded() {
        let mut session = RangingSession::default();
        session
            .on_subevent_result(&result(1, DoneStatus::Partial, &[]))
            .expect("start");
        let abort = SubeventResultContinue {
            conn: conn(),
            config_id: 0,
            data: steps(DoneStatus::Aborted, &[]),
        };
        assert_eq!(session.on_subevent_continue(&abort), Ok(AssemblyStatus::Aborted));
        assert!(session.local().is_none());
    }

    #[test]
    fn continuation_without_start_is_rejected() {
        let mut session = RangingSession::default();
        let orphan = SubeventResultContinue {
            conn: conn(),
            config_id: 0,
            data: steps(DoneStatus::Complete, &[]),
        };
        assert_eq!(
            session.on_subevent_continue(&orphan),
            Err(AssemblyError::NoProcedure)
        );
    }

    #[test]
    fn mismatched_counters_keep_newest_half() {
        let mut session = RangingSession::default();
        session.submit_remote(2, 0, &[9]).expect("remote");
        let status = session
            .on_subevent_result(&result(3, DoneStatus::Complete, &[]))
            .expect("local");
        assert_eq!(status, AssemblyStatus::Waiting);
        assert!(session.remote().is_none());
        assert_eq!(session.submit_remote(3, 0, &[9]), Ok(AssemblyStatus::Ready));
    }

    #[test]
    fn oversized_remote_data_is_rejected() {
        let mut session = RangingSession::default();
        let bytes = [0u8; PROCEDURE_DATA_CAPACITY + 1];
        assert_eq!(session.submit_remote(0, 0, &bytes), Err(AssemblyError::Overflow));
    }

    #[test]
    fn filter_reports_each_channel() {
        let mut session = RangingSession::default();
        let report = session.filter(conn(), 0, 5, &[2.0, 500.0]);
        assert_eq!(report.channels.len(), 2);
        assert!(report.channels[0].filtered.is_some());
        assert_eq!(report.channels[1].filtered, None);
        assert_eq!(report.filtered().count(), 1);
    }
}
