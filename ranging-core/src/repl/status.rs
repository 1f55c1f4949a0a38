//! Per-connection status surfaced by the `status` command.
//!
//! [`ConnectionStatus`] is a copy of the fields an operator needs from a
//! [`ProcedureRecord`]; [`fmt::Display`] renders one console line so the
//! firmware and emulator print identical output.

use core::fmt;

use heapless::Vec;

use crate::config::ConfigId;
use crate::procedure::{ConnHandle, CsRole, LinkRole, MAX_CONNECTIONS, ProcedureRecord, Step};

/// Snapshot of one connection's negotiation state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConnectionStatus {
    pub conn: ConnHandle,
    pub link_role: LinkRole,
    pub cs_role: CsRole,
    pub config_id: ConfigId,
    pub next: Option<Step>,
    pub pending: usize,
    pub ranging_enabled: bool,
    pub last_distance: Option<f32>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn from_record(record: &ProcedureRecord) -> Self {
        let last_distance = record
            .ranging()
            .filters()
            .channel(0)
            .and_then(|filter| filter.last_output());
        Self {
            conn: record.conn(),
            link_role: record.link_role(),
            cs_role: record.cs_role(),
            config_id: record.config_id(),
            next: record.next_action(),
            pending: record.pending_completions().count(),
            ranging_enabled: record.ranging_enabled(),
            last_distance,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conn {} {}/{} config={} next=",
            self.conn, self.link_role, self.cs_role, self.config_id
        )?;
        match self.next {
            Some(step) => write!(f, "{step}")?,
            None => f.write_str("idle")?,
        }
        write!(f, " pending={}", self.pending)?;
        f.write_str(if self.ranging_enabled {
            " ranging=on"
        } else {
            " ranging=off"
        })?;
        if let Some(meters) = self.last_distance {
            write!(f, " distance={meters:.2}m")?;
        }
        Ok(())
    }
}

/// Status lines for every connection, in slot order.
pub type StatusReport = Vec<ConnectionStatus, MAX_CONNECTIONS>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSettings;

    #[test]
    fn renders_idle_record() {
        let conn = ConnHandle::new(7).expect("valid handle");
        let record = ProcedureRecord::new(conn, LinkRole::Central, 0, FilterSettings::DEFAULT, 0);
        let status = ConnectionStatus::from_record(&record);

        let mut line = heapless::String::<96>::new();
        core::fmt::write(&mut line, format_args!("{status}")).expect("fits");
        assert_eq!(
            line.as_str(),
            "conn 7 central/initiator config=0 next=idle pending=0 ranging=off"
        );
    }

    #[test]
    fn renders_scheduled_step() {
        let conn = ConnHandle::new(9).expect("valid handle");
        let mut record =
            ProcedureRecord::new(conn, LinkRole::Peripheral, 1, FilterSettings::DEFAULT, 0);
        record.schedule(Step::Capabilities);
        record.mark_completed(Step::FaeExchange);
        let status = ConnectionStatus::from_record(&record);

        assert_eq!(status.next, Some(Step::Capabilities));
        assert_eq!(status.pending, 1);
        assert_eq!(status.cs_role, CsRole::Reflector);
        assert!(status.last_distance.is_none());
    }
}
