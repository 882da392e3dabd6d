// ── Unsolicited indications ──
//
// Everything the modem pushes without being asked. Delivered through a
// `tokio::sync::broadcast` channel per logical modem.

use serde::{Deserialize, Serialize};

use crate::types::{RadioState, SimPhonebookRecord, SlotStatus};

/// What a SIM REFRESH proactive command asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// One file changed; reread it.
    FileUpdate,
    /// Application re-initialised; reload everything.
    Init,
    /// Card reset.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub kind: RefreshKind,
    pub ef_id: Option<u16>,
    /// Target application; `None` addresses every application.
    pub aid: Option<String>,
}

impl RefreshResult {
    pub fn file_update(ef_id: u16, aid: Option<String>) -> Self {
        Self {
            kind: RefreshKind::FileUpdate,
            ef_id: Some(ef_id),
            aid,
        }
    }

    /// `true` when the refresh addresses the application with `aid`.
    pub fn targets(&self, aid: Option<&str>) -> bool {
        match (self.aid.as_deref(), aid) {
            (None | Some(""), _) => true,
            (Some(target), Some(own)) => target.eq_ignore_ascii_case(own),
            (Some(_), None) => false,
        }
    }
}

/// Progress marker on streamed phonebook records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhonebookReceivedStatus {
    /// A partial batch; more follow.
    Ok,
    /// Last batch.
    Complete,
    Error,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RilIndication {
    RadioStateChanged(RadioState),
    IccStatusChanged,
    IccSlotStatusChanged(Vec<SlotStatus>),
    SimRefresh(RefreshResult),
    SimPhonebookChanged,
    SimPhonebookRecords {
        status: PhonebookReceivedStatus,
        records: Vec<SimPhonebookRecord>,
    },
    /// A short message was stored on the card at `record` (1-based, EF_SMS).
    NewSmsOnSim { record: u8 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_targeting() {
        let any = RefreshResult::file_update(0x6F46, None);
        assert!(any.targets(Some("A000000087")));
        assert!(any.targets(None));

        let one = RefreshResult::file_update(0x6F46, Some("a000000087".into()));
        assert!(one.targets(Some("A000000087")));
        assert!(!one.targets(Some("A000000343")));
        assert!(!one.targets(None));
    }
}
