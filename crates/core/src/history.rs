//! Approval history recording and derived views over the audit trail.

use chrono::{DateTime, Utc};

use crate::domain::actor::UserId;
use crate::domain::history::{ApprovalHistoryEntry, HistoryEntryId, HistoryStatus};
use crate::domain::request::{RequestId, RequestState};
use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryRecorder;

impl HistoryRecorder {
    /// Builds the next row of a request's trail. Ids are derived from the
    /// request id and sequence, which the store keeps unique.
    #[allow(clippy::too_many_arguments)]
    pub fn entry(
        request_id: &RequestId,
        sequence: u32,
        approver_id: &UserId,
        status: HistoryStatus,
        from_state: Option<RequestState>,
        to_state: RequestState,
        comments: Option<String>,
        recorded_at: DateTime<Utc>,
    ) -> ApprovalHistoryEntry {
        ApprovalHistoryEntry {
            id: HistoryEntryId(format!("{}-H{sequence:04}", request_id.0)),
            request_id: request_id.clone(),
            sequence,
            approver_id: approver_id.clone(),
            status,
            from_state,
            to_state,
            comments,
            recorded_at,
        }
    }

    /// Reconstructs the state path from a trail, checking that each row starts
    /// where the previous one ended.
    pub fn replay(entries: &[ApprovalHistoryEntry]) -> Result<Vec<RequestState>, DomainError> {
        let mut ordered: Vec<&ApprovalHistoryEntry> = entries.iter().collect();
        ordered.sort_by_key(|entry| entry.sequence);

        let mut path: Vec<RequestState> = Vec::new();
        for entry in ordered {
            let previous = path.last().copied();
            if entry.from_state != previous {
                return Err(DomainError::InvariantViolation(format!(
                    "history row {} starts at {:?} but the trail is at {:?}",
                    entry.sequence, entry.from_state, previous
                )));
            }
            if previous != Some(entry.to_state) {
                path.push(entry.to_state);
            }
        }
        Ok(path)
    }

    pub fn current_state(entries: &[ApprovalHistoryEntry]) -> Option<RequestState> {
        entries.iter().max_by_key(|entry| entry.sequence).map(|entry| entry.to_state)
    }

    /// When the request entered its current state.
    pub fn pending_since(entries: &[ApprovalHistoryEntry]) -> Option<DateTime<Utc>> {
        entries
            .iter()
            .filter(|entry| entry.from_state != Some(entry.to_state))
            .max_by_key(|entry| entry.sequence)
            .map(|entry| entry.recorded_at)
    }

    pub fn decided_at(entries: &[ApprovalHistoryEntry]) -> Option<DateTime<Utc>> {
        entries
            .iter()
            .filter(|entry| entry.to_state.is_terminal())
            .max_by_key(|entry| entry.sequence)
            .map(|entry| entry.recorded_at)
    }
}
