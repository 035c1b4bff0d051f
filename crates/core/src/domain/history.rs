use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::UserId;
use crate::domain::request::{RequestId, RequestState};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntryId(pub String);

/// Transition name recorded on each approval history row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Created,
    Updated,
    Submitted,
    DmApproved,
    QuotesRequested,
    QuoteAdded,
    QuoteUpdated,
    QuoteDeleted,
    QuoteSelected,
    DmSecondApproved,
    AcctApproved,
    FinalApproved,
    FundsTransferred,
    Rejected,
    Returned,
    Resubmitted,
}

impl HistoryStatus {
    pub const ALL: [HistoryStatus; 16] = [
        HistoryStatus::Created,
        HistoryStatus::Updated,
        HistoryStatus::Submitted,
        HistoryStatus::DmApproved,
        HistoryStatus::QuotesRequested,
        HistoryStatus::QuoteAdded,
        HistoryStatus::QuoteUpdated,
        HistoryStatus::QuoteDeleted,
        HistoryStatus::QuoteSelected,
        HistoryStatus::DmSecondApproved,
        HistoryStatus::AcctApproved,
        HistoryStatus::FinalApproved,
        HistoryStatus::FundsTransferred,
        HistoryStatus::Rejected,
        HistoryStatus::Returned,
        HistoryStatus::Resubmitted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Updated => "UPDATED",
            Self::Submitted => "SUBMITTED",
            Self::DmApproved => "DM_APPROVED",
            Self::QuotesRequested => "QUOTES_REQUESTED",
            Self::QuoteAdded => "QUOTE_ADDED",
            Self::QuoteUpdated => "QUOTE_UPDATED",
            Self::QuoteDeleted => "QUOTE_DELETED",
            Self::QuoteSelected => "QUOTE_SELECTED",
            Self::DmSecondApproved => "DM_SECOND_APPROVED",
            Self::AcctApproved => "ACCT_APPROVED",
            Self::FinalApproved => "FINAL_APPROVED",
            Self::FundsTransferred => "FUNDS_TRANSFERRED",
            Self::Rejected => "REJECTED",
            Self::Returned => "RETURNED",
            Self::Resubmitted => "RESUBMITTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

/// Append-only audit row. Never updated or deleted once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalHistoryEntry {
    pub id: HistoryEntryId,
    pub request_id: RequestId,
    pub sequence: u32,
    pub approver_id: UserId,
    pub status: HistoryStatus,
    pub from_state: Option<RequestState>,
    pub to_state: RequestState,
    pub comments: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
