use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::budget::BudgetCommit;
use crate::domain::actor::{Role, UserId};
use crate::domain::budget::Budget;
use crate::domain::history::ApprovalHistoryEntry;
use crate::domain::price_quote::{PriceQuote, PriceQuoteId, QuoteDraft};
use crate::domain::request::{Request, RequestDraft};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Submit,
    ApproveByDirectManager,
    ProcessByAccountant,
    AddQuote,
    UpdateQuote,
    DeleteQuote,
    SelectQuote,
    SecondApprovalByDirectManager,
    ApproveByAccountant,
    ApproveByFinalManager,
    TransferFunds,
    Reject,
    ReturnForRevision,
    Resubmit,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Submit => "submit",
            Self::ApproveByDirectManager => "approve_by_direct_manager",
            Self::ProcessByAccountant => "process_by_accountant",
            Self::AddQuote => "add_quote",
            Self::UpdateQuote => "update_quote",
            Self::DeleteQuote => "delete_quote",
            Self::SelectQuote => "select_quote",
            Self::SecondApprovalByDirectManager => "second_approval_by_direct_manager",
            Self::ApproveByAccountant => "approve_by_accountant",
            Self::ApproveByFinalManager => "approve_by_final_manager",
            Self::TransferFunds => "transfer_funds",
            Self::Reject => "reject",
            Self::ReturnForRevision => "return_for_revision",
            Self::Resubmit => "resubmit",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation against an existing request, with its payload.
///
/// `comments` override the default history comment for the transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Update { draft: RequestDraft },
    Submit { comments: Option<String> },
    ApproveByDirectManager { comments: Option<String> },
    ProcessByAccountant { comments: Option<String> },
    AddQuote { quote_id: PriceQuoteId, draft: QuoteDraft, document_path: Option<String> },
    /// A `document_path` replaces the stored document; `None` keeps the current one.
    UpdateQuote { quote_id: PriceQuoteId, draft: QuoteDraft, document_path: Option<String> },
    DeleteQuote { quote_id: PriceQuoteId },
    SelectQuote { quote_id: PriceQuoteId, comments: Option<String> },
    SecondApprovalByDirectManager { comments: Option<String> },
    ApproveByAccountant { comments: Option<String> },
    ApproveByFinalManager { comments: Option<String> },
    TransferFunds { transaction_reference: Option<String>, comments: Option<String> },
    Reject { comments: String },
    ReturnForRevision { comments: String },
    Resubmit { draft: Option<RequestDraft>, comments: Option<String> },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Update { .. } => OperationKind::Update,
            Self::Submit { .. } => OperationKind::Submit,
            Self::ApproveByDirectManager { .. } => OperationKind::ApproveByDirectManager,
            Self::ProcessByAccountant { .. } => OperationKind::ProcessByAccountant,
            Self::AddQuote { .. } => OperationKind::AddQuote,
            Self::UpdateQuote { .. } => OperationKind::UpdateQuote,
            Self::DeleteQuote { .. } => OperationKind::DeleteQuote,
            Self::SelectQuote { .. } => OperationKind::SelectQuote,
            Self::SecondApprovalByDirectManager { .. } => {
                OperationKind::SecondApprovalByDirectManager
            }
            Self::ApproveByAccountant { .. } => OperationKind::ApproveByAccountant,
            Self::ApproveByFinalManager { .. } => OperationKind::ApproveByFinalManager,
            Self::TransferFunds { .. } => OperationKind::TransferFunds,
            Self::Reject { .. } => OperationKind::Reject,
            Self::ReturnForRevision { .. } => OperationKind::ReturnForRevision,
            Self::Resubmit { .. } => OperationKind::Resubmit,
        }
    }

    pub fn quote_id(&self) -> Option<&PriceQuoteId> {
        match self {
            Self::UpdateQuote { quote_id, .. }
            | Self::DeleteQuote { quote_id }
            | Self::SelectQuote { quote_id, .. } => Some(quote_id),
            _ => None,
        }
    }
}

/// Everything a transition may read, loaded inside the transaction that applies it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub request: Request,
    pub quotes: Vec<PriceQuote>,
    /// Envelope for the request's department in `fiscal_year`, if one exists.
    pub budget: Option<Budget>,
    pub fiscal_year: i32,
    pub requester_manager: Option<UserId>,
    pub history_len: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteChange {
    Insert(PriceQuote),
    Update(PriceQuote),
    Delete(PriceQuoteId),
    /// Deselect every sibling and select this quote.
    Select(PriceQuoteId),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    User(UserId),
    DirectManagerOf(UserId),
    RoleHolders(Role),
}

/// Work performed only after the transition has committed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Notify { recipient: Recipient, message: String, link: String },
    DeleteAttachment { path: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub operation: OperationKind,
    pub request: Request,
    pub quote_changes: Vec<QuoteChange>,
    pub budget_commit: Option<BudgetCommit>,
    pub history: ApprovalHistoryEntry,
    pub effects: Vec<Effect>,
    pub applied_at: DateTime<Utc>,
}

impl TransitionOutcome {
    pub fn notifications(&self) -> impl Iterator<Item = (&Recipient, &str)> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Notify { recipient, message, .. } => Some((recipient, message.as_str())),
            Effect::DeleteAttachment { .. } => None,
        })
    }
}
