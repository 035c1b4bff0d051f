//! Boundaries between the lifecycle core and the systems it depends on.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::{DepartmentId, Role, UserId};
use crate::domain::budget::Budget;
use crate::domain::history::ApprovalHistoryEntry;
use crate::domain::notification::{Notification, OutgoingNotification};
use crate::domain::price_quote::{PriceQuote, PriceQuoteId};
use crate::domain::request::{Request, RequestId, RequestState, RequestType};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::{RequestSnapshot, TransitionOutcome};

/// Transition applied by a store to the snapshot it loaded under its lock.
pub type TransitionFn<'a> =
    dyn Fn(&RequestSnapshot) -> Result<TransitionOutcome, DomainError> + Send + Sync + 'a;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub requester_id: Option<UserId>,
    pub department_id: Option<DepartmentId>,
    pub state: Option<RequestState>,
    pub request_type: Option<RequestType>,
}

impl RequestFilter {
    pub fn matches(&self, request: &Request) -> bool {
        self.requester_id.as_ref().map_or(true, |id| id == &request.requester_id)
            && self.department_id.as_ref().map_or(true, |id| id == &request.department_id)
            && self.state.map_or(true, |state| state == request.state)
            && self.request_type.map_or(true, |kind| kind == request.request_type)
    }
}

/// Transactional storage for requests and everything a transition writes.
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    /// Persists a freshly created request with its CREATED history row.
    async fn insert_new(&self, outcome: &TransitionOutcome) -> Result<(), ApplicationError>;

    /// Loads the request snapshot under an exclusive lock, runs `apply` and
    /// persists its outcome atomically. Nothing is written when `apply` fails.
    async fn execute(
        &self,
        request_id: &RequestId,
        fiscal_year: i32,
        apply: &TransitionFn<'_>,
    ) -> Result<TransitionOutcome, ApplicationError>;

    async fn load(&self, request_id: &RequestId) -> Result<Option<Request>, ApplicationError>;

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, ApplicationError>;

    async fn history(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApplicationError>;

    async fn quotes(&self, request_id: &RequestId) -> Result<Vec<PriceQuote>, ApplicationError>;

    async fn find_quote(
        &self,
        quote_id: &PriceQuoteId,
    ) -> Result<Option<PriceQuote>, ApplicationError>;
}

/// Administrative access to department budgets. Spend is only committed by
/// the fund transfer transition.
#[async_trait]
pub trait BudgetLedger: Send + Sync {
    async fn find(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
    ) -> Result<Option<Budget>, ApplicationError>;

    /// Creates or resizes an envelope.
    async fn allocate(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        total_amount: Decimal,
    ) -> Result<Budget, ApplicationError>;

    async fn check_available(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        amount: Decimal,
    ) -> Result<bool, ApplicationError>;

    async fn list(&self, fiscal_year: Option<i32>) -> Result<Vec<Budget>, ApplicationError>;
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn direct_manager_of(&self, user_id: &UserId)
        -> Result<Option<UserId>, ApplicationError>;

    async fn users_with_role(&self, role: Role) -> Result<Vec<UserId>, ApplicationError>;
}

/// Best-effort notification delivery with a per-user inbox.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &OutgoingNotification) -> Result<(), ApplicationError>;

    async fn inbox(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, ApplicationError>;

    async fn mark_read(&self, user_id: &UserId, notification_id: i64)
        -> Result<bool, ApplicationError>;

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, ApplicationError>;

    async fn unread_count(&self, user_id: &UserId) -> Result<u64, ApplicationError>;
}

/// Opaque blob storage for quote documents.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn store(&self, file_name: &str, bytes: &[u8]) -> Result<String, ApplicationError>;

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, ApplicationError>;

    async fn delete(&self, path: &str) -> Result<(), ApplicationError>;
}
