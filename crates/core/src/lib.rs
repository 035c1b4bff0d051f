pub mod budget;
pub mod config;
pub mod domain;
pub mod errors;
pub mod history;
pub mod lifecycle;
pub mod memory;
pub mod ports;
pub mod quotes;

pub use budget::{BudgetCommit, BudgetGuard, FiscalCalendar};
pub use domain::actor::{Actor, DepartmentId, Role, UserId};
pub use domain::budget::Budget;
pub use domain::history::{ApprovalHistoryEntry, HistoryEntryId, HistoryStatus};
pub use domain::notification::{Notification, OutgoingNotification};
pub use domain::price_quote::{PriceQuote, PriceQuoteId, QuoteDraft};
pub use domain::request::{
    ProjectDetail, Request, RequestDraft, RequestId, RequestItem, RequestState, RequestType,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use history::HistoryRecorder;
pub use lifecycle::{
    Effect, LifecycleEngine, Operation, OperationKind, QuoteChange, QuoteDocument, Recipient,
    RequestService, RequestSnapshot, TransitionOutcome,
};
pub use ports::{
    AttachmentStore, BudgetLedger, Directory, LifecycleStore, Notifier, RequestFilter,
    TransitionFn,
};
pub use quotes::{QuoteRegistry, QuoteStatistics};
