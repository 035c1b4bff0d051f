use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::budget::FiscalCalendar;
use crate::domain::actor::{Actor, UserId};
use crate::domain::history::ApprovalHistoryEntry;
use crate::domain::notification::{Notification, OutgoingNotification};
use crate::domain::price_quote::{PriceQuote, PriceQuoteId, QuoteDraft};
use crate::domain::request::{Request, RequestDraft, RequestId};
use crate::errors::{ApplicationError, DomainError};
use crate::lifecycle::engine::LifecycleEngine;
use crate::lifecycle::states::{
    Effect, Operation, QuoteChange, Recipient, RequestSnapshot, TransitionOutcome,
};
use crate::ports::{AttachmentStore, Directory, LifecycleStore, Notifier, RequestFilter};
use crate::quotes::{QuoteRegistry, QuoteStatistics};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

/// A quote document uploaded alongside a quote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Runs lifecycle operations against a store and performs their effects
/// once the transaction has committed.
#[derive(Clone)]
pub struct RequestService {
    engine: LifecycleEngine,
    calendar: FiscalCalendar,
    store: Arc<dyn LifecycleStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    attachments: Arc<dyn AttachmentStore>,
    max_attachment_bytes: u64,
    clock: Clock,
}

impl RequestService {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        Self {
            engine: LifecycleEngine::default(),
            calendar: FiscalCalendar::default(),
            store,
            directory,
            notifier,
            attachments,
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_engine(mut self, engine: LifecycleEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_calendar(mut self, calendar: FiscalCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_max_attachment_bytes(mut self, max_attachment_bytes: u64) -> Self {
        self.max_attachment_bytes = max_attachment_bytes;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_bytes
    }

    pub fn calendar(&self) -> FiscalCalendar {
        self.calendar
    }

    pub async fn create(
        &self,
        actor: &Actor,
        draft: RequestDraft,
    ) -> Result<Request, ApplicationError> {
        let now = (self.clock)();
        let id = RequestId(format!("REQ-{}", uuid::Uuid::new_v4().simple()));
        let outcome = match self.engine.create(id, actor, draft, now) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "lifecycle.transition.rejected",
                    operation = "create",
                    actor_id = %actor.id,
                    error = %error,
                    "request creation rejected"
                );
                return Err(error.into());
            }
        };

        self.store.insert_new(&outcome).await?;
        info!(
            event_name = "lifecycle.transition.applied",
            operation = "create",
            request_id = %outcome.request.id,
            actor_id = %actor.id,
            "request created"
        );
        Ok(outcome.request)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        draft: RequestDraft,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::Update { draft }).await
    }

    pub async fn submit(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::Submit { comments }).await
    }

    pub async fn approve_by_direct_manager(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::ApproveByDirectManager { comments }).await
    }

    pub async fn process_by_accountant(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::ProcessByAccountant { comments }).await
    }

    pub async fn add_quote(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        draft: QuoteDraft,
        document: Option<QuoteDocument>,
    ) -> Result<PriceQuote, ApplicationError> {
        draft.validate()?;
        let quote_id = PriceQuoteId(format!("PQ-{}", uuid::Uuid::new_v4().simple()));
        let document_path = self.store_document(document).await?;
        let operation = Operation::AddQuote {
            quote_id: quote_id.clone(),
            draft,
            document_path: document_path.clone(),
        };

        let outcome = self.run_with_document(actor, request_id, operation, document_path).await?;
        changed_quote(&outcome, &quote_id)
    }

    pub async fn update_quote(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
        draft: QuoteDraft,
        document: Option<QuoteDocument>,
    ) -> Result<PriceQuote, ApplicationError> {
        draft.validate()?;
        self.ensure_quote_owned(request_id, quote_id).await?;
        let document_path = self.store_document(document).await?;
        let operation = Operation::UpdateQuote {
            quote_id: quote_id.clone(),
            draft,
            document_path: document_path.clone(),
        };

        let outcome = self.run_with_document(actor, request_id, operation, document_path).await?;
        changed_quote(&outcome, quote_id)
    }

    pub async fn delete_quote(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
    ) -> Result<(), ApplicationError> {
        self.ensure_quote_owned(request_id, quote_id).await?;
        self.run(actor, request_id, Operation::DeleteQuote { quote_id: quote_id.clone() })
            .await
            .map(|_| ())
    }

    pub async fn select_quote(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.ensure_quote_owned(request_id, quote_id).await?;
        self.request_after(
            actor,
            request_id,
            Operation::SelectQuote { quote_id: quote_id.clone(), comments },
        )
        .await
    }

    pub async fn second_approval_by_direct_manager(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::SecondApprovalByDirectManager { comments })
            .await
    }

    pub async fn approve_by_accountant(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::ApproveByAccountant { comments }).await
    }

    pub async fn approve_by_final_manager(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::ApproveByFinalManager { comments }).await
    }

    pub async fn transfer_funds(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        transaction_reference: Option<String>,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(
            actor,
            request_id,
            Operation::TransferFunds { transaction_reference, comments },
        )
        .await
    }

    pub async fn reject(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: String,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::Reject { comments }).await
    }

    pub async fn return_for_revision(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        comments: String,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::ReturnForRevision { comments }).await
    }

    pub async fn resubmit(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        draft: Option<RequestDraft>,
        comments: Option<String>,
    ) -> Result<Request, ApplicationError> {
        self.request_after(actor, request_id, Operation::Resubmit { draft, comments }).await
    }

    pub async fn get(&self, request_id: &RequestId) -> Result<Request, ApplicationError> {
        self.store
            .load(request_id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("request {request_id}")))
    }

    pub async fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, ApplicationError> {
        self.store.list(filter).await
    }

    pub async fn history(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApplicationError> {
        self.get(request_id).await?;
        self.store.history(request_id).await
    }

    /// Quotes for a request, cheapest first.
    pub async fn quotes(&self, request_id: &RequestId) -> Result<Vec<PriceQuote>, ApplicationError> {
        self.get(request_id).await?;
        Ok(QuoteRegistry::sorted_by_amount(self.store.quotes(request_id).await?))
    }

    pub async fn quote_statistics(
        &self,
        request_id: &RequestId,
    ) -> Result<QuoteStatistics, ApplicationError> {
        let quotes = self.quotes(request_id).await?;
        Ok(QuoteRegistry::statistics(&quotes)?)
    }

    pub async fn quote_document(
        &self,
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
    ) -> Result<Vec<u8>, ApplicationError> {
        let quote = self.ensure_quote_owned(request_id, quote_id).await?;
        let path = quote.document_path.ok_or_else(|| {
            ApplicationError::NotFound(format!("document for quote {quote_id}"))
        })?;
        self.attachments.fetch(&path).await
    }

    pub async fn notifications(
        &self,
        user_id: &UserId,
        unread_only: bool,
    ) -> Result<Vec<Notification>, ApplicationError> {
        self.notifier.inbox(user_id, unread_only).await
    }

    /// Returns false when the notification does not belong to `user_id`.
    pub async fn mark_notification_read(
        &self,
        user_id: &UserId,
        notification_id: i64,
    ) -> Result<bool, ApplicationError> {
        self.notifier.mark_read(user_id, notification_id).await
    }

    pub async fn mark_all_notifications_read(
        &self,
        user_id: &UserId,
    ) -> Result<u64, ApplicationError> {
        self.notifier.mark_all_read(user_id).await
    }

    pub async fn unread_notification_count(
        &self,
        user_id: &UserId,
    ) -> Result<u64, ApplicationError> {
        self.notifier.unread_count(user_id).await
    }

    async fn request_after(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        operation: Operation,
    ) -> Result<Request, ApplicationError> {
        self.run(actor, request_id, operation).await.map(|outcome| outcome.request)
    }

    async fn run_with_document(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        operation: Operation,
        document_path: Option<String>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let result = self.run(actor, request_id, operation).await;
        if let (Err(_), Some(path)) = (&result, document_path) {
            self.discard_document(request_id, &path).await;
        }
        result
    }

    /// Applies one operation in a single store transaction, then dispatches its effects.
    pub async fn run(
        &self,
        actor: &Actor,
        request_id: &RequestId,
        operation: Operation,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let now = (self.clock)();
        let fiscal_year = self.calendar.current(now);
        let kind = operation.kind();
        let engine = &self.engine;
        let apply = |snapshot: &RequestSnapshot| engine.execute(snapshot, actor, &operation, now);

        match self.store.execute(request_id, fiscal_year, &apply).await {
            Ok(outcome) => {
                info!(
                    event_name = "lifecycle.transition.applied",
                    operation = %kind,
                    request_id = %request_id,
                    actor_id = %actor.id,
                    from_state = ?outcome.history.from_state,
                    to_state = %outcome.request.state,
                    sequence = outcome.history.sequence,
                    "lifecycle transition applied"
                );
                self.dispatch(request_id, &outcome.effects).await;
                Ok(outcome)
            }
            Err(error) => {
                warn!(
                    event_name = "lifecycle.transition.rejected",
                    operation = %kind,
                    request_id = %request_id,
                    actor_id = %actor.id,
                    error = %error,
                    "lifecycle transition rejected"
                );
                Err(error)
            }
        }
    }

    async fn dispatch(&self, request_id: &RequestId, effects: &[Effect]) {
        for effect in effects {
            match effect {
                Effect::Notify { recipient, message, link } => {
                    let recipients = match self.resolve(recipient).await {
                        Ok(recipients) => recipients,
                        Err(error) => {
                            warn!(
                                event_name = "notification.resolve_failed",
                                request_id = %request_id,
                                error = %error,
                                "could not resolve notification recipients"
                            );
                            continue;
                        }
                    };
                    for user_id in recipients {
                        let notification = OutgoingNotification {
                            user_id,
                            message: message.clone(),
                            link: link.clone(),
                        };
                        if let Err(error) = self.notifier.notify(&notification).await {
                            warn!(
                                event_name = "notification.dispatch_failed",
                                request_id = %request_id,
                                user_id = %notification.user_id,
                                error = %error,
                                "notification dispatch failed"
                            );
                        }
                    }
                }
                Effect::DeleteAttachment { path } => self.discard_document(request_id, path).await,
            }
        }
    }

    async fn resolve(&self, recipient: &Recipient) -> Result<Vec<UserId>, ApplicationError> {
        match recipient {
            Recipient::User(user_id) => Ok(vec![user_id.clone()]),
            Recipient::DirectManagerOf(user_id) => {
                Ok(self.directory.direct_manager_of(user_id).await?.into_iter().collect())
            }
            Recipient::RoleHolders(role) => self.directory.users_with_role(*role).await,
        }
    }

    async fn store_document(
        &self,
        document: Option<QuoteDocument>,
    ) -> Result<Option<String>, ApplicationError> {
        let Some(document) = document else {
            return Ok(None);
        };
        if document.bytes.len() as u64 > self.max_attachment_bytes {
            return Err(DomainError::Validation(format!(
                "quote document exceeds {} bytes",
                self.max_attachment_bytes
            ))
            .into());
        }
        let file_name = sanitize_file_name(&document.file_name);
        self.attachments.store(&file_name, &document.bytes).await.map(Some)
    }

    async fn discard_document(&self, request_id: &RequestId, path: &str) {
        if let Err(error) = self.attachments.delete(path).await {
            warn!(
                event_name = "attachment.cleanup_failed",
                request_id = %request_id,
                path,
                error = %error,
                "could not delete quote document"
            );
        }
    }

    async fn ensure_quote_owned(
        &self,
        request_id: &RequestId,
        quote_id: &PriceQuoteId,
    ) -> Result<PriceQuote, ApplicationError> {
        let quote = self
            .store
            .find_quote(quote_id)
            .await?
            .ok_or_else(|| DomainError::QuoteNotFound(quote_id.clone()))?;
        if &quote.request_id != request_id {
            return Err(DomainError::QuoteNotOwned {
                quote_id: quote_id.clone(),
                request_id: request_id.clone(),
            }
            .into());
        }
        Ok(quote)
    }
}

fn changed_quote(
    outcome: &TransitionOutcome,
    quote_id: &PriceQuoteId,
) -> Result<PriceQuote, ApplicationError> {
    outcome
        .quote_changes
        .iter()
        .find_map(|change| match change {
            QuoteChange::Insert(quote) | QuoteChange::Update(quote) if &quote.id == quote_id => {
                Some(quote.clone())
            }
            _ => None,
        })
        .ok_or_else(|| {
            DomainError::InvariantViolation(format!("quote {quote_id} missing from outcome")).into()
        })
}

fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = file_name
        .rsplit(|ch| ch == '/' || ch == '\\')
        .next()
        .unwrap_or_default()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') { ch } else { '_' })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
