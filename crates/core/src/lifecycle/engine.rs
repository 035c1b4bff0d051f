use chrono::{DateTime, Utc};

use crate::budget::BudgetGuard;
use crate::domain::actor::{Actor, Role};
use crate::domain::history::HistoryStatus;
use crate::domain::price_quote::PriceQuote;
use crate::domain::request::{Request, RequestDraft, RequestId, RequestState};
use crate::errors::DomainError;
use crate::history::HistoryRecorder;
use crate::lifecycle::states::{
    Effect, Operation, OperationKind, QuoteChange, Recipient, RequestSnapshot, TransitionOutcome,
};
use crate::quotes::QuoteRegistry;

pub const DEFAULT_LINK_BASE_PATH: &str = "/requests";

/// Pure request lifecycle state machine.
///
/// Given a snapshot loaded inside a transaction, the engine validates the
/// operation and returns every write and post-commit effect it implies. It
/// performs no I/O and reads no ambient state.
#[derive(Clone, Debug)]
pub struct LifecycleEngine {
    link_base_path: String,
}

impl Default for LifecycleEngine {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_BASE_PATH)
    }
}

/// Who may perform an operation in a given state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Authority {
    Requester,
    RequesterOrAdmin,
    Role(Role),
    /// Direct manager of the requester when one is on record.
    TeamManager,
}

impl LifecycleEngine {
    pub fn new(link_base_path: impl Into<String>) -> Self {
        Self { link_base_path: link_base_path.into() }
    }

    pub fn link_base_path(&self) -> &str {
        &self.link_base_path
    }

    pub fn create(
        &self,
        id: RequestId,
        actor: &Actor,
        draft: RequestDraft,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        if !actor.is_authenticated() {
            return Err(DomainError::Validation(
                "requests can only be created by an authenticated actor".to_string(),
            ));
        }
        draft.validate()?;

        let request = Request::from_draft(id, actor.id.clone(), draft, now);
        let history = HistoryRecorder::entry(
            &request.id,
            1,
            &actor.id,
            HistoryStatus::Created,
            None,
            RequestState::Draft,
            Some("Request created as draft".to_string()),
            now,
        );

        Ok(TransitionOutcome {
            operation: OperationKind::Create,
            request,
            quote_changes: Vec::new(),
            budget_commit: None,
            history,
            effects: Vec::new(),
            applied_at: now,
        })
    }

    pub fn execute(
        &self,
        snapshot: &RequestSnapshot,
        actor: &Actor,
        operation: &Operation,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, DomainError> {
        use RequestState::{
            AcctApproved, AwaitingFinalApproval, DmApproved, Draft, FinalApproved,
            FundsTransferred, QuoteSelected, QuotesRequested, Rejected, Returned, Submitted,
        };

        let kind = operation.kind();
        let current = snapshot.request.state;
        let mut request = snapshot.request.clone();
        let mut quote_changes = Vec::new();
        let mut budget_commit = None;
        let mut effects = Vec::new();
        let link = request.link(&self.link_base_path);
        let requester = Recipient::User(request.requester_id.clone());
        let direct_manager = Recipient::DirectManagerOf(request.requester_id.clone());

        let (status, to, comments) = match operation {
            Operation::Update { draft } => {
                self.expect_state(snapshot, kind, current.is_editable(), "DRAFT or RETURNED")?;
                self.authorize(snapshot, actor, kind, Authority::Requester)?;
                draft.validate()?;
                request.apply_draft(draft.clone());
                (HistoryStatus::Updated, current, "Request updated".to_string())
            }
            Operation::Submit { comments } => {
                self.expect_state(snapshot, kind, current == Draft, "DRAFT")?;
                self.authorize(snapshot, actor, kind, Authority::RequesterOrAdmin)?;
                request.submitted_at = Some(now);
                effects.push(notify(direct_manager, "New request needs your approval", &link));
                (
                    HistoryStatus::Submitted,
                    Submitted,
                    or_default(comments, "Request submitted for approval"),
                )
            }
            Operation::ApproveByDirectManager { comments } => {
                self.expect_state(snapshot, kind, current == Submitted, "SUBMITTED")?;
                self.authorize(snapshot, actor, kind, Authority::TeamManager)?;
                effects.push(notify(
                    Recipient::RoleHolders(Role::Accountant),
                    "New request ready for financial review",
                    &link,
                ));
                effects.push(notify(
                    requester.clone(),
                    "Your request has been approved by your manager",
                    &link,
                ));
                (
                    HistoryStatus::DmApproved,
                    DmApproved,
                    or_default(comments, "Request approved by direct manager"),
                )
            }
            Operation::ProcessByAccountant { comments } => {
                self.expect_state(snapshot, kind, current == DmApproved, "DM_APPROVED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::Accountant))?;
                BudgetGuard::check_available(
                    snapshot.budget.as_ref(),
                    &request.department_id,
                    snapshot.fiscal_year,
                    request.total_cost,
                )?;
                effects.push(notify(
                    requester.clone(),
                    "Price quotes have been requested for your request",
                    &link,
                ));
                (
                    HistoryStatus::QuotesRequested,
                    QuotesRequested,
                    or_default(comments, "Price quotes requested"),
                )
            }
            Operation::AddQuote { quote_id, draft, document_path } => {
                self.expect_state(snapshot, kind, current == QuotesRequested, "QUOTES_REQUESTED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::Accountant))?;
                draft.validate()?;
                if snapshot.quotes.iter().any(|quote| &quote.id == quote_id) {
                    return Err(DomainError::InvariantViolation(format!(
                        "quote {quote_id} already exists"
                    )));
                }
                let quote = PriceQuote::from_draft(
                    quote_id.clone(),
                    request.id.clone(),
                    actor.id.clone(),
                    draft.clone(),
                    document_path.clone(),
                    now,
                );
                let comment = format!(
                    "Quote added from {} - Amount: {}",
                    quote.vendor_name, quote.quote_amount
                );
                quote_changes.push(QuoteChange::Insert(quote));
                effects.push(notify(
                    requester.clone(),
                    "New price quote added to your request",
                    &link,
                ));
                (HistoryStatus::QuoteAdded, current, comment)
            }
            Operation::UpdateQuote { quote_id, draft, document_path } => {
                self.expect_state(snapshot, kind, current == QuotesRequested, "QUOTES_REQUESTED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::Accountant))?;
                draft.validate()?;
                let existing = QuoteRegistry::locate(&snapshot.quotes, &request.id, quote_id)?;
                self.expect_mutable(snapshot, kind, existing)?;

                let mut quote = existing.clone();
                quote.apply_draft(draft.clone(), now);
                if let Some(path) = document_path {
                    if let Some(previous) = quote.document_path.replace(path.clone()) {
                        if &previous != path {
                            effects.push(Effect::DeleteAttachment { path: previous });
                        }
                    }
                }
                let comment = format!("Quote updated for {}", quote.vendor_name);
                quote_changes.push(QuoteChange::Update(quote));
                (HistoryStatus::QuoteUpdated, current, comment)
            }
            Operation::DeleteQuote { quote_id } => {
                self.expect_state(snapshot, kind, current == QuotesRequested, "QUOTES_REQUESTED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::Accountant))?;
                let existing = QuoteRegistry::locate(&snapshot.quotes, &request.id, quote_id)?;
                self.expect_mutable(snapshot, kind, existing)?;

                if let Some(path) = &existing.document_path {
                    effects.push(Effect::DeleteAttachment { path: path.clone() });
                }
                quote_changes.push(QuoteChange::Delete(existing.id.clone()));
                (
                    HistoryStatus::QuoteDeleted,
                    current,
                    format!("Quote deleted for {}", existing.vendor_name),
                )
            }
            Operation::SelectQuote { quote_id, comments } => {
                self.expect_state(snapshot, kind, current == QuotesRequested, "QUOTES_REQUESTED")?;
                self.authorize(snapshot, actor, kind, Authority::RequesterOrAdmin)?;
                let quote = QuoteRegistry::selectable(
                    &snapshot.quotes,
                    &request.id,
                    quote_id,
                    now.date_naive(),
                )?;

                request.total_cost = quote.quote_amount;
                quote_changes.push(QuoteChange::Select(quote.id.clone()));
                effects.push(notify(
                    direct_manager,
                    "Request with selected quote needs your approval",
                    &link,
                ));
                let default = format!(
                    "Quote selected from {} - Amount: {}",
                    quote.vendor_name, quote.quote_amount
                );
                (HistoryStatus::QuoteSelected, QuoteSelected, or_default(comments, &default))
            }
            Operation::SecondApprovalByDirectManager { comments } => {
                self.expect_state(snapshot, kind, current == QuoteSelected, "QUOTE_SELECTED")?;
                self.authorize(snapshot, actor, kind, Authority::TeamManager)?;
                self.expect_selected_quote(snapshot, kind)?;
                effects.push(notify(
                    Recipient::RoleHolders(Role::Accountant),
                    "Request with approved quote ready for accounting review",
                    &link,
                ));
                effects.push(notify(
                    requester.clone(),
                    "Your selected quote has been approved by your manager",
                    &link,
                ));
                (
                    HistoryStatus::DmSecondApproved,
                    AwaitingFinalApproval,
                    or_default(comments, "Selected quote approved by direct manager"),
                )
            }
            Operation::ApproveByAccountant { comments } => {
                self.expect_state(
                    snapshot,
                    kind,
                    current == AwaitingFinalApproval,
                    "AWAITING_FINAL_APPROVAL",
                )?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::Accountant))?;
                self.expect_selected_quote(snapshot, kind)?;
                effects.push(notify(
                    Recipient::RoleHolders(Role::FinalManager),
                    "Request ready for final approval",
                    &link,
                ));
                effects.push(notify(
                    requester.clone(),
                    "Your request has been approved by accounting",
                    &link,
                ));
                (
                    HistoryStatus::AcctApproved,
                    AcctApproved,
                    or_default(comments, "Request approved by accountant"),
                )
            }
            Operation::ApproveByFinalManager { comments } => {
                self.expect_state(snapshot, kind, current == AcctApproved, "ACCT_APPROVED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::FinalManager))?;
                effects.push(notify(
                    requester.clone(),
                    "Your request has been finally approved",
                    &link,
                ));
                (
                    HistoryStatus::FinalApproved,
                    FinalApproved,
                    or_default(comments, "Request approved by final manager"),
                )
            }
            Operation::TransferFunds { transaction_reference, comments } => {
                self.expect_state(snapshot, kind, current == FinalApproved, "FINAL_APPROVED")?;
                self.authorize(snapshot, actor, kind, Authority::Role(Role::FinalManager))?;
                budget_commit = Some(BudgetGuard::commit(
                    snapshot.budget.as_ref(),
                    &request.department_id,
                    snapshot.fiscal_year,
                    request.total_cost,
                    now,
                )?);
                request.transaction_reference = transaction_reference.clone();
                request.completed_at = Some(now);
                effects.push(notify(
                    requester.clone(),
                    "Funds for your request have been transferred",
                    &link,
                ));
                (
                    HistoryStatus::FundsTransferred,
                    FundsTransferred,
                    or_default(comments, "Funds transferred"),
                )
            }
            Operation::Reject { comments } => {
                self.expect_state(
                    snapshot,
                    kind,
                    current.can_be_rejected(),
                    "a state other than REJECTED, RETURNED or FUNDS_TRANSFERRED",
                )?;
                let authority = if current == Draft {
                    Authority::RequesterOrAdmin
                } else {
                    self.stage_owner(snapshot, kind)?
                };
                self.authorize(snapshot, actor, kind, authority)?;
                let reason = required_reason(comments, kind)?;
                request.completed_at = Some(now);
                effects.push(notify(requester.clone(), "Your request has been rejected", &link));
                (HistoryStatus::Rejected, Rejected, reason)
            }
            Operation::ReturnForRevision { comments } => {
                self.expect_state(
                    snapshot,
                    kind,
                    current.can_be_returned(),
                    "a state other than DRAFT, REJECTED, RETURNED or FUNDS_TRANSFERRED",
                )?;
                let authority = self.stage_owner(snapshot, kind)?;
                self.authorize(snapshot, actor, kind, authority)?;
                let reason = required_reason(comments, kind)?;
                effects.push(notify(
                    requester.clone(),
                    "Your request has been returned for revision",
                    &link,
                ));
                (HistoryStatus::Returned, Returned, reason)
            }
            Operation::Resubmit { draft, comments } => {
                self.expect_state(snapshot, kind, current == Returned, "RETURNED")?;
                match draft {
                    Some(draft) => {
                        self.authorize(snapshot, actor, kind, Authority::Requester)?;
                        draft.validate()?;
                        request.apply_draft(draft.clone());
                    }
                    None => self.authorize(snapshot, actor, kind, Authority::RequesterOrAdmin)?,
                }
                request.submitted_at = Some(now);
                effects.push(notify(
                    direct_manager,
                    "Request has been resubmitted and needs your approval",
                    &link,
                ));
                (
                    HistoryStatus::Resubmitted,
                    Submitted,
                    or_default(comments, "Request resubmitted after revision"),
                )
            }
        };

        request.state = to;
        request.updated_at = now;
        request.version = snapshot.request.version + 1;

        let history = HistoryRecorder::entry(
            &request.id,
            snapshot.history_len + 1,
            &actor.id,
            status,
            Some(current),
            to,
            Some(comments),
            now,
        );

        Ok(TransitionOutcome {
            operation: kind,
            request,
            quote_changes,
            budget_commit,
            history,
            effects,
            applied_at: now,
        })
    }

    fn expect_state(
        &self,
        snapshot: &RequestSnapshot,
        operation: OperationKind,
        allowed: bool,
        expected: &str,
    ) -> Result<(), DomainError> {
        if allowed {
            return Ok(());
        }
        Err(invalid_state(snapshot, operation, format!("expected {expected}")))
    }

    fn expect_mutable(
        &self,
        snapshot: &RequestSnapshot,
        operation: OperationKind,
        quote: &PriceQuote,
    ) -> Result<(), DomainError> {
        if QuoteRegistry::is_mutable(quote) {
            return Ok(());
        }
        Err(invalid_state(snapshot, operation, format!("quote {} is selected and immutable", quote.id)))
    }

    fn expect_selected_quote(
        &self,
        snapshot: &RequestSnapshot,
        operation: OperationKind,
    ) -> Result<(), DomainError> {
        if QuoteRegistry::selected(&snapshot.quotes).is_some() {
            return Ok(());
        }
        Err(invalid_state(snapshot, operation, "no quote has been selected".to_string()))
    }

    /// The role that may reject or return a request sitting in its current state.
    fn stage_owner(
        &self,
        snapshot: &RequestSnapshot,
        operation: OperationKind,
    ) -> Result<Authority, DomainError> {
        match snapshot.request.state {
            RequestState::Submitted | RequestState::QuoteSelected => Ok(Authority::TeamManager),
            RequestState::DmApproved
            | RequestState::QuotesRequested
            | RequestState::AwaitingFinalApproval => Ok(Authority::Role(Role::Accountant)),
            RequestState::AcctApproved | RequestState::FinalApproved => {
                Ok(Authority::Role(Role::FinalManager))
            }
            RequestState::Draft
            | RequestState::FundsTransferred
            | RequestState::Rejected
            | RequestState::Returned => Err(invalid_state(
                snapshot,
                operation,
                "no approval stage owns this state".to_string(),
            )),
        }
    }

    fn authorize(
        &self,
        snapshot: &RequestSnapshot,
        actor: &Actor,
        operation: OperationKind,
        authority: Authority,
    ) -> Result<(), DomainError> {
        let is_requester = actor.id == snapshot.request.requester_id;
        let permitted = match authority {
            Authority::Requester => is_requester,
            Authority::RequesterOrAdmin => is_requester || actor.is_admin(),
            Authority::Role(role) => actor.acts_as(role),
            Authority::TeamManager => {
                actor.is_admin()
                    || (actor.has_role(Role::DirectManager)
                        && snapshot
                            .requester_manager
                            .as_ref()
                            .map(|manager| manager == &actor.id)
                            .unwrap_or(true))
            }
        };
        if permitted {
            return Ok(());
        }

        let reason = match authority {
            Authority::Requester => "only the requester may do this".to_string(),
            Authority::RequesterOrAdmin => "only the requester or an admin may do this".to_string(),
            Authority::Role(role) => format!("actor {} lacks role {}", actor.id, role.as_str()),
            Authority::TeamManager => {
                format!("actor {} is not the requester's direct manager", actor.id)
            }
        };
        Err(invalid_state(snapshot, operation, reason))
    }
}

fn invalid_state(
    snapshot: &RequestSnapshot,
    operation: OperationKind,
    reason: String,
) -> DomainError {
    DomainError::InvalidRequestState {
        request_id: snapshot.request.id.clone(),
        state: snapshot.request.state,
        operation,
        reason,
    }
}

fn notify(recipient: Recipient, message: &str, link: &str) -> Effect {
    Effect::Notify { recipient, message: message.to_string(), link: link.to_string() }
}

fn or_default(comments: &Option<String>, default: &str) -> String {
    comments
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn required_reason(comments: &str, operation: OperationKind) -> Result<String, DomainError> {
    let reason = comments.trim();
    if reason.is_empty() {
        return Err(DomainError::Validation(format!("{operation} requires a reason")));
    }
    Ok(reason.to_string())
}
