use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use procura_core::budget::{BudgetCommit, BudgetGuard};
use procura_core::domain::actor::{DepartmentId, UserId};
use procura_core::domain::budget::Budget;
use procura_core::domain::history::ApprovalHistoryEntry;
use procura_core::domain::price_quote::{PriceQuote, PriceQuoteId};
use procura_core::domain::request::{Request, RequestId};
use procura_core::lifecycle::{QuoteChange, RequestSnapshot, TransitionOutcome};
use procura_core::ports::{BudgetLedger, LifecycleStore, RequestFilter, TransitionFn};
use procura_core::ApplicationError;

use super::RepositoryError;

#[derive(Default)]
struct State {
    requests: HashMap<RequestId, Request>,
    quotes: BTreeMap<PriceQuoteId, PriceQuote>,
    history: HashMap<RequestId, Vec<ApprovalHistoryEntry>>,
    budgets: BTreeMap<(DepartmentId, i32), Budget>,
    managers: HashMap<UserId, UserId>,
}

impl State {
    fn quotes_of(&self, request_id: &RequestId) -> Vec<PriceQuote> {
        let mut quotes: Vec<PriceQuote> =
            self.quotes.values().filter(|quote| &quote.request_id == request_id).cloned().collect();
        quotes.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
        });
        quotes
    }

    fn snapshot(&self, request_id: &RequestId, fiscal_year: i32) -> Option<RequestSnapshot> {
        let request = self.requests.get(request_id)?.clone();
        let budget = self.budgets.get(&(request.department_id.clone(), fiscal_year)).cloned();
        let requester_manager = self.managers.get(&request.requester_id).cloned();
        let history_len = self
            .history
            .get(request_id)
            .and_then(|entries| entries.last())
            .map(|entry| entry.sequence)
            .unwrap_or(0);

        Some(RequestSnapshot {
            quotes: self.quotes_of(request_id),
            request,
            budget,
            fiscal_year,
            requester_manager,
            history_len,
        })
    }

    /// Checks every precondition of the outcome before touching state so a
    /// refused write leaves nothing behind.
    fn verify(
        &self,
        snapshot: &RequestSnapshot,
        outcome: &TransitionOutcome,
    ) -> Result<(), RepositoryError> {
        let request_id = &snapshot.request.id;
        let stored_version = self.requests.get(request_id).map(|request| request.version);
        if stored_version != Some(snapshot.request.version) {
            return Err(RepositoryError::Conflict(format!(
                "request {request_id} is no longer at version {}",
                snapshot.request.version
            )));
        }

        for change in &outcome.quote_changes {
            let existing = match change {
                QuoteChange::Insert(quote) => {
                    if self.quotes.contains_key(&quote.id) {
                        return Err(RepositoryError::Conflict(format!(
                            "quote {} already exists",
                            quote.id
                        )));
                    }
                    continue;
                }
                QuoteChange::Update(quote) => self.quotes.get(&quote.id),
                QuoteChange::Delete(quote_id) | QuoteChange::Select(quote_id) => {
                    self.quotes.get(quote_id)
                }
            };
            if !existing.is_some_and(|quote| &quote.request_id == request_id) {
                return Err(RepositoryError::Conflict(format!(
                    "quote changed concurrently on request {request_id}"
                )));
            }
        }

        if let Some(commit) = &outcome.budget_commit {
            let spent = self
                .budgets
                .get(&(commit.department_id.clone(), commit.fiscal_year))
                .map(|budget| budget.spent_amount);
            if spent != Some(commit.previous_spent) {
                return Err(RepositoryError::Conflict(format!(
                    "budget {}/{} changed since it was checked",
                    commit.department_id, commit.fiscal_year
                )));
            }
        }
        Ok(())
    }

    fn write(&mut self, outcome: &TransitionOutcome) {
        let request_id = outcome.request.id.clone();
        for change in &outcome.quote_changes {
            match change {
                QuoteChange::Insert(quote) | QuoteChange::Update(quote) => {
                    self.quotes.insert(quote.id.clone(), quote.clone());
                }
                QuoteChange::Delete(quote_id) => {
                    self.quotes.remove(quote_id);
                }
                QuoteChange::Select(quote_id) => {
                    for quote in self.quotes.values_mut().filter(|quote| quote.request_id == request_id)
                    {
                        let selected = &quote.id == quote_id;
                        if quote.is_selected != selected {
                            quote.is_selected = selected;
                            quote.updated_at = outcome.applied_at;
                        }
                    }
                }
            }
        }
        if let Some(commit) = &outcome.budget_commit {
            self.apply_commit(commit);
        }
        self.history.entry(request_id.clone()).or_default().push(outcome.history.clone());
        self.requests.insert(request_id, outcome.request.clone());
    }

    fn apply_commit(&mut self, commit: &BudgetCommit) {
        if let Some(budget) =
            self.budgets.get_mut(&(commit.department_id.clone(), commit.fiscal_year))
        {
            budget.spent_amount = commit.new_spent;
            budget.updated_at = commit.committed_at;
        }
    }
}

/// Lifecycle store and budget ledger held in process memory. One mutex guards
/// every table, so a transition and its budget commit are applied atomically.
#[derive(Default)]
pub struct InMemoryLifecycleStore {
    state: Mutex<State>,
}

impl InMemoryLifecycleStore {
    /// Records a reporting line consulted by team-manager authority checks.
    pub async fn set_manager(&self, user_id: &UserId, manager_id: &UserId) {
        self.state.lock().await.managers.insert(user_id.clone(), manager_id.clone());
    }
}

#[async_trait]
impl LifecycleStore for InMemoryLifecycleStore {
    async fn insert_new(&self, outcome: &TransitionOutcome) -> Result<(), ApplicationError> {
        let mut state = self.state.lock().await;
        let request_id = outcome.request.id.clone();
        if state.requests.contains_key(&request_id) {
            return Err(
                RepositoryError::Conflict(format!("request {request_id} already exists")).into()
            );
        }
        state.history.insert(request_id.clone(), vec![outcome.history.clone()]);
        state.requests.insert(request_id, outcome.request.clone());
        Ok(())
    }

    async fn execute(
        &self,
        request_id: &RequestId,
        fiscal_year: i32,
        apply: &TransitionFn<'_>,
    ) -> Result<TransitionOutcome, ApplicationError> {
        let mut state = self.state.lock().await;
        let snapshot = state
            .snapshot(request_id, fiscal_year)
            .ok_or_else(|| ApplicationError::NotFound(format!("request {request_id}")))?;

        let outcome = apply(&snapshot)?;
        state.verify(&snapshot, &outcome)?;
        state.write(&outcome);
        Ok(outcome)
    }

    async fn load(&self, request_id: &RequestId) -> Result<Option<Request>, ApplicationError> {
        Ok(self.state.lock().await.requests.get(request_id).cloned())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, ApplicationError> {
        let state = self.state.lock().await;
        let mut requests: Vec<Request> =
            state.requests.values().filter(|request| filter.matches(request)).cloned().collect();
        requests.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| left.id.cmp(&right.id))
        });
        Ok(requests)
    }

    async fn history(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalHistoryEntry>, ApplicationError> {
        Ok(self.state.lock().await.history.get(request_id).cloned().unwrap_or_default())
    }

    async fn quotes(&self, request_id: &RequestId) -> Result<Vec<PriceQuote>, ApplicationError> {
        Ok(self.state.lock().await.quotes_of(request_id))
    }

    async fn find_quote(
        &self,
        quote_id: &PriceQuoteId,
    ) -> Result<Option<PriceQuote>, ApplicationError> {
        Ok(self.state.lock().await.quotes.get(quote_id).cloned())
    }
}

#[async_trait]
impl BudgetLedger for InMemoryLifecycleStore {
    async fn find(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
    ) -> Result<Option<Budget>, ApplicationError> {
        Ok(self.state.lock().await.budgets.get(&(department_id.clone(), fiscal_year)).cloned())
    }

    async fn allocate(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        total_amount: Decimal,
    ) -> Result<Budget, ApplicationError> {
        let mut state = self.state.lock().await;
        let key = (department_id.clone(), fiscal_year);
        BudgetGuard::resize(state.budgets.get(&key), total_amount)?;

        let budget = state
            .budgets
            .entry(key)
            .or_insert_with(|| Budget::new(department_id.clone(), fiscal_year, total_amount));
        budget.total_amount = total_amount;
        budget.updated_at = Utc::now();
        Ok(budget.clone())
    }

    async fn check_available(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        amount: Decimal,
    ) -> Result<bool, ApplicationError> {
        let state = self.state.lock().await;
        Ok(BudgetGuard::is_available(state.budgets.get(&(department_id.clone(), fiscal_year)), amount))
    }

    async fn list(&self, fiscal_year: Option<i32>) -> Result<Vec<Budget>, ApplicationError> {
        let state = self.state.lock().await;
        let mut budgets: Vec<Budget> = state
            .budgets
            .values()
            .filter(|budget| fiscal_year.map_or(true, |year| budget.fiscal_year == year))
            .cloned()
            .collect();
        budgets.sort_by(|left, right| {
            right
                .fiscal_year
                .cmp(&left.fiscal_year)
                .then_with(|| left.department_id.cmp(&right.department_id))
        });
        Ok(budgets)
    }
}
