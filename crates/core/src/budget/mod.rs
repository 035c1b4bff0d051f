use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::DepartmentId;
use crate::domain::budget::Budget;
use crate::errors::DomainError;

/// Spend committed against an envelope at fund transfer.
///
/// `previous_spent` is the value the guard checked against; stores use it as the
/// optimistic precondition of the write.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetCommit {
    pub department_id: DepartmentId,
    pub fiscal_year: i32,
    pub amount: Decimal,
    pub previous_spent: Decimal,
    pub new_spent: Decimal,
    pub committed_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BudgetGuard;

impl BudgetGuard {
    pub fn is_available(budget: Option<&Budget>, amount: Decimal) -> bool {
        budget.map(|budget| budget.has_enough_for(amount)).unwrap_or(false)
    }

    pub fn check_available(
        budget: Option<&Budget>,
        department_id: &DepartmentId,
        fiscal_year: i32,
        amount: Decimal,
    ) -> Result<(), DomainError> {
        if amount.is_sign_negative() {
            return Err(DomainError::Validation("budget amount must not be negative".to_string()));
        }
        if Self::is_available(budget, amount) {
            return Ok(());
        }
        Err(DomainError::InsufficientBudget {
            department_id: department_id.clone(),
            fiscal_year,
            requested: amount,
            remaining: budget.map(Budget::remaining),
        })
    }

    /// Re-checks availability against the row as currently stored and computes the new spend.
    pub fn commit(
        budget: Option<&Budget>,
        department_id: &DepartmentId,
        fiscal_year: i32,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<BudgetCommit, DomainError> {
        Self::check_available(budget, department_id, fiscal_year, amount)?;
        let budget = budget.ok_or_else(|| {
            DomainError::InvariantViolation("budget vanished after availability check".to_string())
        })?;

        let new_spent = budget.spent_amount + amount;
        if new_spent > budget.total_amount {
            return Err(DomainError::InvariantViolation(format!(
                "commit would overspend {department_id}/{fiscal_year}"
            )));
        }

        Ok(BudgetCommit {
            department_id: department_id.clone(),
            fiscal_year,
            amount,
            previous_spent: budget.spent_amount,
            new_spent,
            committed_at: now,
        })
    }

    /// Validates a resize of an envelope. Shrinking below recorded spend is refused.
    pub fn resize(existing: Option<&Budget>, total_amount: Decimal) -> Result<(), DomainError> {
        if total_amount.is_sign_negative() {
            return Err(DomainError::Validation("budget total must not be negative".to_string()));
        }
        if let Some(budget) = existing {
            if total_amount < budget.spent_amount {
                return Err(DomainError::Validation(format!(
                    "budget total {total_amount} is below the {} already spent",
                    budget.spent_amount
                )));
            }
        }
        Ok(())
    }
}

/// Maps calendar dates to fiscal years. A fiscal year is labelled by the
/// calendar year in which it starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FiscalCalendar {
    start_month: u32,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self { start_month: 1 }
    }
}

impl FiscalCalendar {
    pub fn new(start_month: u32) -> Result<Self, DomainError> {
        if !(1..=12).contains(&start_month) {
            return Err(DomainError::Validation(format!(
                "fiscal year start month must be in 1..=12, got {start_month}"
            )));
        }
        Ok(Self { start_month })
    }

    pub fn start_month(&self) -> u32 {
        self.start_month
    }

    pub fn fiscal_year_of(&self, date: NaiveDate) -> i32 {
        if date.month() >= self.start_month {
            date.year()
        } else {
            date.year() - 1
        }
    }

    pub fn current(&self, now: DateTime<Utc>) -> i32 {
        self.fiscal_year_of(now.date_naive())
    }
}
