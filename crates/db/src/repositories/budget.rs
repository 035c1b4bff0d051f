use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::info;

use procura_core::budget::BudgetGuard;
use procura_core::domain::actor::DepartmentId;
use procura_core::domain::budget::Budget;
use procura_core::ports::BudgetLedger;
use procura_core::ApplicationError;

use super::{parse_decimal, parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlBudgetLedger {
    pool: DbPool,
}

impl SqlBudgetLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
    ) -> Result<Option<Budget>, RepositoryError> {
        let row = sqlx::query(
            "SELECT department_id, fiscal_year, total_amount, spent_amount, updated_at
             FROM budget
             WHERE department_id = ? AND fiscal_year = ?",
        )
        .bind(&department_id.0)
        .bind(fiscal_year)
        .fetch_optional(&self.pool)
        .await?;

        row.map(budget_from_row).transpose()
    }
}

#[async_trait]
impl BudgetLedger for SqlBudgetLedger {
    async fn find(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
    ) -> Result<Option<Budget>, ApplicationError> {
        Ok(self.fetch(department_id, fiscal_year).await?)
    }

    async fn allocate(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        total_amount: Decimal,
    ) -> Result<Budget, ApplicationError> {
        let existing = self.fetch(department_id, fiscal_year).await?;
        BudgetGuard::resize(existing.as_ref(), total_amount)?;

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO budget (department_id, fiscal_year, total_amount, spent_amount, updated_at)
             VALUES (?, ?, ?, '0', ?)
             ON CONFLICT(department_id, fiscal_year) DO UPDATE SET
                total_amount = excluded.total_amount,
                updated_at = excluded.updated_at
             WHERE budget.spent_amount = ?",
        )
        .bind(&department_id.0)
        .bind(fiscal_year)
        .bind(total_amount.to_string())
        .bind(now.to_rfc3339())
        .bind(existing.as_ref().map(|budget| budget.spent_amount.to_string()))
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "budget {department_id}/{fiscal_year} changed during allocation"
            ))
            .into());
        }

        info!(
            event_name = "budget.allocated",
            department_id = %department_id,
            fiscal_year,
            total_amount = %total_amount,
            "budget envelope allocated"
        );

        self.fetch(department_id, fiscal_year)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("budget {department_id}/{fiscal_year}")))
    }

    async fn check_available(
        &self,
        department_id: &DepartmentId,
        fiscal_year: i32,
        amount: Decimal,
    ) -> Result<bool, ApplicationError> {
        let budget = self.fetch(department_id, fiscal_year).await?;
        Ok(BudgetGuard::is_available(budget.as_ref(), amount))
    }

    async fn list(&self, fiscal_year: Option<i32>) -> Result<Vec<Budget>, ApplicationError> {
        let rows = sqlx::query(
            "SELECT department_id, fiscal_year, total_amount, spent_amount, updated_at
             FROM budget
             WHERE (?1 IS NULL OR fiscal_year = ?1)
             ORDER BY fiscal_year DESC, department_id ASC",
        )
        .bind(fiscal_year)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(budget_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

pub(crate) fn budget_from_row(row: SqliteRow) -> Result<Budget, RepositoryError> {
    Ok(Budget {
        department_id: DepartmentId(row.try_get("department_id")?),
        fiscal_year: row.try_get("fiscal_year")?,
        total_amount: parse_decimal("total_amount", row.try_get("total_amount")?)?,
        spent_amount: parse_decimal("spent_amount", row.try_get("spent_amount")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
