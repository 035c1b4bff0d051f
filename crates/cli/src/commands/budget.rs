use std::str::FromStr;

use chrono::Utc;
use procura_core::budget::FiscalCalendar;
use procura_core::{ApplicationError, Budget, BudgetLedger, DepartmentId};
use procura_db::SqlBudgetLedger;
use rust_decimal::Decimal;
use serde_json::json;

use crate::commands::{open_pool, prepare, CommandResult, Failure};

pub fn show(department: &str, year: Option<i32>) -> CommandResult {
    const COMMAND: &str = "budget show";
    let (config, runtime) = match prepare(COMMAND) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let fiscal_year = match year {
        Some(year) => year,
        None => match FiscalCalendar::new(config.workflow.fiscal_year_start_month) {
            Ok(calendar) => calendar.current(Utc::now()),
            Err(error) => {
                return CommandResult::failure(COMMAND, "config_validation", error.to_string(), 2)
            }
        },
    };
    let department_id = DepartmentId(department.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let ledger = SqlBudgetLedger::new(pool.clone());
        let found = ledger.find(&department_id, fiscal_year).await.map_err(ledger_failure);
        pool.close().await;
        found
    });

    match result {
        Ok(Some(budget)) => CommandResult::success_with_data(
            COMMAND,
            describe(&budget),
            Some(budget_json(&budget)),
        ),
        Ok(None) => CommandResult::failure(
            COMMAND,
            "budget_missing",
            format!("no budget for {department} in fiscal year {fiscal_year}"),
            7,
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

pub fn set(department: &str, year: i32, total: &str) -> CommandResult {
    const COMMAND: &str = "budget set";
    let total_amount = match Decimal::from_str(total.trim()) {
        Ok(amount) => amount,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "invalid_amount",
                format!("`{total}` is not a decimal amount: {error}"),
                2,
            )
        }
    };
    let (config, runtime) = match prepare(COMMAND) {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let department_id = DepartmentId(department.to_string());

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        let ledger = SqlBudgetLedger::new(pool.clone());
        let allocated =
            ledger.allocate(&department_id, year, total_amount).await.map_err(ledger_failure);
        pool.close().await;
        allocated
    });

    match result {
        Ok(budget) => {
            CommandResult::success_with_data(COMMAND, describe(&budget), Some(budget_json(&budget)))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}

fn ledger_failure(error: ApplicationError) -> Failure {
    match error {
        ApplicationError::Domain(error) => ("budget_rejected", error.to_string(), 6u8),
        other => ("db_operation", other.to_string(), 4u8),
    }
}

fn describe(budget: &Budget) -> String {
    format!(
        "{} FY{}: spent {} of {} ({}%), remaining {}",
        budget.department_id,
        budget.fiscal_year,
        budget.spent_amount,
        budget.total_amount,
        budget.percentage_spent(),
        budget.remaining()
    )
}

fn budget_json(budget: &Budget) -> serde_json::Value {
    json!({
        "department_id": budget.department_id.0,
        "fiscal_year": budget.fiscal_year,
        "total_amount": budget.total_amount.to_string(),
        "spent_amount": budget.spent_amount.to_string(),
        "remaining": budget.remaining().to_string(),
        "percentage_spent": budget.percentage_spent().to_string(),
        "updated_at": budget.updated_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use procura_core::{Budget, DepartmentId};
    use rust_decimal::Decimal;

    use super::{budget_json, describe};

    #[test]
    fn description_reports_spend_and_remaining() {
        let mut budget = Budget::new(DepartmentId("dept-ops".to_string()), 2026, Decimal::new(1_000, 0));
        budget.spent_amount = Decimal::new(250, 0);

        let text = describe(&budget);
        assert!(text.starts_with("dept-ops FY2026: spent 250 of 1000"), "{text}");
        assert!(text.ends_with("remaining 750"), "{text}");
        assert_eq!(budget_json(&budget)["remaining"], "750");
    }
}
