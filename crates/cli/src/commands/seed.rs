use chrono::Utc;
use procura_core::budget::FiscalCalendar;
use procura_db::{migrations, SeedDataset, SeedResult};

use crate::commands::{open_pool, prepare, CommandResult, Failure};

/// Loads the reference organisation and budgets for `year`, or the current
/// fiscal year when none is given.
pub fn run(year: Option<i32>) -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(result) => return result,
    };
    let fiscal_year = match year {
        Some(year) => year,
        None => match FiscalCalendar::new(config.workflow.fiscal_year_start_month) {
            Ok(calendar) => calendar.current(Utc::now()),
            Err(error) => {
                return CommandResult::failure("seed", "config_validation", error.to_string(), 2)
            }
        },
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = SeedDataset::load(&pool, fiscal_year)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = SeedDataset::verify(&pool, fiscal_year)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome = if verification.all_present {
            Ok(seeded)
        } else {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "seeded {} users across departments {} with {} new budget(s) for fiscal year {}",
        seeded.users,
        seeded.departments.join(", "),
        seeded.budgets_created,
        seeded.fiscal_year
    )
}
