use rust_decimal::Decimal;
use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_DEPARTMENTS: &[SeedDepartment] = &[
    SeedDepartment {
        id: "dept-ops",
        manager_id: "u-dm-ops",
        requester_id: "u-req-ops",
        budget: 50_000,
    },
    SeedDepartment {
        id: "dept-eng",
        manager_id: "u-dm-eng",
        requester_id: "u-req-eng",
        budget: 120_000,
    },
];

const SEED_ROLE_HOLDERS: &[(&str, &str)] = &[
    ("u-admin", "ADMIN"),
    ("u-fm", "FINAL_MANAGER"),
    ("u-acct", "ACCOUNTANT"),
    ("u-dm-ops", "DIRECT_MANAGER"),
    ("u-dm-eng", "DIRECT_MANAGER"),
    ("u-req-ops", "USER"),
    ("u-req-eng", "USER"),
];

/// Reference organisation used by local setups and end-to-end tests.
///
/// Seeds two departments, each with a requester reporting to a direct
/// manager, the shared accountant, final-manager and admin seats, and one
/// budget envelope per department for the requested fiscal year.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    /// Loads the dataset. Safe to run repeatedly; existing rows are kept.
    pub async fn load(pool: &DbPool, fiscal_year: i32) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;

        let now = chrono::Utc::now().to_rfc3339();
        let mut budgets_created = 0;
        for department in SEED_DEPARTMENTS {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO budget (
                    department_id, fiscal_year, total_amount, spent_amount, updated_at
                 ) VALUES (?1, ?2, ?3, '0', ?4)",
            )
            .bind(department.id)
            .bind(fiscal_year)
            .bind(Decimal::from(department.budget).to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
            budgets_created += result.rows_affected();
        }
        tx.commit().await?;

        Ok(SeedResult {
            fiscal_year,
            departments: SEED_DEPARTMENTS.iter().map(|department| department.id).collect(),
            users: SEED_ROLE_HOLDERS.len(),
            budgets_created,
        })
    }

    /// Verifies that the seeded organisation is present and wired correctly.
    pub async fn verify(
        pool: &DbPool,
        fiscal_year: i32,
    ) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for (user_id, role) in SEED_ROLE_HOLDERS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM user_role WHERE user_id = ?1 AND role = ?2)",
            )
            .bind(*user_id)
            .bind(*role)
            .fetch_one(pool)
            .await?;
            checks.push((*user_id, present == 1));
        }

        for department in SEED_DEPARTMENTS {
            let reporting_line: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM app_user WHERE id = ?1 AND reports_to = ?2)",
            )
            .bind(department.requester_id)
            .bind(department.manager_id)
            .fetch_one(pool)
            .await?;
            checks.push((department.reporting_label(), reporting_line == 1));

            let budget: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM budget WHERE department_id = ?1 AND fiscal_year = ?2)",
            )
            .bind(department.id)
            .bind(fiscal_year)
            .fetch_one(pool)
            .await?;
            checks.push((department.budget_label(), budget == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes the seeded organisation. Fails while requests still reference it.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;
        let departments = sql_array_from_ids(
            &SEED_DEPARTMENTS.iter().map(|department| department.id).collect::<Vec<_>>(),
        );
        let users =
            sql_array_from_ids(&SEED_ROLE_HOLDERS.iter().map(|(id, _)| *id).collect::<Vec<_>>());

        sqlx::query(&format!("DELETE FROM budget WHERE department_id IN {departments}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM user_role WHERE user_id IN {users}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("UPDATE app_user SET reports_to = NULL WHERE id IN {users}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM app_user WHERE id IN {users}")).execute(&mut *tx).await?;
        sqlx::query(&format!("DELETE FROM department WHERE id IN {departments}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedDepartment {
    id: &'static str,
    manager_id: &'static str,
    requester_id: &'static str,
    budget: i64,
}

impl SeedDepartment {
    fn reporting_label(&self) -> &'static str {
        match self.id {
            "dept-ops" => "dept-ops-reporting-line",
            _ => "dept-eng-reporting-line",
        }
    }

    fn budget_label(&self) -> &'static str {
        match self.id {
            "dept-ops" => "dept-ops-budget",
            _ => "dept-eng-budget",
        }
    }
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub fiscal_year: i32,
    pub departments: Vec<&'static str>,
    pub users: usize,
    pub budgets_created: u64,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    #[test]
    fn sql_fixture_is_valid() {
        assert!(SeedDataset::SQL.contains("INSERT OR IGNORE INTO user_role"));
    }

    #[tokio::test]
    async fn verify_seed_contract_and_idempotency() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        let first = SeedDataset::load(&pool, 2026).await.expect("load seed fixtures");
        assert_eq!(first.budgets_created, 2);
        let first_verification = SeedDataset::verify(&pool, 2026).await.expect("verify");
        assert!(first_verification.all_present, "{:?}", first_verification.checks);

        let second = SeedDataset::load(&pool, 2026).await.expect("reload seed fixtures");
        assert_eq!(second.budgets_created, 0);
        let second_verification = SeedDataset::verify(&pool, 2026).await.expect("re-verify");
        assert_eq!(first_verification.checks, second_verification.checks);

        let other_year = SeedDataset::verify(&pool, 2027).await.expect("verify 2027");
        assert!(!other_year.all_present);
    }

    #[tokio::test]
    async fn clean_removes_the_seeded_organisation() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30)
            .await
            .expect("connect to test database");
        migrations::run_pending(&pool).await.expect("run migrations");

        SeedDataset::load(&pool, 2026).await.expect("load seed fixtures");
        SeedDataset::clean(&pool).await.expect("clean seed fixtures");

        let users: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM app_user")
            .fetch_one(&pool)
            .await
            .expect("count users");
        assert_eq!(users, 0);
        assert!(!SeedDataset::verify(&pool, 2026).await.expect("verify").all_present);
    }
}
