use async_trait::async_trait;
use sqlx::Row;

use procura_core::domain::actor::{Role, UserId};
use procura_core::ports::Directory;
use procura_core::ApplicationError;

use super::RepositoryError;
use crate::DbPool;

/// Reporting lines and role assignments read from `app_user` and `user_role`.
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for SqlDirectory {
    async fn direct_manager_of(
        &self,
        user_id: &UserId,
    ) -> Result<Option<UserId>, ApplicationError> {
        let row = sqlx::query("SELECT reports_to FROM app_user WHERE id = ?")
            .bind(&user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        let manager = match row {
            Some(row) => {
                row.try_get::<Option<String>, _>("reports_to").map_err(RepositoryError::from)?
            }
            None => None,
        };
        Ok(manager.map(UserId))
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<UserId>, ApplicationError> {
        let rows = sqlx::query("SELECT user_id FROM user_role WHERE role = ? ORDER BY user_id ASC")
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map(UserId)
                    .map_err(|error| ApplicationError::from(RepositoryError::from(error)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use procura_core::domain::actor::{Role, UserId};
    use procura_core::ports::Directory;

    use super::SqlDirectory;
    use crate::connect_with_settings;
    use crate::migrations;

    #[tokio::test]
    async fn resolves_managers_and_role_holders() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("run migrations");

        for (id, reports_to, role) in [
            ("u-dm", None, "DIRECT_MANAGER"),
            ("u-req", Some("u-dm"), "USER"),
            ("u-acct-2", None, "ACCOUNTANT"),
            ("u-acct-1", None, "ACCOUNTANT"),
        ] {
            sqlx::query(
                "INSERT INTO app_user (id, display_name, reports_to, created_at)
                 VALUES (?, ?, ?, '2026-01-01T00:00:00Z')",
            )
            .bind(id)
            .bind(id)
            .bind(reports_to)
            .execute(&pool)
            .await
            .expect("insert user");
            sqlx::query("INSERT INTO user_role (user_id, role) VALUES (?, ?)")
                .bind(id)
                .bind(role)
                .execute(&pool)
                .await
                .expect("insert role");
        }

        let directory = SqlDirectory::new(pool.clone());
        assert_eq!(
            directory.direct_manager_of(&UserId("u-req".to_string())).await.expect("lookup"),
            Some(UserId("u-dm".to_string()))
        );
        assert_eq!(
            directory.direct_manager_of(&UserId("u-dm".to_string())).await.expect("lookup"),
            None
        );
        assert_eq!(
            directory.direct_manager_of(&UserId("u-ghost".to_string())).await.expect("lookup"),
            None
        );
        assert_eq!(
            directory.users_with_role(Role::Accountant).await.expect("lookup"),
            vec![UserId("u-acct-1".to_string()), UserId("u-acct-2".to_string())]
        );
        assert!(directory.users_with_role(Role::FinalManager).await.expect("lookup").is_empty());

        pool.close().await;
    }
}
