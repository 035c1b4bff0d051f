use std::sync::Arc;

use procura_core::budget::FiscalCalendar;
use procura_core::config::{AppConfig, ConfigError, LoadOptions};
use procura_core::{DomainError, LifecycleEngine, RequestService};
use procura_db::{
    connect_with_settings, migrations, DbPool, LocalAttachmentStore, SqlDirectory,
    SqlLifecycleStore, SqlNotificationOutbox,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: RequestService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("workflow settings rejected: {0}")]
    Workflow(#[source] DomainError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = request_service(&config, &db_pool)?;
    Ok(Application { config, db_pool, service })
}

fn request_service(config: &AppConfig, pool: &DbPool) -> Result<RequestService, BootstrapError> {
    let calendar = FiscalCalendar::new(config.workflow.fiscal_year_start_month)
        .map_err(BootstrapError::Workflow)?;

    Ok(RequestService::new(
        Arc::new(SqlLifecycleStore::new(pool.clone())),
        Arc::new(SqlDirectory::new(pool.clone())),
        Arc::new(SqlNotificationOutbox::new(pool.clone())),
        Arc::new(LocalAttachmentStore::new(config.attachments.root_dir.clone())),
    )
    .with_engine(LifecycleEngine::new(config.workflow.link_base_path.clone()))
    .with_calendar(calendar)
    .with_max_attachment_bytes(config.attachments.max_bytes))
}

#[cfg(test)]
mod tests {
    use procura_core::config::{ConfigOverrides, LoadOptions};
    use procura_core::{Actor, DepartmentId, RequestDraft, RequestState, RequestType, Role};
    use rust_decimal::Decimal;

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_rejects_an_out_of_range_fiscal_start_month() {
        let mut options = overrides("sqlite::memory:");
        options.overrides.fiscal_year_start_month = Some(13);

        let message = match bootstrap(options).await {
            Ok(_) => panic!("month 13 must be refused"),
            Err(error) => error.to_string(),
        };
        assert!(message.contains("fiscal_year_start_month"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_request_service() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap succeeds");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('purchase_request', 'price_quote', 'budget', 'approval_history')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("count lifecycle tables");
        assert_eq!(table_count, 4);

        sqlx::query("INSERT INTO department (id, name, created_at) VALUES ('dept-ops', 'Operations', '2026-01-01T00:00:00Z')")
            .execute(&app.db_pool)
            .await
            .expect("insert department");
        sqlx::query(
            "INSERT INTO app_user (id, display_name, email, department_id, reports_to, created_at)
             VALUES ('u-req', 'Requester', 'req@example.com', 'dept-ops', NULL, '2026-01-01T00:00:00Z')",
        )
        .execute(&app.db_pool)
        .await
        .expect("insert user");

        let draft = RequestDraft {
            department_id: DepartmentId("dept-ops".to_string()),
            request_type: RequestType::Purchase,
            title: "Desk chairs".to_string(),
            description: String::new(),
            total_cost: Decimal::new(450, 0),
            items: Vec::new(),
            project_detail: None,
        };
        let request = app
            .service
            .create(&Actor::new("u-req", [Role::User]), draft)
            .await
            .expect("create through bootstrapped service");
        assert_eq!(request.state, RequestState::Draft);
        assert!(request.link(&app.config.workflow.link_base_path).ends_with(&request.id.0));

        app.db_pool.close().await;
    }
}
