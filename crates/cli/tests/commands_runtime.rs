use std::env;
use std::sync::{Mutex, OnceLock};

use procura_cli::commands::{budget, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_invalid_fiscal_month() {
    with_env(
        &[
            ("PROCURA_DATABASE_URL", "sqlite::memory:"),
            ("PROCURA_WORKFLOW_FISCAL_YEAR_START_MONTH", "13"),
        ],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        },
    );
}

#[test]
fn seed_then_budget_commands_share_one_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("procura.db").display());

    with_env(&[("PROCURA_DATABASE_URL", url.as_str())], || {
        let seeded = seed::run(Some(2026));
        assert_eq!(seeded.exit_code, 0, "seed failed: {}", seeded.output);
        let payload = parse_payload(&seeded.output);
        assert_eq!(payload["command"], "seed");
        assert!(payload["message"].as_str().unwrap_or_default().contains("fiscal year 2026"));

        let reseeded = seed::run(Some(2026));
        assert_eq!(reseeded.exit_code, 0, "seed must be repeatable: {}", reseeded.output);

        let shown = budget::show("dept-ops", Some(2026));
        assert_eq!(shown.exit_code, 0, "{}", shown.output);
        let payload = parse_payload(&shown.output);
        assert_eq!(payload["data"]["total_amount"], "50000");
        assert_eq!(payload["data"]["spent_amount"], "0");

        let resized = budget::set("dept-ops", 2026, "75000.50");
        assert_eq!(resized.exit_code, 0, "{}", resized.output);
        let payload = parse_payload(&resized.output);
        assert_eq!(payload["command"], "budget set");
        assert_eq!(payload["data"]["total_amount"], "75000.50");

        let created = budget::set("dept-eng", 2027, "1000");
        assert_eq!(created.exit_code, 0, "{}", created.output);

        let missing = budget::show("dept-ops", Some(2030));
        assert_eq!(missing.exit_code, 7);
        assert_eq!(parse_payload(&missing.output)["error_class"], "budget_missing");
    });
}

#[test]
fn budget_set_rejects_malformed_amounts_before_touching_the_database() {
    with_env(&[("PROCURA_DATABASE_URL", "sqlite::memory:")], || {
        let result = budget::set("dept-ops", 2026, "lots");
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_amount");
    });
}

#[test]
fn doctor_reports_missing_migrations_then_passes_after_migrate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("doctor.db").display());

    with_env(&[("PROCURA_DATABASE_URL", url.as_str())], || {
        let (exit_code, output) = doctor::run(true);
        assert_eq!(exit_code, 1);
        let report = parse_payload(&output);
        assert_eq!(report["overall_status"], "fail");
        let migrations = report["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .find(|check| check["name"] == "migrations_applied")
            .cloned()
            .expect("migrations check present");
        assert_eq!(migrations["status"], "fail");

        assert_eq!(migrate::run().exit_code, 0);

        let (exit_code, output) = doctor::run(true);
        assert_eq!(exit_code, 0, "{output}");
        assert_eq!(parse_payload(&output)["overall_status"], "pass");

        let (_, human) = doctor::run(false);
        assert!(human.starts_with("doctor: all readiness checks passed"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "PROCURA_DATABASE_URL",
        "PROCURA_DATABASE_MAX_CONNECTIONS",
        "PROCURA_DATABASE_TIMEOUT_SECS",
        "PROCURA_SERVER_BIND_ADDRESS",
        "PROCURA_SERVER_PORT",
        "PROCURA_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "PROCURA_WORKFLOW_FISCAL_YEAR_START_MONTH",
        "PROCURA_WORKFLOW_LINK_BASE_PATH",
        "PROCURA_ATTACHMENTS_ROOT_DIR",
        "PROCURA_ATTACHMENTS_MAX_BYTES",
        "PROCURA_LOGGING_LEVEL",
        "PROCURA_LOGGING_FORMAT",
        "PROCURA_LOG_LEVEL",
        "PROCURA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
