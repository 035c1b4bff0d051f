use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use procura_core::ApplicationError;
use rust_decimal::Decimal;
use thiserror::Error;

pub mod budget;
pub mod directory;
pub mod memory;
pub mod notification;
pub mod request;

pub use budget::SqlBudgetLedger;
pub use directory::SqlDirectory;
pub use memory::InMemoryLifecycleStore;
pub use notification::SqlNotificationOutbox;
pub use request::SqlLifecycleStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("concurrent modification: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        ApplicationError::Persistence(error.to_string())
    }
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_date(column: &str, value: String) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|error| {
        RepositoryError::Decode(format!("invalid date in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_optional_date(
    column: &str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, RepositoryError> {
    value.map(|date| parse_date(column, date)).transpose()
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use procura_core::ApplicationError;

    use super::{parse_decimal, parse_timestamp, parse_u32, RepositoryError};

    #[test]
    fn decode_failures_name_the_column() {
        let error = parse_decimal("total_cost", "ten".to_string()).expect_err("bad decimal");
        assert!(error.to_string().contains("total_cost"));

        let error = parse_timestamp("created_at", "yesterday".to_string()).expect_err("bad ts");
        assert!(error.to_string().contains("created_at"));

        assert!(parse_u32("version", -1).is_err());
    }

    #[test]
    fn repository_errors_surface_as_persistence_failures() {
        let error: ApplicationError = RepositoryError::Conflict("request REQ-1".to_string()).into();
        assert!(matches!(error, ApplicationError::Persistence(message) if message.contains("REQ-1")));
    }
}
