pub mod attachments;
pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use attachments::LocalAttachmentStore;
pub use connection::{connect, connect_with_config, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedResult, VerificationResult};
pub use repositories::{
    InMemoryLifecycleStore, RepositoryError, SqlBudgetLedger, SqlDirectory, SqlLifecycleStore,
    SqlNotificationOutbox,
};
