//! Repository traits and their SQLite implementations.

pub mod campaign;
pub mod confirmed;
pub mod error_log;
pub mod queue;

pub use campaign::{CampaignRepository, SqliteCampaignRepository};
pub use confirmed::{ConfirmedRepository, SqliteConfirmedRepository};
pub use error_log::{ErrorLogRepository, SqliteErrorLogRepository};
pub use queue::{QueueRepository, SqliteQueueRepository};

use sqlx::{QueryBuilder, Sqlite};

/// Upper bound on bind parameters in one `IN (...)` list.
pub(crate) const BIND_CHUNK: usize = 500;

/// Appends ` IN (?, ?, ...)` binding every value.
pub(crate) fn push_in_list(builder: &mut QueryBuilder<'_, Sqlite>, values: &[String]) {
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value.clone());
    }
    separated.push_unseparated(")");
}
