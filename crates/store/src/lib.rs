//! The Record Store Gateway: one async repository trait per aggregate plus
//! a SQLite-backed implementation, aggregated behind [`Store`] for injection
//! into the Controller's `AppState`.

pub mod agents;
pub mod assignments;
pub mod blocklist;
pub mod error;
pub mod firewall;
pub mod schema;
pub mod services;
pub mod stats;
mod store;

pub use agents::{AgentRepository, SqliteAgentRepository};
pub use assignments::{AssignmentRepository, SqliteAssignmentRepository};
pub use blocklist::{BlocklistRepository, SqliteBlocklistRepository};
pub use error::{StoreError, StoreResult};
pub use firewall::{FirewallRuleRepository, SqliteFirewallRuleRepository};
pub use services::{ServiceRepository, SqliteServiceRepository};
pub use stats::{NewConnectionStat, SqliteStatsRepository, StatsRepository, StatsSummary};
pub use store::Store;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Opens the SQLite pool at `database_url` and runs the embedded migration.
///
/// `database_url` accepts anything `sqlx::sqlite::SqliteConnectOptions` does
/// (`sqlite://path/to/file.db`, `sqlite::memory:`, ...); the file is created
/// if missing since the Controller owns initial provisioning.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
    sqlx::query(schema::MIGRATION_SQL).execute(&pool).await?;
    Ok(pool)
}
