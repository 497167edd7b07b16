use thiserror::Error;

/// Failures the Config Synchronizer can encounter fetching or applying a
/// configuration. Never bubbles past the sync loop (spec §7).
#[derive(Debug, Error)]
pub enum ConfigSyncError {
    #[error("controller unreachable: {0}")]
    Unreachable(#[from] reqwest::Error),
    #[error("controller returned an error status: {0}")]
    Status(reqwest::StatusCode),
}

/// Failures a single firewall reconcile pass can hit. A failed add/remove
/// is logged at warning and retried on the next sync (spec §7).
#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("host command failed: {0}")]
    CommandFailed(String),
    #[error("no host interface could be resolved for reference {reference:?}")]
    UnresolvedInterface { reference: String },
}
