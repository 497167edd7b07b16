pub mod blocklist;
pub mod config;
pub mod config_sync;
pub mod control_api;
pub mod error;
pub mod firewall;
pub mod heartbeat;
pub mod stats_reporter;
pub mod tcp_proxy;
pub mod udp_proxy;
