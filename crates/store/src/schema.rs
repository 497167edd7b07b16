//! Embedded schema, applied idempotently at startup.
//!
//! Real deployments point `DATABASE_URL` at Postgres; the schema here targets
//! SQLite so the workspace has a concrete, test-running backend behind the
//! same repository traits (see SPEC_FULL.md §4.8).

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL,
    wireguard_ip TEXT NOT NULL UNIQUE,
    public_ip TEXT,
    version TEXT NOT NULL,
    last_heartbeat TEXT,
    status TEXT NOT NULL DEFAULT 'healthy',
    active_connections INTEGER NOT NULL DEFAULT 0,
    cpu_percent REAL NOT NULL DEFAULT 0,
    memory_percent REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS services (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    listen_port INTEGER NOT NULL,
    protocol TEXT NOT NULL,
    backend_host TEXT NOT NULL,
    backend_port INTEGER NOT NULL,
    description TEXT,
    updated_at TEXT NOT NULL,
    UNIQUE(listen_port, protocol)
);

CREATE TABLE IF NOT EXISTS service_assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service_id INTEGER NOT NULL REFERENCES services(id),
    agent_id INTEGER REFERENCES agents(id),
    enabled INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_assignment_unique
    ON service_assignments(service_id, COALESCE(agent_id, -1));

CREATE TABLE IF NOT EXISTS blocklist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ip TEXT NOT NULL UNIQUE,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS firewall_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    port INTEGER NOT NULL,
    protocol TEXT NOT NULL,
    interface TEXT NOT NULL,
    action TEXT NOT NULL,
    description TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    agent_id INTEGER REFERENCES agents(id),
    updated_at TEXT NOT NULL,
    UNIQUE(port, protocol, interface)
);

CREATE TABLE IF NOT EXISTS connection_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL,
    service_id INTEGER,
    client_ip TEXT NOT NULL,
    status TEXT NOT NULL,
    duration REAL,
    bytes_sent INTEGER NOT NULL DEFAULT 0,
    bytes_received INTEGER NOT NULL DEFAULT 0,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_stats_timestamp ON connection_stats(timestamp);
CREATE INDEX IF NOT EXISTS idx_stats_agent ON connection_stats(agent_id);
"#;
