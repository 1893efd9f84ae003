use std::time::Duration;

/// Canonical default pipe name for the registry (spec §6).
pub const DEFAULT_REGISTRY_PIPE_NAME: &str = "AlphaOmega.NamedPipes.Registry";

/// Prefix for a worker's default pipe name; the full name is
/// `{WORKER_PIPE_NAME_PREFIX}{worker_id}`.
pub const WORKER_PIPE_NAME_PREFIX: &str = "AlphaOmega.NamedPipes.Worker.";

/// Per-call default timeout for an outbound RPC (spec §6).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Worker's connect timeout when dialing the registry (spec §6).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker-server stop grace period (spec §6).
pub const DEFAULT_WORKER_STOP_GRACE: Duration = Duration::from_secs(2);

/// Registry-server stop grace period (spec §6).
pub const DEFAULT_REGISTRY_STOP_GRACE: Duration = Duration::from_secs(5);

/// Default worker pipe name for a given worker id.
pub fn default_worker_pipe_name(worker_id: &str) -> String {
    format!("{WORKER_PIPE_NAME_PREFIX}{worker_id}")
}
