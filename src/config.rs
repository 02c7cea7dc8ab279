use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the bridge service.
///
/// The caps and cadences here drive the entry-point validation and the
/// pump; the core queue itself takes explicit arguments and never reads
/// configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address the HTTP API binds to.
    pub listen_addr: SocketAddr,
    /// Batches larger than this are accepted with a warning.
    pub soft_batch_cap: usize,
    /// Batches larger than this are rejected before a ticket is allocated.
    pub hard_batch_cap: usize,
    /// How long terminal jobs stay pollable before cleanup removes them.
    pub retention: chrono::Duration,
    /// Cadence of the scheduling tick.
    pub tick_interval: Duration,
    /// How often a dirty job table is flushed to the state file.
    pub flush_interval: Duration,
    /// How often expired jobs are cleaned out.
    pub clean_interval: Duration,
    /// Snapshot location. None keeps the store in memory only.
    pub state_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8750"
                .parse()
                .expect("default listen address is valid"),
            soft_batch_cap: 25,
            hard_batch_cap: 100,
            retention: chrono::Duration::hours(1),
            tick_interval: Duration::from_millis(200),
            flush_interval: Duration::from_secs(2),
            clean_interval: Duration::from_secs(60),
            state_path: None,
        }
    }
}

impl BridgeConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    pub fn with_batch_caps(mut self, soft: usize, hard: usize) -> Self {
        self.soft_batch_cap = soft;
        self.hard_batch_cap = hard;
        self
    }
}
