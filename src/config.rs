use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REPOSITORY: &str = "dotnet/runtime";
pub const DEFAULT_SNAPSHOT_URL: &str =
    "https://github.com/radekdoulik/WasmPerformanceMeasurements/raw/main/measurements/slices/last.zip";

/// Shape of the worker pool created when no worker documents exist yet.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of workers created on first start
    pub size: u32,
    /// Address prefix; the host part is `host_offset + id`
    pub address_prefix: String,
    pub host_offset: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 3,
            address_prefix: "192.168.2.".to_string(),
            host_offset: 172,
        }
    }
}

impl PoolConfig {
    pub fn address_for(&self, worker_id: u32) -> String {
        format!("{}{}", self.address_prefix, self.host_offset + worker_id)
    }
}

/// Timing of the upstream commit poll.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay before a reissued poll queries upstream for the first time
    pub reissue_delay: Duration,
    /// Wait between queries while upstream has nothing new
    pub interval: Duration,
    /// Wait after a malformed upstream reply
    pub retry_delay: Duration,
    /// Minimum time between two dispatches of discovered commits
    pub cooldown: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            reissue_delay: Duration::from_secs(5 * 60),
            interval: Duration::from_secs(5 * 60),
            retry_delay: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(50 * 60),
        }
    }
}

/// How benchmark jobs are launched and observed on a worker.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Program used to reach a worker (`ssh <address> <command>`)
    pub program: String,
    /// Checkout of the benchmark scripts on the worker
    pub scripts_dir: String,
    /// Log file the benchmark script appends to on the worker
    pub log_file: String,
    /// Line written to the log when a benchmark run finishes
    pub completion_marker: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            scripts_dir: "~/bench-results-tools".to_string(),
            log_file: "~/git/worker-bench.log".to_string(),
            completion_marker: "Done".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Directory holding `controller.json` and the `node{id}.json` documents
    pub state_dir: PathBuf,
    /// Upstream repository in `owner/name` form
    pub repository: String,
    /// Published coverage snapshot (zip archive with an `index.json`)
    pub snapshot_url: String,
    /// Trailing window of upstream history considered for backfill
    pub history_window: Duration,
    pub pool: PoolConfig,
    pub poll: PollConfig,
    pub remote: RemoteConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            repository: DEFAULT_REPOSITORY.to_string(),
            snapshot_url: DEFAULT_SNAPSHOT_URL.to_string(),
            history_window: Duration::from_secs(14 * 24 * 60 * 60),
            pool: PoolConfig::default(),
            poll: PollConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    pub fn with_snapshot_url(mut self, url: impl Into<String>) -> Self {
        self.snapshot_url = url.into();
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool.size = size;
        self
    }
}
