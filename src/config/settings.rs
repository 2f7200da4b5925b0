use serde::Deserialize;

/// Top-level configuration settings for the broker process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
    pub log: LogSettings,
}

/// Where the WebSocket transport listens and how long it waits for a
/// service to answer a delivery.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub ack_timeout_ms: u64,
}

/// Delivery engine tuning.
///
/// All durations are milliseconds. `default_ttl` and `max_ttl` count
/// delivery attempts, not time.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct QueueSettings {
    pub default_ttl: i64,
    pub max_ttl: i64,
    pub timeout_ms: i64,
    pub error_ratio_ms: i64,
    pub flush_interval_ms: u64,
    pub flush_limit: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageSettings {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

impl QueueSettings {
    /// Clamps a requested TTL into `0..=max_ttl`, falling back to
    /// `default_ttl` when nothing usable is left.
    pub fn effective_ttl(&self, requested: Option<i64>) -> i64 {
        match requested.map(|ttl| ttl.min(self.max_ttl).max(0)) {
            Some(ttl) if ttl > 0 => ttl,
            _ => self.default_ttl,
        }
    }

    /// Checks that every knob is strictly positive.
    pub fn validate(&self) -> Result<(), String> {
        let checks: [(&str, bool); 6] = [
            ("queue.default_ttl", self.default_ttl > 0),
            ("queue.max_ttl", self.max_ttl > 0),
            ("queue.timeout_ms", self.timeout_ms > 0),
            ("queue.error_ratio_ms", self.error_ratio_ms > 0),
            ("queue.flush_interval_ms", self.flush_interval_ms > 0),
            ("queue.flush_limit", self.flush_limit > 0),
        ];
        match checks.iter().find(|(_, ok)| !ok) {
            Some((name, _)) => Err(format!("{name} must be positive")),
            None => Ok(()),
        }
    }
}

/// Partial configuration loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub queue: Option<PartialQueueSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ack_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialQueueSettings {
    pub default_ttl: Option<i64>,
    pub max_ttl: Option<i64>,
    pub timeout_ms: Option<i64>,
    pub error_ratio_ms: Option<i64>,
    pub flush_interval_ms: Option<u64>,
    pub flush_limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                ack_timeout_ms: 30_000,
            },
            queue: QueueSettings::default(),
            storage: StorageSettings {
                path: "relayq_db".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_ttl: 1800,
            max_ttl: 1800,
            timeout_ms: 5000,
            error_ratio_ms: 1000,
            flush_interval_ms: 5000,
            flush_limit: 20,
        }
    }
}

impl PartialSettings {
    /// Overlays the values that were provided on top of `base`.
    pub fn merge_onto(self, base: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let queue = self.queue.unwrap_or_default();
        let storage = self.storage.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(base.server.host),
                port: server.port.unwrap_or(base.server.port),
                ack_timeout_ms: server.ack_timeout_ms.unwrap_or(base.server.ack_timeout_ms),
            },
            queue: QueueSettings {
                default_ttl: queue.default_ttl.unwrap_or(base.queue.default_ttl),
                max_ttl: queue.max_ttl.unwrap_or(base.queue.max_ttl),
                timeout_ms: queue.timeout_ms.unwrap_or(base.queue.timeout_ms),
                error_ratio_ms: queue.error_ratio_ms.unwrap_or(base.queue.error_ratio_ms),
                flush_interval_ms: queue
                    .flush_interval_ms
                    .unwrap_or(base.queue.flush_interval_ms),
                flush_limit: queue.flush_limit.unwrap_or(base.queue.flush_limit),
            },
            storage: StorageSettings {
                path: storage.path.unwrap_or(base.storage.path),
            },
            log: LogSettings {
                level: log.level.unwrap_or(base.log.level),
            },
        }
    }
}
