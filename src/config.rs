//! Config model and persistence helpers.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::queue::{QueueOptions, RetryPolicy};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Upload endpoint settings.
    pub server: ServerCfg,
    /// Scheduler and retry settings.
    pub queue: QueueCfg,
    /// Checks applied before a file is queued.
    pub limits: LimitsCfg,
    #[serde(default)]
    pub logging: LoggingCfg,
}

/// Remote endpoint used by the transfer executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerCfg {
    /// Base URL; uploads go to `{base_url}/api/upload`.
    pub base_url: String,
    /// Hard deadline for a single upload request.
    pub timeout_secs: u64,
}

/// Admission control and retry knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueCfg {
    /// Uploads allowed in flight at once.
    pub max_concurrent_uploads: usize,
    /// Retries granted to a job before it stays failed.
    pub max_retry_attempts: u32,
    /// Re-queue failed uploads on their own; off leaves them for manual retry.
    #[serde(default = "enabled")]
    pub auto_retry: bool,
    /// Period of the scheduler safety tick.
    pub tick_ms: u64,
}

/// Size/type checks performed when adding files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsCfg {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Accepted MIME types; empty accepts everything.
    pub allowed_types: Vec<String>,
}

/// File logging switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingCfg {
    /// Write `upload_tui.log`; off installs no subscriber.
    pub enabled: bool,
}

impl Default for LoggingCfg {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// Apply `UPLOADER_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup; bad numbers are skipped.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("UPLOADER_API_URL") {
            self.server.base_url = url;
        }
        override_num(&lookup, "UPLOADER_API_TIMEOUT_SECS", &mut self.server.timeout_secs);
        override_num(
            &lookup,
            "UPLOADER_MAX_CONCURRENT_UPLOADS",
            &mut self.queue.max_concurrent_uploads,
        );
        override_num(
            &lookup,
            "UPLOADER_MAX_RETRY_ATTEMPTS",
            &mut self.queue.max_retry_attempts,
        );
        override_num(&lookup, "UPLOADER_MAX_FILE_SIZE", &mut self.limits.max_file_size);
        // Only an explicit "false" turns logging off.
        if let Some(flag) = lookup("UPLOADER_ENABLE_LOGGING") {
            self.logging.enabled = flag.trim() != "false";
        }
        if let Some(types) = lookup("UPLOADER_ALLOWED_FILE_TYPES") {
            self.limits.allowed_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
    }

    /// Reject settings the queue cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.trim().is_empty() {
            bail!("server.base_url is not set");
        }
        if self.server.timeout_secs == 0 {
            bail!("server.timeout_secs must be at least 1");
        }
        if self.queue.max_concurrent_uploads == 0 {
            bail!("queue.max_concurrent_uploads must be at least 1");
        }
        if self.queue.tick_ms == 0 {
            bail!("queue.tick_ms must be at least 1");
        }
        Ok(())
    }

    /// Upload request deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    /// Scheduler settings derived from the `[queue]` section.
    pub fn queue_options(&self) -> QueueOptions {
        QueueOptions {
            max_concurrent_uploads: self.queue.max_concurrent_uploads,
            retry: RetryPolicy::new(self.queue.max_retry_attempts),
            auto_retry: self.queue.auto_retry,
            tick: Duration::from_millis(self.queue.tick_ms),
        }
    }
}

fn enabled() -> bool {
    true
}

fn override_num<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!("ignoring {key}={raw:?}: not a number"),
        }
    }
}

impl Default for Config {
    /// Local development server, two slots, three retries.
    fn default() -> Self {
        Self {
            server: ServerCfg {
                base_url: "http://localhost:3001".into(),
                timeout_secs: 300,
            },
            queue: QueueCfg {
                max_concurrent_uploads: 2,
                max_retry_attempts: 3,
                auto_retry: true,
                tick_ms: 1000,
            },
            limits: LimitsCfg {
                max_file_size: 10 * 1024 * 1024,
                allowed_types: vec![
                    "image/jpeg".into(),
                    "image/png".into(),
                    "application/pdf".into(),
                ],
            },
            logging: LoggingCfg::default(),
        }
    }
}
