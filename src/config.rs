use lazy_static::lazy_static;
use parking_lot::RwLock;
use std::env;
use std::fs;
use std::path::Path;

lazy_static! {
    static ref CONFIG: RwLock<DemuxConfig> = RwLock::new(DemuxConfig::load());
}

/// Tunables for a demuxer instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DemuxConfig {
    /// Number of packets held by the input cache.
    pub cache_packets: usize,
    /// Starting capacity of an unbounded PES payload buffer.
    pub unbounded_initial_capacity: usize,
    /// Accepted distance, in seconds, between a seek target and the time reached.
    pub seek_tolerance: f64,
    /// Upper bound on seek refinement passes.
    pub seek_max_iterations: usize,
    /// Bytes scanned from each end of the input while probing duration.
    pub probe_limit: u64,
    /// Drop PSI sections whose CRC32 does not match.
    pub verify_crc: bool,
    /// `log` target used for every record emitted by the demuxer.
    pub log_target: String,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            cache_packets: 188,
            unbounded_initial_capacity: 128 * 1024,
            seek_tolerance: 0.5,
            seek_max_iterations: 10,
            probe_limit: 16 * 1024 * 1024,
            verify_crc: false,
            log_target: String::from("tsdemux"),
        }
    }
}

impl DemuxConfig {
    /// Builds a config from defaults, then `TSDEMUX_*` environment variables,
    /// then the first config file found in the working directory.
    pub fn load() -> Self {
        let mut config = DemuxConfig::default();

        for (key, var) in [
            ("cache_packets", "TSDEMUX_CACHE_PACKETS"),
            ("unbounded_initial_capacity", "TSDEMUX_UNBOUNDED_CAPACITY"),
            ("seek_tolerance", "TSDEMUX_SEEK_TOLERANCE"),
            ("seek_max_iterations", "TSDEMUX_SEEK_MAX_ITERATIONS"),
            ("probe_limit", "TSDEMUX_PROBE_LIMIT"),
            ("verify_crc", "TSDEMUX_VERIFY_CRC"),
            ("log_target", "TSDEMUX_LOG_TARGET"),
        ] {
            if let Ok(value) = env::var(var) {
                config.apply(key, &value);
            }
        }

        let config_paths = ["./tsdemux.toml", "./tsdemux_config.toml"];
        if let Some(content) = config_paths
            .iter()
            .find_map(|path| fs::read_to_string(path).ok())
        {
            config.apply_str(&content);
        }

        config
    }

    /// Applies `key = value` lines; comments, blanks and unknown keys are ignored.
    pub fn apply_str(&mut self, content: &str) {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                self.apply(key.trim(), value);
            }
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        let applied = match key {
            "cache_packets" => value
                .parse()
                .ok()
                .filter(|&n: &usize| n > 0)
                .map(|n| self.cache_packets = n),
            "unbounded_initial_capacity" => value
                .parse()
                .ok()
                .filter(|&n: &usize| n > 0)
                .map(|n| self.unbounded_initial_capacity = n),
            "seek_tolerance" => value
                .parse()
                .ok()
                .filter(|&t: &f64| t > 0.0)
                .map(|t| self.seek_tolerance = t),
            "seek_max_iterations" => value.parse().ok().map(|n| self.seek_max_iterations = n),
            "probe_limit" => value.parse().ok().map(|n| self.probe_limit = n),
            "verify_crc" => value.parse().ok().map(|b| self.verify_crc = b),
            "log_target" if !value.is_empty() => {
                self.log_target = value.to_string();
                Some(())
            }
            _ => None,
        };
        if applied.is_none() {
            log::debug!("ignoring config entry {} = {:?}", key, value);
        }
    }
}

/// Returns a snapshot of the process-wide configuration.
pub fn current() -> DemuxConfig {
    CONFIG.read().clone()
}

/// Re-reads the process-wide configuration from the environment and config files.
pub fn reload() {
    let new_config = DemuxConfig::load();
    *CONFIG.write() = new_config;
}

/// Template written by [`create_default_config_template`] and `build.rs`.
pub const CONFIG_TEMPLATE: &str = r#"# tsdemux configuration
# Every key is optional; defaults are shown.

# Packets held by the input cache
cache_packets = 188

# Starting capacity of unbounded PES payload buffers (bytes)
unbounded_initial_capacity = 131072

# Seek acceptance window (seconds) and refinement passes
seek_tolerance = 0.5
seek_max_iterations = 10

# Bytes scanned from each end of the input when probing duration
probe_limit = 16777216

# Drop PSI sections with a bad CRC32
verify_crc = false

# log target for demuxer records
log_target = "tsdemux"
"#;

/// Creates a default config template file if it doesn't exist
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        fs::write(path, CONFIG_TEMPLATE)?;
    }
    Ok(())
}
