use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::Deserialize;

bitflags! {
    /// Mount-time features the shim asks the framework for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u64 {
        const ASYNC_READ = 1 << 0;
        const POSIX_LOCKS = 1 << 1;
        const ATOMIC_O_TRUNC = 1 << 2;
        const BIG_WRITES = 1 << 3;
        const FLOCK_LOCKS = 1 << 4;
        /// Preallocation through fallocate.
        const ALLOCATE = 1 << 5;
        /// Atomic swap of two paths.
        const EXCHANGE_DATA = 1 << 6;
        const CASE_INSENSITIVE = 1 << 7;
        const VOL_RENAME = 1 << 8;
        /// Creation, change and backup timestamps.
        const XTIMES = 1 << 9;
    }
}

impl Capabilities {
    /// Everything this host can honour.
    pub fn wanted() -> Self {
        let portable = Self::ASYNC_READ
            | Self::POSIX_LOCKS
            | Self::ATOMIC_O_TRUNC
            | Self::BIG_WRITES
            | Self::FLOCK_LOCKS;
        if cfg!(target_os = "macos") {
            portable
                | Self::ALLOCATE
                | Self::EXCHANGE_DATA
                | Self::CASE_INSENSITIVE
                | Self::VOL_RENAME
                | Self::XTIMES
        } else {
            portable
        }
    }

    /// Keep only what the framework offered.
    pub fn negotiate(self, offered: Capabilities) -> Self {
        self & offered
    }

    /// Look up a capability by its flag name, ignoring case.
    pub fn parse_name(name: &str) -> Option<Self> {
        Self::from_name(&name.trim().to_ascii_uppercase())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),
    #[error("root directory {0} is not an accessible directory")]
    InvalidRoot(PathBuf),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Startup configuration, read-only once the filesystem is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory every request path is resolved against.
    pub root_dir: PathBuf,
    /// Upper bound on entries returned by one readdir reply.
    pub readdir_batch: usize,
    pub max_write: u32,
    pub attr_timeout_secs: u64,
    pub entry_timeout_secs: u64,
    /// Capability names to withhold from negotiation.
    pub disabled_capabilities: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root_dir: PathBuf::from("/"),
            readdir_batch: 256,
            max_write: 1024 * 1024,
            attr_timeout_secs: 1,
            entry_timeout_secs: 1,
            disabled_capabilities: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.check_capabilities()?;
        Ok(config)
    }

    /// Check the values that cannot be fixed later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.readdir_batch == 0 {
            return Err(ConfigError::Zero("readdir_batch"));
        }
        if self.max_write == 0 {
            return Err(ConfigError::Zero("max_write"));
        }
        if !self.root_dir.is_dir() {
            return Err(ConfigError::InvalidRoot(self.root_dir.clone()));
        }
        self.check_capabilities()
    }

    fn check_capabilities(&self) -> Result<(), ConfigError> {
        match self
            .disabled_capabilities
            .iter()
            .find(|name| Capabilities::parse_name(name).is_none())
        {
            Some(name) => Err(ConfigError::UnknownCapability(name.clone())),
            None => Ok(()),
        }
    }

    /// Capabilities to request at init: the host default minus the disabled
    /// ones.
    pub fn capabilities(&self) -> Capabilities {
        self.disabled_capabilities
            .iter()
            .filter_map(|name| Capabilities::parse_name(name))
            .fold(Capabilities::wanted(), |caps, cap| caps - cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json(r#"{ "readdir_batch": 8 }"#).unwrap();
        assert_eq!(config.readdir_batch, 8);
        assert_eq!(config.root_dir, PathBuf::from("/"));
        assert_eq!(config.max_write, 1024 * 1024);
        assert_eq!(config.capabilities(), Capabilities::wanted());
    }

    #[test]
    fn disabled_capabilities_are_withheld() {
        let config =
            Config::from_json(r#"{ "disabled_capabilities": ["flock_locks", "ASYNC_READ"] }"#)
                .unwrap();
        let caps = config.capabilities();
        assert!(!caps.contains(Capabilities::FLOCK_LOCKS));
        assert!(!caps.contains(Capabilities::ASYNC_READ));
        assert!(caps.contains(Capabilities::POSIX_LOCKS));
    }

    #[test]
    fn unknown_capability_is_rejected() {
        let err = Config::from_json(r#"{ "disabled_capabilities": ["warp_drive"] }"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCapability(n) if n == "warp_drive"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Config::from_json("{ not json").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn validate_checks_root_and_limits() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config {
            root_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        config.validate().unwrap();

        config.readdir_batch = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Zero("readdir_batch"))));

        config.readdir_batch = 1;
        config.root_dir = tmp.path().join("missing");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRoot(_))));
    }

    #[test]
    fn from_file_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("shimfs.json");
        let err = Config::from_file(&missing).unwrap_err();
        assert!(err.to_string().contains("shimfs.json"));

        std::fs::write(&missing, r#"{ "max_write": 4096 }"#).unwrap();
        assert_eq!(Config::from_file(&missing).unwrap().max_write, 4096);
    }

    #[test]
    fn negotiation_intersects_offer() {
        let wanted = Capabilities::ASYNC_READ | Capabilities::XTIMES;
        let offered = Capabilities::ASYNC_READ | Capabilities::BIG_WRITES;
        assert_eq!(wanted.negotiate(offered), Capabilities::ASYNC_READ);
        let names: Vec<_> = (Capabilities::ASYNC_READ | Capabilities::POSIX_LOCKS)
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, ["ASYNC_READ", "POSIX_LOCKS"]);
    }

    #[test]
    fn names_resolve_through_flag_table() {
        assert_eq!(Capabilities::parse_name("xtimes"), Some(Capabilities::XTIMES));
        assert_eq!(Capabilities::parse_name(" Big_Writes "), Some(Capabilities::BIG_WRITES));
        assert_eq!(Capabilities::parse_name("warp_drive"), None);
    }

    #[test]
    fn struct_update_syntax_keeps_defaults() {
        let config = Config {
            readdir_batch: 4,
            disabled_capabilities: vec!["posix_locks".into()],
            ..Default::default()
        };
        assert!(!config.capabilities().contains(Capabilities::POSIX_LOCKS));
        assert!(config.capabilities().contains(Capabilities::ASYNC_READ));
    }
}
