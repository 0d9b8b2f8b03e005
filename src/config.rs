//! Pool configuration.
//!
//! Configuration can be built in code or loaded from environment variables
//! prefixed with `PMROOT_`:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `PMROOT_POOL_PATH` | Backing file; unset means anonymous memory | unset |
//! | `PMROOT_POOL_SIZE` | Pool capacity in bytes | 67108864 (64MB) |
//! | `PMROOT_ROOT_SIZE` | Size of the root region created on first use | 4096 |
//! | `PMROOT_HEADER_LAYOUT` | `standard` (count at 12) or `compact` (count at 8) | standard |
//! | `PMROOT_OBJECT_TYPE` | Type number visited by sweeps | 1 |
//!
//! Unparseable values are ignored with a warning and the default is kept.

use std::env;
use std::path::PathBuf;

use log::warn;

use crate::header::HeaderLayout;
use crate::pool::{TypeNum, GENERIC_TYPE_NUM};

/// Settings for opening a pool and sweeping it.
///
/// # Examples
///
/// ```
/// use pmroot::config::PoolConfig;
/// use pmroot::header::HeaderLayout;
///
/// let default_config = PoolConfig::default();
/// assert_eq!(default_config.root_size, 4096);
/// assert_eq!(default_config.header_layout, HeaderLayout::STANDARD);
///
/// let custom = PoolConfig::builder()
///     .pool_size(1024 * 1024)
///     .header_layout(HeaderLayout::COMPACT)
///     .build();
/// assert_eq!(custom.pool_size, 1024 * 1024);
/// assert!(custom.pool_path.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub pool_path: Option<PathBuf>,
    pub pool_size: u64,
    pub root_size: u64,
    pub header_layout: HeaderLayout,
    pub object_type: TypeNum,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_path: None,
            pool_size: 64 * 1024 * 1024, // 64MB
            root_size: 4096,
            header_layout: HeaderLayout::STANDARD,
            object_type: GENERIC_TYPE_NUM,
        }
    }
}

impl PoolConfig {
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Load from `PMROOT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, using the same keys as
    /// [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(path) = lookup("PMROOT_POOL_PATH").filter(|p| !p.trim().is_empty()) {
            config.pool_path = Some(PathBuf::from(path));
        }

        if let Some(val) = parse_u64(&lookup, "PMROOT_POOL_SIZE") {
            config.pool_size = val;
        }

        if let Some(val) = parse_u64(&lookup, "PMROOT_ROOT_SIZE") {
            if val > 0 {
                config.root_size = val;
            }
        }

        if let Some(val) = lookup("PMROOT_HEADER_LAYOUT") {
            match parse_layout(&val) {
                Some(layout) => config.header_layout = layout,
                None => {
                    warn!("Ignoring PMROOT_HEADER_LAYOUT={val:?}; expected standard or compact")
                }
            }
        }

        if let Some(val) = parse_u64(&lookup, "PMROOT_OBJECT_TYPE") {
            match TypeNum::try_from(val) {
                Ok(type_num) => config.object_type = type_num,
                Err(_) => warn!("Ignoring PMROOT_OBJECT_TYPE={val}; out of range"),
            }
        }

        config
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!("Ignoring {key}={raw:?}; expected an unsigned integer");
            None
        }
    }
}

fn parse_layout(s: &str) -> Option<HeaderLayout> {
    match s.trim().to_lowercase().as_str() {
        "standard" | "default" => Some(HeaderLayout::STANDARD),
        "compact" | "legacy" => Some(HeaderLayout::COMPACT),
        _ => None,
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn pool_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pool_path = Some(path.into());
        self
    }

    pub fn pool_size(mut self, bytes: u64) -> Self {
        self.config.pool_size = bytes;
        self
    }

    pub fn root_size(mut self, bytes: u64) -> Self {
        self.config.root_size = bytes;
        self
    }

    pub fn header_layout(mut self, layout: HeaderLayout) -> Self {
        self.config.header_layout = layout;
        self
    }

    pub fn object_type(mut self, type_num: TypeNum) -> Self {
        self.config.object_type = type_num;
        self
    }

    pub fn build(self) -> PoolConfig {
        self.config
    }
}
