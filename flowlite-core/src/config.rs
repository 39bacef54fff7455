//! Engine configuration.
//!
//! Built programmatically with chained `with_*` calls, or from the
//! environment:
//!
//!   FLOWLITE_URL            store URL (default: `mem:flowlite;DB_CLOSE_DELAY=-1`)
//!   FLOWLITE_USERNAME       store user (default: `sa`)
//!   FLOWLITE_PASSWORD       store password (default: empty)
//!   FLOWLITE_DRIVER         store driver (default: `flowlite.memory`)
//!   FLOWLITE_SCHEMA_UPDATE  `true` | `false` | `create-drop` (default: `true`)
//!   FLOWLITE_RESOURCE_ROOT  directory for resource lookups (default: `.`)
//!   FLOWLITE_HISTORY_LEVEL  `none` | `activity` (default: `activity`)

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_URL: &str = "mem:flowlite;DB_CLOSE_DELAY=-1";
pub const MEMORY_DRIVER: &str = "flowlite.memory";

/// What the engine does with the store schema at build and close time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaUpdate {
    /// Create the schema if it is missing.
    #[default]
    True,
    /// Require an existing schema.
    False,
    /// Create at build, drop at close.
    CreateDrop,
}

impl SchemaUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::True => "true",
            Self::False => "false",
            Self::CreateDrop => "create-drop",
        }
    }
}

impl FromStr for SchemaUpdate {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Self::True),
            "false" => Ok(Self::False),
            "create-drop" => Ok(Self::CreateDrop),
            other => Err(EngineError::Config(format!(
                "unknown schema update policy '{other}' (expected true, false or create-drop)"
            ))),
        }
    }
}

impl fmt::Display for SchemaUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryLevel {
    None,
    #[default]
    Activity,
}

impl FromStr for HistoryLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "activity" => Ok(Self::Activity),
            other => Err(EngineError::Config(format!(
                "unknown history level '{other}' (expected none or activity)"
            ))),
        }
    }
}

/// Parsed store URL: `<scheme>:<name>[;KEY=VALUE...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUrl {
    pub scheme: String,
    pub name: String,
    pub options: BTreeMap<String, String>,
}

impl FromStr for StoreUrl {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| EngineError::Config(format!("store URL '{s}' has no scheme")))?;
        let mut parts = rest.split(';');
        let name = parts.next().unwrap_or_default().trim();
        if name.is_empty() {
            return Err(EngineError::Config(format!("store URL '{s}' has no name")));
        }

        let mut options = BTreeMap::new();
        for part in parts.filter(|p| !p.trim().is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                EngineError::Config(format!("store URL option '{part}' is not KEY=VALUE"))
            })?;
            options.insert(key.trim().to_string(), value.trim().to_string());
        }

        Ok(Self {
            scheme: scheme.trim().to_ascii_lowercase(),
            name: name.to_string(),
            options,
        })
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub driver: String,
    pub schema_update: SchemaUpdate,
    /// Base directory for `add_classpath_resource` lookups.
    pub resource_root: PathBuf,
    pub history_level: HistoryLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standalone_in_memory()
    }
}

// Never print the password.
impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("driver", &self.driver)
            .field("schema_update", &self.schema_update)
            .field("resource_root", &self.resource_root)
            .field("history_level", &self.history_level)
            .finish()
    }
}

impl EngineConfig {
    pub fn standalone_in_memory() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            username: "sa".to_string(),
            password: String::new(),
            driver: MEMORY_DRIVER.to_string(),
            schema_update: SchemaUpdate::True,
            resource_root: PathBuf::from("."),
            history_level: HistoryLevel::Activity,
        }
    }

    /// Load from `FLOWLITE_*` variables (and `.env`, if present).
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EngineResult<Self> {
        let mut config = Self::standalone_in_memory();
        if let Some(url) = lookup("FLOWLITE_URL") {
            config.url = url;
        }
        if let Some(username) = lookup("FLOWLITE_USERNAME") {
            config.username = username;
        }
        if let Some(password) = lookup("FLOWLITE_PASSWORD") {
            config.password = password;
        }
        if let Some(driver) = lookup("FLOWLITE_DRIVER") {
            config.driver = driver;
        }
        if let Some(policy) = lookup("FLOWLITE_SCHEMA_UPDATE") {
            config.schema_update = policy.parse()?;
        }
        if let Some(root) = lookup("FLOWLITE_RESOURCE_ROOT") {
            config.resource_root = PathBuf::from(root);
        }
        if let Some(level) = lookup("FLOWLITE_HISTORY_LEVEL") {
            config.history_level = level.parse()?;
        }
        Ok(config)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_schema_update(mut self, policy: SchemaUpdate) -> Self {
        self.schema_update = policy;
        self
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = root.into();
        self
    }

    pub fn with_history_level(mut self, level: HistoryLevel) -> Self {
        self.history_level = level;
        self
    }

    /// Check the URL and driver agree and name a supported store.
    pub fn validate(&self) -> EngineResult<StoreUrl> {
        let url: StoreUrl = self.url.parse()?;
        match url.scheme.as_str() {
            "mem" => {
                if self.driver != MEMORY_DRIVER {
                    return Err(EngineError::Config(format!(
                        "driver '{}' cannot open '{}' (expected {MEMORY_DRIVER})",
                        self.driver, self.url
                    )));
                }
            }
            other => {
                return Err(EngineError::Config(format!(
                    "unsupported store scheme '{other}'"
                )))
            }
        }
        if self.username.trim().is_empty() {
            return Err(EngineError::Config("username must not be empty".into()));
        }
        Ok(url)
    }
}
