use crate::core::{DbError, Result};
use crate::metadata::EntityMetadata;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const URL_SCHEME: &str = "memorm://";

/// Optional logging switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebugCategory {
    /// Log every count/find as SQL-like text on target `memorm::query`.
    Query,
    /// Inline parameter values into logged queries.
    QueryParams,
    /// Log the resolved metadata during `Orm::init`.
    Discovery,
}

/// ORM configuration
///
/// Built fluently, or from a connection URL:
///
/// ```
/// use memorm::OrmConfig;
///
/// let config = OrmConfig::from_url("memorm://localhost:7000/shop").unwrap();
/// assert_eq!(config.db_name, "shop");
/// assert_eq!(config.port, 7000);
/// ```
#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// Database name, used in diagnostics
    pub db_name: String,

    /// Host from the connection URL (diagnostics only)
    pub host: String,

    /// Port from the connection URL (diagnostics only)
    pub port: u16,

    /// Entity declarations
    pub entities: Vec<EntityMetadata>,

    /// Enabled debug categories
    pub debug: HashSet<DebugCategory>,

    /// Create all tables during `Orm::init`
    pub ensure_schema: bool,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            db_name: "memorm".to_string(),
            host: "localhost".to_string(),
            port: 0,
            entities: Vec::new(),
            debug: HashSet::new(),
            ensure_schema: true,
        }
    }

    /// Set the database name
    pub fn db_name(mut self, name: &str) -> Self {
        self.db_name = name.to_string();
        self
    }

    /// Set the entity declarations
    pub fn entities(mut self, entities: Vec<EntityMetadata>) -> Self {
        self.entities = entities;
        self
    }

    /// Add one entity declaration
    pub fn entity(mut self, entity: EntityMetadata) -> Self {
        self.entities.push(entity);
        self
    }

    /// Enable debug categories
    pub fn debug(mut self, categories: &[DebugCategory]) -> Self {
        self.debug.extend(categories.iter().copied());
        self
    }

    /// Whether `init` creates the tables
    pub fn ensure_schema(mut self, ensure: bool) -> Self {
        self.ensure_schema = ensure;
        self
    }

    pub fn is_debug_enabled(&self, category: DebugCategory) -> bool {
        self.debug.contains(&category)
    }

    /// Parse from connection string
    ///
    /// Format: "memorm://host[:port]/db_name"
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix(URL_SCHEME).ok_or_else(|| {
            DbError::ConfigError(format!("URL must start with '{}'", URL_SCHEME))
        })?;

        let (authority, db_name) = rest
            .split_once('/')
            .ok_or_else(|| DbError::ConfigError("Invalid host/database format".to_string()))?;
        if db_name.is_empty() || db_name.contains('/') {
            return Err(DbError::ConfigError(format!("Invalid database name '{}'", db_name)));
        }

        let (host, port) = match authority.split_once(':') {
            Some((host, port)) => (
                host,
                port.parse()
                    .map_err(|_| DbError::ConfigError(format!("Invalid port '{}'", port)))?,
            ),
            None => (authority, 0),
        };
        if host.is_empty() {
            return Err(DbError::ConfigError("Host cannot be empty".to_string()));
        }

        let mut config = Self::new().db_name(db_name);
        config.host = host.to_string();
        config.port = port;
        Ok(config)
    }

    /// Convert to connection string
    pub fn to_url(&self) -> String {
        if self.port == 0 {
            format!("{}{}/{}", URL_SCHEME, self.host, self.db_name)
        } else {
            format!("{}{}:{}/{}", URL_SCHEME, self.host, self.port, self.db_name)
        }
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}
