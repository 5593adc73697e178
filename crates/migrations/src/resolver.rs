//! Connection resolution
//!
//! Migrations may target a named connection; the migrator never looks one up
//! globally but asks the [`ConnectionResolver`] it was constructed with.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backends::{self, DatabaseConnection, DatabasePoolConfig};
use crate::error::{MigrationError, MigrationResult};

/// Resolves connection names to live connections
pub trait ConnectionResolver: Send + Sync {
    /// Resolve `name`, or the default connection when `None`
    fn connection(&self, name: Option<&str>) -> MigrationResult<Arc<dyn DatabaseConnection>>;

    /// Name of the default connection
    fn default_connection(&self) -> String;
}

/// Map-backed resolver holding every configured connection
#[derive(Clone)]
pub struct ConnectionManager {
    connections: HashMap<String, Arc<dyn DatabaseConnection>>,
    default: String,
}

impl ConnectionManager {
    /// Create a manager whose default connection is `name`
    pub fn new(name: impl Into<String>, connection: Arc<dyn DatabaseConnection>) -> Self {
        let name = name.into();
        let mut connections = HashMap::new();
        connections.insert(name.clone(), connection);
        Self {
            connections,
            default: name,
        }
    }

    /// Register an additional named connection
    pub fn with_connection(mut self, name: impl Into<String>, connection: Arc<dyn DatabaseConnection>) -> Self {
        self.connections.insert(name.into(), connection);
        self
    }

    /// Connect to every `(name, url)` pair; the first becomes the default
    pub async fn connect_all<I, S>(urls: I, config: &DatabasePoolConfig) -> MigrationResult<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut manager: Option<ConnectionManager> = None;

        for (name, url) in urls {
            let name = name.into();
            let url = url.into();
            let connection = backends::connect(&url, config).await?;
            manager = Some(match manager {
                Some(existing) => existing.with_connection(name, connection),
                None => ConnectionManager::new(name, connection),
            });
        }

        manager.ok_or_else(|| MigrationError::Configuration("No database connections configured".to_string()))
    }

    /// Change the default connection
    pub fn set_default(&mut self, name: impl Into<String>) -> MigrationResult<()> {
        let name = name.into();
        if !self.connections.contains_key(&name) {
            return Err(MigrationError::UnknownConnection(name));
        }
        self.default = name;
        Ok(())
    }

    /// Names of all configured connections
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every pool
    pub async fn close_all(&self) -> MigrationResult<()> {
        for connection in self.connections.values() {
            connection.close().await?;
        }
        Ok(())
    }
}

impl ConnectionResolver for ConnectionManager {
    fn connection(&self, name: Option<&str>) -> MigrationResult<Arc<dyn DatabaseConnection>> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| MigrationError::UnknownConnection(name.to_string()))
    }

    fn default_connection(&self) -> String {
        self.default.clone()
    }
}
