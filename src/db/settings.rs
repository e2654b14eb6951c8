// Connection Settings
// Immutable connection parameters, their builder, and the named record used
// to persist a connection

use crate::db::traits::{DatabaseError, DatabaseType};
use serde::{Deserialize, Serialize};

/// Parameters a backend needs to open its native handle.
///
/// Settings are immutable once built; use [`ConnectionSettings::builder`] or
/// [`ConnectionSettings::to_builder`] to derive new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(rename = "dbname")]
    db_name: Option<String>,
    charset: Option<String>,
    persistent: bool,

    // SQL Server specific options
    mssql_instance: Option<String>,
    /// Driver name for ODBC-style setups. Kept for round-tripping persisted
    /// records; the native TDS client does not use it.
    mssql_odbc_driver: Option<String>,
    /// Full connection string that replaces the generated one
    mssql_dsn: Option<String>,
    mssql_trust_cert: bool,
    mssql_encrypt: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            user: None,
            password: None,
            db_name: None,
            charset: None,
            persistent: false,
            mssql_instance: None,
            mssql_odbc_driver: None,
            mssql_dsn: None,
            mssql_trust_cert: true,
            mssql_encrypt: false,
        }
    }
}

impl ConnectionSettings {
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }

    /// Start a builder pre-filled with these settings
    pub fn to_builder(&self) -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder {
            settings: self.clone(),
        }
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn port_or_default(&self, database_type: DatabaseType) -> u16 {
        self.port.unwrap_or_else(|| database_type.default_port())
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn db_name(&self) -> Option<&str> {
        self.db_name.as_deref()
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// No charset, or one of the UTF-8 spellings
    pub fn is_utf8_charset(&self) -> bool {
        match self.charset.as_deref() {
            None => true,
            Some(charset) => matches!(
                charset.to_ascii_lowercase().as_str(),
                "utf8" | "utf-8" | "utf8mb4"
            ),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn mssql_instance(&self) -> Option<&str> {
        self.mssql_instance.as_deref()
    }

    pub fn mssql_odbc_driver(&self) -> Option<&str> {
        self.mssql_odbc_driver.as_deref()
    }

    pub fn mssql_dsn(&self) -> Option<&str> {
        self.mssql_dsn.as_deref()
    }

    pub fn mssql_trust_cert(&self) -> bool {
        self.mssql_trust_cert
    }

    pub fn mssql_encrypt(&self) -> bool {
        self.mssql_encrypt
    }

    /// Same settings bound to another database
    pub fn with_db_name(&self, db_name: &str) -> Self {
        self.to_builder().set_db_name(Some(db_name)).build()
    }

    /// Check that the settings carry what `database_type` needs to connect
    pub fn validate(&self, database_type: DatabaseType) -> Result<(), DatabaseError> {
        if database_type == DatabaseType::Mssql && self.mssql_dsn.is_some() {
            return Ok(());
        }
        if self.host.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(DatabaseError::InvalidConfig("Host is required".to_string()));
        }
        if self.user.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(DatabaseError::InvalidConfig("Username is required".to_string()));
        }
        if self.port == Some(0) {
            return Err(DatabaseError::InvalidConfig("Port must not be 0".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`ConnectionSettings`]
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettingsBuilder {
    settings: ConnectionSettings,
}

impl ConnectionSettingsBuilder {
    pub fn set_host(&mut self, host: impl Into<String>) -> &mut Self {
        self.settings.host = Some(host.into());
        self
    }

    pub fn set_port(&mut self, port: Option<u16>) -> &mut Self {
        self.settings.port = port;
        self
    }

    pub fn set_user(&mut self, user: impl Into<String>) -> &mut Self {
        self.settings.user = Some(user.into());
        self
    }

    pub fn set_password(&mut self, password: Option<&str>) -> &mut Self {
        self.settings.password = password.map(str::to_string);
        self
    }

    pub fn set_db_name(&mut self, db_name: Option<&str>) -> &mut Self {
        self.settings.db_name = db_name.map(str::to_string);
        self
    }

    pub fn set_charset(&mut self, charset: Option<&str>) -> &mut Self {
        self.settings.charset = charset.map(str::to_string);
        self
    }

    pub fn set_persistent(&mut self, persistent: bool) -> &mut Self {
        self.settings.persistent = persistent;
        self
    }

    pub fn set_mssql_instance(&mut self, instance: Option<&str>) -> &mut Self {
        self.settings.mssql_instance = instance.map(str::to_string);
        self
    }

    pub fn set_mssql_odbc_driver(&mut self, driver: Option<&str>) -> &mut Self {
        self.settings.mssql_odbc_driver = driver.map(str::to_string);
        self
    }

    pub fn set_mssql_dsn(&mut self, dsn: Option<&str>) -> &mut Self {
        self.settings.mssql_dsn = dsn.map(str::to_string);
        self
    }

    pub fn set_mssql_trust_cert(&mut self, trust: bool) -> &mut Self {
        self.settings.mssql_trust_cert = trust;
        self
    }

    pub fn set_mssql_encrypt(&mut self, encrypt: bool) -> &mut Self {
        self.settings.mssql_encrypt = encrypt;
        self
    }

    pub fn build(&self) -> ConnectionSettings {
        self.settings.clone()
    }
}

/// A named connection as stored by callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedConnection {
    pub name: String,
    pub database_type: DatabaseType,
    #[serde(flatten)]
    pub settings: ConnectionSettings,
}

impl PersistedConnection {
    pub fn new(name: impl Into<String>, database_type: DatabaseType, settings: ConnectionSettings) -> Self {
        Self {
            name: name.into(),
            database_type,
            settings,
        }
    }

    pub fn validate(&self) -> Result<(), DatabaseError> {
        if self.name.trim().is_empty() {
            return Err(DatabaseError::InvalidConfig("Connection name is required".to_string()));
        }
        self.settings.validate(self.database_type)
    }
}
