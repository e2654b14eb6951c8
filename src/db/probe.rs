// Database List Probe
// Throwaway connection used by configuration screens to list the databases
// reachable with a set of credentials

use crate::db::settings::ConnectionSettings;
use crate::db::traits::{DatabaseError, DatabaseType, DbConnection};
use crate::db::unified::UnifiedConnection;
use serde::{Deserialize, Serialize};

/// Database PostgreSQL sessions attach to when no database is chosen yet
const POSTGRES_MAINTENANCE_DB: &str = "postgres";

/// Ad-hoc credentials typed into a connection form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCredentials {
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
    pub password: Option<String>,
}

impl ProbeCredentials {
    /// Empty form fields count as "not set"
    pub fn new(host: &str, port: Option<u16>, user: &str, password: Option<&str>) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.filter(|p| !p.is_empty()).map(str::to_string),
        }
    }

    fn settings(&self, database_type: DatabaseType) -> ConnectionSettings {
        let mut builder = ConnectionSettings::builder();
        builder
            .set_host(self.host.as_str())
            .set_port(self.port)
            .set_user(self.user.as_str())
            .set_password(self.password.as_deref());
        if database_type == DatabaseType::Postgresql {
            builder.set_db_name(Some(POSTGRES_MAINTENANCE_DB));
        }
        builder.build()
    }
}

async fn try_list_databases(
    database_type: DatabaseType,
    credentials: &ProbeCredentials,
) -> Result<Vec<String>, DatabaseError> {
    let mut conn = UnifiedConnection::open(database_type, credentials.settings(database_type)).await?;
    let databases = conn.database_list().await;
    if let Err(e) = conn.close().await {
        tracing::debug!(error = %e, "probe connection did not close cleanly");
    }
    databases
}

/// List the databases visible with `credentials`. Any failure (bad
/// credentials, unreachable host) yields an empty list.
pub async fn list_databases(database_type: DatabaseType, credentials: &ProbeCredentials) -> Vec<String> {
    match try_list_databases(database_type, credentials).await {
        Ok(databases) => databases,
        Err(e) => {
            tracing::debug!(
                database_type = database_type.display_name(),
                host = %credentials.host,
                error = %e,
                "database probe failed"
            );
            Vec::new()
        }
    }
}

/// [`list_databases`] rendered as a JSON array
pub async fn list_databases_json(database_type: DatabaseType, credentials: &ProbeCredentials) -> String {
    let databases = list_databases(database_type, credentials).await;
    serde_json::to_string(&databases).unwrap_or_else(|_| "[]".to_string())
}
