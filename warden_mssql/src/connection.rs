//! Pools of tiberius clients.

use std::time::Duration;

use async_trait::async_trait;
use bb8::Pool;
use bb8_tiberius::ConnectionManager;
use tiberius::{AuthMethod, Config, EncryptionLevel};
use tracing::debug;
use warden_core::config::ServerConfig;
use warden_core::{Error, Result, Scope};

use crate::pool::PoolFactory;

/// A bb8 pool of tiberius clients bound to one database.
pub type MssqlPool = Pool<ConnectionManager>;

/// Builds [`MssqlPool`]s for the databases of one server.
pub struct TiberiusFactory {
    config: ServerConfig,
}

impl TiberiusFactory {
    /// Basic constructor.
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// `host:port` of the server.
    pub fn server_id(&self) -> String {
        self.config.server_id()
    }

    fn tiberius_config(&self, database: &str) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.authentication(AuthMethod::sql_server(
            &self.config.username,
            &self.config.password,
        ));
        config.database(database);
        config.application_name(&self.config.application_name);
        config.encryption(if self.config.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::NotSupported
        });
        if self.config.trust_cert {
            config.trust_cert();
        }
        config
    }
}

#[async_trait]
impl PoolFactory for TiberiusFactory {
    type Pool = MssqlPool;

    async fn open(&self, database: &str) -> Result<MssqlPool> {
        let manager = ConnectionManager::new(self.tiberius_config(database));
        Ok(Pool::builder()
            .max_size(self.config.pool_max_size)
            .connection_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .build_unchecked(manager))
    }

    async fn probe(&self, database: &str, pool: &MssqlPool) -> Result<()> {
        let scope = Scope::database(self.server_id(), database);
        let offline = |e: &dyn std::fmt::Display| Error::connectivity(scope.clone(), e);
        debug!("probing {scope}");
        let mut conn = pool.get().await.map_err(|e| offline(&e))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| offline(&e))?
            .into_results()
            .await
            .map_err(|e| offline(&e))?;
        Ok(())
    }
}
