use crate::backend::{RunnerError, ScriptRunner};
use crate::config::ConfigSource;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ErrorKind, IntoConnectionInfo};
use thiserror::Error;

const HOST_VAR: &str = "REDIS_HOST";
const PORT_VAR: &str = "REDIS_PORT";
const PASSWORD_VAR: &str = "REDIS_PASSWORD";
const DB_VAR: &str = "REDIS_DB";

/// Failure to establish the backend connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("missing redis connection setting {0}")]
    MissingConfig(&'static str),
    #[error("redis error: {0}")]
    Redis(
        #[source]
        #[from]
        redis::RedisError,
    ),
}

/// [ScriptRunner] backed by a Redis server.
///
/// Scripts run via `EVALSHA` and are registered with `SCRIPT LOAD`; Redis
/// executes each script as a single atomic operation, which is what makes the
/// sliding-window decision safe across processes.
#[derive(Clone)]
pub struct RedisScriptRunner {
    connection: ConnectionManager,
    address: String,
}

impl std::fmt::Debug for RedisScriptRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisScriptRunner")
            .field("address", &self.address)
            .finish()
    }
}

impl RedisScriptRunner {
    /// Connect to the Redis server at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self, ConnectError> {
        let info = url.into_connection_info()?;
        // Credentials stay out of the diagnostic address.
        let address = match &info.addr {
            ConnectionAddr::Tcp(host, port) => format!("{host}:{port}"),
            ConnectionAddr::TcpTls { host, port, .. } => format!("{host}:{port}"),
            ConnectionAddr::Unix(path) => path.display().to_string(),
        };
        let client = redis::Client::open(info)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self {
            connection,
            address,
        })
    }

    /// Connect using `REDIS_HOST`/`REDIS_PORT`/`REDIS_PASSWORD`/`REDIS_DB`
    /// from the configuration source.
    pub async fn connect_from_config(config: &dyn ConfigSource) -> Result<Self, ConnectError> {
        let require = |var: &'static str| {
            config
                .get(var)
                .ok_or(ConnectError::MissingConfig(var))
        };
        let host = require(HOST_VAR)?;
        let port = require(PORT_VAR)?;
        let password = require(PASSWORD_VAR)?;
        let db = require(DB_VAR)?;
        Self::connect(&format!("redis://:{password}@{host}:{port}/{db}")).await
    }

    /// Wrap an existing connection manager.
    pub fn new(connection: ConnectionManager, address: impl Into<String>) -> Self {
        Self {
            connection,
            address: address.into(),
        }
    }
}

#[async_trait]
impl ScriptRunner for RedisScriptRunner {
    async fn eval_digest(
        &self,
        digest: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<redis::Value, RunnerError> {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(digest).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }

        let mut con = self.connection.clone();
        match cmd.query_async(&mut con).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NoScriptError => Err(RunnerError::UnknownScript),
            Err(e) => Err(RunnerError::Transport(e)),
        }
    }

    async fn register(&self, body: &str) -> Result<String, RunnerError> {
        let mut con = self.connection.clone();
        let digest = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(body)
            .query_async(&mut con)
            .await?;
        Ok(digest)
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}
