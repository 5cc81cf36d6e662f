//! Common test infrastructure for Redis store integration tests.

use deadpool_redis::Pool;
use docket_config::StoreConfig;
use docket_jobs::{create_pool, RedisJobStore};
use std::sync::Arc;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

/// Test Redis container wrapper.
///
/// Manages a Redis testcontainer lifecycle and provides a connection pool.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    pool: Pool,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        let container = Redis::default()
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get Redis port");

        let config = StoreConfig {
            url: format!("redis://127.0.0.1:{port}"),
            pool_size: 16,
            ..StoreConfig::default()
        };

        let pool = Self::connect_with_retry(&config, 30).await;

        Self {
            _container: container,
            pool,
        }
    }

    /// Raw connection pool.
    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    /// Store over the container using the given key namespace.
    pub fn store(&self, namespace: &str) -> Arc<RedisJobStore> {
        Arc::new(RedisJobStore::with_namespace(self.pool.clone(), namespace))
    }

    async fn connect_with_retry(config: &StoreConfig, max_attempts: u32) -> Pool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match create_pool(config).await {
                Ok(pool) => return pool,
                Err(e) => {
                    if attempts >= max_attempts {
                        panic!("Failed to connect to Redis after {max_attempts} attempts: {e}");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }
    }
}
