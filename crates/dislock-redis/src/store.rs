// Redis implementation of LockStore

use std::collections::HashMap;

use async_trait::async_trait;
use dislock_common::StoreError;
use dislock_core::{LockStore, MessageStream, Script, ScriptName, ScriptTable};
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tracing::{debug, info, warn};

use crate::config::RedisConfig;

fn store_error(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    scripts: HashMap<ScriptName, redis::Script>,
}

impl RedisStore {
    /// Open a managed connection to the configured server
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = Client::open(config.url.as_str()).map_err(store_error)?;
        let connection = client.get_connection_manager().await.map_err(store_error)?;

        // Digests are computed once; EVALSHA falls back to EVAL when the server lacks a script
        let scripts = ScriptTable::standard()
            .iter()
            .map(|script| (script.name(), redis::Script::new(script.source())))
            .collect();

        info!(url = %config.url, "Connected to Redis");
        Ok(Self {
            client,
            connection,
            scripts,
        })
    }

    fn prepared(&self, script: &Script) -> Result<&redis::Script, StoreError> {
        self.scripts
            .get(&script.name())
            .ok_or_else(|| StoreError::Command(format!("unknown script: {}", script.name())))
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn eval(&self, script: &Script, keys: &[String], args: &[String]) -> Result<i64, StoreError> {
        let prepared = self.prepared(script)?;
        let mut invocation = prepared.prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let mut connection = self.connection.clone();
        let code: i64 = invocation
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                warn!(script = %script.name(), error = %e, "Redis script failed");
                store_error(e)
            })?;
        Ok(code)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;
        debug!(channel = %channel, "Subscribed");

        let messages = pubsub.into_on_message().filter_map(|message| async move {
            match message.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    debug!(error = %e, "Dropping undecodable message");
                    None
                }
            }
        });
        Ok(messages.boxed())
    }
}
