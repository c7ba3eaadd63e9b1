//! In-memory store fakes shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::StoreOptions;
use crate::error::{ConfigError, StoreError};
use crate::store::{RawSecret, SecretStore, StoreFactory, StoreHandle};

/// What the fake answers with.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Text(String),
    Binary(Vec<u8>),
    Fail(String),
}

impl Reply {
    pub(crate) fn json(value: serde_json::Value) -> Self {
        Reply::Text(value.to_string())
    }

    fn into_result(self) -> Result<RawSecret, StoreError> {
        match self {
            Reply::Text(text) => Ok(RawSecret {
                secret_string: Some(text),
                ..RawSecret::default()
            }),
            Reply::Binary(bytes) => Ok(RawSecret {
                secret_binary: Some(bytes),
                ..RawSecret::default()
            }),
            Reply::Fail(message) => Err(StoreError::Api {
                status: 400,
                code: "ResourceNotFoundException".into(),
                message,
            }),
        }
    }
}

/// Scripted store recording every request it serves.
#[derive(Debug)]
pub(crate) struct FakeStore {
    reply: Mutex<Reply>,
    requests: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeStore {
    pub(crate) fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self::build(reply, None))
    }

    /// A store whose calls each wait for one permit on the returned semaphore.
    pub(crate) fn gated(reply: Reply) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self::build(reply, Some(gate.clone()))), gate)
    }

    fn build(reply: Reply, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            reply: Mutex::new(reply),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate,
        }
    }

    pub(crate) fn set_reply(&self, reply: Reply) {
        *self.reply.lock().unwrap() = reply;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(secret_id, version_stage)` of every request, in order.
    pub(crate) fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SecretStore for FakeStore {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version_stage: &str,
    ) -> Result<RawSecret, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((secret_id.to_string(), version_stage.to_string()));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let reply = self.reply.lock().unwrap().clone();
        reply.into_result()
    }
}

/// Factory handing out a fixed store and recording the options it saw.
#[derive(Debug)]
pub(crate) struct FakeFactory {
    store: Arc<FakeStore>,
    builds: Mutex<Vec<StoreOptions>>,
}

impl FakeFactory {
    pub(crate) fn new(store: Arc<FakeStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            builds: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

#[async_trait]
impl StoreFactory for FakeFactory {
    async fn build(&self, options: &StoreOptions) -> Result<StoreHandle, ConfigError> {
        options.validate()?;
        self.builds.lock().unwrap().push(options.clone());
        let store: StoreHandle = self.store.clone();
        Ok(store)
    }
}
