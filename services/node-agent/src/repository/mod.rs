//! Typed persistence for apps, subscriptions and device properties.

mod config;
mod event;
mod service;

pub use config::{ConfigRepository, ANCHOR_ADDRESS, DEVICE_ID, NODE_ADDRESS, NODE_ID, PING_INTERVAL};
pub use event::EventRepository;
pub use service::ServiceRepository;

use std::path::Path;
use std::sync::Arc;

use crate::store::{Bucket, KvStore, StoreError};

/// Outcome of an insert that may hit an existing key.
#[derive(Debug, Clone, PartialEq)]
pub enum Inserted<T> {
    /// The record was created.
    Created(T),
    /// A record with the same key already existed; it is returned unchanged.
    Existing(T),
}

impl<T> Inserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Inserted::Created(v) | Inserted::Existing(v) => v,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Inserted::Existing(_))
    }
}

/// The three repositories, opened together.
#[derive(Clone)]
pub struct Repositories {
    pub services: Arc<ServiceRepository>,
    pub events: Arc<EventRepository>,
    pub config: Arc<ConfigRepository>,
}

impl Repositories {
    /// Open one database file per bucket inside `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        Ok(Self {
            services: Arc::new(ServiceRepository::new(KvStore::open(dir, Bucket::Service)?)),
            events: Arc::new(EventRepository::new(KvStore::open(dir, Bucket::Event)?)),
            config: Arc::new(ConfigRepository::new(KvStore::open(
                dir,
                Bucket::Configuration,
            )?)),
        })
    }

    /// In-memory repositories (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            services: Arc::new(ServiceRepository::new(KvStore::open_in_memory(
                Bucket::Service,
            )?)),
            events: Arc::new(EventRepository::new(KvStore::open_in_memory(Bucket::Event)?)),
            config: Arc::new(ConfigRepository::new(KvStore::open_in_memory(
                Bucket::Configuration,
            )?)),
        })
    }
}
