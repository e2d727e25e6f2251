//! Shared fixtures for router and provisioning tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cellar_core::models::store::StoreDescriptor;
use cellar_db::{DbError, StoreBackend};

/// Backend whose handles are plain labels. Counts opens and remembers
/// which stores exist.
#[derive(Clone, Default)]
pub struct MockBackend {
    pub state: Arc<MockState>,
}

#[derive(Default)]
pub struct MockState {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    pub stores: Mutex<HashSet<String>>,
    pub dropped: Mutex<Vec<String>>,
    pub unhealthy: Mutex<HashSet<String>>,
    pub fail_open: Mutex<bool>,
    pub fail_drop: Mutex<bool>,
}

impl MockState {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn has_store(&self, database: &str) -> bool {
        self.stores.lock().unwrap().contains(database)
    }
}

impl StoreBackend for MockBackend {
    type Handle = String;

    async fn open(&self, descriptor: &StoreDescriptor) -> Result<String, DbError> {
        if *self.state.fail_open.lock().unwrap() {
            return Err(DbError::Timeout(descriptor.store_id()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        // Widen the window for racing resolvers.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(descriptor.database.clone())
    }

    async fn ping(&self, handle: &String) -> Result<(), DbError> {
        if self.state.unhealthy.lock().unwrap().contains(handle) {
            Err(DbError::Query(format!("{handle} unreachable")))
        } else {
            Ok(())
        }
    }

    async fn close(&self, handle: String) -> Result<(), DbError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.unhealthy.lock().unwrap().contains(&handle) {
            return Err(DbError::Query(format!("{handle} close failed")));
        }
        Ok(())
    }

    async fn create_store(&self, descriptor: &StoreDescriptor) -> Result<(), DbError> {
        self.state
            .stores
            .lock()
            .unwrap()
            .insert(descriptor.database.clone());
        Ok(())
    }

    async fn drop_store(&self, descriptor: &StoreDescriptor) -> Result<(), DbError> {
        if *self.state.fail_drop.lock().unwrap() {
            return Err(DbError::Query(format!("{} drop refused", descriptor.database)));
        }
        self.state.stores.lock().unwrap().remove(&descriptor.database);
        self.state
            .dropped
            .lock()
            .unwrap()
            .push(descriptor.database.clone());
        Ok(())
    }
}

pub fn descriptor(database: &str) -> StoreDescriptor {
    StoreDescriptor {
        url: "mock://".into(),
        namespace: "dedicated".into(),
        database: database.into(),
    }
}
