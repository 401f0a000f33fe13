//! Typed record storage
//!
//! The backend is modeled as a key/value document store with upsert. Records
//! carry their own natural key; the table a record lands in defaults to the
//! lower-cased type name with an `s` suffix. A parallel `*_to`/`*_from`
//! family writes into an explicitly named shadow table, which the scanner
//! uses for its `pending_*` tier.

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record store is not connected")]
    NotConnected,
    #[error("record not found: {0}/{1}")]
    NotFound(String, String),
    #[error("could not encode record: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A value that can live in the record store
pub trait Record: Serialize + DeserializeOwned {
    /// The record's natural key
    fn key(&self) -> String;

    /// The table this record kind lives in
    fn table() -> String {
        default_table_name::<Self>()
    }
}

/// Lower-cased base type name with an `s` suffix, e.g. `MinerStat` →
/// `minerstats`
pub fn default_table_name<T>() -> String {
    let name = std::any::type_name::<T>();
    let base = name.rsplit("::").next().unwrap_or(name);
    let mut table = base.to_lowercase();
    table.push('s');
    table
}

/// Connection-managed raw storage surface; object safe so components can
/// share a `dyn RecordStore`
pub trait RecordStore: Send + Sync {
    /// Opens (or references) the underlying connection
    fn connect(&self) -> StoreResult<()>;
    /// Dereferences the connection; the last disconnect closes it
    fn disconnect(&self) -> StoreResult<()>;
    fn insert_raw(&self, table: &str, key: &str, value: Value) -> StoreResult<()>;
    fn upsert_raw(&self, table: &str, key: &str, value: Value) -> StoreResult<()>;
    fn remove_raw(&self, table: &str, key: &str) -> StoreResult<()>;
    fn exists_raw(&self, table: &str, key: &str) -> bool;
    fn get_raw(&self, table: &str, key: &str) -> StoreResult<Value>;
    fn drop_table(&self, table: &str) -> StoreResult<()>;
}

/// Typed operations over any [RecordStore]
pub trait RecordStoreExt: RecordStore {
    fn add<R: Record>(&self, record: &R) -> StoreResult<()> {
        self.add_to(&R::table(), record)
    }

    fn update<R: Record>(&self, record: &R) -> StoreResult<()> {
        self.update_to(&R::table(), record)
    }

    fn remove<R: Record>(&self, record: &R) -> StoreResult<()> {
        self.remove_from(&R::table(), record)
    }

    fn exists<R: Record>(&self, record: &R) -> bool {
        self.exists_in(&R::table(), record)
    }

    fn get<R: Record>(&self, key: &str) -> StoreResult<R> {
        self.get_from(&R::table(), key)
    }

    fn add_to<R: Record>(&self, table: &str, record: &R) -> StoreResult<()> {
        self.insert_raw(table, &record.key(), serde_json::to_value(record)?)
    }

    fn update_to<R: Record>(&self, table: &str, record: &R) -> StoreResult<()> {
        self.upsert_raw(table, &record.key(), serde_json::to_value(record)?)
    }

    fn remove_from<R: Record>(&self, table: &str, record: &R) -> StoreResult<()> {
        self.remove_raw(table, &record.key())
    }

    fn exists_in<R: Record>(&self, table: &str, record: &R) -> bool {
        self.exists_raw(table, &record.key())
    }

    fn get_from<R: Record>(&self, table: &str, key: &str) -> StoreResult<R> {
        Ok(serde_json::from_value(self.get_raw(table, key)?)?)
    }
}

impl<T: RecordStore + ?Sized> RecordStoreExt for T {}

/// In-process [RecordStore]; tables survive disconnects the way a database
/// server's data survives a dropped session
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    refcount: usize,
    tables: HashMap<String, HashMap<String, Value>>,
}

impl StoreInner {
    fn table_mut(&mut self, table: &str) -> &mut HashMap<String, Value> {
        self.tables.entry(table.to_string()).or_default()
    }
}

// === impl MemoryStore ===

impl MemoryStore {
    fn connected(&self, inner: &StoreInner) -> StoreResult<()> {
        if inner.refcount == 0 {
            return Err(StoreError::NotConnected);
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn connect(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.refcount += 1;
        trace!(target: "store", refcount = inner.refcount, "connect");
        Ok(())
    }

    fn disconnect(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.refcount = inner.refcount.saturating_sub(1);
        trace!(target: "store", refcount = inner.refcount, "disconnect");
        Ok(())
    }

    fn insert_raw(&self, table: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.connected(&inner)?;
        inner.table_mut(table).insert(key.to_string(), value);
        Ok(())
    }

    fn upsert_raw(&self, table: &str, key: &str, value: Value) -> StoreResult<()> {
        self.insert_raw(table, key, value)
    }

    fn remove_raw(&self, table: &str, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.connected(&inner)?;
        match inner.table_mut(table).remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(table.to_string(), key.to_string())),
        }
    }

    fn exists_raw(&self, table: &str, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.tables.get(table).map(|t| t.contains_key(key)).unwrap_or(false)
    }

    fn get_raw(&self, table: &str, key: &str) -> StoreResult<Value> {
        let inner = self.inner.lock();
        self.connected(&inner)?;
        inner
            .tables
            .get(table)
            .and_then(|t| t.get(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(table.to_string(), key.to_string()))
    }

    fn drop_table(&self, table: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        self.connected(&inner)?;
        inner.tables.remove(table);
        Ok(())
    }
}
