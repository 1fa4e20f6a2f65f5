//! In-memory storage adapter.
//!
//! Records live in a shared map keyed by absolute location. Clones share the
//! map but each handle has its own current location, so an engine can hand a
//! fresh handle to every load and store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use flowplan_core::error::{Error, Result};
use flowplan_core::schema::Schema;
use flowplan_core::storage::{LocationResolver, PathResolver, ResourceStatistics, StorageAdapter};
use flowplan_core::types::Tuple;
use tracing::debug;

use crate::json::record_to_json;

const SCHEME: &str = "memory://";

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<Tuple>>>>,
    location: Option<String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<Tuple>>>> {
        self.data
            .lock()
            .map_err(|_| Error::IoLike("memory storage lock poisoned".into()))
    }

    fn current(&self) -> Result<&str> {
        self.location
            .as_deref()
            .ok_or_else(|| Error::InvalidState("storage location not set".into()))
    }

    /// Pre-populate a location (used by tests and the CLI).
    pub fn insert(&self, location: impl Into<String>, records: Vec<Tuple>) -> Result<()> {
        self.lock()?.insert(location.into(), records);
        Ok(())
    }

    pub fn get(&self, location: &str) -> Result<Option<Vec<Tuple>>> {
        Ok(self.lock()?.get(location).cloned())
    }

    pub fn contains(&self, location: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(location))
    }

    pub fn locations(&self) -> Result<Vec<String>> {
        let mut out: Vec<String> = self.lock()?.keys().cloned().collect();
        out.sort();
        Ok(out)
    }

    /// Records at the current location.
    pub fn read(&self) -> Result<Vec<Tuple>> {
        let location = self.current()?;
        self.lock()?
            .get(location)
            .cloned()
            .ok_or_else(|| Error::IoLike(format!("no data at '{location}'")))
    }

    /// Replace the records at the current location.
    pub fn write(&self, records: Vec<Tuple>) -> Result<()> {
        let location = self.current()?.to_string();
        debug!(location = %location, records = records.len(), "write");
        self.lock()?.insert(location, records);
        Ok(())
    }
}

impl LocationResolver for MemoryStorage {
    fn relative_to_absolute_path(&self, location: &str, current_dir: &str) -> Result<String> {
        if location.starts_with(SCHEME) {
            return Ok(location.trim().to_string());
        }
        PathResolver.relative_to_absolute_path(location, current_dir)
    }
}

impl StorageAdapter for MemoryStorage {
    fn set_location(&mut self, location: &str) -> Result<()> {
        if location.is_empty() {
            return Err(Error::Plan("empty location".into()));
        }
        self.location = Some(location.to_string());
        Ok(())
    }

    /// Stored records must have exactly as many fields as the schema declares.
    fn check_schema(&self, schema: &Schema) -> Result<()> {
        let location = self.current()?;
        let data = self.lock()?;
        let Some(records) = data.get(location) else {
            return Ok(());
        };
        match records.iter().position(|r| r.len() != schema.len()) {
            Some(i) => Err(Error::Schema(format!(
                "record {i} at '{location}' has {} fields, schema {schema} declares {}",
                records[i].len(),
                schema.len()
            ))),
            None => Ok(()),
        }
    }

    fn statistics(&self, location: &str) -> Result<Option<ResourceStatistics>> {
        let data = self.lock()?;
        Ok(data.get(location).map(|records| {
            let size: usize = records
                .iter()
                .map(|r| record_to_json(r).to_string().len() + 1)
                .sum();
            ResourceStatistics {
                num_records: Some(records.len() as u64),
                size_bytes: Some(size as u64),
            }
        }))
    }

    fn cleanup_on_failure(&self, location: &str) -> Result<()> {
        if self.lock()?.remove(location).is_some() {
            debug!(location = %location, "removed partial output");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowplan_core::schema::{DataType, FieldSchema};
    use flowplan_core::types::Value;

    #[test]
    fn handles_share_data_but_not_location() {
        let store = MemoryStorage::new();
        store.insert("/in", vec![vec![Value::Int(1)]]).unwrap();

        let mut reader = store.clone();
        reader.set_location("/in").unwrap();
        assert_eq!(reader.read().unwrap().len(), 1);

        let mut writer = store.clone();
        writer.set_location("/out").unwrap();
        writer.write(vec![vec![Value::Int(2)], vec![Value::Int(3)]]).unwrap();
        assert!(store.contains("/out").unwrap());
        assert!(store.read().is_err());

        let stats = store.statistics("/out").unwrap().unwrap();
        assert_eq!(stats.num_records, Some(2));
        assert_eq!(stats.size_bytes, Some(8));

        store.cleanup_on_failure("/out").unwrap();
        assert!(!store.contains("/out").unwrap());
    }

    #[test]
    fn schema_width_is_checked() {
        let mut s = MemoryStorage::new();
        s.insert("/in", vec![vec![Value::Int(1), Value::Int(2)]]).unwrap();
        s.set_location("/in").unwrap();
        let one = Schema::new(vec![FieldSchema::new("a", DataType::Int)]);
        assert!(matches!(s.check_schema(&one), Err(Error::Schema(_))));
    }

    #[test]
    fn memory_scheme_is_kept() {
        let s = MemoryStorage::new();
        assert_eq!(
            s.relative_to_absolute_path("memory://x", "/w").unwrap(),
            "memory://x"
        );
        assert_eq!(s.relative_to_absolute_path("x", "/w").unwrap(), "/w/x");
    }
}
