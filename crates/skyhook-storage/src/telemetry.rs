//! Telemetry persistence using redb.
//!
//! Samples are keyed by `(serial, timestamp)`. Appending the same key again
//! replaces the stored sample, so redelivered frames collapse instead of
//! duplicating. Range queries run inside a single read transaction and see
//! a consistent snapshot even while appends continue.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use skyhook_core::TelemetrySample;
use tokio::sync::RwLock;

use crate::error::Result;

// redb table definition: key = (serial, timestamp), value = TelemetrySample (serialized)
const TELEMETRY_TABLE: TableDefinition<(&str, i64), &[u8]> = TableDefinition::new("telemetry");

/// Telemetry storage using redb.
pub struct TelemetryStore {
    db: Arc<Database>,
    /// Latest sample per serial, kept warm on the append path.
    latest_cache: RwLock<HashMap<String, TelemetrySample>>,
    /// Appends since open.
    append_count: AtomicU64,
    path: PathBuf,
    temp: bool,
}

impl TelemetryStore {
    /// Open or create a telemetry store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        Self::open_inner(path.as_ref().to_path_buf(), false)
    }

    /// Create a throwaway store backed by a temp file, removed on drop.
    pub fn memory() -> Result<Arc<Self>> {
        let path = std::env::temp_dir().join(format!(
            "skyhook_telemetry_{}.redb",
            uuid::Uuid::new_v4()
        ));
        Self::open_inner(path, true)
    }

    fn open_inner(path: PathBuf, temp: bool) -> Result<Arc<Self>> {
        let db = if path.exists() {
            Database::open(&path)?
        } else {
            Database::create(&path)?
        };

        // Create the table up front so reads on an empty store succeed.
        let write_txn = db.begin_write()?;
        {
            let _table = write_txn.open_table(TELEMETRY_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Arc::new(Self {
            db: Arc::new(db),
            latest_cache: RwLock::new(HashMap::new()),
            append_count: AtomicU64::new(0),
            path,
            temp,
        }))
    }

    /// Store one sample.
    ///
    /// Appending an existing `(serial, timestamp)` key replaces the stored
    /// sample and never grows the set.
    pub async fn append(&self, serial: &str, sample: &TelemetrySample) -> Result<()> {
        let key = (serial, sample.timestamp);
        let value = serde_json::to_vec(sample)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(TELEMETRY_TABLE)?;
            table.insert(key, value.as_slice())?;
        }
        write_txn.commit()?;

        self.append_count.fetch_add(1, Ordering::Relaxed);

        let mut cache = self.latest_cache.write().await;
        match cache.get(serial) {
            // Out-of-order arrival, keep the newer sample.
            Some(current) if current.timestamp > sample.timestamp => {}
            _ => {
                cache.insert(serial.to_string(), sample.clone());
            }
        }

        Ok(())
    }

    /// Samples for one device with `from <= timestamp <= to`, ascending.
    pub async fn range(&self, serial: &str, from: i64, to: i64) -> Result<Vec<TelemetrySample>> {
        if from > to {
            return Ok(Vec::new());
        }

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TELEMETRY_TABLE)?;

        let start_key = (serial, from);
        let end_key = (serial, to);

        let mut samples = Vec::new();
        for result in table.range(start_key..=end_key)? {
            let (_key, value) = result?;
            let sample: TelemetrySample = serde_json::from_slice(value.value())?;
            samples.push(sample);
        }

        Ok(samples)
    }

    /// Most recent sample for one device.
    pub async fn latest(&self, serial: &str) -> Result<Option<TelemetrySample>> {
        {
            let cache = self.latest_cache.read().await;
            if let Some(sample) = cache.get(serial) {
                return Ok(Some(sample.clone()));
            }
        }

        // Cache miss - query from database
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TELEMETRY_TABLE)?;

        let start_key = (serial, i64::MIN);
        let end_key = (serial, i64::MAX);

        let latest: Option<TelemetrySample> = table
            .range(start_key..=end_key)?
            .next_back()
            .map(|result| -> Result<TelemetrySample> {
                let (_key, value) = result?;
                Ok(serde_json::from_slice(value.value())?)
            })
            .transpose()?;

        if let Some(ref sample) = latest {
            self.latest_cache
                .write()
                .await
                .insert(serial.to_string(), sample.clone());
        }

        Ok(latest)
    }

    /// Serials of every device with stored samples, sorted.
    pub async fn device_serials(&self) -> Result<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TELEMETRY_TABLE)?;

        let mut serials = BTreeSet::new();
        for result in table.iter()? {
            let (key, _value) = result?;
            let (serial, _) = key.value();
            serials.insert(serial.to_string());
        }

        Ok(serials.into_iter().collect())
    }

    /// Number of appends since open.
    pub fn append_count(&self) -> u64 {
        self.append_count.load(Ordering::Relaxed)
    }
}

impl Drop for TelemetryStore {
    fn drop(&mut self) {
        if self.temp {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::debug!(
                    "Failed to remove temporary database file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
