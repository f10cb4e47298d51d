//! RocksDB-backed room store.
//!
//! Column families:
//! - `rooms`    — latest envelope JSON per room (LZ4 compressed, keyed by room name)
//! - `metadata` — room metadata (bincode: write count, last writer, sizes)
//!
//! Each write replaces the room's envelope wholesale; there is no history.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::protocol::RoomId;

const CF_ROOMS: &str = "rooms";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_ROOMS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("planner_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Metadata stored alongside each room's envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMetadata {
    pub room: String,
    /// Number of envelopes written since the room was created
    pub write_count: u64,
    /// `updatedAtMs` of the stored envelope
    pub last_updated_at_ms: u64,
    /// `updatedBy` of the stored envelope
    pub last_updated_by: String,
    /// Uncompressed envelope size in bytes
    pub envelope_size: u64,
    /// Compressed envelope size in bytes
    pub compressed_size: u64,
    /// Creation timestamp (seconds since epoch)
    pub created_at: u64,
    /// Last modified timestamp (seconds since epoch)
    pub updated_at: u64,
}

impl RoomMetadata {
    fn new(room: &RoomId) -> Self {
        let now = unix_secs();
        Self {
            room: room.to_string(),
            write_count: 0,
            last_updated_at_ms: 0,
            last_updated_by: String::new(),
            envelope_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Writer identity recorded in [`RoomMetadata`].
#[derive(Debug, Clone, Copy)]
pub struct WriteStamp<'a> {
    pub updated_at_ms: u64,
    pub updated_by: &'a str,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// RocksDB internal error
    DatabaseError(String),
    /// Room not found
    NotFound(String),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(room) => write!(f, "Room not found: {room}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

/// RocksDB-backed room store.
///
/// The envelope bytes are stored exactly as the writer sent them so that a
/// recovered room replays the same `__meta` to subscribers.
pub struct RoomStore {
    /// RocksDB instance (single-threaded mode — concurrency via tokio)
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RoomStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened room store at {}", config.path.display());
        Ok(Self { db, config })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are already LZ4 framed by us
        opts.set_compression_type(DBCompressionType::None);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(2);
        // Whole-room reads only
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    // ─── Envelopes ────────────────────────────────────────────────────

    /// Replace the stored envelope of `room` (LZ4 compressed).
    pub fn save_envelope(
        &self,
        room: &RoomId,
        envelope_json: &[u8],
        stamp: WriteStamp<'_>,
    ) -> Result<RoomMetadata, StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let compressed = lz4_flex::compress_prepend_size(envelope_json);

        let mut meta = match self.load_metadata(room) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => RoomMetadata::new(room),
            Err(e) => return Err(e),
        };
        meta.write_count += 1;
        meta.last_updated_at_ms = stamp.updated_at_ms;
        meta.last_updated_by = stamp.updated_by.to_string();
        meta.envelope_size = envelope_json.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = unix_secs();

        // Atomic batch write: envelope + metadata
        let key = room.as_str().as_bytes();
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_rooms, key, &compressed);
        batch.put_cf(&cf_meta, key, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(meta)
    }

    /// Load the stored envelope bytes of `room`.
    pub fn load_envelope(&self, room: &RoomId) -> Result<Vec<u8>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        match self.db.get_cf(&cf, room.as_str().as_bytes())? {
            Some(compressed) => lz4_flex::decompress_size_prepended(&compressed)
                .map_err(|e| StoreError::CompressionError(e.to_string())),
            None => Err(StoreError::NotFound(room.to_string())),
        }
    }

    pub fn room_exists(&self, room: &RoomId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        Ok(self.db.get_cf(&cf, room.as_str().as_bytes())?.is_some())
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn load_metadata(&self, room: &RoomId) -> Result<RoomMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, room.as_str().as_bytes())? {
            Some(bytes) => RoomMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(room.to_string())),
        }
    }

    /// All rooms with a stored envelope.
    pub fn list_rooms(&self) -> Result<Vec<RoomId>, StoreError> {
        let cf = self.cf(CF_ROOMS)?;
        let mut rooms = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            match std::str::from_utf8(&key) {
                Ok(name) => rooms.push(RoomId::new(name)),
                Err(_) => log::warn!("Skipping room key that is not UTF-8"),
            }
        }
        Ok(rooms)
    }

    pub fn delete_room(&self, room: &RoomId) -> Result<(), StoreError> {
        let cf_rooms = self.cf(CF_ROOMS)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let key = room.as_str().as_bytes();

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_rooms, key);
        batch.delete_cf(&cf_meta, key);
        self.db.write(batch)?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

fn unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
