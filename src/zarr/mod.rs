pub mod recording;
pub mod writer;

use anyhow::Result;
use fs2::FileExt;
use serde_json::json;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use zarrs::array::codec::{BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode};
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;
use zarrs::storage::{ReadableStorageTraits, StoreKey};

use crate::UnitId;
pub use recording::ZarrRecording;
pub use writer::{StoredWaveforms, WaveformWriter};

/// Group under which per-unit waveform arrays are written
const UNITS_GROUP: &str = "/units";

/// Out-of-core waveform store backed by a Zarr v3 filesystem store.
///
/// Each unit owns `/units/<unit>/waveforms` (`[spikes x channels x samples]`),
/// so concurrent workers never write the same array.
#[derive(Clone)]
pub struct WaveformStore {
    root: PathBuf,
    store: Arc<FilesystemStore>,
    // Keeps a temporary store alive while any handle to it exists
    scratch: Option<Arc<TempDir>>,
}

impl std::fmt::Debug for WaveformStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformStore")
            .field("root", &self.root)
            .field("temporary", &self.scratch.is_some())
            .finish()
    }
}

impl WaveformStore {
    /// Open (or create) the store at `path`, or in a fresh temporary directory.
    /// `config` is recorded in the root group attributes.
    pub fn open(path: Option<&Path>, config: &serde_json::Value) -> Result<Self> {
        let (root, scratch) = match path {
            Some(path) => (path.to_path_buf(), None),
            None => {
                let dir = tempfile::Builder::new().prefix("waveforms-").tempdir()?;
                (dir.path().join("waveforms.zarr"), Some(Arc::new(dir)))
            }
        };
        tracing::info!("Writing waveforms to Zarr store: {:?}", root);

        let store = open_or_create_zarr_store(&root)?;

        let mut root_group = zarrs::group::Group::open(store.clone(), "/")?;
        let mut attrs = serde_json::Map::new();
        attrs.insert("created_at".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        attrs.insert("extraction_config".to_string(), config.clone());
        attrs.insert("generator".to_string(), json!(env!("CARGO_PKG_NAME")));
        attrs.insert("generator_version".to_string(), json!(env!("CARGO_PKG_VERSION")));
        root_group.attributes_mut().extend(attrs);
        root_group.store_metadata()?;

        create_group_if_not_exists(&store, UNITS_GROUP)?;

        Ok(Self {
            root,
            store,
            scratch,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_temporary(&self) -> bool {
        self.scratch.is_some()
    }

    /// Create the waveform array of `unit_id` with a fixed `[spikes, channels, samples]` shape.
    /// Any array left by a previous run for the same unit is removed first.
    pub fn create_writer(
        &self,
        unit_id: UnitId,
        shape: [usize; 3],
        unit_attrs: serde_json::Map<String, serde_json::Value>,
    ) -> Result<WaveformWriter> {
        let unit_path = format!("{}/{}", UNITS_GROUP, unit_id);
        let unit_dir = self.root.join("units").join(unit_id.to_string());
        if unit_dir.exists() {
            std::fs::remove_dir_all(&unit_dir)?;
        }

        let mut unit_group = GroupBuilder::new().build(self.store.clone(), &unit_path)?;
        unit_group.attributes_mut().extend(unit_attrs);
        unit_group.store_metadata()?;

        WaveformWriter::create(
            self.store.clone(),
            format!("{}/waveforms", unit_path),
            shape,
            self.scratch.clone(),
        )
    }
}

/// Initialize or open a Zarr store with its root group, serializing concurrent initialization
pub fn open_or_create_zarr_store(store_path: &Path) -> Result<Arc<FilesystemStore>> {
    std::fs::create_dir_all(store_path)?;
    let store = Arc::new(FilesystemStore::new(store_path)?);

    let lock_path = store_path.join(".zarr_init.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)?;

    lock_file.lock_exclusive()?;

    let mut last_error = None;
    for attempt in 0..2 {
        match create_group_if_not_exists(&store, "/") {
            Ok(_) => {
                lock_file.unlock()?;
                return Ok(store);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize Zarr store (attempt {}): {}",
                    attempt + 1,
                    e
                );
                last_error = Some(e);
                std::thread::sleep(Duration::from_millis(10 + fastrand::u64(0..20)));
            }
        }
    }

    lock_file.unlock()?;
    Err(anyhow::anyhow!(
        "Failed to initialize Zarr store after 2 attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

/// Metadata key of a node (Zarr v3 keeps it in `zarr.json`)
fn metadata_key(path: &str) -> Result<StoreKey> {
    let trimmed = path.trim_end_matches('/').trim_start_matches('/');
    let metadata_path = if trimmed.is_empty() {
        "zarr.json".to_string()
    } else {
        format!("{}/zarr.json", trimmed)
    };
    Ok(StoreKey::new(&metadata_path)?)
}

fn node_type(store: &Arc<FilesystemStore>, path: &str) -> Result<Option<String>> {
    match store.get(&metadata_key(path)?) {
        Ok(Some(data)) => {
            let json: serde_json::Value = serde_json::from_slice(&data)?;
            Ok(json
                .get("node_type")
                .and_then(|v| v.as_str())
                .map(str::to_string))
        }
        _ => Ok(None),
    }
}

/// Check if a Zarr group exists
pub fn group_exists(store: &Arc<FilesystemStore>, path: &str) -> Result<bool> {
    Ok(node_type(store, path)?.as_deref() == Some("group"))
}

/// Check if a Zarr array exists
pub fn array_exists(store: &Arc<FilesystemStore>, path: &str) -> Result<bool> {
    Ok(node_type(store, path)?.as_deref() == Some("array"))
}

/// Create a Zarr group if it doesn't exist
pub fn create_group_if_not_exists(store: &Arc<FilesystemStore>, path: &str) -> Result<()> {
    if !group_exists(store, path)? {
        let group = GroupBuilder::new().build(store.clone(), path)?;
        group.store_metadata()?;
    }
    Ok(())
}

/// Read attributes from a group's zarr.json file
pub fn read_group_attributes(store: &Arc<FilesystemStore>, path: &str) -> Result<serde_json::Value> {
    let key = metadata_key(path)?;
    let bytes = store
        .get(&key)?
        .ok_or_else(|| anyhow::anyhow!("Metadata not found at {:?}", key))?;
    let metadata: serde_json::Value = serde_json::from_slice(&bytes)?;

    Ok(metadata
        .get("attributes")
        .cloned()
        .unwrap_or_else(|| json!({})))
}

/// Blosc LZ4 codec with bit shuffling, suited to float32 voltage data
fn float32_blosc_codec() -> Result<Arc<BloscCodec>> {
    let compression_level = BloscCompressionLevel::try_from(5u8)
        .map_err(|e| anyhow::anyhow!("Invalid compression level: {}", e))?;
    Ok(Arc::new(BloscCodec::new(
        BloscCompressor::LZ4,
        compression_level,
        None,
        BloscShuffleMode::BitShuffle,
        Some(4),
    )?))
}
