use anyhow::Result;
use ndarray::{Array2, Array3, ArrayView2, Ix3};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;

use super::float32_blosc_codec;

/// Maximum spikes per chunk (and per flush)
const MAX_CHUNK_SPIKES: usize = 256;

/// Writes one unit's snippets into a fixed-shape `[spikes x channels x samples]` array.
///
/// Snippets are buffered and written one whole chunk at a time.
pub struct WaveformWriter {
    array: Array<FilesystemStore>,
    store: Arc<FilesystemStore>,
    path: String,
    shape: [usize; 3],
    chunk_spikes: usize,
    buffer: Vec<f32>,
    buffered: usize,
    written: usize,
    scratch: Option<Arc<TempDir>>,
    slow_flush_warnings: u32,
}

impl WaveformWriter {
    pub(crate) fn create(
        store: Arc<FilesystemStore>,
        path: String,
        shape: [usize; 3],
        scratch: Option<Arc<TempDir>>,
    ) -> Result<Self> {
        let [spikes, channels, samples] = shape;
        if channels == 0 || samples == 0 {
            return Err(anyhow::anyhow!(
                "Cannot create waveform array with shape {:?}",
                shape
            ));
        }
        // Chunk extents must be non-zero even for units without spikes
        let chunk_spikes = spikes.clamp(1, MAX_CHUNK_SPIKES);

        let array = ArrayBuilder::new(
            vec![spikes as u64, channels as u64, samples as u64],
            vec![chunk_spikes as u64, channels as u64, samples as u64],
            DataType::Float32,
            FillValue::from(0.0f32),
        )
        .dimension_names(Some(vec![
            Some("spikes".to_string()),
            Some("channels".to_string()),
            Some("samples".to_string()),
        ]))
        .bytes_to_bytes_codecs(vec![float32_blosc_codec()?])
        .build(store.clone(), &path)?;

        array.store_metadata()?;

        Ok(Self {
            array,
            store,
            path,
            shape,
            chunk_spikes,
            buffer: Vec::with_capacity(chunk_spikes * channels * samples),
            buffered: 0,
            written: 0,
            scratch,
            slow_flush_warnings: 0,
        })
    }

    /// Append one `[channels x samples]` snippet
    pub fn push(&mut self, snippet: ArrayView2<f32>) -> Result<()> {
        let [spikes, channels, samples] = self.shape;
        if snippet.dim() != (channels, samples) {
            return Err(anyhow::anyhow!(
                "Snippet shape {:?} does not match array shape {:?}",
                snippet.dim(),
                self.shape
            ));
        }
        if self.written + self.buffered >= spikes {
            return Err(anyhow::anyhow!(
                "Waveform array {} is full ({} spikes)",
                self.path,
                spikes
            ));
        }

        self.buffer.extend(snippet.iter().copied());
        self.buffered += 1;

        if self.buffered == self.chunk_spikes {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }
        let flush_start = Instant::now();
        let [_, channels, samples] = self.shape;

        let block = Array3::from_shape_vec(
            (self.buffered, channels, samples),
            std::mem::take(&mut self.buffer),
        )?;
        let start_indices = &[self.written as u64, 0, 0];
        self.array.store_array_subset_ndarray::<f32, Ix3>(start_indices, block)?;

        self.written += self.buffered;
        self.buffered = 0;
        self.buffer = Vec::with_capacity(self.chunk_spikes * channels * samples);

        let flush_duration = flush_start.elapsed();
        if flush_duration > Duration::from_millis(100) {
            self.slow_flush_warnings += 1;
            if self.slow_flush_warnings <= 5 {
                tracing::warn!(
                    "Slow Zarr flush detected: {:.1}ms for {} (warning {}/5)",
                    flush_duration.as_millis(),
                    self.path,
                    self.slow_flush_warnings
                );
            }
        }
        Ok(())
    }

    /// Flush remaining snippets and return a read handle.
    /// Every spike slot must have been written.
    pub fn finish(mut self) -> Result<StoredWaveforms> {
        self.flush()?;
        if self.written != self.shape[0] {
            return Err(anyhow::anyhow!(
                "Waveform array {} holds {} of {} spikes",
                self.path,
                self.written,
                self.shape[0]
            ));
        }
        self.array.store_metadata()?;

        Ok(StoredWaveforms {
            store: self.store,
            path: self.path,
            shape: self.shape,
            _scratch: self.scratch,
        })
    }
}

/// Read handle to a unit's waveforms in the Zarr store
#[derive(Clone)]
pub struct StoredWaveforms {
    store: Arc<FilesystemStore>,
    path: String,
    shape: [usize; 3],
    _scratch: Option<Arc<TempDir>>,
}

impl std::fmt::Debug for StoredWaveforms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredWaveforms")
            .field("path", &self.path)
            .field("shape", &self.shape)
            .finish()
    }
}

impl StoredWaveforms {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Read the whole `[spikes x channels x samples]` array into memory
    pub fn load(&self) -> Result<Array3<f32>> {
        let [spikes, channels, samples] = self.shape;
        if spikes == 0 {
            return Ok(Array3::zeros((0, channels, samples)));
        }
        let array = Array::open(self.store.clone(), &self.path)?;
        let subset = ArraySubset::new_with_start_shape(
            vec![0, 0, 0],
            vec![spikes as u64, channels as u64, samples as u64],
        )?;
        let data = array.retrieve_array_subset_ndarray::<f32>(&subset)?;
        Ok(data.into_dimensionality::<Ix3>()?)
    }

    /// Read one channel plane as `[spikes x samples]`
    pub fn channel(&self, channel_index: usize) -> Result<Array2<f32>> {
        let [spikes, channels, samples] = self.shape;
        if channel_index >= channels {
            return Err(anyhow::anyhow!(
                "Channel index {} out of range for {} channels",
                channel_index,
                channels
            ));
        }
        if spikes == 0 {
            return Ok(Array2::zeros((0, samples)));
        }
        let array = Array::open(self.store.clone(), &self.path)?;
        let subset = ArraySubset::new_with_start_shape(
            vec![0, channel_index as u64, 0],
            vec![spikes as u64, 1, samples as u64],
        )?;
        let data = array.retrieve_array_subset_ndarray::<f32>(&subset)?;
        Ok(data.into_shape_with_order((spikes, samples))?)
    }
}
