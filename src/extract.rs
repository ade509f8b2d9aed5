//! Snippet extraction.
//!
//! One trace read per kept spike over `[t - before, t + after)`, restricted to
//! the unit's channel subset, stacked along a leading spike axis either in
//! memory or straight into the out-of-core store.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use serde_json::json;

use crate::error::{Error, Result};
use crate::recording::Recording;
use crate::window::Window;
use crate::zarr::{StoredWaveforms, WaveformStore, WaveformWriter};
use crate::{ChannelId, UnitId};

/// Storage of a unit's `[spikes x channels x samples]` snippets
#[derive(Debug, Clone)]
pub enum WaveformData {
    InMemory(Array3<f32>),
    OutOfCore(StoredWaveforms),
}

/// Snippets of one unit plus the parameters they were cut with.
#[derive(Debug, Clone)]
pub struct WaveformSet {
    pub unit_id: UnitId,
    pub channel_ids: Vec<ChannelId>,
    pub window: Window,
    /// Subsampling cap the set was extracted with
    pub max_spikes: Option<usize>,
    /// Index into the unit's spike train of each kept spike (ascending)
    pub spike_indices: Vec<usize>,
    /// Frame of each kept spike
    pub spike_frames: Vec<u64>,
    data: WaveformData,
}

impl WaveformSet {
    pub fn num_spikes(&self) -> usize {
        self.spike_indices.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channel_ids.len()
    }

    pub fn num_samples(&self) -> usize {
        self.window.num_samples()
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.num_spikes(), self.num_channels(), self.num_samples())
    }

    pub fn is_empty(&self) -> bool {
        self.spike_indices.is_empty()
    }

    pub fn is_out_of_core(&self) -> bool {
        matches!(self.data, WaveformData::OutOfCore(_))
    }

    pub fn data(&self) -> &WaveformData {
        &self.data
    }

    /// Materialize all snippets in memory
    pub fn to_array(&self) -> Result<Array3<f32>> {
        match &self.data {
            WaveformData::InMemory(array) => Ok(array.clone()),
            WaveformData::OutOfCore(stored) => Ok(stored.load()?),
        }
    }

    /// `[spikes x samples]` plane of one channel (position in `channel_ids`)
    pub fn channel_plane(&self, channel_index: usize) -> Result<Array2<f32>> {
        if channel_index >= self.num_channels() {
            return Err(Error::internal(format!(
                "channel index {channel_index} out of range for unit {}",
                self.unit_id
            )));
        }
        match &self.data {
            WaveformData::InMemory(array) => {
                Ok(array.index_axis(Axis(1), channel_index).to_owned())
            }
            WaveformData::OutOfCore(stored) => Ok(stored.channel(channel_index)?),
        }
    }
}

/// Destination of extracted snippets
pub trait SnippetSink {
    fn push(&mut self, snippet: ArrayView2<f32>) -> Result<()>;

    fn finish(self) -> Result<WaveformData>;
}

/// Preallocated in-memory array filled spike by spike
pub struct InMemorySink {
    data: Array3<f32>,
    next: usize,
}

impl InMemorySink {
    pub fn new(shape: [usize; 3]) -> Self {
        Self {
            data: Array3::zeros((shape[0], shape[1], shape[2])),
            next: 0,
        }
    }
}

impl SnippetSink for InMemorySink {
    fn push(&mut self, snippet: ArrayView2<f32>) -> Result<()> {
        if self.next >= self.data.len_of(Axis(0)) {
            return Err(Error::internal("more snippets than planned spikes"));
        }
        self.data.slice_mut(s![self.next, .., ..]).assign(&snippet);
        self.next += 1;
        Ok(())
    }

    fn finish(self) -> Result<WaveformData> {
        Ok(WaveformData::InMemory(self.data))
    }
}

impl SnippetSink for WaveformWriter {
    fn push(&mut self, snippet: ArrayView2<f32>) -> Result<()> {
        Ok(WaveformWriter::push(self, snippet)?)
    }

    fn finish(self) -> Result<WaveformData> {
        Ok(WaveformData::OutOfCore(WaveformWriter::finish(self)?))
    }
}

/// Backing store chosen for a run
#[derive(Debug, Clone)]
pub enum Backend {
    InMemory,
    OutOfCore(WaveformStore),
}

/// Per-unit seed, independent of scheduling order
pub fn unit_seed(seed: u64, unit_id: UnitId) -> u64 {
    seed ^ (u64::from(unit_id).wrapping_add(1)).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Choose `max_spikes` of `candidates` without replacement, keeping ascending order.
/// Returns all candidates when there are not more than `max_spikes`.
pub fn subsample(candidates: &[usize], max_spikes: Option<usize>, seed: u64) -> Vec<usize> {
    let Some(max_spikes) = max_spikes else {
        return candidates.to_vec();
    };
    if candidates.len() <= max_spikes {
        return candidates.to_vec();
    }

    // Partial Fisher-Yates: the first `max_spikes` slots end up a uniform draw
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut pool = candidates.to_vec();
    for i in 0..max_spikes {
        let j = rng.usize(i..pool.len());
        pool.swap(i, j);
    }
    let mut kept = pool[..max_spikes].to_vec();
    kept.sort_unstable();
    kept
}

/// Everything needed to cut one unit's snippets
#[derive(Debug, Clone)]
pub struct SnippetRequest<'a> {
    pub unit_id: UnitId,
    pub spike_train: &'a [u64],
    pub channel_ids: &'a [ChannelId],
    pub window: Window,
    pub max_spikes: Option<usize>,
    pub seed: u64,
}

/// Extract the snippets of one unit.
///
/// Spikes whose window crosses a recording edge are dropped before
/// subsampling, so the result holds `min(in_range, max_spikes)` snippets.
pub fn extract_waveforms<R: Recording + ?Sized>(
    recording: &R,
    request: &SnippetRequest<'_>,
    backend: &Backend,
) -> Result<WaveformSet> {
    if request.channel_ids.is_empty() {
        return Err(Error::config(format!(
            "unit {} has an empty channel subset",
            request.unit_id
        )));
    }

    let num_frames = recording.num_frames();
    let in_range = request.window.in_range_indices(request.spike_train, num_frames);
    let excluded = request.spike_train.len() - in_range.len();
    if excluded > 0 {
        tracing::warn!(
            unit = request.unit_id,
            excluded,
            "spikes too close to the recording edges were excluded"
        );
    }

    let spike_indices = subsample(
        &in_range,
        request.max_spikes,
        unit_seed(request.seed, request.unit_id),
    );
    let spike_frames: Vec<u64> = spike_indices
        .iter()
        .map(|&i| request.spike_train[i])
        .collect();

    let shape = [
        spike_indices.len(),
        request.channel_ids.len(),
        request.window.num_samples(),
    ];

    let data = match backend {
        Backend::InMemory => {
            fill_sink(recording, request, &spike_frames, InMemorySink::new(shape))?
        }
        Backend::OutOfCore(store) => {
            let mut attrs = serde_json::Map::new();
            attrs.insert("unit_id".to_string(), json!(request.unit_id));
            attrs.insert("channel_ids".to_string(), json!(request.channel_ids));
            attrs.insert("frames_before".to_string(), json!(request.window.before));
            attrs.insert("frames_after".to_string(), json!(request.window.after));
            attrs.insert("num_spikes".to_string(), json!(spike_indices.len()));
            let writer = store.create_writer(request.unit_id, shape, attrs)?;
            fill_sink(recording, request, &spike_frames, writer)?
        }
    };

    tracing::debug!(
        unit = request.unit_id,
        spikes = shape[0],
        channels = shape[1],
        samples = shape[2],
        "extracted waveforms"
    );

    Ok(WaveformSet {
        unit_id: request.unit_id,
        channel_ids: request.channel_ids.to_vec(),
        window: request.window,
        max_spikes: request.max_spikes,
        spike_indices,
        spike_frames,
        data,
    })
}

fn fill_sink<R, K>(
    recording: &R,
    request: &SnippetRequest<'_>,
    spike_frames: &[u64],
    mut sink: K,
) -> Result<WaveformData>
where
    R: Recording + ?Sized,
    K: SnippetSink,
{
    let num_frames = recording.num_frames();
    for &t in spike_frames {
        let (start, end) = request.window.bounds(t, num_frames).ok_or_else(|| {
            Error::recording(format!("spike at frame {t} no longer fits the recording"))
        })?;
        let snippet = recording.traces(request.channel_ids, start, end)?;
        sink.push(snippet.view())?;
    }
    sink.finish()
}
