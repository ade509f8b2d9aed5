use ndarray::{Array2, Axis};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ChannelId;

/// Group label assigned to channels and units (shank, tetrode, ...)
pub type Label = i64;

/// Multichannel voltage trace source.
///
/// Implementations must be shareable across worker threads; trace reads are
/// synchronous and may hit disk.
pub trait Recording: Send + Sync {
    /// Sampling frequency in Hz
    fn sampling_frequency(&self) -> f64;

    /// Number of frames (samples per channel)
    fn num_frames(&self) -> u64;

    /// Ordered, unique channel ids
    fn channel_ids(&self) -> &[ChannelId];

    /// Read `[channels x frames]` traces for `channel_ids` over `[start_frame, end_frame)`
    fn traces(&self, channel_ids: &[ChannelId], start_frame: u64, end_frame: u64)
    -> Result<Array2<f32>>;

    /// Group label of a channel, if the recording carries one
    fn channel_group(&self, _channel_id: ChannelId) -> Option<Label> {
        None
    }

    /// Named channel property. `"group"` resolves to [`Recording::channel_group`].
    fn channel_property(&self, channel_id: ChannelId, name: &str) -> Option<Label> {
        if name == "group" {
            self.channel_group(channel_id)
        } else {
            None
        }
    }
}

/// Check a trace request against the recording extent and channel list.
/// Returns the row index of every requested channel.
pub(crate) fn resolve_trace_request(
    available: &[ChannelId],
    num_frames: u64,
    channel_ids: &[ChannelId],
    start_frame: u64,
    end_frame: u64,
) -> Result<Vec<usize>> {
    if start_frame > end_frame || end_frame > num_frames {
        return Err(Error::recording(format!(
            "frame range [{start_frame}, {end_frame}) outside recording of {num_frames} frames"
        )));
    }

    channel_ids
        .iter()
        .map(|id| {
            available
                .iter()
                .position(|c| c == id)
                .ok_or_else(|| Error::recording(format!("unknown channel id {id}")))
        })
        .collect()
}

/// Recording held entirely in memory as a `[channels x frames]` array.
#[derive(Debug, Clone)]
pub struct InMemoryRecording {
    traces: Array2<f32>,
    sampling_frequency: f64,
    channel_ids: Vec<ChannelId>,
    properties: HashMap<String, HashMap<ChannelId, Label>>,
}

impl InMemoryRecording {
    /// Wrap `traces` (`[channels x frames]`); channel ids default to `0..channels`.
    pub fn new(traces: Array2<f32>, sampling_frequency: f64) -> Result<Self> {
        let channel_ids = (0..traces.nrows() as ChannelId).collect();
        Self::with_channel_ids(traces, sampling_frequency, channel_ids)
    }

    pub fn with_channel_ids(
        traces: Array2<f32>,
        sampling_frequency: f64,
        channel_ids: Vec<ChannelId>,
    ) -> Result<Self> {
        if !(sampling_frequency > 0.0) {
            return Err(Error::config(format!(
                "sampling frequency must be positive, got {sampling_frequency}"
            )));
        }
        if channel_ids.len() != traces.nrows() {
            return Err(Error::config(format!(
                "{} channel ids given for {} trace rows",
                channel_ids.len(),
                traces.nrows()
            )));
        }
        let mut seen = channel_ids.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != channel_ids.len() {
            return Err(Error::config("channel ids must be unique"));
        }

        Ok(Self {
            traces,
            sampling_frequency,
            channel_ids,
            properties: HashMap::new(),
        })
    }

    /// Assign one group label per channel, in channel order
    pub fn set_channel_groups(&mut self, groups: &[Label]) -> Result<()> {
        self.set_channel_property("group", groups)
    }

    /// Assign one label per channel for property `name`, in channel order
    pub fn set_channel_property(&mut self, name: &str, labels: &[Label]) -> Result<()> {
        if labels.len() != self.channel_ids.len() {
            return Err(Error::config(format!(
                "{} labels given for {} channels",
                labels.len(),
                self.channel_ids.len()
            )));
        }
        let values = self
            .channel_ids
            .iter()
            .copied()
            .zip(labels.iter().copied())
            .collect();
        self.properties.insert(name.to_string(), values);
        Ok(())
    }

    pub fn traces_array(&self) -> &Array2<f32> {
        &self.traces
    }
}

impl Recording for InMemoryRecording {
    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_frames(&self) -> u64 {
        self.traces.ncols() as u64
    }

    fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    fn traces(
        &self,
        channel_ids: &[ChannelId],
        start_frame: u64,
        end_frame: u64,
    ) -> Result<Array2<f32>> {
        let rows = resolve_trace_request(
            &self.channel_ids,
            self.num_frames(),
            channel_ids,
            start_frame,
            end_frame,
        )?;
        let window = self
            .traces
            .slice(ndarray::s![.., start_frame as usize..end_frame as usize]);
        Ok(window.select(Axis(0), &rows))
    }

    fn channel_group(&self, channel_id: ChannelId) -> Option<Label> {
        self.channel_property(channel_id, "group")
    }

    fn channel_property(&self, channel_id: ChannelId, name: &str) -> Option<Label> {
        self.properties
            .get(name)
            .and_then(|values| values.get(&channel_id))
            .copied()
    }
}

/// Recording whose traces are multiplied by a constant factor.
///
/// Channel properties are forwarded from the wrapped recording.
#[derive(Debug, Clone)]
pub struct ScaledRecording<R> {
    inner: R,
    scalar: f32,
}

impl<R: Recording> ScaledRecording<R> {
    pub fn new(inner: R, scalar: f32) -> Self {
        Self { inner, scalar }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: Recording> Recording for ScaledRecording<R> {
    fn sampling_frequency(&self) -> f64 {
        self.inner.sampling_frequency()
    }

    fn num_frames(&self) -> u64 {
        self.inner.num_frames()
    }

    fn channel_ids(&self) -> &[ChannelId] {
        self.inner.channel_ids()
    }

    fn traces(
        &self,
        channel_ids: &[ChannelId],
        start_frame: u64,
        end_frame: u64,
    ) -> Result<Array2<f32>> {
        let traces = self.inner.traces(channel_ids, start_frame, end_frame)?;
        Ok(traces * self.scalar)
    }

    fn channel_group(&self, channel_id: ChannelId) -> Option<Label> {
        self.inner.channel_group(channel_id)
    }

    fn channel_property(&self, channel_id: ChannelId, name: &str) -> Option<Label> {
        self.inner.channel_property(channel_id, name)
    }
}
