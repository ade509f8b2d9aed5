use anyhow::Result;
use ndarray::{Array2, Axis, Ix2};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use zarrs::array::{Array, DataType};
use zarrs::array_subset::ArraySubset;
use zarrs::filesystem::FilesystemStore;

use super::{array_exists, read_group_attributes};
use crate::recording::{resolve_trace_request, Label, Recording};
use crate::ChannelId;

/// Recording stored as a Zarr stream group: `/<stream>/data` holds
/// `[channels x samples]` traces and the group attributes carry the rate
/// (`sampling_frequency`, or `stream_info.nominal_srate`) and optional
/// per-channel `channel_groups`.
pub struct ZarrRecording {
    array: Array<FilesystemStore>,
    stream: String,
    sampling_frequency: f64,
    num_frames: u64,
    channel_ids: Vec<ChannelId>,
    groups: HashMap<ChannelId, Label>,
}

impl std::fmt::Debug for ZarrRecording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZarrRecording")
            .field("stream", &self.stream)
            .field("sampling_frequency", &self.sampling_frequency)
            .field("num_frames", &self.num_frames)
            .field("channels", &self.channel_ids.len())
            .finish()
    }
}

impl ZarrRecording {
    pub fn open(store_path: &Path, stream: &str) -> Result<Self> {
        let store = Arc::new(FilesystemStore::new(store_path)?);
        let stream_path = format!("/{}", stream.trim_matches('/'));
        let data_path = format!("{}/data", stream_path);

        if !array_exists(&store, &data_path)? {
            return Err(anyhow::anyhow!(
                "No trace array at {} in {:?}",
                data_path,
                store_path
            ));
        }

        let attrs = read_group_attributes(&store, &stream_path)?;
        let sampling_frequency = attrs
            .get("sampling_frequency")
            .and_then(|v| v.as_f64())
            .or_else(|| {
                attrs
                    .get("stream_info")
                    .and_then(|info| info.get("nominal_srate"))
                    .and_then(|v| v.as_f64())
            })
            .filter(|fs| *fs > 0.0)
            .ok_or_else(|| {
                anyhow::anyhow!("Stream {} has no positive sampling frequency", stream)
            })?;

        let array = Array::open(store.clone(), &data_path)?;
        let shape = array.shape().to_vec();
        if shape.len() != 2 {
            return Err(anyhow::anyhow!(
                "Expected [channels x samples] traces, found shape {:?}",
                shape
            ));
        }
        let channel_ids: Vec<ChannelId> = (0..shape[0] as ChannelId).collect();

        let mut groups = HashMap::new();
        if let Some(labels) = attrs.get("channel_groups").and_then(|v| v.as_array()) {
            if labels.len() != channel_ids.len() {
                return Err(anyhow::anyhow!(
                    "{} channel groups for {} channels",
                    labels.len(),
                    channel_ids.len()
                ));
            }
            for (&channel, label) in channel_ids.iter().zip(labels) {
                let label = label
                    .as_i64()
                    .ok_or_else(|| anyhow::anyhow!("Channel group {} is not an integer", label))?;
                groups.insert(channel, label);
            }
        }

        tracing::info!(
            stream,
            channels = channel_ids.len(),
            frames = shape[1],
            sampling_frequency,
            "opened Zarr recording"
        );

        Ok(Self {
            array,
            stream: stream.to_string(),
            sampling_frequency,
            num_frames: shape[1],
            channel_ids,
            groups,
        })
    }

    /// Read rows `[first, last]` over `[start, end)` and convert to f32
    fn read_block(&self, first: u64, last: u64, start: u64, end: u64) -> Result<Array2<f32>> {
        let subset = ArraySubset::new_with_start_shape(
            vec![first, start],
            vec![last - first + 1, end - start],
        )?;

        macro_rules! retrieve_as_f32 {
            ($type:ty) => {{
                let block = self
                    .array
                    .retrieve_array_subset_ndarray::<$type>(&subset)?
                    .into_dimensionality::<Ix2>()?;
                block.mapv(|x| x as f32)
            }};
        }

        let block = match self.array.data_type() {
            DataType::Float32 => self
                .array
                .retrieve_array_subset_ndarray::<f32>(&subset)?
                .into_dimensionality::<Ix2>()?,
            DataType::Float64 => retrieve_as_f32!(f64),
            DataType::Int32 => retrieve_as_f32!(i32),
            DataType::Int16 => retrieve_as_f32!(i16),
            DataType::Int8 => retrieve_as_f32!(i8),
            other => {
                return Err(anyhow::anyhow!(
                    "Unsupported trace data type for stream {}: {:?}",
                    self.stream,
                    other
                ));
            }
        };
        Ok(block)
    }
}

impl Recording for ZarrRecording {
    fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    fn num_frames(&self) -> u64 {
        self.num_frames
    }

    fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    fn traces(
        &self,
        channel_ids: &[ChannelId],
        start_frame: u64,
        end_frame: u64,
    ) -> crate::Result<Array2<f32>> {
        let rows = resolve_trace_request(
            &self.channel_ids,
            self.num_frames,
            channel_ids,
            start_frame,
            end_frame,
        )?;
        let (Some(&first), Some(&last)) = (rows.iter().min(), rows.iter().max()) else {
            return Ok(Array2::zeros((0, (end_frame - start_frame) as usize)));
        };
        if start_frame == end_frame {
            return Ok(Array2::zeros((rows.len(), 0)));
        }

        // One contiguous read spanning the requested rows, then pick them out
        let block = self.read_block(first as u64, last as u64, start_frame, end_frame)?;
        let local: Vec<usize> = rows.iter().map(|&row| row - first).collect();
        Ok(block.select(Axis(0), &local))
    }

    fn channel_group(&self, channel_id: ChannelId) -> Option<Label> {
        self.groups.get(&channel_id).copied()
    }
}
