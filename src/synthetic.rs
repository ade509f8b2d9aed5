//! Noise-free synthetic recordings with known waveforms.
//!
//! Unit `u` fires on channels `2u` (full amplitude) and `2u + 1` (half
//! amplitude). Spikes of all units are interleaved in time and never overlap,
//! so every extracted snippet equals the injected one exactly.

use ndarray::{s, Array1, Array2, Array3, Axis};

use crate::error::{Error, Result};
use crate::recording::{InMemoryRecording, Label};
use crate::reducers::median;
use crate::sorting::InMemorySorting;
use crate::window::Window;
use crate::{ChannelId, UnitId};

pub const SAMPLING_FREQUENCY: f64 = 30_000.0;

/// Minimum spacing between consecutive spikes of any unit, in frames
const MIN_SPIKE_GAP: u64 = 500;

/// Ground truth of one unit
#[derive(Debug, Clone)]
pub struct SyntheticUnit {
    pub unit_id: UnitId,
    pub spike_train: Vec<u64>,
    /// Gain applied to each spike
    pub scales: Vec<f32>,
    /// Injected shape at unit gain, `[channels x samples]` over every channel
    pub shape: Array2<f32>,
    /// `[spikes x channels x samples]` over every channel
    pub waveforms: Array3<f32>,
    /// Strongest (negative) channel
    pub max_channel: ChannelId,
    /// Sample index of the trough within a snippet
    pub peak_sample: usize,
}

impl SyntheticUnit {
    /// Median template over every channel
    pub fn median_template(&self) -> Array2<f32> {
        self.waveforms.map_axis(Axis(0), median)
    }

    /// Signed value of every spike at the trough of the max channel
    pub fn trough_values(&self) -> Array1<f32> {
        self.waveforms
            .slice(s![.., self.max_channel as usize, self.peak_sample])
            .to_owned()
    }
}

/// Recording, sorting and ground truth generated together
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub recording: InMemoryRecording,
    pub sorting: InMemorySorting,
    pub window: Window,
    pub units: Vec<SyntheticUnit>,
}

impl SyntheticDataset {
    /// `num_samples` is the snippet length; spikes sit at `num_samples / 2`.
    /// Channel `c` gets group label `c / 2`, so each unit owns one group.
    pub fn with_known_waveforms(
        num_units: usize,
        num_channels: usize,
        num_samples: usize,
        spikes_per_unit: usize,
        seed: u64,
    ) -> Result<Self> {
        if num_units == 0 || num_samples < 4 {
            return Err(Error::config(
                "synthetic data needs at least one unit and four samples",
            ));
        }
        if num_channels < 2 * num_units {
            return Err(Error::config(format!(
                "{num_units} units need at least {} channels",
                2 * num_units
            )));
        }

        let before = (num_samples / 2) as u64;
        let window = Window::new(before, num_samples as u64 - before)?;
        let gap = MIN_SPIKE_GAP.max(2 * num_samples as u64);
        let margin = gap;
        let total_spikes = (num_units * spikes_per_unit) as u64;
        let num_frames = 2 * margin + total_spikes * gap;

        let mut rng = fastrand::Rng::with_seed(seed);
        let mut traces = Array2::<f32>::zeros((num_channels, num_frames as usize));
        let mut units = Vec::with_capacity(num_units);

        for u in 0..num_units {
            let amplitude = 50.0 + 25.0 * u as f32;
            let profile = spike_profile(num_samples, before as usize, amplitude);
            let mut shape = Array2::<f32>::zeros((num_channels, num_samples));
            shape.row_mut(2 * u).assign(&profile);
            shape.row_mut(2 * u + 1).assign(&(&profile * 0.5));
            let (peak_sample, _) = profile
                .iter()
                .enumerate()
                .fold((0, f32::INFINITY), |best, (i, &v)| if v < best.1 { (i, v) } else { best });

            units.push(SyntheticUnit {
                unit_id: u as UnitId,
                spike_train: Vec::with_capacity(spikes_per_unit),
                scales: Vec::with_capacity(spikes_per_unit),
                shape,
                waveforms: Array3::zeros((spikes_per_unit, num_channels, num_samples)),
                max_channel: (2 * u) as ChannelId,
                peak_sample,
            });
        }

        let jitter = (gap - num_samples as u64) / 2;
        for k in 0..total_spikes {
            let unit = &mut units[(k % num_units as u64) as usize];
            let frame = margin + k * gap + rng.u64(0..=jitter);
            let scale = 0.8 + 0.4 * rng.f32();
            let snippet = &unit.shape * scale;

            let start = (frame - before) as usize;
            traces
                .slice_mut(s![.., start..start + num_samples])
                .assign(&snippet);
            let index = unit.spike_train.len();
            unit.waveforms.slice_mut(s![index, .., ..]).assign(&snippet);
            unit.spike_train.push(frame);
            unit.scales.push(scale);
        }

        let mut recording = InMemoryRecording::new(traces, SAMPLING_FREQUENCY)?;
        let groups: Vec<Label> = (0..num_channels).map(|c| (c / 2) as Label).collect();
        recording.set_channel_groups(&groups)?;

        let mut sorting = InMemorySorting::with_sampling_frequency(SAMPLING_FREQUENCY);
        for unit in &units {
            sorting.add_unit(unit.unit_id, unit.spike_train.clone())?;
        }

        tracing::debug!(
            units = num_units,
            channels = num_channels,
            frames = num_frames,
            seed,
            "generated synthetic dataset"
        );

        Ok(Self {
            recording,
            sorting,
            window,
            units,
        })
    }
}

/// Negative Gaussian trough at `center` followed by a small positive rebound
fn spike_profile(num_samples: usize, center: usize, amplitude: f32) -> Array1<f32> {
    let width = (num_samples as f32 / 20.0).max(1.0);
    let rebound = center as f32 + 3.0 * width;
    Array1::from_shape_fn(num_samples, |i| {
        let x = i as f32;
        let trough = (-((x - center as f32) / width).powi(2) / 2.0).exp();
        let lobe = (-((x - rebound) / (2.0 * width)).powi(2) / 2.0).exp();
        amplitude * (0.25 * lobe - trough)
    })
}
