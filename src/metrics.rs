//! Plumbing shared by per-unit quality metrics: epochs, per-epoch spike and
//! amplitude restriction, metric evaluation and threshold curation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::impl_option_enum;
use crate::error::{Error, Result};
use crate::recording::Recording;
use crate::reducers::AmplitudeSeries;
use crate::sorting::Sorting;
use crate::UnitId;

/// Named frame interval of the recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub name: String,
    pub start_frame: u64,
    pub end_frame: u64,
}

impl Epoch {
    pub fn new(name: impl Into<String>, start_frame: u64, end_frame: u64) -> Result<Self> {
        if end_frame <= start_frame {
            return Err(Error::config(format!(
                "epoch end {end_frame} must be after its start {start_frame}"
            )));
        }
        Ok(Self {
            name: name.into(),
            start_frame,
            end_frame,
        })
    }

    /// Single epoch spanning the whole recording
    pub fn whole<R: Recording + ?Sized>(recording: &R) -> Self {
        Self {
            name: "complete_session".to_string(),
            start_frame: 0,
            end_frame: recording.num_frames(),
        }
    }

    /// Strictly inside the epoch
    pub fn contains(&self, frame: u64) -> bool {
        frame > self.start_frame && frame < self.end_frame
    }
}

/// Spike trains and amplitudes of the curated units, split by epoch
#[derive(Debug, Clone)]
pub struct MetricData {
    unit_ids: Vec<UnitId>,
    spike_trains: BTreeMap<UnitId, Vec<u64>>,
    amplitudes: BTreeMap<UnitId, AmplitudeSeries>,
    epochs: Vec<Epoch>,
    sampling_frequency: f64,
}

impl MetricData {
    /// Collect spike trains for `unit_ids` (every unit when `None`).
    /// An empty `epochs` list means the whole recording.
    pub fn new<R, S>(
        recording: &R,
        sorting: &S,
        unit_ids: Option<&[UnitId]>,
        epochs: Vec<Epoch>,
    ) -> Result<Self>
    where
        R: Recording + ?Sized,
        S: Sorting + ?Sized,
    {
        let available = sorting.unit_ids();
        let unit_ids = match unit_ids {
            Some(ids) => {
                if let Some(unknown) = ids.iter().find(|u| !available.contains(u)) {
                    return Err(Error::config(format!("unit id {unknown} is not in the sorting")));
                }
                ids.to_vec()
            }
            None => available,
        };

        let mut spike_trains = BTreeMap::new();
        for &unit in &unit_ids {
            spike_trains.insert(unit, sorting.spike_train(unit)?);
        }

        let epochs = if epochs.is_empty() {
            vec![Epoch::whole(recording)]
        } else {
            epochs
        };

        Ok(Self {
            unit_ids,
            spike_trains,
            amplitudes: BTreeMap::new(),
            epochs,
            sampling_frequency: recording.sampling_frequency(),
        })
    }

    /// Attach amplitude series, one per unit
    pub fn with_amplitudes(mut self, amplitudes: Vec<AmplitudeSeries>) -> Self {
        for series in amplitudes {
            self.amplitudes.insert(series.unit_id, series);
        }
        self
    }

    pub fn unit_ids(&self) -> &[UnitId] {
        &self.unit_ids
    }

    pub fn epochs(&self) -> &[Epoch] {
        &self.epochs
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    pub fn has_amplitudes(&self) -> bool {
        !self.amplitudes.is_empty()
    }

    fn epoch(&self, index: usize) -> Result<&Epoch> {
        self.epochs.get(index).ok_or_else(|| {
            Error::config(format!(
                "epoch index {index} out of range ({} epochs)",
                self.epochs.len()
            ))
        })
    }

    /// Spike frames of `unit_id` strictly inside epoch `epoch`
    pub fn spikes_in_epoch(&self, unit_id: UnitId, epoch: usize) -> Result<Vec<u64>> {
        let epoch = self.epoch(epoch)?;
        let train = self
            .spike_trains
            .get(&unit_id)
            .ok_or_else(|| Error::config(format!("unit id {unit_id} has no metric data")))?;
        Ok(train.iter().copied().filter(|&t| epoch.contains(t)).collect())
    }

    /// Amplitudes of `unit_id` for the spikes strictly inside epoch `epoch`
    pub fn amplitudes_in_epoch(&self, unit_id: UnitId, epoch: usize) -> Result<Vec<f32>> {
        let epoch = self.epoch(epoch)?;
        let series = self.amplitudes.get(&unit_id).ok_or_else(|| {
            Error::config(format!("no amplitudes attached for unit {unit_id}"))
        })?;
        let train = self
            .spike_trains
            .get(&unit_id)
            .ok_or_else(|| Error::config(format!("unit id {unit_id} has no metric data")))?;

        Ok(series
            .spike_indices
            .iter()
            .zip(series.values.iter())
            .filter(|&(&index, _)| train.get(index).is_some_and(|&t| epoch.contains(t)))
            .map(|(_, &value)| value)
            .collect())
    }
}

/// One per-unit metric evaluated per epoch
pub trait QualityMetric {
    fn name(&self) -> &str;

    fn compute_unit(&self, data: &MetricData, unit_id: UnitId, epoch: usize) -> Result<f64>;
}

/// Adapts a closure into a [`QualityMetric`]
pub struct FnMetric<F> {
    name: String,
    compute: F,
}

impl<F> FnMetric<F>
where
    F: Fn(&MetricData, UnitId, usize) -> Result<f64>,
{
    pub fn new(name: impl Into<String>, compute: F) -> Self {
        Self {
            name: name.into(),
            compute,
        }
    }
}

impl<F> QualityMetric for FnMetric<F>
where
    F: Fn(&MetricData, UnitId, usize) -> Result<f64>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn compute_unit(&self, data: &MetricData, unit_id: UnitId, epoch: usize) -> Result<f64> {
        (self.compute)(data, unit_id, epoch)
    }
}

/// Metric values, one `Vec` per epoch in unit order
pub fn compute_metric<M: QualityMetric + ?Sized>(
    metric: &M,
    data: &MetricData,
) -> Result<Vec<Vec<f64>>> {
    let mut per_epoch = Vec::with_capacity(data.epochs().len());
    for (epoch, info) in data.epochs().iter().enumerate() {
        let values = data
            .unit_ids()
            .iter()
            .map(|&unit| metric.compute_unit(data, unit, epoch))
            .collect::<Result<Vec<f64>>>()?;
        tracing::debug!(metric = metric.name(), epoch = info.name.as_str(), "computed metric");
        per_epoch.push(values);
    }
    Ok(per_epoch)
}

/// Comparison that removes a unit during threshold curation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSign {
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl_option_enum!(ThresholdSign, "threshold sign", {
    "less" => ThresholdSign::Less,
    "less_or_equal" => ThresholdSign::LessOrEqual,
    "greater" => ThresholdSign::Greater,
    "greater_or_equal" => ThresholdSign::GreaterOrEqual,
});

impl ThresholdSign {
    /// `true` when `value` should be removed
    pub fn removes(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Less => value < threshold,
            Self::LessOrEqual => value <= threshold,
            Self::Greater => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
        }
    }
}

/// Units kept after removing those whose metric in `epoch` satisfies `sign`
pub fn threshold_units<M: QualityMetric + ?Sized>(
    metric: &M,
    data: &MetricData,
    threshold: f64,
    sign: ThresholdSign,
    epoch: usize,
) -> Result<Vec<UnitId>> {
    data.epoch(epoch)?;

    let mut kept = Vec::new();
    for &unit in data.unit_ids() {
        let value = metric.compute_unit(data, unit, epoch)?;
        if sign.removes(value, threshold) {
            tracing::debug!(metric = metric.name(), unit, value, "unit removed by threshold");
        } else {
            kept.push(unit);
        }
    }
    Ok(kept)
}
