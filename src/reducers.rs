//! Per-unit summaries derived from waveform sets: templates, max channels
//! and amplitudes.
//!
//! Zero-spike units never fail here: their templates are NaN-filled, max
//! channels fall back to channel order and amplitude series are empty.

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::config::{AmplitudeMethod, PeakPolarity, TemplateStatistic};
use crate::error::{Error, Result};
use crate::extract::WaveformSet;
use crate::window::Window;
use crate::{ChannelId, UnitId};

/// Representative waveform of a unit, `[channels x samples]`
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub unit_id: UnitId,
    pub channel_ids: Vec<ChannelId>,
    pub window: Window,
    pub statistic: TemplateStatistic,
    /// Subsampling cap of the waveforms behind the template
    pub max_spikes: Option<usize>,
    /// Spikes the template was computed from
    pub num_spikes: usize,
    pub data: Array2<f32>,
}

/// Channels ranked by template peak, strongest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxChannels {
    pub unit_id: UnitId,
    pub peak: PeakPolarity,
    pub channel_ids: Vec<ChannelId>,
    /// Channel subset the ranking was computed over
    pub ranked_over: Vec<ChannelId>,
    pub window: Window,
    pub statistic: TemplateStatistic,
    pub max_spikes: Option<usize>,
}

impl MaxChannels {
    /// Strongest channel
    pub fn primary(&self) -> Option<ChannelId> {
        self.channel_ids.first().copied()
    }
}

/// One amplitude per kept spike, read on a reference channel at a fixed sample
#[derive(Debug, Clone, PartialEq)]
pub struct AmplitudeSeries {
    pub unit_id: UnitId,
    pub peak: PeakPolarity,
    pub method: AmplitudeMethod,
    pub window: Window,
    /// Statistic of the template the peak sample was taken from
    pub statistic: TemplateStatistic,
    pub max_spikes: Option<usize>,
    /// Channel subset of the waveforms the values were read from
    pub channel_ids: Vec<ChannelId>,
    /// Reference channel
    pub channel_id: ChannelId,
    /// Sample offset within the snippet the amplitudes were read at
    pub sample_index: usize,
    /// Index into the unit's spike train of each value
    pub spike_indices: Vec<usize>,
    pub values: Array1<f32>,
}

/// Median with NumPy semantics (mean of the two middle values); NaN when empty
pub fn median(values: ArrayView1<f32>) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().collect();
    if sorted.is_empty() {
        return f32::NAN;
    }
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Template from a waveform set, read one channel plane at a time
pub fn compute_template(waveforms: &WaveformSet, statistic: TemplateStatistic) -> Result<Template> {
    let (num_spikes, num_channels, num_samples) = waveforms.shape();
    let mut data = Array2::from_elem((num_channels, num_samples), f32::NAN);

    if num_spikes > 0 {
        for channel in 0..num_channels {
            let plane = waveforms.channel_plane(channel)?;
            let row = match statistic {
                TemplateStatistic::Median => plane.map_axis(Axis(0), median),
                TemplateStatistic::Mean => plane
                    .mean_axis(Axis(0))
                    .unwrap_or_else(|| Array1::from_elem(num_samples, f32::NAN)),
            };
            data.row_mut(channel).assign(&row);
        }
    }

    Ok(Template {
        unit_id: waveforms.unit_id,
        channel_ids: waveforms.channel_ids.clone(),
        window: waveforms.window,
        statistic,
        max_spikes: waveforms.max_spikes,
        num_spikes,
        data,
    })
}

/// Score used to rank peaks; larger is stronger. NaN never wins.
fn peak_score(value: f32, peak: PeakPolarity) -> f32 {
    let score = match peak {
        PeakPolarity::Pos => value,
        PeakPolarity::Neg => -value,
        PeakPolarity::Both => value.abs(),
    };
    if score.is_nan() { f32::NEG_INFINITY } else { score }
}

/// Strongest sample of a template row: `(sample_index, score)`, earliest on ties
pub fn channel_peak(row: ArrayView1<f32>, peak: PeakPolarity) -> (usize, f32) {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, &value) in row.iter().enumerate() {
        let score = peak_score(value, peak);
        if score > best.1 {
            best = (i, score);
        }
    }
    best
}

/// Rank the template's channels by peak and keep the top `count`.
/// Ties go to the lowest channel id.
pub fn compute_max_channels(
    template: &Template,
    peak: PeakPolarity,
    count: usize,
) -> Result<MaxChannels> {
    if count == 0 || count > template.channel_ids.len() {
        return Err(Error::config(format!(
            "cannot rank {count} max channels for unit {} with {} channels",
            template.unit_id,
            template.channel_ids.len()
        )));
    }

    let mut ranked: Vec<(ChannelId, f32)> = template
        .channel_ids
        .iter()
        .zip(template.data.outer_iter())
        .map(|(&id, row)| (id, channel_peak(row, peak).1))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    Ok(MaxChannels {
        unit_id: template.unit_id,
        peak,
        channel_ids: ranked.into_iter().take(count).map(|(id, _)| id).collect(),
        ranked_over: template.channel_ids.clone(),
        window: template.window,
        statistic: template.statistic,
        max_spikes: template.max_spikes,
    })
}

/// Per-spike amplitudes on `channel_id` at the template's peak sample.
///
/// `Both` reports magnitudes, `Pos`/`Neg` the signed value. `Relative`
/// divides every value by the unit's median amplitude.
pub fn compute_amplitudes(
    waveforms: &WaveformSet,
    template: &Template,
    channel_id: ChannelId,
    peak: PeakPolarity,
    method: AmplitudeMethod,
) -> Result<AmplitudeSeries> {
    let channel_index = waveforms
        .channel_ids
        .iter()
        .position(|&c| c == channel_id)
        .ok_or_else(|| {
            Error::config(format!(
                "reference channel {channel_id} is not in the channel subset of unit {}",
                waveforms.unit_id
            ))
        })?;
    let template_index = template
        .channel_ids
        .iter()
        .position(|&c| c == channel_id)
        .ok_or_else(|| {
            Error::config(format!(
                "reference channel {channel_id} is not in the template of unit {}",
                template.unit_id
            ))
        })?;

    let (sample_index, _) = channel_peak(template.data.row(template_index), peak);
    if sample_index >= waveforms.num_samples() {
        return Err(Error::config(format!(
            "template of unit {} does not match its waveform window",
            waveforms.unit_id
        )));
    }

    let plane = waveforms.channel_plane(channel_index)?;
    let mut values: Array1<f32> = plane.column(sample_index).to_owned();
    if peak == PeakPolarity::Both {
        values.mapv_inplace(f32::abs);
    }
    if method == AmplitudeMethod::Relative && !values.is_empty() {
        let reference = median(values.view());
        if reference == 0.0 || reference.is_nan() {
            tracing::warn!(
                unit = waveforms.unit_id,
                "median amplitude is {reference}; relative amplitudes are undefined"
            );
        }
        values.mapv_inplace(|v| v / reference);
    }

    Ok(AmplitudeSeries {
        unit_id: waveforms.unit_id,
        peak,
        method,
        window: waveforms.window,
        statistic: template.statistic,
        max_spikes: waveforms.max_spikes,
        channel_ids: waveforms.channel_ids.clone(),
        channel_id,
        sample_index,
        spike_indices: waveforms.spike_indices.clone(),
        values,
    })
}
