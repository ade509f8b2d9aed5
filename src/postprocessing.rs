//! Extraction entry points.
//!
//! Every entry point validates its options up front, resolves channel
//! subsets, then pulls each artifact through the property cache: stored
//! values are reused when the policy allows it and they were produced from
//! the same window, channel subset, spike cap and reduction options; everything else is computed on the
//! configured executor and written back by the calling thread.

use ndarray::Array1;
use std::collections::BTreeMap;

use crate::cache;
use crate::channels::{channels_by_label, select_channels, unit_label, ChannelSelection};
use crate::config::{Backing, CachePolicy, ExtractionConfig};
use crate::error::{Error, Result};
use crate::executor::{ExecutionStrategy, Executor};
use crate::extract::{extract_waveforms, Backend, SnippetRequest, WaveformSet};
use crate::properties::{PropertyKey, PropertyValue};
use crate::recording::Recording;
use crate::reducers::{
    compute_amplitudes, compute_max_channels, compute_template, AmplitudeSeries, MaxChannels,
    Template,
};
use crate::sorting::Sorting;
use crate::window::Window;
use crate::zarr::WaveformStore;
use crate::{ChannelId, UnitId};

/// Seed used when the configuration does not set one
pub const DEFAULT_SEED: u64 = 0;

/// Extract per-unit waveform sets, in unit order
pub fn get_unit_waveforms<R, S>(
    recording: &R,
    sorting: &mut S,
    config: &ExtractionConfig,
) -> Result<Vec<WaveformSet>>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    let mut ctx = Context::new(recording, sorting, config)?;
    let units = ctx.units.clone();
    ctx.ensure_waveforms(sorting, &units, config.cache)?;
    Ok(collect(&ctx.waveforms, &units))
}

/// Compute per-unit templates, in unit order
pub fn get_unit_templates<R, S>(
    recording: &R,
    sorting: &mut S,
    config: &ExtractionConfig,
) -> Result<Vec<Template>>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    let mut ctx = Context::new(recording, sorting, config)?;
    let units = ctx.units.clone();
    ctx.ensure_templates(sorting, &units, config.cache)?;
    Ok(collect(&ctx.templates, &units))
}

/// Rank the `config.max_channels` strongest channels of every unit, in unit order
pub fn get_unit_max_channels<R, S>(
    recording: &R,
    sorting: &mut S,
    config: &ExtractionConfig,
) -> Result<Vec<MaxChannels>>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    let mut ctx = Context::new(recording, sorting, config)?;
    let units = ctx.units.clone();
    ctx.ensure_max_channels(sorting, &units, config.cache)?;
    Ok(collect(&ctx.max_channels, &units))
}

/// Per-spike amplitudes on each unit's max channel, in unit order
pub fn get_unit_amplitudes<R, S>(
    recording: &R,
    sorting: &mut S,
    config: &ExtractionConfig,
) -> Result<Vec<AmplitudeSeries>>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    let mut ctx = Context::new(recording, sorting, config)?;
    let units = ctx.units.clone();
    ctx.ensure_amplitudes(sorting, &units, config.cache)?;
    Ok(collect(&ctx.amplitudes, &units))
}

/// Label every unit with the `property` value of its max channel on the recording
pub fn set_unit_properties_by_max_channel_properties<R, S>(
    recording: &R,
    sorting: &mut S,
    property: &str,
    config: &ExtractionConfig,
) -> Result<()>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    channels_by_label(recording, property)?;

    let ranking = ExtractionConfig {
        grouping_property: None,
        compute_property_from_recording: false,
        channel_ids: None,
        max_channels: 1,
        // Labels requested from the recording never come from stored values
        cache: match config.cache {
            _ if config.compute_property_from_recording => CachePolicy::ComputeOnly,
            CachePolicy::ForceRecompute => CachePolicy::ComputeOnly,
            other => other.for_dependency(),
        },
        ..config.clone()
    };
    let max_channels = get_unit_max_channels(recording, sorting, &ranking)?;

    for max in max_channels {
        let channel = max.primary().ok_or_else(|| {
            Error::config(format!("unit {} has no max channel", max.unit_id))
        })?;
        let label = recording.channel_property(channel, property).ok_or_else(|| {
            Error::config(format!("channel {channel} has no '{property}' property"))
        })?;
        tracing::debug!(unit = max.unit_id, channel, label, "labelled unit from max channel");
        sorting.set_property(
            max.unit_id,
            PropertyKey::from_name(property),
            PropertyValue::Label(label),
        )?;
    }
    Ok(())
}

fn collect<T: Clone>(memo: &BTreeMap<UnitId, T>, units: &[UnitId]) -> Vec<T> {
    units.iter().filter_map(|u| memo.get(u).cloned()).collect()
}

/// Plan and per-call memo shared by the entry points
struct Context<'a, R: ?Sized> {
    recording: &'a R,
    config: &'a ExtractionConfig,
    window: Window,
    seed: u64,
    execution: ExecutionStrategy,
    units: Vec<UnitId>,
    channels: ChannelSelection,
    backend: Option<Backend>,
    waveforms: BTreeMap<UnitId, WaveformSet>,
    templates: BTreeMap<UnitId, Template>,
    max_channels: BTreeMap<UnitId, MaxChannels>,
    amplitudes: BTreeMap<UnitId, AmplitudeSeries>,
}

impl<'a, R: Recording + ?Sized> Context<'a, R> {
    fn new<S: Sorting + ?Sized>(
        recording: &'a R,
        sorting: &mut S,
        config: &'a ExtractionConfig,
    ) -> Result<Self> {
        let window = config.validate(recording)?;

        let available = sorting.unit_ids();
        let units = match &config.unit_ids {
            Some(requested) => {
                if let Some(unknown) = requested.iter().find(|u| !available.contains(u)) {
                    return Err(Error::config(format!("unit id {unknown} is not in the sorting")));
                }
                requested.clone()
            }
            None => available,
        };

        let channels = resolve_channels(recording, sorting, config, &units)?;
        for &unit in &units {
            let count = channels.for_unit(unit)?.len();
            if count < config.max_channels {
                return Err(Error::config(format!(
                    "max_channels is {} but unit {unit} has only {count} channels",
                    config.max_channels
                )));
            }
        }

        let execution = ExecutionStrategy::from_jobs(config.n_jobs);
        tracing::info!(
            units = units.len(),
            before = window.before,
            after = window.after,
            parallel = execution.is_parallel(),
            "planned extraction"
        );

        Ok(Self {
            recording,
            config,
            window,
            seed: config.seed.unwrap_or(DEFAULT_SEED),
            execution,
            units,
            channels,
            backend: None,
            waveforms: BTreeMap::new(),
            templates: BTreeMap::new(),
            max_channels: BTreeMap::new(),
            amplitudes: BTreeMap::new(),
        })
    }

    fn channels_of(&self, unit: UnitId) -> Result<&[ChannelId]> {
        self.channels.for_unit(unit)
    }

    /// Created on first use so cache hits never touch the disk
    fn backend(&mut self) -> Result<Backend> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let backend = match &self.config.backing {
            Backing::InMemory => Backend::InMemory,
            Backing::OutOfCore { path } => Backend::OutOfCore(WaveformStore::open(
                path.as_deref(),
                &self.config.to_json()?,
            )?),
        };
        self.backend = Some(backend.clone());
        Ok(backend)
    }

    /// Units not yet memoized, after pulling reusable values from the cache
    fn pending<S, T, A, G>(
        &self,
        sorting: &S,
        units: &[UnitId],
        key: &PropertyKey,
        policy: CachePolicy,
        memo: &BTreeMap<UnitId, T>,
        accept: A,
        unwrap: G,
    ) -> (Vec<UnitId>, Vec<(UnitId, T)>)
    where
        S: Sorting + ?Sized,
        A: Fn(UnitId, &PropertyValue) -> bool,
        G: Fn(PropertyValue) -> Option<T>,
    {
        let mut missing = Vec::new();
        let mut reused = Vec::new();
        for &unit in units {
            if memo.contains_key(&unit) {
                continue;
            }
            match cache::lookup(sorting, unit, key, policy, |v| accept(unit, v)).and_then(&unwrap) {
                Some(value) => reused.push((unit, value)),
                None => missing.push(unit),
            }
        }
        (missing, reused)
    }

    fn ensure_waveforms<S: Sorting + ?Sized>(
        &mut self,
        sorting: &mut S,
        units: &[UnitId],
        policy: CachePolicy,
    ) -> Result<()> {
        let window = self.window;
        let max_spikes = self.config.max_spikes_per_unit;
        let (missing, reused) = self.pending(
            sorting,
            units,
            &PropertyKey::Waveforms,
            policy,
            &self.waveforms,
            |unit, value| {
                value.as_waveforms().is_some_and(|w| {
                    w.window == window
                        && w.max_spikes == max_spikes
                        && self.channels_of(unit).is_ok_and(|c| c == w.channel_ids.as_slice())
                })
            },
            |value| match value {
                PropertyValue::Waveforms(w) => Some(w),
                _ => None,
            },
        );
        self.waveforms.extend(reused);
        if missing.is_empty() {
            return Ok(());
        }

        let mut plans = BTreeMap::new();
        for &unit in &missing {
            plans.insert(unit, (sorting.spike_train(unit)?, self.channels_of(unit)?.to_vec()));
        }
        let backend = self.backend()?;
        let recording = self.recording;
        let seed = self.seed;

        let computed = self.execution.run(&missing, |unit| {
            let (spike_train, channel_ids) = plans
                .get(&unit)
                .ok_or_else(|| Error::internal(format!("no extraction plan for unit {unit}")))?;
            let request = SnippetRequest {
                unit_id: unit,
                spike_train,
                channel_ids,
                window,
                max_spikes,
                seed,
            };
            extract_waveforms(recording, &request, &backend)
        })?;

        for waveforms in computed {
            let unit = waveforms.unit_id;
            cache::store(
                sorting,
                unit,
                PropertyKey::Waveforms,
                PropertyValue::Waveforms(waveforms.clone()),
                policy,
            )?;
            self.waveforms.insert(unit, waveforms);
        }
        Ok(())
    }

    fn ensure_templates<S: Sorting + ?Sized>(
        &mut self,
        sorting: &mut S,
        units: &[UnitId],
        policy: CachePolicy,
    ) -> Result<()> {
        let window = self.window;
        let statistic = self.config.template_statistic;
        let max_spikes = self.config.max_spikes_per_unit;
        let (missing, reused) = self.pending(
            sorting,
            units,
            &PropertyKey::Template,
            policy,
            &self.templates,
            |unit, value| {
                value.as_template().is_some_and(|t| {
                    t.window == window
                        && t.statistic == statistic
                        && t.max_spikes == max_spikes
                        && self.channels_of(unit).is_ok_and(|c| c == t.channel_ids.as_slice())
                })
            },
            |value| match value {
                PropertyValue::Template(t) => Some(t),
                _ => None,
            },
        );
        self.templates.extend(reused);
        if missing.is_empty() {
            return Ok(());
        }

        self.ensure_waveforms(sorting, &missing, policy.for_dependency())?;
        let waveforms = &self.waveforms;
        let computed = self.execution.run(&missing, |unit| {
            let set = waveforms
                .get(&unit)
                .ok_or_else(|| Error::internal(format!("no waveforms for unit {unit}")))?;
            compute_template(set, statistic)
        })?;

        for template in computed {
            let unit = template.unit_id;
            cache::store(
                sorting,
                unit,
                PropertyKey::Template,
                PropertyValue::Template(template.clone()),
                policy,
            )?;
            self.templates.insert(unit, template);
        }
        Ok(())
    }

    fn ensure_max_channels<S: Sorting + ?Sized>(
        &mut self,
        sorting: &mut S,
        units: &[UnitId],
        policy: CachePolicy,
    ) -> Result<()> {
        let window = self.window;
        let peak = self.config.peak;
        let count = self.config.max_channels;
        let statistic = self.config.template_statistic;
        let max_spikes = self.config.max_spikes_per_unit;
        let (missing, reused) = self.pending(
            sorting,
            units,
            &PropertyKey::MaxChannels,
            policy,
            &self.max_channels,
            |unit, value| {
                value.as_max_channels().is_some_and(|m| {
                    m.peak == peak
                        && m.window == window
                        && m.statistic == statistic
                        && m.max_spikes == max_spikes
                        && m.channel_ids.len() >= count
                        && self.channels_of(unit).is_ok_and(|c| c == m.ranked_over.as_slice())
                })
            },
            |value| match value {
                PropertyValue::MaxChannels(mut m) => {
                    m.channel_ids.truncate(count);
                    Some(m)
                }
                _ => None,
            },
        );
        self.max_channels.extend(reused);
        if missing.is_empty() {
            return Ok(());
        }

        self.ensure_templates(sorting, &missing, policy.for_dependency())?;
        let templates = &self.templates;
        let computed = self.execution.run(&missing, |unit| {
            let template = templates
                .get(&unit)
                .ok_or_else(|| Error::internal(format!("no template for unit {unit}")))?;
            compute_max_channels(template, peak, count)
        })?;

        for max in computed {
            let unit = max.unit_id;
            cache::store(
                sorting,
                unit,
                PropertyKey::MaxChannels,
                PropertyValue::MaxChannels(max.clone()),
                policy,
            )?;
            self.max_channels.insert(unit, max);
        }
        Ok(())
    }

    fn ensure_amplitudes<S: Sorting + ?Sized>(
        &mut self,
        sorting: &mut S,
        units: &[UnitId],
        policy: CachePolicy,
    ) -> Result<()> {
        let window = self.window;
        let peak = self.config.peak;
        let method = self.config.method;
        let statistic = self.config.template_statistic;
        let max_spikes = self.config.max_spikes_per_unit;
        let (missing, reused) = self.pending(
            sorting,
            units,
            &PropertyKey::Amplitudes,
            policy,
            &self.amplitudes,
            |unit, value| {
                value.as_amplitudes().is_some_and(|a| {
                    a.window == window
                        && a.peak == peak
                        && a.method == method
                        && a.statistic == statistic
                        && a.max_spikes == max_spikes
                        && self.channels_of(unit).is_ok_and(|c| c == a.channel_ids.as_slice())
                })
            },
            |value| match value {
                PropertyValue::Amplitudes(a) => Some(a),
                _ => None,
            },
        );
        self.amplitudes.extend(reused);
        if missing.is_empty() {
            return Ok(());
        }

        let dependency = policy.for_dependency();
        self.ensure_waveforms(sorting, &missing, dependency)?;
        self.ensure_max_channels(sorting, &missing, dependency)?;

        let waveforms = &self.waveforms;
        let templates = &self.templates;
        let max_channels = &self.max_channels;
        let computed = self.execution.run(&missing, |unit| {
            let missing_input = |what: &str| Error::internal(format!("no {what} for unit {unit}"));
            let set = waveforms.get(&unit).ok_or_else(|| missing_input("waveforms"))?;
            let reference = max_channels
                .get(&unit)
                .and_then(MaxChannels::primary)
                .ok_or_else(|| missing_input("max channel"))?;
            // Max channels may come from the cache without a template in memo
            let template = match templates.get(&unit) {
                Some(template) => template.clone(),
                None => compute_template(set, statistic)?,
            };
            compute_amplitudes(set, &template, reference, peak, method)
        })?;

        for series in computed {
            let unit = series.unit_id;
            if policy.writes() {
                let num_spikes = sorting.spike_train(unit)?.len();
                sorting.set_spike_feature(unit, "amplitudes", spike_feature(&series, num_spikes))?;
            }
            cache::store(
                sorting,
                unit,
                PropertyKey::Amplitudes,
                PropertyValue::Amplitudes(series.clone()),
                policy,
            )?;
            self.amplitudes.insert(unit, series);
        }
        Ok(())
    }
}

/// Spread a series over the full spike train, NaN where a spike was not measured
fn spike_feature(series: &AmplitudeSeries, num_spikes: usize) -> Array1<f32> {
    let mut feature = Array1::from_elem(num_spikes, f32::NAN);
    for (&index, &value) in series.spike_indices.iter().zip(series.values.iter()) {
        if index < num_spikes {
            feature[index] = value;
        }
    }
    feature
}

/// Resolve channel subsets, labelling units from the recording when needed
fn resolve_channels<R, S>(
    recording: &R,
    sorting: &mut S,
    config: &ExtractionConfig,
    units: &[UnitId],
) -> Result<ChannelSelection>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    if let (Some(property), None) = (&config.grouping_property, &config.channel_ids) {
        let unlabelled = units
            .iter()
            .any(|&unit| unit_label(sorting, unit, property).is_none());
        if config.compute_property_from_recording || unlabelled {
            if unlabelled && !config.compute_property_from_recording {
                tracing::info!(
                    property = property.as_str(),
                    "units lack the grouping property; deriving it from their max channels"
                );
            }
            let labelling = ExtractionConfig {
                unit_ids: Some(units.to_vec()),
                ..config.clone()
            };
            set_unit_properties_by_max_channel_properties(recording, sorting, property, &labelling)?;
        }
    }

    select_channels(
        recording,
        sorting,
        units,
        config.grouping_property.as_deref(),
        config.channel_ids.as_deref(),
    )
}
