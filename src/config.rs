use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::recording::Recording;
use crate::window::{plan_window, Window};
use crate::{ChannelId, UnitId};

/// Peak polarity used for max channels and amplitudes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeakPolarity {
    Pos,
    Neg,
    #[default]
    Both,
}

/// Amplitude normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmplitudeMethod {
    #[default]
    Absolute,
    Relative,
}

/// Central tendency used for templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatistic {
    #[default]
    Median,
    Mean,
}

/// Recompute-or-reuse policy for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Compute without reading or writing the sorting's property store
    ComputeOnly,
    /// Always compute the requested artifact and store it
    ComputeAndStore,
    /// Reuse a stored compatible value, else compute and store
    #[default]
    #[serde(rename = "reuse", alias = "reuse_if_present_else_compute")]
    ReuseIfPresentElseCompute,
    /// Recompute and store the artifact and everything it depends on
    ForceRecompute,
}

impl CachePolicy {
    pub fn reads(self) -> bool {
        matches!(self, Self::ReuseIfPresentElseCompute)
    }

    pub fn writes(self) -> bool {
        !matches!(self, Self::ComputeOnly)
    }

    /// Policy applied to the inputs of the requested artifact
    /// (waveforms for templates, templates for max channels, ...)
    pub fn for_dependency(self) -> Self {
        match self {
            Self::ComputeOnly => Self::ComputeOnly,
            Self::ComputeAndStore | Self::ReuseIfPresentElseCompute => {
                Self::ReuseIfPresentElseCompute
            }
            Self::ForceRecompute => Self::ForceRecompute,
        }
    }
}

/// Where extracted waveforms live
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum Backing {
    #[default]
    InMemory,
    /// Zarr store at `path`, or in a temporary directory when unset
    OutOfCore {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

macro_rules! impl_option_enum {
    ($ty:ty, $label:literal, { $($name:literal => $variant:path),+ $(,)? }) => {
        impl std::str::FromStr for $ty {
            type Err = $crate::error::Error;

            fn from_str(s: &str) -> $crate::error::Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($name => Ok($variant),)+
                    other => Err($crate::error::Error::config(format!(
                        "unknown {} '{}' (expected one of: {})",
                        $label,
                        other,
                        [$($name),+].join(", ")
                    ))),
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let name = match self {
                    $($variant => $name,)+
                };
                f.write_str(name)
            }
        }
    };
}

pub(crate) use impl_option_enum;

impl_option_enum!(PeakPolarity, "peak", {
    "pos" => PeakPolarity::Pos,
    "neg" => PeakPolarity::Neg,
    "both" => PeakPolarity::Both,
});

impl_option_enum!(AmplitudeMethod, "amplitude method", {
    "absolute" => AmplitudeMethod::Absolute,
    "relative" => AmplitudeMethod::Relative,
});

impl_option_enum!(TemplateStatistic, "template statistic", {
    "median" => TemplateStatistic::Median,
    "mean" => TemplateStatistic::Mean,
});

impl_option_enum!(CachePolicy, "cache policy", {
    "compute_only" => CachePolicy::ComputeOnly,
    "compute_and_store" => CachePolicy::ComputeAndStore,
    "reuse" => CachePolicy::ReuseIfPresentElseCompute,
    "force_recompute" => CachePolicy::ForceRecompute,
});

/// Options shared by every extraction entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub ms_before: f64,
    pub ms_after: f64,
    /// Overrides `ms_before` when set
    pub frames_before: Option<u64>,
    /// Overrides `ms_after` when set
    pub frames_after: Option<u64>,
    pub grouping_property: Option<String>,
    /// Derive unit labels from the recording even when the sorting has them
    pub compute_property_from_recording: bool,
    /// Explicit channel subset applied to every unit
    pub channel_ids: Option<Vec<ChannelId>>,
    /// Restrict to these units (sorting order otherwise)
    pub unit_ids: Option<Vec<UnitId>>,
    pub max_spikes_per_unit: Option<usize>,
    pub seed: Option<u64>,
    /// 0 or 1 runs sequentially
    pub n_jobs: usize,
    pub backing: Backing,
    pub cache: CachePolicy,
    pub peak: PeakPolarity,
    pub method: AmplitudeMethod,
    pub template_statistic: TemplateStatistic,
    pub max_channels: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ms_before: 3.0,
            ms_after: 3.0,
            frames_before: None,
            frames_after: None,
            grouping_property: None,
            compute_property_from_recording: false,
            channel_ids: None,
            unit_ids: None,
            max_spikes_per_unit: None,
            seed: None,
            n_jobs: 1,
            backing: Backing::InMemory,
            cache: CachePolicy::default(),
            peak: PeakPolarity::default(),
            method: AmplitudeMethod::default(),
            template_statistic: TemplateStatistic::default(),
            max_channels: 1,
        }
    }
}

impl ExtractionConfig {
    /// Load a JSON config; missing fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::config(format!("invalid config file '{}': {}", path.display(), e))
        })
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Snippet window in frames for `sampling_frequency`
    pub fn window(&self, sampling_frequency: f64) -> Result<Window> {
        plan_window(
            self.ms_before,
            self.ms_after,
            self.frames_before,
            self.frames_after,
            sampling_frequency,
        )
    }

    /// Validate every option against `recording` before any work starts
    pub fn validate<R: Recording + ?Sized>(&self, recording: &R) -> Result<Window> {
        let window = self.window(recording.sampling_frequency())?;

        if self.max_channels == 0 {
            return Err(Error::config("max_channels must be at least 1"));
        }
        if self.max_spikes_per_unit == Some(0) {
            return Err(Error::config("max_spikes_per_unit must be at least 1"));
        }

        if let Some(channel_ids) = &self.channel_ids {
            if channel_ids.is_empty() {
                return Err(Error::config("channel_ids is empty"));
            }
            let available = recording.channel_ids();
            for (i, id) in channel_ids.iter().enumerate() {
                if !available.contains(id) {
                    return Err(Error::config(format!(
                        "channel id {id} is not in the recording"
                    )));
                }
                if channel_ids[..i].contains(id) {
                    return Err(Error::config(format!("channel id {id} listed twice")));
                }
            }
        }

        if let Some(property) = &self.grouping_property {
            let missing = recording
                .channel_ids()
                .iter()
                .any(|&ch| recording.channel_property(ch, property).is_none());
            if missing {
                return Err(Error::config(format!(
                    "unknown grouping property '{property}': not set on every recording channel"
                )));
            }
        }

        Ok(window)
    }
}
