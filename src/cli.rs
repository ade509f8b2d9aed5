use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use crate::config::{
    AmplitudeMethod, Backing, CachePolicy, ExtractionConfig, PeakPolarity, TemplateStatistic,
};
use crate::{ChannelId, UnitId};

#[derive(Parser, Clone, Debug)]
#[command(name = "spike-waveforms")]
#[command(about = "Extract spike waveforms, templates, max channels and amplitudes")]
#[command(version)]
pub struct Args {
    #[arg(long, help = "Zarr store holding the recording", required_unless_present = "synthetic")]
    pub recording: Option<PathBuf>,

    #[arg(
        long,
        default_value = "recording",
        help = "Stream group inside the recording store (traces at /<stream>/data)"
    )]
    pub stream: String,

    #[arg(
        long,
        help = "Sorting JSON: {\"sampling_frequency\": .., \"units\": {\"<id>\": [frames..]}}",
        required_unless_present = "synthetic"
    )]
    pub sorting: Option<PathBuf>,

    #[arg(
        long,
        conflicts_with_all = ["recording", "sorting"],
        help = "Generate a noise-free synthetic dataset instead of reading one"
    )]
    pub synthetic: bool,

    #[arg(long, default_value = "4", help = "Synthetic units")]
    pub units: usize,

    #[arg(long, default_value = "8", help = "Synthetic channels (at least 2 per unit)")]
    pub channels: usize,

    #[arg(long, default_value = "60", help = "Synthetic snippet length in samples")]
    pub samples: usize,

    #[arg(long, default_value = "200", help = "Synthetic spikes per unit")]
    pub spikes: usize,

    #[arg(long, help = "JSON extraction config; flags below override its fields")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Milliseconds before each spike [default: 3.0]")]
    pub ms_before: Option<f64>,

    #[arg(long, help = "Milliseconds after each spike [default: 3.0]")]
    pub ms_after: Option<f64>,

    #[arg(long, help = "Frames before each spike (overrides --ms-before)")]
    pub frames_before: Option<u64>,

    #[arg(long, help = "Frames after each spike (overrides --ms-after)")]
    pub frames_after: Option<u64>,

    #[arg(long, help = "Channel property restricting each unit to its group's channels")]
    pub grouping_property: Option<String>,

    #[arg(long, help = "Derive unit groups from max channels even when the sorting has them")]
    pub compute_property_from_recording: bool,

    #[arg(long, value_delimiter = ',', help = "Explicit channel subset for every unit")]
    pub channel_ids: Option<Vec<ChannelId>>,

    #[arg(long, value_delimiter = ',', help = "Only process these units")]
    pub unit_ids: Option<Vec<UnitId>>,

    #[arg(long, help = "Subsample each unit to at most this many spikes")]
    pub max_spikes_per_unit: Option<usize>,

    #[arg(long, help = "Subsampling seed (also seeds --synthetic)")]
    pub seed: Option<u64>,

    #[arg(long, short = 'j', help = "Worker threads; 0 or 1 runs sequentially")]
    pub n_jobs: Option<usize>,

    #[arg(
        long,
        num_args = 0..=1,
        help = "Store waveforms in a Zarr store (temporary directory when no path is given)"
    )]
    pub out_of_core: Option<Option<PathBuf>>,

    #[arg(long, help = "Cache policy: compute_only, compute_and_store, reuse, force_recompute")]
    pub cache: Option<CachePolicy>,

    #[arg(long, help = "Peak polarity: pos, neg, both")]
    pub peak: Option<PeakPolarity>,

    #[arg(long, help = "Amplitude method: absolute, relative")]
    pub method: Option<AmplitudeMethod>,

    #[arg(long, help = "Template statistic: median, mean")]
    pub template_statistic: Option<TemplateStatistic>,

    #[arg(long, help = "Number of max channels to rank per unit")]
    pub max_channels: Option<usize>,

    #[arg(long, short = 'o', help = "Write the JSON report here instead of stdout")]
    pub output: Option<PathBuf>,

    #[arg(long, short = 'v', help = "Debug logging")]
    pub verbose: bool,

    #[arg(long, short = 'q', help = "Warnings only, no banner")]
    pub quiet: bool,
}

impl Args {
    /// Config file (or defaults) with every given flag applied on top
    pub fn extraction_config(&self) -> crate::Result<ExtractionConfig> {
        let mut config = match &self.config {
            Some(path) => ExtractionConfig::from_json_file(path)?,
            None => ExtractionConfig::default(),
        };

        if let Some(ms) = self.ms_before {
            config.ms_before = ms;
        }
        if let Some(ms) = self.ms_after {
            config.ms_after = ms;
        }
        if self.frames_before.is_some() {
            config.frames_before = self.frames_before;
        }
        if self.frames_after.is_some() {
            config.frames_after = self.frames_after;
        }
        if self.grouping_property.is_some() {
            config.grouping_property = self.grouping_property.clone();
        }
        if self.compute_property_from_recording {
            config.compute_property_from_recording = true;
        }
        if self.channel_ids.is_some() {
            config.channel_ids = self.channel_ids.clone();
        }
        if self.unit_ids.is_some() {
            config.unit_ids = self.unit_ids.clone();
        }
        if self.max_spikes_per_unit.is_some() {
            config.max_spikes_per_unit = self.max_spikes_per_unit;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(n_jobs) = self.n_jobs {
            config.n_jobs = n_jobs;
        }
        if let Some(path) = &self.out_of_core {
            config.backing = Backing::OutOfCore { path: path.clone() };
        }
        if let Some(cache) = self.cache {
            config.cache = cache;
        }
        if let Some(peak) = self.peak {
            config.peak = peak;
        }
        if let Some(method) = self.method {
            config.method = method;
        }
        if let Some(statistic) = self.template_statistic {
            config.template_statistic = statistic;
        }
        if let Some(count) = self.max_channels {
            config.max_channels = count;
        }

        Ok(config)
    }

    /// Inputs and effective config, embedded in the report
    pub fn to_config_json(&self, config: &ExtractionConfig) -> crate::Result<serde_json::Value> {
        Ok(json!({
            "recording": self.recording.as_ref().map(|p| p.display().to_string()),
            "stream": self.stream,
            "sorting": self.sorting.as_ref().map(|p| p.display().to_string()),
            "synthetic": self.synthetic,
            "extraction": config.to_json()?,
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "tool_version": env!("CARGO_PKG_VERSION")
        }))
    }
}
