//! Spike Waveforms - per-unit waveform summaries for a spike-sorted recording
//!
//! Reads a recording from a Zarr store and a sorting from JSON (or generates
//! a synthetic pair), extracts waveforms for every unit, then reports
//! templates, ranked max channels and amplitudes as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Synthetic demo, report on stdout
//! spike-waveforms --synthetic
//!
//! # Real data, four workers, one group per shank
//! spike-waveforms --recording session.zarr --stream probe0 --sorting units.json \
//!   --grouping-property group --n-jobs 4 --output report.json
//!
//! # Options from a file, one overridden on the command line
//! spike-waveforms --recording session.zarr --sorting units.json \
//!   --config extraction.json --peak neg
//! ```
//!
//! # Report
//!
//! One entry per unit with its spike counts, channel subset, ranked max
//! channels, template peak (value and sample on the primary max channel) and
//! median amplitude.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::Path;

use spike_waveform_toolbox::cli::Args;
use spike_waveform_toolbox::config::ExtractionConfig;
use spike_waveform_toolbox::postprocessing::{
    get_unit_amplitudes, get_unit_max_channels, get_unit_templates,
};
use spike_waveform_toolbox::recording::Recording;
use spike_waveform_toolbox::reducers::{channel_peak, median};
use spike_waveform_toolbox::sorting::{InMemorySorting, Sorting};
use spike_waveform_toolbox::synthetic::SyntheticDataset;
use spike_waveform_toolbox::zarr::ZarrRecording;
use spike_waveform_toolbox::{ChannelId, UnitId};

#[derive(Debug, Serialize)]
struct UnitReport {
    unit_id: UnitId,
    total_spikes: usize,
    extracted_spikes: usize,
    channel_ids: Vec<ChannelId>,
    max_channels: Vec<ChannelId>,
    template_peak: Option<f32>,
    template_peak_sample: Option<usize>,
    median_amplitude: Option<f32>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if !args.quiet {
        spike_waveform_toolbox::display_license_notice("spike-waveforms");
    }
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else if args.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = args.extraction_config()?;

    let (recording, mut sorting): (Box<dyn Recording>, InMemorySorting) = if args.synthetic {
        let dataset = SyntheticDataset::with_known_waveforms(
            args.units,
            args.channels,
            args.samples,
            args.spikes,
            config.seed.unwrap_or(0),
        )?;
        (Box::new(dataset.recording), dataset.sorting)
    } else {
        let recording_path = args
            .recording
            .as_deref()
            .context("--recording is required without --synthetic")?;
        let sorting_path = args
            .sorting
            .as_deref()
            .context("--sorting is required without --synthetic")?;
        load_inputs(recording_path, &args.stream, sorting_path)?
    };

    if !args.quiet {
        eprintln!("╔════════════════════════════════════════════════════════════════╗");
        eprintln!("║              Spike Waveform Extraction                         ║");
        eprintln!("╚════════════════════════════════════════════════════════════════╝");
        eprintln!();
        eprintln!("Sampling frequency: {} Hz", recording.sampling_frequency());
        eprintln!("Channels: {}", recording.channel_ids().len());
        eprintln!("Frames: {}", recording.num_frames());
        eprintln!("Units: {}", sorting.unit_ids().len());
        eprintln!();
    }

    let report = build_report(recording.as_ref(), &mut sorting, &config)?;

    let document = serde_json::json!({
        "config": args.to_config_json(&config)?,
        "units": report,
    });
    let text = serde_json::to_string_pretty(&document)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            if !args.quiet {
                eprintln!("Report written to {}", path.display());
            }
        }
        None => println!("{text}"),
    }

    Ok(())
}

fn load_inputs(
    recording_path: &Path,
    stream: &str,
    sorting_path: &Path,
) -> Result<(Box<dyn Recording>, InMemorySorting)> {
    let recording = ZarrRecording::open(recording_path, stream)
        .with_context(|| format!("Failed to open recording {}", recording_path.display()))?;
    let sorting = InMemorySorting::from_json_file(sorting_path)
        .with_context(|| format!("Failed to read sorting {}", sorting_path.display()))?;

    if let Some(fs) = sorting.sampling_frequency() {
        if (fs - recording.sampling_frequency()).abs() > 1e-6 {
            tracing::warn!(
                sorting = fs,
                recording = recording.sampling_frequency(),
                "sorting and recording sampling frequencies differ"
            );
        }
    }
    Ok((Box::new(recording), sorting))
}

fn build_report(
    recording: &dyn Recording,
    sorting: &mut InMemorySorting,
    config: &ExtractionConfig,
) -> Result<Vec<UnitReport>> {
    let templates = get_unit_templates(recording, sorting, config)?;
    let max_channels = get_unit_max_channels(recording, sorting, config)?;
    let amplitudes = get_unit_amplitudes(recording, sorting, config)?;

    let mut report = Vec::with_capacity(templates.len());
    for ((template, max), amps) in templates.iter().zip(&max_channels).zip(&amplitudes) {
        let primary = max
            .primary()
            .and_then(|id| template.channel_ids.iter().position(|&c| c == id));
        let peak = primary.filter(|_| template.num_spikes > 0).map(|row| {
            let (sample, _) = channel_peak(template.data.row(row), config.peak);
            (sample, template.data[[row, sample]])
        });

        report.push(UnitReport {
            unit_id: template.unit_id,
            total_spikes: sorting.spike_train(template.unit_id)?.len(),
            extracted_spikes: template.num_spikes,
            channel_ids: template.channel_ids.clone(),
            max_channels: max.channel_ids.clone(),
            template_peak: peak.map(|(_, value)| value),
            template_peak_sample: peak.map(|(sample, _)| sample),
            median_amplitude: (!amps.values.is_empty()).then(|| median(amps.values.view())),
        });
    }
    Ok(report)
}
