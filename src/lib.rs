//! Spike Waveform Toolbox - spike waveform extraction and per-unit summaries
//!
//! This crate cuts fixed-length snippets around every spike of every sorted
//! unit in a multichannel extracellular recording and reduces them to the
//! summaries downstream quality metrics need: templates, max channels and
//! per-spike amplitudes.
//!
//! # Key Features
//!
//! - **Per-unit channel subsets** from an explicit list or a grouping property
//! - **Seeded subsampling** that is reproducible regardless of worker scheduling
//! - **In-memory or out-of-core** waveform storage (Zarr v3, Blosc-compressed)
//! - **Fixed-size worker pool** with ordered results and fail-fast aggregation
//! - **Property cache** on the sorting with four recompute-or-reuse policies
//!
//! # Command-Line Tool
//!
//! ```bash
//! # Demo on a synthetic dataset
//! spike-waveforms --synthetic --units 4 --channels 8 --output report.json
//!
//! # Recording stored as /<stream>/data in a Zarr store, sorting as JSON
//! spike-waveforms --recording session.zarr --stream probe0 \
//!   --sorting units.json --grouping-property group --n-jobs 4 \
//!   --max-spikes-per-unit 500 --out-of-core waveforms.zarr
//! ```
//!
//! # Out-of-core Layout
//!
//! ```text
//! waveforms.zarr/
//! ├── zarr.json              (extraction config, generator, created_at)
//! └── units/
//!     ├── 0/
//!     │   ├── zarr.json      (unit_id, channel_ids, frames_before/after)
//!     │   └── waveforms      [spikes × channels × samples] float32
//!     └── 1/
//!         └── ...
//! ```
//!
//! # Library Usage
//!
//! - [`postprocessing`] - Extraction entry points
//! - [`recording`] / [`sorting`] - Collaborator traits and in-memory implementations
//! - [`extract`] - Snippet extraction and subsampling
//! - [`reducers`] - Templates, max channels and amplitudes
//! - [`cache`] - Recompute-or-reuse access to the sorting's property store
//! - [`metrics`] - Epochs and threshold curation for quality metrics
//! - [`zarr`] - Out-of-core storage and Zarr-backed recordings
//!
//! # License
//!
//! This project is licensed under the GNU General Public License v3.0.
//! See LICENSE.md for details.

pub mod error;
pub mod recording;
pub mod window;
pub mod properties;
pub mod sorting;
pub mod config;
pub mod channels;
pub mod zarr;
pub mod extract;
pub mod executor;
pub mod reducers;
pub mod cache;
pub mod postprocessing;
pub mod metrics;
pub mod synthetic;
pub mod cli;

pub use error::{Error, Result};

/// Identifier of a sorted unit
pub type UnitId = u32;

/// Identifier of a recording channel
pub type ChannelId = u32;

use chrono::Datelike;

/// Display GPL license notice for a program
pub fn display_license_notice(program_name: &str) {
	let version = env!("CARGO_PKG_VERSION");
	let current_year = chrono::Utc::now().year();
	let copyright_year = if current_year == 2025 {
		"2025".to_string()
	} else {
		format!("2025-{}", current_year)
	};

	eprintln!("{} {} Copyright (C) {} Raul C. Sîmpetru", program_name, version, copyright_year);
	eprintln!("This program comes with ABSOLUTELY NO WARRANTY.");
	eprintln!("For details see https://www.gnu.org/licenses/gpl-3.0.html#license-text.");
	eprintln!("This is free software, and you are welcome to redistribute it under certain conditions.");
	eprintln!();
}
