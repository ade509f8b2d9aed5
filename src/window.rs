//! Snippet window planning.
//!
//! A window of `before` and `after` frames around spike time `t` covers
//! `[t - before, t + after)`, so every snippet has `before + after` samples
//! and the spike frame sits at sample index `before`.
//!
//! Boundary policy: a spike whose window does not fit entirely inside
//! `[0, num_frames)` is excluded from extraction and from every statistic
//! derived from snippets. No padding is ever applied.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Integer frame offsets around a spike time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub before: u64,
    pub after: u64,
}

impl Window {
    pub fn new(before: u64, after: u64) -> Result<Self> {
        let span = before.checked_add(after).ok_or_else(|| {
            Error::config(format!("snippet window of {before} + {after} frames is too long"))
        })?;
        if span == 0 {
            return Err(Error::config("snippet window must span at least one sample"));
        }
        Ok(Self { before, after })
    }

    /// Samples per snippet
    pub fn num_samples(&self) -> usize {
        self.before.saturating_add(self.after) as usize
    }

    /// Frame range `[start, end)` for spike time `t`, or `None` when the
    /// window would cross either recording edge.
    pub fn bounds(&self, t: u64, num_frames: u64) -> Option<(u64, u64)> {
        let start = t.checked_sub(self.before)?;
        let end = t.checked_add(self.after)?;
        (end <= num_frames).then_some((start, end))
    }

    pub fn fits(&self, t: u64, num_frames: u64) -> bool {
        self.bounds(t, num_frames).is_some()
    }

    /// Indices into `spike_train` of spikes whose window fits the recording
    pub fn in_range_indices(&self, spike_train: &[u64], num_frames: u64) -> Vec<usize> {
        spike_train
            .iter()
            .enumerate()
            .filter(|&(_, &t)| self.fits(t, num_frames))
            .map(|(i, _)| i)
            .collect()
    }
}

/// Convert milliseconds to frames: `round(ms * fs / 1000)`
pub fn ms_to_frames(ms: f64, sampling_frequency: f64) -> Result<u64> {
    if !ms.is_finite() || ms < 0.0 {
        return Err(Error::config(format!(
            "window length must be a non-negative number of ms, got {ms}"
        )));
    }
    Ok((ms * sampling_frequency / 1000.0).round() as u64)
}

/// Plan the snippet window. Frame overrides take precedence over ms values.
pub fn plan_window(
    ms_before: f64,
    ms_after: f64,
    frames_before: Option<u64>,
    frames_after: Option<u64>,
    sampling_frequency: f64,
) -> Result<Window> {
    if !(sampling_frequency > 0.0) {
        return Err(Error::config(format!(
            "sampling frequency must be positive, got {sampling_frequency}"
        )));
    }

    let before = match frames_before {
        Some(frames) => frames,
        None => ms_to_frames(ms_before, sampling_frequency)?,
    };
    let after = match frames_after {
        Some(frames) => frames,
        None => ms_to_frames(ms_after, sampling_frequency)?,
    };

    Window::new(before, after)
}
