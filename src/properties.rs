//! Typed property store entries.
//!
//! Unit properties live under a fixed set of recognized keys plus an open
//! `Other` slot for anything else a caller wants to attach.

use std::fmt;

use crate::extract::WaveformSet;
use crate::recording::Label;
use crate::reducers::{AmplitudeSeries, MaxChannels, Template};

/// Key of a unit property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    Waveforms,
    Template,
    Amplitudes,
    MaxChannels,
    Group,
    Other(String),
}

impl PropertyKey {
    /// Map a property name to its key; unrecognized names go to `Other`
    pub fn from_name(name: &str) -> Self {
        match name {
            "waveforms" => Self::Waveforms,
            "template" => Self::Template,
            "amplitudes" => Self::Amplitudes,
            "max_channel" | "max_channels" => Self::MaxChannels,
            "group" => Self::Group,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Waveforms => "waveforms",
            Self::Template => "template",
            Self::Amplitudes => "amplitudes",
            Self::MaxChannels => "max_channel",
            Self::Group => "group",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a unit property
#[derive(Debug, Clone)]
pub enum PropertyValue {
    Waveforms(WaveformSet),
    Template(Template),
    Amplitudes(AmplitudeSeries),
    MaxChannels(MaxChannels),
    Label(Label),
    Json(serde_json::Value),
}

impl PropertyValue {
    pub fn as_waveforms(&self) -> Option<&WaveformSet> {
        match self {
            Self::Waveforms(w) => Some(w),
            _ => None,
        }
    }

    pub fn as_template(&self) -> Option<&Template> {
        match self {
            Self::Template(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_amplitudes(&self) -> Option<&AmplitudeSeries> {
        match self {
            Self::Amplitudes(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_max_channels(&self) -> Option<&MaxChannels> {
        match self {
            Self::MaxChannels(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_label(&self) -> Option<Label> {
        match self {
            Self::Label(label) => Some(*label),
            _ => None,
        }
    }
}
