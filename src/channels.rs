//! Channel selection per unit.
//!
//! Precedence: an explicit channel list applies verbatim to every unit;
//! otherwise a grouping property restricts each unit to the channels sharing
//! its label; otherwise every unit uses all recording channels.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::properties::PropertyKey;
use crate::recording::{Label, Recording};
use crate::sorting::Sorting;
use crate::{ChannelId, UnitId};

/// Resolved channel subsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelection {
    /// Same channels for every unit
    Global(Vec<ChannelId>),
    /// Channels resolved per unit from a grouping property
    PerUnit(BTreeMap<UnitId, Vec<ChannelId>>),
}

impl ChannelSelection {
    pub fn for_unit(&self, unit_id: UnitId) -> Result<&[ChannelId]> {
        match self {
            Self::Global(channels) => Ok(channels),
            Self::PerUnit(map) => map
                .get(&unit_id)
                .map(Vec::as_slice)
                .ok_or_else(|| Error::config(format!("no channels resolved for unit {unit_id}"))),
        }
    }
}

/// Group recording channels by the label of `property`, keeping recording order
pub fn channels_by_label<R: Recording + ?Sized>(
    recording: &R,
    property: &str,
) -> Result<BTreeMap<Label, Vec<ChannelId>>> {
    let mut groups: BTreeMap<Label, Vec<ChannelId>> = BTreeMap::new();
    for &channel in recording.channel_ids() {
        let label = recording.channel_property(channel, property).ok_or_else(|| {
            Error::config(format!(
                "unknown grouping property '{property}': channel {channel} has no value"
            ))
        })?;
        groups.entry(label).or_default().push(channel);
    }
    Ok(groups)
}

/// Label stored on the sorting for `unit_id` under `property`
pub fn unit_label<S: Sorting + ?Sized>(sorting: &S, unit_id: UnitId, property: &str) -> Option<Label> {
    sorting
        .get_property(unit_id, &PropertyKey::from_name(property))
        .and_then(|value| value.as_label())
}

/// Resolve the channel subset of every unit in `unit_ids`
pub fn select_channels<R, S>(
    recording: &R,
    sorting: &S,
    unit_ids: &[UnitId],
    grouping_property: Option<&str>,
    channel_ids: Option<&[ChannelId]>,
) -> Result<ChannelSelection>
where
    R: Recording + ?Sized,
    S: Sorting + ?Sized,
{
    if let Some(channels) = channel_ids {
        if channels.is_empty() {
            return Err(Error::config("explicit channel subset is empty"));
        }
        if let Some(unknown) = channels
            .iter()
            .find(|c| !recording.channel_ids().contains(c))
        {
            return Err(Error::config(format!(
                "channel id {unknown} is not in the recording"
            )));
        }
        if grouping_property.is_some() {
            tracing::warn!("explicit channel_ids given; grouping property ignored");
        }
        return Ok(ChannelSelection::Global(channels.to_vec()));
    }

    let Some(property) = grouping_property else {
        if recording.channel_ids().is_empty() {
            return Err(Error::config("recording has no channels"));
        }
        return Ok(ChannelSelection::Global(recording.channel_ids().to_vec()));
    };

    let groups = channels_by_label(recording, property)?;
    let mut per_unit = BTreeMap::new();
    for &unit in unit_ids {
        let label = unit_label(sorting, unit, property).ok_or_else(|| {
            Error::config(format!("unit {unit} has no '{property}' property"))
        })?;
        let channels = groups.get(&label).cloned().unwrap_or_default();
        if channels.is_empty() {
            return Err(Error::config(format!(
                "unit {unit} has {property} {label} but no recording channel shares it"
            )));
        }
        tracing::debug!(unit, label, channels = ?channels, "resolved channel group");
        per_unit.insert(unit, channels);
    }

    Ok(ChannelSelection::PerUnit(per_unit))
}
