use anyhow::Result;
use spike_waveform_toolbox::cache;
use spike_waveform_toolbox::config::{CachePolicy, ExtractionConfig};
use spike_waveform_toolbox::postprocessing::{get_unit_templates, get_unit_waveforms};
use spike_waveform_toolbox::properties::{PropertyKey, PropertyValue};
use spike_waveform_toolbox::sorting::{InMemorySorting, Sorting};
use spike_waveform_toolbox::synthetic::SyntheticDataset;

fn config(seed: u64, cache: CachePolicy) -> ExtractionConfig {
    ExtractionConfig {
        frames_before: Some(15),
        frames_after: Some(15),
        max_spikes_per_unit: Some(8),
        seed: Some(seed),
        cache,
        ..Default::default()
    }
}

fn stored_indices(sorting: &InMemorySorting, unit: u32) -> Option<Vec<usize>> {
    sorting
        .get_property(unit, &PropertyKey::Waveforms)
        .and_then(|value| value.as_waveforms())
        .map(|set| set.spike_indices.clone())
}

#[test]
fn test_policy_flags() {
    assert!(!CachePolicy::ComputeOnly.reads());
    assert!(!CachePolicy::ComputeOnly.writes());
    assert!(!CachePolicy::ComputeAndStore.reads());
    assert!(CachePolicy::ComputeAndStore.writes());
    assert!(CachePolicy::ReuseIfPresentElseCompute.reads());
    assert!(CachePolicy::ForceRecompute.writes());
    assert_eq!(
        CachePolicy::ComputeAndStore.for_dependency(),
        CachePolicy::ReuseIfPresentElseCompute
    );
    assert_eq!(
        CachePolicy::ForceRecompute.for_dependency(),
        CachePolicy::ForceRecompute
    );
}

#[test]
fn test_get_or_compute_reuses_stored_value() -> Result<()> {
    let mut sorting = InMemorySorting::new();
    sorting.add_unit(4, vec![10, 20])?;
    let key = PropertyKey::Other("quality".to_string());

    let first = cache::get_or_compute(
        &mut sorting,
        4,
        key.clone(),
        CachePolicy::ReuseIfPresentElseCompute,
        || Ok(PropertyValue::Label(1)),
    )?;
    let second = cache::get_or_compute(
        &mut sorting,
        4,
        key.clone(),
        CachePolicy::ReuseIfPresentElseCompute,
        || Ok(PropertyValue::Label(2)),
    )?;
    assert_eq!(first.as_label(), Some(1));
    assert_eq!(second.as_label(), Some(1));

    let forced = cache::get_or_compute(&mut sorting, 4, key.clone(), CachePolicy::ForceRecompute, || {
        Ok(PropertyValue::Label(3))
    })?;
    assert_eq!(forced.as_label(), Some(3));

    let stale = cache::get_or_compute_if(
        &mut sorting,
        4,
        key.clone(),
        CachePolicy::ReuseIfPresentElseCompute,
        |value| value.as_label() == Some(9),
        || Ok(PropertyValue::Label(9)),
    )?;
    assert_eq!(stale.as_label(), Some(9));
    assert_eq!(sorting.get_property(4, &key).and_then(|v| v.as_label()), Some(9));
    Ok(())
}

#[test]
fn test_compute_only_leaves_sorting_untouched() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(2, 4, 30, 20, 3)?;
    get_unit_templates(&data.recording, &mut data.sorting, &config(1, CachePolicy::ComputeOnly))?;

    for unit in data.sorting.unit_ids() {
        assert!(data.sorting.property_keys(unit).is_empty());
    }
    Ok(())
}

#[test]
fn test_reuse_returns_stored_waveforms() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(2, 4, 30, 50, 3)?;
    let policy = CachePolicy::ReuseIfPresentElseCompute;

    let first = get_unit_waveforms(&data.recording, &mut data.sorting, &config(1, policy))?;
    assert_eq!(stored_indices(&data.sorting, 0), Some(first[0].spike_indices.clone()));

    // Seed changes alone do not invalidate stored waveforms
    let second = get_unit_waveforms(&data.recording, &mut data.sorting, &config(2, policy))?;
    assert_eq!(first[0].spike_indices, second[0].spike_indices);

    let forced = get_unit_waveforms(
        &data.recording,
        &mut data.sorting,
        &config(2, CachePolicy::ForceRecompute),
    )?;
    assert_ne!(first[0].spike_indices, forced[0].spike_indices);
    assert_eq!(stored_indices(&data.sorting, 0), Some(forced[0].spike_indices.clone()));
    Ok(())
}

#[test]
fn test_window_change_invalidates_stored_waveforms() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(1, 2, 30, 20, 3)?;
    let policy = CachePolicy::ReuseIfPresentElseCompute;

    get_unit_waveforms(&data.recording, &mut data.sorting, &config(1, policy))?;
    let wider = ExtractionConfig {
        frames_after: Some(20),
        ..config(1, policy)
    };
    let waveforms = get_unit_waveforms(&data.recording, &mut data.sorting, &wider)?;

    assert_eq!(waveforms[0].num_samples(), 35);
    let stored = data
        .sorting
        .get_property(0, &PropertyKey::Waveforms)
        .and_then(|value| value.as_waveforms())
        .map(|set| set.num_samples());
    assert_eq!(stored, Some(35));
    Ok(())
}

#[test]
fn test_compute_and_store_reuses_dependencies() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(1, 2, 30, 50, 3)?;

    let waveforms = get_unit_waveforms(
        &data.recording,
        &mut data.sorting,
        &config(1, CachePolicy::ReuseIfPresentElseCompute),
    )?;
    let templates = get_unit_templates(
        &data.recording,
        &mut data.sorting,
        &config(2, CachePolicy::ComputeAndStore),
    )?;

    // Templates were recomputed from the stored waveforms, not a new draw
    assert_eq!(stored_indices(&data.sorting, 0), Some(waveforms[0].spike_indices.clone()));
    assert!(data.sorting.property_keys(0).contains(&PropertyKey::Template));
    assert_eq!(templates[0].num_spikes, 8);
    Ok(())
}

#[test]
fn test_force_recompute_refreshes_dependencies() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(1, 2, 30, 50, 3)?;

    let waveforms = get_unit_waveforms(
        &data.recording,
        &mut data.sorting,
        &config(1, CachePolicy::ReuseIfPresentElseCompute),
    )?;
    get_unit_templates(
        &data.recording,
        &mut data.sorting,
        &config(2, CachePolicy::ForceRecompute),
    )?;

    let refreshed = stored_indices(&data.sorting, 0).expect("waveforms stored");
    assert_ne!(refreshed, waveforms[0].spike_indices);
    Ok(())
}
