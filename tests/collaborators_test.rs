use anyhow::Result;
use ndarray::{array, Array2, Ix2};
use serde_json::json;
use zarrs::array::{ArrayBuilder, DataType, FillValue};
use zarrs::group::GroupBuilder;

use spike_waveform_toolbox::channels::{select_channels, ChannelSelection};
use spike_waveform_toolbox::config::{
    Backing, CachePolicy, ExtractionConfig, PeakPolarity, TemplateStatistic,
};
use spike_waveform_toolbox::properties::{PropertyKey, PropertyValue};
use spike_waveform_toolbox::recording::{InMemoryRecording, Recording, ScaledRecording};
use spike_waveform_toolbox::sorting::{InMemorySorting, Sorting};
use spike_waveform_toolbox::zarr::{open_or_create_zarr_store, ZarrRecording};

fn grouped_recording() -> Result<InMemoryRecording> {
    let traces = Array2::from_shape_fn((4, 200), |(c, f)| (c * 1_000 + f) as f32);
    let mut recording = InMemoryRecording::with_channel_ids(traces, 20_000.0, vec![10, 11, 12, 13])?;
    recording.set_channel_groups(&[0, 0, 1, 1])?;
    Ok(recording)
}

#[test]
fn test_in_memory_recording_traces() -> Result<()> {
    let recording = grouped_recording()?;
    assert_eq!(recording.num_frames(), 200);
    assert_eq!(recording.channel_group(12), Some(1));
    assert_eq!(recording.channel_property(12, "group"), Some(1));
    assert_eq!(recording.channel_property(12, "shank"), None);

    let traces = recording.traces(&[13, 10], 5, 8)?;
    assert_eq!(traces, array![[3_005.0, 3_006.0, 3_007.0], [5.0, 6.0, 7.0]]);

    assert!(recording.traces(&[99], 0, 10).is_err());
    assert!(recording.traces(&[10], 150, 201).is_err());
    assert!(InMemoryRecording::with_channel_ids(Array2::zeros((2, 5)), 1.0, vec![1, 1]).is_err());
    assert!(InMemoryRecording::new(Array2::zeros((2, 5)), 0.0).is_err());
    Ok(())
}

#[test]
fn test_scaled_recording_forwards_properties() -> Result<()> {
    let scaled = ScaledRecording::new(grouped_recording()?, 0.5);
    assert_eq!(scaled.traces(&[11], 2, 4)?, array![[501.0, 501.5]]);
    assert_eq!(scaled.channel_group(11), Some(0));
    assert_eq!(scaled.inner().num_frames(), 200);
    Ok(())
}

#[test]
fn test_sorting_properties_and_features() -> Result<()> {
    let mut sorting = InMemorySorting::new();
    sorting.add_unit(1, vec![3, 9, 27])?;
    assert!(sorting.add_unit(2, vec![5, 4]).is_err());

    sorting.set_property(1, PropertyKey::from_name("group"), PropertyValue::Label(4))?;
    assert_eq!(sorting.property_keys(1), vec![PropertyKey::Group]);
    assert!(sorting
        .set_property(7, PropertyKey::Group, PropertyValue::Label(0))
        .is_err());

    assert!(sorting.set_spike_feature(1, "snr", array![1.0, 2.0]).is_err());
    sorting.set_spike_feature(1, "snr", array![1.0, 2.0, 3.0])?;
    assert_eq!(sorting.spike_feature_names(1), vec!["snr".to_string()]);
    assert!(sorting.spike_train(7).is_err());
    Ok(())
}

#[test]
fn test_sorting_from_json_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("units.json");
    std::fs::write(
        &path,
        json!({"sampling_frequency": 30000.0, "units": {"3": [40, 10, 20], "1": [5]}}).to_string(),
    )?;

    let sorting = InMemorySorting::from_json_file(&path)?;
    assert_eq!(sorting.unit_ids(), vec![1, 3]);
    assert_eq!(sorting.spike_train(3)?, vec![10, 20, 40]);
    assert_eq!(sorting.sampling_frequency(), Some(30_000.0));
    Ok(())
}

#[test]
fn test_channel_selection_precedence() -> Result<()> {
    let recording = grouped_recording()?;
    let mut sorting = InMemorySorting::new();
    sorting.add_unit(0, vec![50])?;
    sorting.add_unit(1, vec![60])?;
    sorting.set_property(0, PropertyKey::Group, PropertyValue::Label(1))?;
    sorting.set_property(1, PropertyKey::Group, PropertyValue::Label(0))?;

    let all = select_channels(&recording, &sorting, &[0, 1], None, None)?;
    assert_eq!(all, ChannelSelection::Global(vec![10, 11, 12, 13]));

    let grouped = select_channels(&recording, &sorting, &[0, 1], Some("group"), None)?;
    assert_eq!(grouped.for_unit(0)?, &[12, 13]);
    assert_eq!(grouped.for_unit(1)?, &[10, 11]);

    let explicit = select_channels(&recording, &sorting, &[0, 1], Some("group"), Some(&[13][..]))?;
    assert_eq!(explicit.for_unit(1)?, &[13]);

    sorting.set_property(1, PropertyKey::Group, PropertyValue::Label(5))?;
    let orphan = select_channels(&recording, &sorting, &[0, 1], Some("group"), None);
    assert!(orphan.is_err_and(|e| e.is_configuration()));
    assert!(select_channels(&recording, &sorting, &[0], None, Some(&[][..])).is_err());
    Ok(())
}

#[test]
fn test_config_file_and_option_parsing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("extraction.json");
    std::fs::write(
        &path,
        json!({
            "ms_before": 1.0,
            "peak": "neg",
            "cache": "compute_only",
            "backing": {"mode": "out_of_core"},
            "max_channels": 3
        })
        .to_string(),
    )?;

    let config = ExtractionConfig::from_json_file(&path)?;
    assert_eq!(config.ms_before, 1.0);
    assert_eq!(config.ms_after, 3.0);
    assert_eq!(config.peak, PeakPolarity::Neg);
    assert_eq!(config.cache, CachePolicy::ComputeOnly);
    assert_eq!(config.backing, Backing::OutOfCore { path: None });
    assert_eq!(config.max_channels, 3);

    assert_eq!("Mean".parse::<TemplateStatistic>()?, TemplateStatistic::Mean);
    assert_eq!("reuse".parse::<CachePolicy>()?, CachePolicy::ReuseIfPresentElseCompute);
    assert_eq!(CachePolicy::ForceRecompute.to_string(), "force_recompute");
    assert!("sideways".parse::<PeakPolarity>().is_err_and(|e| e.is_configuration()));

    std::fs::write(&path, "{\"peak\": \"sideways\"}")?;
    assert!(ExtractionConfig::from_json_file(&path).is_err_and(|e| e.is_configuration()));
    Ok(())
}

#[test]
fn test_cache_policy_spelled_the_same_in_files_and_flags() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("extraction.json");

    for spelling in ["reuse", "reuse_if_present_else_compute"] {
        std::fs::write(&path, json!({ "cache": spelling }).to_string())?;
        let config = ExtractionConfig::from_json_file(&path)?;
        assert_eq!(config.cache, CachePolicy::ReuseIfPresentElseCompute);
    }

    let written = serde_json::to_value(CachePolicy::ReuseIfPresentElseCompute)?;
    assert_eq!(written, json!(CachePolicy::ReuseIfPresentElseCompute.to_string()));
    assert_eq!(written, json!("reuse"));
    Ok(())
}

#[test]
fn test_zarr_recording_reads_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store_path = dir.path().join("session.zarr");
    let store = open_or_create_zarr_store(&store_path)?;

    let mut group = GroupBuilder::new().build(store.clone(), "/probe0")?;
    group.attributes_mut().extend(
        json!({"sampling_frequency": 25_000.0, "channel_groups": [0, 0, 1]})
            .as_object()
            .cloned()
            .unwrap_or_default(),
    );
    group.store_metadata()?;

    let traces = Array2::from_shape_fn((3, 500), |(c, f)| (c * 1_000 + f) as i16);
    let array = ArrayBuilder::new(
        vec![3, 500],
        vec![3, 128],
        DataType::Int16,
        FillValue::from(0i16),
    )
    .build(store.clone(), "/probe0/data")?;
    array.store_metadata()?;
    array.store_array_subset_ndarray::<i16, Ix2>(&[0, 0], traces)?;

    let recording = ZarrRecording::open(&store_path, "probe0")?;
    assert_eq!(recording.sampling_frequency(), 25_000.0);
    assert_eq!(recording.num_frames(), 500);
    assert_eq!(recording.channel_ids(), &[0, 1, 2]);
    assert_eq!(recording.channel_group(2), Some(1));

    // Crosses a chunk boundary and reorders rows
    let block = recording.traces(&[2, 0], 126, 130)?;
    assert_eq!(
        block,
        array![[2_126.0, 2_127.0, 2_128.0, 2_129.0], [126.0, 127.0, 128.0, 129.0]]
    );

    assert!(ZarrRecording::open(&store_path, "missing").is_err());
    Ok(())
}
