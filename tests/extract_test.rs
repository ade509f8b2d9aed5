use anyhow::Result;
use ndarray::Array2;
use serde_json::json;
use spike_waveform_toolbox::config::TemplateStatistic;
use spike_waveform_toolbox::extract::{
    extract_waveforms, subsample, unit_seed, Backend, SnippetRequest,
};
use spike_waveform_toolbox::recording::InMemoryRecording;
use spike_waveform_toolbox::reducers::compute_template;
use spike_waveform_toolbox::window::Window;
use spike_waveform_toolbox::zarr::WaveformStore;

/// Every sample encodes its own position: `channel * 100_000 + frame`
fn ramp_recording(num_channels: usize, num_frames: usize) -> Result<InMemoryRecording> {
    let traces = Array2::from_shape_fn((num_channels, num_frames), |(c, f)| {
        (c * 100_000 + f) as f32
    });
    Ok(InMemoryRecording::new(traces, 30_000.0)?)
}

#[test]
fn test_snippets_follow_window_and_channel_order() -> Result<()> {
    let recording = ramp_recording(4, 1_000)?;
    let train = [100, 500];
    let request = SnippetRequest {
        unit_id: 3,
        spike_train: &train,
        channel_ids: &[2, 0],
        window: Window::new(10, 20)?,
        max_spikes: None,
        seed: 0,
    };

    let waveforms = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    assert_eq!(waveforms.shape(), (2, 2, 30));
    assert_eq!(waveforms.spike_frames, vec![100, 500]);

    let data = waveforms.to_array()?;
    // Spike frame sits at sample index `before`
    assert_eq!(data[[0, 0, 10]], 200_100.0);
    assert_eq!(data[[0, 1, 0]], 90.0);
    assert_eq!(data[[1, 0, 29]], 200_519.0);
    assert_eq!(data[[1, 1, 10]], 500.0);
    Ok(())
}

#[test]
fn test_out_of_range_channel_plane_is_internal_error() -> Result<()> {
    let recording = ramp_recording(3, 500)?;
    let request = SnippetRequest {
        unit_id: 1,
        spike_train: &[100, 200],
        channel_ids: &[0, 2],
        window: Window::new(5, 5)?,
        max_spikes: None,
        seed: 0,
    };

    let waveforms = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    assert_eq!(waveforms.channel_plane(1)?.dim(), (2, 10));
    assert!(waveforms
        .channel_plane(2)
        .is_err_and(|e| e.is_internal() && !e.is_configuration()));
    Ok(())
}

#[test]
fn test_spikes_near_edges_are_excluded() -> Result<()> {
    let recording = ramp_recording(2, 1_000)?;
    let train = [5, 100, 990, 995];
    let request = SnippetRequest {
        unit_id: 0,
        spike_train: &train,
        channel_ids: &[0, 1],
        window: Window::new(10, 10)?,
        max_spikes: None,
        seed: 0,
    };

    let waveforms = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    assert_eq!(waveforms.spike_indices, vec![1, 2]);
    assert_eq!(waveforms.spike_frames, vec![100, 990]);
    Ok(())
}

#[test]
fn test_unit_without_spikes_yields_empty_set() -> Result<()> {
    let recording = ramp_recording(2, 1_000)?;
    let request = SnippetRequest {
        unit_id: 7,
        spike_train: &[],
        channel_ids: &[0, 1],
        window: Window::new(5, 5)?,
        max_spikes: Some(10),
        seed: 1,
    };

    let waveforms = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    assert!(waveforms.is_empty());
    assert_eq!(waveforms.shape(), (0, 2, 10));

    let template = compute_template(&waveforms, TemplateStatistic::Median)?;
    assert_eq!(template.data.dim(), (2, 10));
    assert!(template.data.iter().all(|v| v.is_nan()));
    Ok(())
}

#[test]
fn test_subsample_is_seeded_sorted_and_bounded() {
    let candidates: Vec<usize> = (0..1_000).collect();

    let kept = subsample(&candidates, Some(10), unit_seed(42, 0));
    assert_eq!(kept.len(), 10);
    assert!(kept.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(kept, subsample(&candidates, Some(10), unit_seed(42, 0)));
    assert_ne!(kept, subsample(&candidates, Some(10), unit_seed(42, 1)));

    let few = [3, 8, 9];
    assert_eq!(subsample(&few, Some(10), 0), few.to_vec());
    assert_eq!(subsample(&candidates, None, 0).len(), 1_000);
}

#[test]
fn test_subsampling_draws_only_in_range_spikes() -> Result<()> {
    let recording = ramp_recording(1, 10_000)?;
    // Every other spike is too close to the end
    let train: Vec<u64> = (0..400).map(|i| if i % 2 == 0 { 100 + i * 20 } else { 9_995 }).collect();
    let mut sorted = train.clone();
    sorted.sort_unstable();

    let request = SnippetRequest {
        unit_id: 1,
        spike_train: &sorted,
        channel_ids: &[0],
        window: Window::new(10, 10)?,
        max_spikes: Some(50),
        seed: 9,
    };
    let waveforms = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    assert_eq!(waveforms.num_spikes(), 50);
    assert!(waveforms.spike_frames.iter().all(|&t| t < 9_000));
    Ok(())
}

#[test]
fn test_out_of_core_matches_in_memory() -> Result<()> {
    let recording = ramp_recording(3, 20_000)?;
    // More spikes than one chunk holds, with a partial last chunk
    let train: Vec<u64> = (0..300).map(|i| 50 + i * 60).collect();
    let request = SnippetRequest {
        unit_id: 12,
        spike_train: &train,
        channel_ids: &[1, 2],
        window: Window::new(8, 12)?,
        max_spikes: None,
        seed: 0,
    };

    let dir = tempfile::tempdir()?;
    let store = WaveformStore::open(Some(dir.path().join("waveforms.zarr").as_path()), &json!({}))?;
    assert!(!store.is_temporary());

    let in_memory = extract_waveforms(&recording, &request, &Backend::InMemory)?;
    let out_of_core = extract_waveforms(&recording, &request, &Backend::OutOfCore(store.clone()))?;

    assert!(out_of_core.is_out_of_core());
    assert_eq!(out_of_core.shape(), in_memory.shape());
    assert_eq!(out_of_core.to_array()?, in_memory.to_array()?);
    assert_eq!(out_of_core.channel_plane(1)?, in_memory.channel_plane(1)?);
    assert!(store.path().join("units").join("12").exists());
    Ok(())
}

#[test]
fn test_temporary_store_lives_while_waveforms_do() -> Result<()> {
    let recording = ramp_recording(2, 2_000)?;
    let train = [100, 200, 300];
    let request = SnippetRequest {
        unit_id: 0,
        spike_train: &train,
        channel_ids: &[0, 1],
        window: Window::new(5, 5)?,
        max_spikes: None,
        seed: 0,
    };

    let store = WaveformStore::open(None, &json!({"note": "scratch"}))?;
    assert!(store.is_temporary());
    let root = store.path().to_path_buf();

    let waveforms = extract_waveforms(&recording, &request, &Backend::OutOfCore(store))?;
    assert!(root.exists());
    assert_eq!(waveforms.to_array()?[[2, 1, 5]], 100_300.0);

    drop(waveforms);
    assert!(!root.exists());
    Ok(())
}
