use anyhow::Result;
use spike_waveform_toolbox::config::{CachePolicy, ExtractionConfig};
use spike_waveform_toolbox::metrics::{
    compute_metric, threshold_units, Epoch, FnMetric, MetricData, ThresholdSign,
};
use spike_waveform_toolbox::postprocessing::get_unit_amplitudes;
use spike_waveform_toolbox::recording::Recording;
use spike_waveform_toolbox::synthetic::SyntheticDataset;

fn spike_count() -> FnMetric<impl Fn(&MetricData, u32, usize) -> spike_waveform_toolbox::Result<f64>> {
    FnMetric::new("num_spikes", |data: &MetricData, unit, epoch| {
        Ok(data.spikes_in_epoch(unit, epoch)?.len() as f64)
    })
}

#[test]
fn test_epochs_restrict_spikes_strictly() -> Result<()> {
    let data = SyntheticDataset::with_known_waveforms(2, 4, 30, 10, 5)?;
    let train = data.units[0].spike_train.clone();

    let epoch = Epoch::new("first", train[2], train[5])?;
    let metric_data = MetricData::new(&data.recording, &data.sorting, Some(&[0][..]), vec![epoch])?;

    // Spikes on the epoch edges are left out
    assert_eq!(metric_data.spikes_in_epoch(0, 0)?, train[3..5].to_vec());
    assert!(Epoch::new("empty", 10, 10).is_err());
    Ok(())
}

#[test]
fn test_compute_metric_per_epoch() -> Result<()> {
    let data = SyntheticDataset::with_known_waveforms(2, 4, 30, 10, 5)?;
    // Unit 0's sixth spike opens the second epoch; no spike sits on the split
    let split = data.units[0].spike_train[5] - 1;
    let epochs = vec![
        Epoch::new("early", 0, split)?,
        Epoch::new("late", split, data.recording.num_frames())?,
    ];
    let metric_data = MetricData::new(&data.recording, &data.sorting, None, epochs)?;

    let values = compute_metric(&spike_count(), &metric_data)?;
    assert_eq!(values.len(), 2);
    assert_eq!(values, vec![vec![5.0, 5.0], vec![5.0, 5.0]]);

    let whole = MetricData::new(&data.recording, &data.sorting, None, Vec::new())?;
    assert_eq!(whole.epochs()[0].end_frame, data.recording.num_frames());
    assert_eq!(compute_metric(&spike_count(), &whole)?, vec![vec![10.0, 10.0]]);
    Ok(())
}

#[test]
fn test_amplitudes_in_epoch() -> Result<()> {
    let mut data = SyntheticDataset::with_known_waveforms(1, 2, 30, 12, 5)?;
    let config = ExtractionConfig {
        frames_before: Some(15),
        frames_after: Some(15),
        cache: CachePolicy::ComputeOnly,
        ..Default::default()
    };
    let amplitudes = get_unit_amplitudes(&data.recording, &mut data.sorting, &config)?;
    let expected = amplitudes[0].values.to_vec();

    let train = data.units[0].spike_train.clone();
    let epoch = Epoch::new("middle", train[3], train[8])?;
    let metric_data = MetricData::new(&data.recording, &data.sorting, None, vec![epoch])?
        .with_amplitudes(amplitudes);

    assert!(metric_data.has_amplitudes());
    assert_eq!(metric_data.amplitudes_in_epoch(0, 0)?, expected[4..8].to_vec());
    Ok(())
}

#[test]
fn test_threshold_units() -> Result<()> {
    let data = SyntheticDataset::with_known_waveforms(3, 6, 30, 10, 5)?;
    let metric_data = MetricData::new(&data.recording, &data.sorting, None, Vec::new())?;
    let by_id = FnMetric::new("unit_id", |_: &MetricData, unit, _| Ok(f64::from(unit)));

    assert_eq!(threshold_units(&by_id, &metric_data, 1.0, ThresholdSign::Less, 0)?, vec![1, 2]);
    assert_eq!(threshold_units(&by_id, &metric_data, 1.0, ThresholdSign::LessOrEqual, 0)?, vec![2]);
    assert_eq!(threshold_units(&by_id, &metric_data, 1.0, ThresholdSign::Greater, 0)?, vec![0, 1]);
    assert_eq!(threshold_units(&by_id, &metric_data, 1.0, ThresholdSign::GreaterOrEqual, 0)?, vec![0]);

    let out_of_range = threshold_units(&by_id, &metric_data, 1.0, ThresholdSign::Less, 1);
    assert!(out_of_range.is_err_and(|e| e.is_configuration()));

    assert_eq!("less_or_equal".parse::<ThresholdSign>()?, ThresholdSign::LessOrEqual);
    assert!("between".parse::<ThresholdSign>().is_err());
    Ok(())
}
