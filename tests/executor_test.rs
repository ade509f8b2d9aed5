use anyhow::Result;
use spike_waveform_toolbox::executor::{ExecutionStrategy, Executor, Sequential, WorkerPool};
use spike_waveform_toolbox::Error;

fn fail_on(unit: u32, bad: u32) -> spike_waveform_toolbox::Result<u32> {
    if unit == bad {
        Err(Error::Recording {
            message: format!("read failed for unit {unit}"),
        })
    } else {
        Ok(unit * 10)
    }
}

#[test]
fn test_strategy_from_jobs() {
    assert!(!ExecutionStrategy::from_jobs(0).is_parallel());
    assert!(!ExecutionStrategy::from_jobs(1).is_parallel());
    assert!(ExecutionStrategy::from_jobs(3).is_parallel());
    assert_eq!(WorkerPool::new(0).workers(), 1);
}

#[test]
fn test_results_follow_input_order() -> Result<()> {
    let units: Vec<u32> = (0..64).rev().collect();
    let expected: Vec<u32> = units.iter().map(|u| u * 10).collect();

    let sequential = Sequential.run(&units, |u| fail_on(u, 1_000))?;
    let pooled = WorkerPool::new(4).run(&units, |u| {
        // Uneven task lengths shuffle completion order
        std::thread::sleep(std::time::Duration::from_micros(u64::from(u % 7) * 100));
        fail_on(u, 1_000)
    })?;

    assert_eq!(sequential, expected);
    assert_eq!(pooled, expected);
    Ok(())
}

#[test]
fn test_failure_names_the_unit() {
    for strategy in [ExecutionStrategy::from_jobs(1), ExecutionStrategy::from_jobs(4)] {
        let result = strategy.run(&[1, 2, 3, 4], |u| fail_on(u, 3));
        match result {
            Err(Error::Aggregation { unit, source }) => {
                assert_eq!(unit, 3);
                assert!(matches!(*source, Error::Recording { .. }));
            }
            other => panic!("expected aggregation error, got {other:?}"),
        }
    }
}
