//! Integration tests for batch fusion over experiment directories

use std::path::Path;

use serde_json::json;
use tempfile::TempDir;
use visuotactile_align::collector::{Recorder, Snapshot};
use visuotactile_align::config::Config;
use visuotactile_align::core::BatchRunner;
use visuotactile_align::report::{GroupStatus, RunReport, SkipReason};
use visuotactile_align::store::{
    append_event_marker, write_trajectory, Payload, RecordStore, TimestampedRecord,
    TrajectorySample, GRASP_MARKER_FILE,
};

const FRAMES: i64 = 10;

fn frame(timestamp: i64) -> TimestampedRecord {
    let mut payload = Payload::new();
    payload.insert("color_image".to_string(), json!([[timestamp % 255, 0, 0]]));
    payload.insert("depth_image".to_string(), json!([[1.5]]));
    TimestampedRecord::new(timestamp, payload)
}

fn tactile_payload(index: i64) -> Payload {
    let mut payload = Payload::new();
    payload.insert("P1".to_string(), json!([[index, 0]]));
    payload.insert("P2".to_string(), json!([[0, index]]));
    payload
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.driving.base_dir = root.join("vis_data");
    config.auxiliary[0].source.base_dir = root.join("tac_data");
    config.auxiliary[0].tolerance_ms = 20;
    config.auxiliary[1].source.base_dir = root.join("traj_data");
    config.auxiliary[1].tolerance_ms = 20;
    config.output_dir = root.join("combined_data");
    config
}

/// Ten frames every 100 ms from t=1000, tactile for the first
/// `tactile_frames` (7 ms late), a trajectory sample for every frame (3 ms
/// late) and optionally a grasp marker.
fn seed_group(root: &Path, group: &str, tactile_frames: i64, marker: Option<i64>) {
    for i in 0..FRAMES {
        RecordStore::write(root.join("vis_data").join(group), &frame(1000 + i * 100)).unwrap();
    }

    let tac_dir = root.join("tac_data").join(group);
    for i in 0..tactile_frames {
        let record = TimestampedRecord::new(1000 + i * 100 + 7, tactile_payload(i));
        RecordStore::write(&tac_dir, &record).unwrap();
    }
    if let Some(cutoff) = marker {
        append_event_marker(tac_dir.join(GRASP_MARKER_FILE), cutoff).unwrap();
    }

    let samples: Vec<_> = (0..FRAMES)
        .map(|i| TrajectorySample {
            timestamp: 1000 + i * 100 + 3,
            joints: json!([0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6]),
            pose: json!([i, 0, 0]),
        })
        .collect();
    write_trajectory(&root.join("traj_data").join(group).join("traj.json"), &samples).unwrap();
}

#[test]
fn test_full_pipeline_fuses_and_trims() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0001", 6, Some(1200));

    let runner = BatchRunner::new(test_config(dir.path())).unwrap();
    let report = runner.run().unwrap();

    assert_eq!(report.groups.len(), 1);
    let outcome = &report.groups[0];
    assert_eq!(
        outcome.status,
        GroupStatus::Completed {
            fused: 6,
            dropped: 4,
            removed: 2,
            malformed: 0
        }
    );
    assert_eq!(outcome.streams[0].stream, "tactile");
    assert_eq!(outcome.streams[0].matched, 6);
    assert_eq!(outcome.streams[0].max_ms, Some(7));
    assert_eq!(outcome.streams[1].stream, "trajectory");
    assert_eq!(outcome.streams[1].matched, 10);

    let fused = RecordStore::load(dir.path().join("combined_data").join("0001")).unwrap();
    let stamps: Vec<_> = fused.timestamps().collect();
    assert_eq!(stamps, vec![1200, 1300, 1400, 1500]);

    let record = &fused.records()[0];
    assert_eq!(record.get("vis_timestamp"), Some(&json!(1200)));
    assert_eq!(record.get("tac_data"), Some(&json!({"P1": [[2, 0]], "P2": [[0, 2]]})));
    assert_eq!(record.get("O_T_EE"), Some(&json!([2, 0, 0])));
    assert_eq!(record.get("depth_image"), Some(&json!([[1.5]])));

    assert_eq!(report.totals.records_fused, 6);
    assert_eq!(report.totals.records_removed, 2);
}

#[test]
fn test_malformed_inputs_are_counted() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0001", 6, Some(1200));
    let root = dir.path();
    std::fs::write(root.join("vis_data/0001/1550.json"), "not json").unwrap();
    std::fs::write(root.join("tac_data/0001/1250.json"), "[1, 2]").unwrap();
    std::fs::write(root.join("traj_data/0001/broken.json"), "{\"0\": {}}").unwrap();

    let report = BatchRunner::new(test_config(root)).unwrap().run().unwrap();

    assert_eq!(
        report.groups[0].status,
        GroupStatus::Completed {
            fused: 6,
            dropped: 4,
            removed: 2,
            malformed: 3
        }
    );
    assert_eq!(report.totals.records_malformed, 3);
}

#[test]
fn test_incomplete_groups_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0001", 10, Some(1000));
    seed_group(dir.path(), "0002", 10, None);
    seed_group(dir.path(), "0003", 10, Some(1000));
    std::fs::remove_dir_all(dir.path().join("tac_data").join("0003")).unwrap();
    seed_group(dir.path(), "0004", 10, Some(1500));

    let report = BatchRunner::new(test_config(dir.path())).unwrap().run().unwrap();

    let groups: Vec<_> = report.groups.iter().map(|g| g.group.as_str()).collect();
    assert_eq!(groups, vec!["0001", "0002", "0003", "0004"]);
    assert_eq!(report.groups[0].retained(), 10);
    assert!(matches!(
        &report.groups[1].status,
        GroupStatus::Skipped {
            reason: SkipReason::MissingMarker { .. }
        }
    ));
    assert_eq!(
        report.groups[2].status,
        GroupStatus::Skipped {
            reason: SkipReason::MissingStream {
                stream: "tactile".to_string()
            }
        }
    );
    assert_eq!(report.groups[3].retained(), 5);
    assert_eq!(report.skipped().count(), 2);
    assert!(!dir.path().join("combined_data").join("0003").exists());
}

#[test]
fn test_group_without_marker_does_not_stop_batch() {
    let dir = TempDir::new().unwrap();
    for group in ["0001", "0002", "0003", "0004", "0005"] {
        let marker = (group != "0003").then_some(1300);
        seed_group(dir.path(), group, 10, marker);
    }

    let report = BatchRunner::new(test_config(dir.path())).unwrap().run().unwrap();

    assert_eq!(report.groups.len(), 5);
    for outcome in &report.groups {
        if outcome.group == "0003" {
            assert!(outcome.is_skipped());
        } else {
            assert_eq!(outcome.retained(), 7, "group {}", outcome.group);
        }
    }
    assert_eq!(report.totals.groups_completed, 4);
    assert_eq!(report.totals.groups_skipped, 1);
}

#[test]
fn test_parallel_run_matches_sequential() {
    let dir = TempDir::new().unwrap();
    for (index, group) in ["0005", "0001", "0004", "0002", "0003"].iter().enumerate() {
        let marker = (index != 2).then_some(1100 + index as i64 * 100);
        seed_group(dir.path(), group, 4 + index as i64, marker);
    }

    let sequential = BatchRunner::new(test_config(dir.path())).unwrap().run().unwrap();

    let mut config = test_config(dir.path());
    config.jobs = 4;
    let parallel = BatchRunner::new(config).unwrap().run().unwrap();

    assert_eq!(parallel.groups, sequential.groups);
    assert_eq!(parallel.totals.records_fused, sequential.totals.records_fused);
    let groups: Vec<_> = parallel.groups.iter().map(|g| g.group.clone()).collect();
    assert_eq!(groups, vec!["0001", "0002", "0003", "0004", "0005"]);
}

#[test]
fn test_rerun_produces_identical_output() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0001", 8, Some(1300));
    let output = dir.path().join("combined_data").join("0001");

    let runner = BatchRunner::new(test_config(dir.path())).unwrap();
    runner.run().unwrap();
    let first = RecordStore::load(&output).unwrap();

    let report = runner.run().unwrap();
    let second = RecordStore::load(&output).unwrap();

    assert_eq!(first.records(), second.records());
    assert_eq!(report.groups[0].retained(), 5);
}

#[test]
fn test_single_experiment_and_report_file() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0007", 10, Some(1000));
    seed_group(dir.path(), "0008", 10, Some(1000));

    let runner = BatchRunner::new(test_config(dir.path())).unwrap();
    let report = runner.run_experiment("7").unwrap();
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].group, "0007");
    assert!(!dir.path().join("combined_data").join("0008").exists());

    let path = dir.path().join("reports").join("run.json");
    report.save(&path).unwrap();
    let loaded: RunReport =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.groups, report.groups);
}

#[test]
fn test_recorded_tactile_stream_is_fusable() {
    let dir = TempDir::new().unwrap();
    seed_group(dir.path(), "0001", 0, None);

    let tac_dir = dir.path().join("tac_data").join("0001");
    let recorder = Recorder::start(&tac_dir, 4).unwrap();
    let sender = recorder.sender().unwrap();
    for i in 0..FRAMES {
        sender
            .send(Snapshot::new(1000 + i * 100 - 5, tactile_payload(i)))
            .unwrap();
    }
    drop(sender);
    assert_eq!(recorder.finish().unwrap() as i64, FRAMES);
    append_event_marker(tac_dir.join(GRASP_MARKER_FILE), 1500).unwrap();

    let report = BatchRunner::new(test_config(dir.path())).unwrap().run().unwrap();
    assert_eq!(
        report.groups[0].status,
        GroupStatus::Completed {
            fused: 10,
            dropped: 0,
            removed: 5,
            malformed: 0
        }
    );
}
