//! Save-path ordering contracts, verified with a recording I/O stub:
//! shard numbering, temp-prefix conventions, and the shard-save barrier
//! ahead of the merge.

use std::sync::Mutex;

use async_trait::async_trait;
use checkpoint::{MultiDeviceSaver, SerializedTensors, TensorOrSlices};
use saver_core::{CheckpointOptions, Error, OperationHandle, Result, TensorValue};
use tensor_io::{sharded_filename, temp_checkpoint_prefix, RestoreRequest, SaveEntry, TensorIo};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Save {
        device: String,
        prefix: String,
        names: Vec<String>,
    },
    Merge {
        device: String,
        shard_prefixes: Vec<String>,
        final_prefix: String,
        delete_old_dirs: bool,
    },
}

/// Records every primitive call; optionally fails saves on one device
#[derive(Default)]
struct RecordingIo {
    events: Mutex<Vec<Event>>,
    fail_save_on_device: Option<String>,
}

impl RecordingIo {
    fn failing_on(device: &str) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_save_on_device: Some(device.to_string()),
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl TensorIo for RecordingIo {
    async fn bulk_save(
        &self,
        device: &str,
        file_prefix: &str,
        entries: Vec<SaveEntry>,
    ) -> Result<OperationHandle> {
        self.events.lock().unwrap().push(Event::Save {
            device: device.to_string(),
            prefix: file_prefix.to_string(),
            names: entries.iter().map(|e| e.name.clone()).collect(),
        });
        if self.fail_save_on_device.as_deref() == Some(device) {
            return Err(Error::Storage {
                message: format!("injected save failure on {device}"),
            });
        }
        Ok(OperationHandle::new(format!("save/{file_prefix}")))
    }

    async fn bulk_restore(
        &self,
        _device: &str,
        _file_prefix: &str,
        _requests: Vec<RestoreRequest>,
    ) -> Result<Vec<TensorValue>> {
        Err(Error::Internal {
            message: "restore is not exercised by this stub".to_string(),
        })
    }

    async fn merge_shards(
        &self,
        device: &str,
        shard_prefixes: Vec<String>,
        final_prefix: &str,
        delete_old_dirs: bool,
    ) -> Result<OperationHandle> {
        let events = self.events.lock().unwrap();
        let unfinished = shard_prefixes.iter().any(|shard| {
            !events
                .iter()
                .any(|e| matches!(e, Event::Save { prefix, .. } if prefix == shard))
        });
        drop(events);
        assert!(!unfinished, "merge must not start before every shard save returned");

        self.events.lock().unwrap().push(Event::Merge {
            device: device.to_string(),
            shard_prefixes,
            final_prefix: final_prefix.to_string(),
            delete_old_dirs,
        });
        Ok(OperationHandle::new(format!("merge/{final_prefix}")))
    }
}

fn three_device_saver() -> MultiDeviceSaver {
    let mut serialized = SerializedTensors::new();
    serialized.add_anonymous(
        [
            (
                "a".to_string(),
                TensorOrSlices::Tensor(TensorValue::from_f32(&[1.0], "cpu:0")),
            ),
            (
                "b".to_string(),
                TensorOrSlices::Tensor(TensorValue::from_f32(&[2.0], "gpu:0")),
            ),
            (
                "c".to_string(),
                TensorOrSlices::Tensor(TensorValue::from_f32(&[3.0], "gpu:1")),
            ),
        ]
        .into(),
    );
    MultiDeviceSaver::new(serialized).unwrap()
}

#[tokio::test]
async fn test_merge_runs_after_all_shard_saves_in_device_order() {
    let io = RecordingIo::default();
    let saver = three_device_saver();

    saver
        .save(&io, "/job/ckpt", &CheckpointOptions::default())
        .await
        .unwrap();

    let events = io.events();
    assert_eq!(events.len(), 4);

    let temp = temp_checkpoint_prefix("/job/ckpt");
    assert_eq!(temp, "/job/ckpt_temp/part");
    let expected_shards: Vec<String> =
        (0..3).map(|i| sharded_filename(&temp, i, 3)).collect();

    for (i, (event, device)) in events[..3]
        .iter()
        .zip(["cpu:0", "gpu:0", "gpu:1"])
        .enumerate()
    {
        match event {
            Event::Save { device: d, prefix, .. } => {
                assert_eq!(d, device);
                assert_eq!(prefix, &expected_shards[i]);
            }
            other => panic!("expected shard save, got {other:?}"),
        }
    }

    // Merge comes last, on the last shard's device, deleting temp dirs.
    assert_eq!(
        events[3],
        Event::Merge {
            device: "gpu:1".to_string(),
            shard_prefixes: expected_shards,
            final_prefix: "/job/ckpt".to_string(),
            delete_old_dirs: true,
        }
    );
}

#[tokio::test]
async fn test_merge_device_follows_pinned_io_device() {
    let io = RecordingIo::default();
    let saver = three_device_saver();

    saver
        .save(&io, "/job/ckpt", &CheckpointOptions::with_io_device("cpu:9"))
        .await
        .unwrap();

    let events = io.events();
    match events.last() {
        Some(Event::Merge { device, .. }) => assert_eq!(device, "cpu:9"),
        other => panic!("expected merge, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_destination_uses_part_suffix() {
    let io = RecordingIo::default();
    let saver = three_device_saver();

    saver
        .save(&io, "s3://bucket/ckpt", &CheckpointOptions::default())
        .await
        .unwrap();

    let events = io.events();
    match &events[0] {
        Event::Save { prefix, .. } => {
            assert_eq!(prefix, "s3://bucket/ckpt.part-00000-of-00003");
        }
        other => panic!("expected shard save, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_shard_save_aborts_without_merge() {
    let io = RecordingIo::failing_on("gpu:0");
    let saver = three_device_saver();

    let result = saver
        .save(&io, "/job/ckpt", &CheckpointOptions::default())
        .await;
    assert!(matches!(result, Err(Error::Storage { .. })));

    let events = io.events();
    // cpu:0 succeeded, gpu:0 failed, gpu:1 was never attempted and no merge
    // ran: a failed save leaves nothing mergeable behind.
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|e| matches!(e, Event::Save { .. })));
}

#[tokio::test]
async fn test_shard_names_carry_names_for_their_device_only() {
    let io = RecordingIo::default();
    let saver = three_device_saver();

    saver
        .save(&io, "/job/ckpt", &CheckpointOptions::default())
        .await
        .unwrap();

    let events = io.events();
    let names: Vec<Vec<String>> = events[..3]
        .iter()
        .map(|e| match e {
            Event::Save { names, .. } => names.clone(),
            other => panic!("expected shard save, got {other:?}"),
        })
        .collect();
    assert_eq!(names, vec![vec!["a"], vec!["b"], vec!["c"]]);
}
