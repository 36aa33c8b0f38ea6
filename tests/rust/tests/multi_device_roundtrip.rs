//! End-to-end save/restore across multiple devices against the local backend

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use checkpoint::{MultiDeviceSaver, SerializedTensors, TensorOrSlices};
use saver_core::{CheckpointOptions, OperationHandle, TensorValue};
use tempfile::TempDir;
use tensor_io::LocalTensorIo;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn whole(key: &str, values: &[f32], device: &str) -> (String, TensorOrSlices) {
    (
        key.to_string(),
        TensorOrSlices::Tensor(TensorValue::from_f32(values, device)),
    )
}

#[tokio::test]
async fn test_three_device_round_trip_bit_exact() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = dir.path().join("model/ckpt-100").display().to_string();
    let io = LocalTensorIo::new();

    // Three owning objects spread over three devices; one of them is
    // partitioned across two of the devices.
    let dense_seen: Arc<Mutex<BTreeMap<String, TensorOrSlices>>> =
        Arc::new(Mutex::new(BTreeMap::new()));
    let embedding_seen: Arc<Mutex<BTreeMap<String, TensorOrSlices>>> =
        Arc::new(Mutex::new(BTreeMap::new()));

    let mut serialized = SerializedTensors::new();

    let sink = dense_seen.clone();
    serialized.add_with(
        move |inputs| {
            sink.lock().unwrap().extend(inputs);
            None
        },
        [
            whole("dense/kernel/.ATTRIBUTES/VARIABLE_VALUE", &[1.5, -2.25, 0.0], "cpu:0"),
            whole("dense/bias/.ATTRIBUTES/momentum", &[0.125], "gpu:0"),
        ]
        .into(),
    );

    let sink = embedding_seen.clone();
    let mut slices = BTreeMap::new();
    slices.insert("8:0,4".to_string(), TensorValue::from_f32(&[1.0, 2.0, 3.0, 4.0], "gpu:0"));
    slices.insert("8:4,4".to_string(), TensorValue::from_f32(&[5.0, 6.0, 7.0, 8.0], "gpu:1"));
    serialized.add_with(
        move |inputs| {
            sink.lock().unwrap().extend(inputs);
            let mut ops = BTreeMap::new();
            ops.insert("embedding_assign".to_string(), OperationHandle::new("embedding_assign"));
            Some(ops)
        },
        [(
            "embedding/table/.ATTRIBUTES/VARIABLE_VALUE".to_string(),
            TensorOrSlices::Slices(slices),
        )]
        .into(),
    );

    serialized.add_anonymous([whole("step_counter", &[100.0], "cpu:0")].into());

    let saver = MultiDeviceSaver::new(serialized)?;
    assert_eq!(saver.num_devices(), 3);
    assert_eq!(
        saver.devices().collect::<Vec<_>>(),
        vec!["cpu:0", "gpu:0", "gpu:1"]
    );

    saver.save(&io, &prefix, &CheckpointOptions::default()).await?;

    // The merge deleted the intermediate shard directory.
    assert!(dir.path().join("model").join("ckpt-100").exists());
    assert!(!dir.path().join("model").join("ckpt-100_temp").exists());

    let ops = saver.restore(&io, &prefix, &CheckpointOptions::default()).await?;
    assert_eq!(ops.len(), 1);
    assert!(ops.contains_key("embedding_assign"));

    let dense = dense_seen.lock().unwrap();
    assert_eq!(
        dense["VARIABLE_VALUE"].tensor().unwrap().data,
        TensorValue::from_f32(&[1.5, -2.25, 0.0], "cpu:0").data
    );
    assert_eq!(
        dense["momentum"].tensor().unwrap().data,
        TensorValue::from_f32(&[0.125], "cpu:0").data
    );

    let embedding = embedding_seen.lock().unwrap();
    let table = embedding["VARIABLE_VALUE"].slices().unwrap();
    assert_eq!(
        table["8:0,4"].data,
        TensorValue::from_f32(&[1.0, 2.0, 3.0, 4.0], "cpu:0").data
    );
    assert_eq!(
        table["8:4,4"].data,
        TensorValue::from_f32(&[5.0, 6.0, 7.0, 8.0], "cpu:0").data
    );
    Ok(())
}

#[tokio::test]
async fn test_single_device_round_trip() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = dir.path().join("ckpt").display().to_string();
    let io = LocalTensorIo::new();

    let invocations = Arc::new(AtomicUsize::new(0));
    let count = invocations.clone();

    let mut serialized = SerializedTensors::new();
    serialized.add_with(
        move |inputs| {
            count.fetch_add(1, Ordering::SeqCst);
            assert_eq!(inputs.len(), 2);
            None
        },
        [
            whole("a/.ATTRIBUTES/VARIABLE_VALUE", &[1.0], "cpu:0"),
            whole("b/.ATTRIBUTES/VARIABLE_VALUE", &[2.0], "cpu:0"),
        ]
        .into(),
    );

    let saver = MultiDeviceSaver::new(serialized)?;
    assert_eq!(saver.num_devices(), 1);
    saver.save(&io, &prefix, &CheckpointOptions::default()).await?;
    saver.restore(&io, &prefix, &CheckpointOptions::default()).await?;

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_save_twice_overwrites_checkpoint() -> Result<()> {
    init_tracing();
    let dir = TempDir::new()?;
    let prefix = dir.path().join("ckpt").display().to_string();
    let io = LocalTensorIo::new();

    for value in [1.0f32, 2.0] {
        let mut serialized = SerializedTensors::new();
        serialized.add_anonymous([whole("var", &[value], "cpu:0")].into());
        let saver = MultiDeviceSaver::new(serialized)?;
        saver.save(&io, &prefix, &CheckpointOptions::default()).await?;
    }

    let collected: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let mut serialized = SerializedTensors::new();
    serialized.add_with(
        move |inputs| {
            let tensor = inputs["var"].tensor().unwrap().clone();
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&tensor.data[..4]);
            sink.lock().unwrap().push(f32::from_le_bytes(bytes));
            None
        },
        [whole("var", &[0.0], "cpu:0")].into(),
    );
    let saver = MultiDeviceSaver::new(serialized)?;
    saver.restore(&io, &prefix, &CheckpointOptions::default()).await?;

    assert_eq!(*collected.lock().unwrap(), vec![2.0]);
    Ok(())
}
