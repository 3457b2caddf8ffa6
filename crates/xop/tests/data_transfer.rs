use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use xop::tensor::{DeviceKind, DType};
use xop::{
    CpuDataTransfer, DataTransfer, DataTransferManager, KernelError, KernelResult, MemoryLocation,
    QueueId, Shape, Tensor,
};

/// Records every copy it performs; accepts a fixed (src device, dst device) pair.
struct RecordingTransfer {
    name: &'static str,
    from: DeviceKind,
    to: DeviceKind,
    calls: Arc<Mutex<Vec<(&'static str, Option<QueueId>)>>>,
}

impl RecordingTransfer {
    fn new(
        name: &'static str,
        from: DeviceKind,
        to: DeviceKind,
        calls: &Arc<Mutex<Vec<(&'static str, Option<QueueId>)>>>,
    ) -> Box<Self> {
        Box::new(Self {
            name,
            from,
            to,
            calls: Arc::clone(calls),
        })
    }
}

impl DataTransfer for RecordingTransfer {
    fn name(&self) -> &str {
        self.name
    }

    fn can_copy(&self, src: &MemoryLocation, dst: &MemoryLocation) -> bool {
        src.device == self.from && dst.device == self.to
    }

    fn copy_tensor(
        &self,
        src: &Tensor,
        dst: &mut Tensor,
        queue: Option<QueueId>,
    ) -> KernelResult<()> {
        self.calls.lock().expect("calls lock").push((self.name, queue));
        dst.bytes_mut()?.copy_from_slice(src.bytes()?);
        Ok(())
    }
}

fn host_f32(values: Vec<f32>) -> Tensor {
    let shape = Shape::new(vec![values.len()]);
    Tensor::from_vec(shape, values).expect("host tensor")
}

fn empty_like(tensor: &Tensor, location: MemoryLocation) -> Tensor {
    Tensor::zeros(tensor.dtype(), tensor.shape().clone(), location).expect("destination tensor")
}

#[test]
fn empty_registry_has_no_provider() {
    let manager = DataTransferManager::new();
    let src = host_f32(vec![1.0]);
    let mut dst = empty_like(&src, MemoryLocation::host());
    assert_eq!(
        manager.copy_tensor(&src, &mut dst),
        Err(KernelError::NoTransferProvider {
            src: MemoryLocation::host(),
            dst: MemoryLocation::host(),
        })
    );
}

#[test]
fn single_matching_provider_receives_the_copy() -> Result<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut manager = DataTransferManager::new();
    manager.register(RecordingTransfer::new("h2d", DeviceKind::Cpu, DeviceKind::Gpu, &calls));

    let src = host_f32(vec![1.0, 2.0]);
    let mut dst = empty_like(&src, MemoryLocation::gpu(0));
    manager.copy_tensor(&src, &mut dst)?;

    assert_eq!(*calls.lock().expect("calls lock"), vec![("h2d", None)]);
    assert_eq!(dst.to_vec::<f32>()?, vec![1.0, 2.0]);
    Ok(())
}

#[test]
fn first_registered_provider_wins_on_overlap() -> Result<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut manager = DataTransferManager::new();
    manager.register(RecordingTransfer::new("first", DeviceKind::Cpu, DeviceKind::Cpu, &calls));
    manager.register(RecordingTransfer::new("second", DeviceKind::Cpu, DeviceKind::Cpu, &calls));

    let src = host_f32(vec![3.0]);
    let mut dst = empty_like(&src, MemoryLocation::host());
    manager.copy_tensor(&src, &mut dst)?;

    assert_eq!(*calls.lock().expect("calls lock"), vec![("first", None)]);
    assert_eq!(
        manager
            .provider_for(&MemoryLocation::host(), &MemoryLocation::host())
            .map(|provider| provider.name()),
        Some("first")
    );
    Ok(())
}

#[test]
fn device_to_host_without_provider_fails() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut manager = DataTransferManager::new();
    manager.register(RecordingTransfer::new("p1", DeviceKind::Cpu, DeviceKind::Cpu, &calls));
    manager.register(RecordingTransfer::new("p2", DeviceKind::Cpu, DeviceKind::Gpu, &calls));

    let src = host_f32(vec![1.0, 2.0, 3.0]).with_location(MemoryLocation::gpu(0));
    let mut dst = empty_like(&src, MemoryLocation::host());
    assert_eq!(
        manager.copy_tensor(&src, &mut dst),
        Err(KernelError::NoTransferProvider {
            src: MemoryLocation::gpu(0),
            dst: MemoryLocation::host(),
        })
    );
    assert!(calls.lock().expect("calls lock").is_empty());
}

#[test]
fn queue_id_reaches_the_provider() -> Result<()> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut manager = DataTransferManager::new();
    manager.register(RecordingTransfer::new("d2d", DeviceKind::Gpu, DeviceKind::Gpu, &calls));

    let src = host_f32(vec![5.0]).with_location(MemoryLocation::gpu(0));
    let mut dst = empty_like(&src, MemoryLocation::gpu(1));
    manager.copy_tensor_on_queue(&src, &mut dst, QueueId(3))?;

    assert_eq!(*calls.lock().expect("calls lock"), vec![("d2d", Some(QueueId(3)))]);
    Ok(())
}

#[test]
fn element_count_mismatch_is_rejected_before_dispatch() {
    let manager = DataTransferManager::with_cpu();
    let src = host_f32(vec![1.0, 2.0]);
    let mut dst =
        Tensor::zeros(DType::F32, Shape::new(vec![3]), MemoryLocation::host()).expect("dst");
    assert_eq!(
        manager.copy_tensor(&src, &mut dst),
        Err(KernelError::SizeMismatch { src: 2, dst: 3 })
    );
}

#[test]
fn cpu_provider_copies_strings_and_ignores_queue() -> Result<()> {
    let manager = DataTransferManager::with_cpu();
    let src = Tensor::from_strings(Shape::new(vec![2]), vec!["a".into(), "bc".into()])?;
    let mut dst = empty_like(&src, MemoryLocation::host_pinned());
    manager.copy_tensor_on_queue(&src, &mut dst, QueueId(0))?;
    assert_eq!(dst.strings()?, ["a".to_string(), "bc".to_string()]);
    Ok(())
}

#[test]
fn cpu_provider_rejects_dtype_change() {
    let src = host_f32(vec![1.0]);
    let mut dst =
        Tensor::zeros(DType::I32, Shape::new(vec![1]), MemoryLocation::host()).expect("dst");
    assert!(matches!(
        CpuDataTransfer.copy_tensor(&src, &mut dst, None),
        Err(KernelError::InvalidArgument(_))
    ));
}

#[test]
fn registered_manager_serves_concurrent_copies() {
    let manager = Arc::new(DataTransferManager::with_cpu());
    thread::scope(|scope| {
        for i in 0..4 {
            let manager = Arc::clone(&manager);
            scope.spawn(move || {
                let src = host_f32(vec![i as f32; 16]);
                let mut dst = empty_like(&src, MemoryLocation::host());
                manager.copy_tensor(&src, &mut dst).expect("copy");
                assert_eq!(dst.to_vec::<f32>().expect("values"), vec![i as f32; 16]);
            });
        }
    });
}
