use super::{DataTransfer, QueueId};
use crate::error::{KernelError, KernelResult};
use crate::tensor::{MemoryLocation, Tensor};

/// Synchronous copies between host locations, pinned or not.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuDataTransfer;

impl DataTransfer for CpuDataTransfer {
    fn name(&self) -> &str {
        "cpu"
    }

    fn can_copy(&self, src: &MemoryLocation, dst: &MemoryLocation) -> bool {
        src.is_host() && dst.is_host()
    }

    fn copy_tensor(
        &self,
        src: &Tensor,
        dst: &mut Tensor,
        _queue: Option<QueueId>,
    ) -> KernelResult<()> {
        if src.dtype() != dst.dtype() {
            return Err(KernelError::invalid(format!(
                "cannot copy {} tensor into {} tensor",
                src.dtype(),
                dst.dtype()
            )));
        }
        if src.dtype().is_string() {
            let (from, to) = (src.strings()?, dst.strings_mut()?);
            if from.len() != to.len() {
                return Err(KernelError::SizeMismatch {
                    src: from.len(),
                    dst: to.len(),
                });
            }
            to.clone_from_slice(from);
            return Ok(());
        }
        if src.len() != dst.len() {
            return Err(KernelError::SizeMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        dst.bytes_mut()?.copy_from_slice(src.bytes()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Shape;

    #[test]
    fn copies_between_pinned_and_pageable_host_memory() {
        let src = Tensor::from_vec(Shape::new(vec![3]), vec![1i32, 2, 3]).unwrap();
        let mut dst = Tensor::zeros(
            src.dtype(),
            src.shape().clone(),
            MemoryLocation::host_pinned(),
        )
        .unwrap();
        assert!(CpuDataTransfer.can_copy(&src.location(), &dst.location()));
        CpuDataTransfer.copy_tensor(&src, &mut dst, None).unwrap();
        assert_eq!(dst.to_vec::<i32>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn refuses_device_memory() {
        assert!(!CpuDataTransfer.can_copy(&MemoryLocation::gpu(0), &MemoryLocation::host()));
    }
}
