pub mod bridge;
pub mod error;
pub mod fused;
pub mod kernel;
pub mod logging;
pub mod tensor;
pub mod transfer;
pub mod type_code;
mod env;

pub use bridge::{
    load_bridge, Bridge, BridgeCell, BridgeConfig, BridgeSymbols, ForeignInstance,
    ForeignOpDescriptor, ForeignOpKernel, FOREIGN_OP_TYPE,
};
pub use error::{KernelError, KernelResult};
pub use fused::{FusedFunctionEntry, FusedFunctionKernel, FusedFunctionRegistry};
pub use kernel::{AttributeMap, KernelContext, KernelInfo, OpKernel};
pub use tensor::{DType, MemoryLocation, Shape, Tensor};
pub use transfer::{CpuDataTransfer, DataTransfer, DataTransferManager, QueueId};
pub use type_code::TypeCode;
