//! Executor-facing kernel surface: node metadata, per-call context, and the kernel trait.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::fused::{CpuAllocator, FusedFunctionEntry, FusedFunctionRegistry, HostAllocator};
use crate::tensor::{DType, MemoryLocation, Shape, Tensor};

/// String-keyed, string-valued node attributes. Immutable once a kernel is built.
pub type AttributeMap = HashMap<String, String>;

/// A kernel bound to one graph node.
///
/// The executor calls `compute` for one node at a time; implementations may
/// still be shared across threads between calls.
pub trait OpKernel: Send + Sync {
    /// Name of the node this kernel was built for.
    fn name(&self) -> &str;

    fn compute(&self, ctx: &mut KernelContext<'_>) -> KernelResult<()>;
}

/// Node metadata handed to kernel constructors.
#[derive(Clone)]
pub struct KernelInfo {
    node_name: String,
    input_types: Vec<DType>,
    output_types: Vec<DType>,
    fused_functions: Option<Arc<FusedFunctionRegistry>>,
    allocator: Arc<dyn HostAllocator>,
}

impl KernelInfo {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            fused_functions: None,
            allocator: Arc::new(CpuAllocator::new()),
        }
    }

    pub fn with_input_types(mut self, types: impl Into<Vec<DType>>) -> Self {
        self.input_types = types.into();
        self
    }

    pub fn with_output_types(mut self, types: impl Into<Vec<DType>>) -> Self {
        self.output_types = types.into();
        self
    }

    pub fn with_fused_functions(mut self, registry: Arc<FusedFunctionRegistry>) -> Self {
        self.fused_functions = Some(registry);
        self
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn HostAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn input_types(&self) -> &[DType] {
        &self.input_types
    }

    pub fn output_types(&self) -> &[DType] {
        &self.output_types
    }

    pub fn host_allocator(&self) -> Arc<dyn HostAllocator> {
        Arc::clone(&self.allocator)
    }

    /// Resolves the fused-function entry registered for this node.
    pub fn fused_functions(&self) -> KernelResult<FusedFunctionEntry> {
        self.fused_functions
            .as_ref()
            .and_then(|registry| registry.lookup(&self.node_name))
            .ok_or_else(|| KernelError::FusedFunctionMissing {
                node: self.node_name.clone(),
            })
    }
}

impl fmt::Debug for KernelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelInfo")
            .field("node_name", &self.node_name)
            .field("input_types", &self.input_types)
            .field("output_types", &self.output_types)
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

/// Per-call execution context: borrowed inputs plus the outputs a kernel allocates.
pub struct KernelContext<'a> {
    inputs: &'a [Tensor],
    input_dims: Vec<Vec<i64>>,
    output_types: Vec<DType>,
    output_location: MemoryLocation,
    outputs: Vec<Option<Tensor>>,
}

impl<'a> KernelContext<'a> {
    pub fn new(inputs: &'a [Tensor], output_types: impl Into<Vec<DType>>) -> Self {
        let output_types = output_types.into();
        let outputs = (0..output_types.len()).map(|_| None).collect();
        Self {
            inputs,
            input_dims: inputs.iter().map(|t| t.shape().to_foreign()).collect(),
            output_types,
            output_location: MemoryLocation::host(),
            outputs,
        }
    }

    pub fn with_output_location(mut self, location: MemoryLocation) -> Self {
        self.output_location = location;
        self
    }

    pub fn inputs(&self) -> &'a [Tensor] {
        self.inputs
    }

    pub fn input(&self, index: usize) -> Option<&'a Tensor> {
        self.inputs.get(index)
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.output_types.len()
    }

    pub fn output_type(&self, index: usize) -> Option<DType> {
        self.output_types.get(index).copied()
    }

    pub fn output(&self, index: usize) -> Option<&Tensor> {
        self.outputs.get(index).and_then(Option::as_ref)
    }

    /// Allocates (or re-allocates) output `index` with its declared dtype.
    pub fn allocate_output(&mut self, index: usize, shape: Shape) -> KernelResult<&mut Tensor> {
        let dtype = self.output_type(index).ok_or_else(|| {
            KernelError::invalid(format!(
                "output index {index} out of range for {} declared outputs",
                self.output_types.len()
            ))
        })?;
        let tensor = Tensor::zeros(dtype, shape, self.output_location)?;
        let slot = &mut self.outputs[index];
        Ok(slot.insert(tensor))
    }

    /// Hands the produced outputs back to the executor; unallocated slots stay `None`.
    pub fn into_outputs(self) -> Vec<Option<Tensor>> {
        self.outputs
    }

    pub(crate) fn input_dims(&self, index: usize) -> Option<&[i64]> {
        self.input_dims.get(index).map(Vec::as_slice)
    }
}
