//! Kernels for nodes a graph-fusion pass replaced with one external callable.
//!
//! The entry for a node is looked up at construction, but a missing entry only
//! fails the node when it is actually computed: dead branches of conditional
//! subgraphs may carry entries that never resolve.

pub mod abi;
mod allocator;
mod registry;

use std::ffi::CString;
use std::fmt;
use std::os::raw::c_void;
use std::sync::Arc;

use crate::error::{KernelError, KernelResult};
use crate::kernel::{KernelContext, KernelInfo, OpKernel};
use crate::tensor::Shape;
use crate::type_code::TypeCode;
use abi::{ComputeContext, KernelApi, RawTensorView, KERNEL_API_VERSION};

pub use allocator::{CpuAllocator, HostAllocator};
pub use registry::{FusedFunctionEntry, FusedFunctionRegistry};

/// Kernel that runs a fused callable over optional per-node state.
pub struct FusedFunctionKernel {
    node_name: String,
    c_node_name: CString,
    // Lookup failures are kept and returned from every compute call.
    functions: KernelResult<FusedFunctionEntry>,
    // Opaque state from create-state; 0 when there is none.
    state: usize,
    // Boxed so the handle given to create-state keeps a stable address.
    allocator: Box<Arc<dyn HostAllocator>>,
}

impl FusedFunctionKernel {
    pub fn new(info: &KernelInfo) -> KernelResult<Self> {
        let node_name = info.node_name().to_string();
        let c_node_name = CString::new(node_name.as_str()).map_err(|_| {
            KernelError::invalid(format!("node name {node_name:?} contains a NUL byte"))
        })?;
        let functions = info.fused_functions();
        if let Err(err) = &functions {
            tracing::debug!(
                node = %node_name,
                %err,
                "fused function lookup failed; deferring to compute"
            );
        }
        let mut kernel = Self {
            node_name,
            c_node_name,
            functions,
            state: 0,
            allocator: Box::new(info.host_allocator()),
        };
        if let Ok(FusedFunctionEntry {
            create_state: Some(create_state),
            ..
        }) = kernel.functions
        {
            let context = ComputeContext {
                allocate: allocate_host,
                release: release_host,
                allocator: kernel.allocator_handle(),
                node_name: kernel.c_node_name.as_ptr(),
            };
            let mut state: *mut c_void = std::ptr::null_mut();
            // SAFETY: context and its pointers outlive the call; `state` is a valid out parameter.
            let status = unsafe { create_state(&context, &mut state) };
            if status != 0 {
                tracing::warn!(node = %kernel.node_name, status, "fused state creation failed");
                return Err(KernelError::StateCreation {
                    node: kernel.node_name.clone(),
                    status,
                });
            }
            kernel.state = state as usize;
        }
        Ok(kernel)
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// The recorded construction-time lookup result.
    pub fn construction_status(&self) -> KernelResult<()> {
        self.functions.as_ref().map(|_| ()).map_err(KernelError::clone)
    }

    pub fn has_state(&self) -> bool {
        self.state != 0
    }

    fn allocator_handle(&self) -> *mut c_void {
        let handle: &Arc<dyn HostAllocator> = &self.allocator;
        handle as *const Arc<dyn HostAllocator> as *mut c_void
    }
}

impl OpKernel for FusedFunctionKernel {
    fn name(&self) -> &str {
        &self.node_name
    }

    fn compute(&self, ctx: &mut KernelContext<'_>) -> KernelResult<()> {
        let entry = self.functions.as_ref().map_err(KernelError::clone)?;
        let context = ctx as *mut KernelContext<'_> as *mut c_void;
        // SAFETY: state came from this entry's create-state (or is null), KERNEL_API is static,
        // and `context` points at a live context for the duration of the call.
        let status = unsafe { (entry.compute)(self.state as *mut c_void, &KERNEL_API, context) };
        if status != 0 {
            tracing::warn!(node = %self.node_name, status, "fused compute failed");
            return Err(KernelError::FusedCompute {
                node: self.node_name.clone(),
                status,
            });
        }
        Ok(())
    }
}

impl Drop for FusedFunctionKernel {
    fn drop(&mut self) {
        if self.state == 0 {
            return;
        }
        if let Ok(FusedFunctionEntry {
            destroy_state: Some(destroy_state),
            ..
        }) = self.functions
        {
            // SAFETY: state was produced by the matching create-state and is destroyed once.
            unsafe { destroy_state(self.state as *mut c_void) };
        }
        self.state = 0;
    }
}

impl fmt::Debug for FusedFunctionKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FusedFunctionKernel")
            .field("node_name", &self.node_name)
            .field("resolved", &self.functions.is_ok())
            .field("has_state", &self.has_state())
            .field("allocator", &self.allocator.name())
            .finish()
    }
}

unsafe extern "C" fn allocate_host(
    allocator: *mut c_void,
    alignment: usize,
    size: usize,
) -> *mut c_void {
    // SAFETY: the handle is the kernel's boxed allocator, alive as long as the kernel.
    match unsafe { (allocator as *const Arc<dyn HostAllocator>).as_ref() } {
        Some(allocator) => allocator.allocate(size, alignment) as *mut c_void,
        None => std::ptr::null_mut(),
    }
}

unsafe extern "C" fn release_host(allocator: *mut c_void, ptr: *mut c_void) {
    // SAFETY: see `allocate_host`.
    if let Some(allocator) = unsafe { (allocator as *const Arc<dyn HostAllocator>).as_ref() } {
        allocator.release(ptr as *mut u8);
    }
}

static KERNEL_API: KernelApi = KernelApi {
    version: KERNEL_API_VERSION,
    input_count: api_input_count,
    output_count: api_output_count,
    input: api_input,
    allocate_output: api_allocate_output,
};

unsafe extern "C" fn api_input_count(context: *mut c_void) -> usize {
    // SAFETY: compute passes a live KernelContext as `context`.
    unsafe { (context as *const KernelContext<'_>).as_ref() }
        .map(KernelContext::input_count)
        .unwrap_or(0)
}

unsafe extern "C" fn api_output_count(context: *mut c_void) -> usize {
    // SAFETY: compute passes a live KernelContext as `context`.
    unsafe { (context as *const KernelContext<'_>).as_ref() }
        .map(KernelContext::output_count)
        .unwrap_or(0)
}

unsafe extern "C" fn api_input(
    context: *mut c_void,
    index: usize,
    view: *mut RawTensorView,
) -> i32 {
    // SAFETY: compute passes a live KernelContext; `view` is the callee's out parameter.
    let (Some(ctx), Some(view)) = (
        unsafe { (context as *const KernelContext<'_>).as_ref() },
        unsafe { view.as_mut() },
    ) else {
        return -1;
    };
    let (Some(tensor), Some(dims)) = (ctx.input(index), ctx.input_dims(index)) else {
        return -1;
    };
    let code = match TypeCode::from_dtype(tensor.dtype()) {
        Ok(TypeCode::String) | Err(_) => return -1,
        Ok(code) => code,
    };
    *view = RawTensorView {
        data: tensor.data_ptr() as *const c_void,
        type_code: code.raw(),
        dims: dims.as_ptr(),
        rank: dims.len(),
    };
    0
}

unsafe extern "C" fn api_allocate_output(
    context: *mut c_void,
    index: usize,
    dims: *const i64,
    rank: usize,
) -> *mut c_void {
    // SAFETY: compute passes a live KernelContext as `context`.
    let Some(ctx) = (unsafe { (context as *mut KernelContext<'_>).as_mut() }) else {
        return std::ptr::null_mut();
    };
    let dims = match (rank, dims.is_null()) {
        (0, _) => &[][..],
        (_, true) => return std::ptr::null_mut(),
        // SAFETY: the callee passes `rank` readable dims.
        (_, false) => unsafe { std::slice::from_raw_parts(dims, rank) },
    };
    let allocated = Shape::from_foreign(dims).and_then(|shape| ctx.allocate_output(index, shape));
    match allocated {
        Ok(tensor) => tensor.data_mut_ptr() as *mut c_void,
        Err(err) => {
            tracing::warn!(index, %err, "fused output allocation failed");
            std::ptr::null_mut()
        }
    }
}
