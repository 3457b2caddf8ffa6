use std::ffi::CString;
use std::sync::Arc;

use serde::Deserialize;

use super::view::{ForeignOutputRef, ForeignOutputs, InputViews};
use super::{load_bridge, Bridge, ForeignInstance};
use crate::error::{KernelError, KernelResult};
use crate::kernel::{AttributeMap, KernelContext, KernelInfo, OpKernel};
use crate::tensor::{DType, Shape, Tensor};
use crate::type_code::{ensure_codes, TypeCode};

/// Op type the graph loader binds to [`ForeignOpKernel`].
pub const FOREIGN_OP_TYPE: &str = "PyOp";

fn default_compute() -> String {
    "compute".to_string()
}

fn default_shape_infer() -> String {
    "shape_infer".to_string()
}

/// Per-node configuration of a foreign op, as the graph loader reads it from node attributes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForeignOpDescriptor {
    pub module: String,
    pub class_name: String,
    #[serde(default = "default_compute")]
    pub compute: String,
    #[serde(default = "default_shape_infer")]
    pub shape_infer: String,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl ForeignOpDescriptor {
    pub fn new(module: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            class_name: class_name.into(),
            compute: default_compute(),
            shape_infer: default_shape_infer(),
            attributes: AttributeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_entry_points(
        mut self,
        compute: impl Into<String>,
        shape_infer: impl Into<String>,
    ) -> Self {
        self.compute = compute.into();
        self.shape_infer = shape_infer.into();
        self
    }
}

/// Kernel for a node whose computation lives in the foreign runtime.
///
/// Owns exactly one foreign instance for its whole lifetime.
#[derive(Debug)]
pub struct ForeignOpKernel {
    node_name: String,
    descriptor: ForeignOpDescriptor,
    output_types: Vec<DType>,
    compute_entry: CString,
    shape_infer_entry: CString,
    instance: ForeignInstance,
}

impl ForeignOpKernel {
    /// Builds the kernel against the process-wide bridge, loading it on first use.
    pub fn new(info: &KernelInfo, descriptor: ForeignOpDescriptor) -> KernelResult<Self> {
        Self::with_bridge(load_bridge()?, info, descriptor)
    }

    pub fn with_bridge(
        bridge: Arc<Bridge>,
        info: &KernelInfo,
        descriptor: ForeignOpDescriptor,
    ) -> KernelResult<Self> {
        ensure_codes(info.input_types(), "input")?;
        ensure_codes(info.output_types(), "output")?;
        let compute_entry = entry_point_name(&descriptor.compute)?;
        let shape_infer_entry = entry_point_name(&descriptor.shape_infer)?;
        let instance = bridge.create_instance(
            &descriptor.module,
            &descriptor.class_name,
            &descriptor.attributes,
        )?;
        Ok(Self {
            node_name: info.node_name().to_string(),
            output_types: info.output_types().to_vec(),
            descriptor,
            compute_entry,
            shape_infer_entry,
            instance,
        })
    }

    /// Asks the foreign side for the shape of output `index` given the current inputs.
    pub fn infer_output_shape(&self, inputs: &[Tensor], index: usize) -> KernelResult<Shape> {
        let outputs = self.run_shape_inference(inputs)?;
        let output = outputs.get(index).ok_or_else(|| {
            KernelError::invalid(format!(
                "shape inference for node '{}' returned {} outputs, index {index} requested",
                self.node_name,
                outputs.len()
            ))
        })?;
        output.shape_payload()
    }

    /// One shape per declared output, from a single shape-inference round trip.
    pub fn infer_output_shapes(&self, inputs: &[Tensor]) -> KernelResult<Vec<Shape>> {
        let outputs = self.run_shape_inference(inputs)?;
        self.check_output_count(&self.descriptor.shape_infer, &outputs)?;
        outputs.iter().map(|out| out.shape_payload()).collect()
    }

    fn run_shape_inference(&self, inputs: &[Tensor]) -> KernelResult<ForeignOutputs> {
        let views = InputViews::gather(inputs)?;
        if views.is_empty() {
            return Err(KernelError::invalid(format!(
                "shape inference for node '{}' requires at least one input",
                self.node_name
            )));
        }
        self.instance
            .bridge()
            .invoke(&self.instance, &self.shape_infer_entry, &views)
    }

    fn check_output_count(&self, entry_point: &str, outputs: &ForeignOutputs) -> KernelResult<()> {
        if outputs.len() != self.output_types.len() {
            return Err(KernelError::OutputCount {
                entry_point: entry_point.to_string(),
                expected: self.output_types.len(),
                actual: outputs.len(),
            });
        }
        Ok(())
    }

    fn copy_output(
        &self,
        ctx: &mut KernelContext<'_>,
        output: &ForeignOutputRef<'_>,
    ) -> KernelResult<()> {
        let index = output.index();
        let declared = self.output_types[index];
        let code = TypeCode::from_raw(output.raw_type_code())?;
        if !code.admits(declared) {
            return Err(KernelError::unsupported_type(format!(
                "node '{}' output {index} declared {declared} but foreign side returned {code:?}",
                self.node_name
            )));
        }
        let shape = output.shape()?;
        let target = ctx.allocate_output(index, shape)?;
        if declared.is_string() {
            let values = output.strings()?;
            target.strings_mut()?.clone_from_slice(&values);
            return Ok(());
        }

        let source = output.bytes()?;
        let destination = target.bytes_mut()?;
        if source.len() > destination.len() {
            return Err(KernelError::invalid(format!(
                "node '{}' output {index} reports {} bytes but a {declared} tensor \
                 of that shape holds {}",
                self.node_name,
                source.len(),
                destination.len()
            )));
        }
        destination[..source.len()].copy_from_slice(source);
        Ok(())
    }
}

impl OpKernel for ForeignOpKernel {
    fn name(&self) -> &str {
        &self.node_name
    }

    fn compute(&self, ctx: &mut KernelContext<'_>) -> KernelResult<()> {
        let views = InputViews::gather(ctx.inputs())?;
        let mut outputs = self
            .instance
            .bridge()
            .invoke(&self.instance, &self.compute_entry, &views)?;
        self.check_output_count(&self.descriptor.compute, &outputs)?;
        for index in 0..outputs.len() {
            if let Some(output) = outputs.get(index) {
                self.copy_output(ctx, &output)?;
            }
            outputs.release(index);
        }
        // Outputs not reached before an error are freed when `outputs` drops.
        Ok(())
    }
}

fn entry_point_name(name: &str) -> KernelResult<CString> {
    CString::new(name).map_err(|_| {
        KernelError::invalid(format!("entry point name {name:?} contains a NUL byte"))
    })
}
