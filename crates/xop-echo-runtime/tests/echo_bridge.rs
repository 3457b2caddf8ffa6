use std::sync::Arc;

use anyhow::Result;
use xop::tensor::DType;
use xop::{
    Bridge, ForeignOpDescriptor, ForeignOpKernel, KernelContext, KernelError, KernelInfo, OpKernel,
    Shape, Tensor,
};
use xop_echo_runtime::bridge_symbols;

fn echo_bridge() -> Arc<Bridge> {
    Arc::new(Bridge::from_symbols(bridge_symbols()).expect("echo runtime initializes"))
}

fn info(node: &str, dtype: DType) -> KernelInfo {
    KernelInfo::new(node)
        .with_input_types(vec![dtype])
        .with_output_types(vec![dtype])
}

#[test]
fn identity_echoes_numeric_tensors() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("identity", DType::I64),
        ForeignOpDescriptor::new("echo", "Identity"),
    )?;
    let inputs = vec![Tensor::from_vec(Shape::new(vec![3, 1]), vec![7i64, -8, 9])?];

    assert_eq!(kernel.infer_output_shapes(&inputs)?, vec![Shape::new(vec![3, 1])]);

    let mut ctx = KernelContext::new(&inputs, vec![DType::I64]);
    kernel.compute(&mut ctx)?;
    let outputs = ctx.into_outputs();
    let out = outputs[0].as_ref().expect("output allocated");
    assert_eq!(out.to_vec::<i64>()?, vec![7, -8, 9]);
    Ok(())
}

#[test]
fn identity_echoes_string_tensors() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("identity_strings", DType::String),
        ForeignOpDescriptor::new("echo", "Identity"),
    )?;
    let inputs = vec![Tensor::from_strings(
        Shape::new(vec![2]),
        vec!["hello".to_string(), "world".to_string()],
    )?];
    let mut ctx = KernelContext::new(&inputs, vec![DType::String]);
    kernel.compute(&mut ctx)?;
    let outputs = ctx.into_outputs();
    let out = outputs[0].as_ref().expect("output allocated");
    assert_eq!(out.strings()?, ["hello".to_string(), "world".to_string()]);
    Ok(())
}

#[test]
fn scale_multiplies_by_factor_attribute() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("scale", DType::F32),
        ForeignOpDescriptor::new("echo", "Scale").with_attribute("factor", "2.5"),
    )?;
    let values = vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
    let inputs = vec![Tensor::from_vec(Shape::new(vec![2, 3]), values)?];
    let mut ctx = KernelContext::new(&inputs, vec![DType::F32]);
    kernel.compute(&mut ctx)?;
    let outputs = ctx.into_outputs();
    let out = outputs[0].as_ref().expect("output allocated");
    assert_eq!(out.byte_len(), 24);
    assert_eq!(out.to_vec::<f32>()?, vec![2.5, 5.0, 7.5, 10.0, 12.5, 15.0]);
    Ok(())
}

#[test]
fn scale_without_factor_fails_instance_creation() {
    let err = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("scale_missing", DType::F32),
        ForeignOpDescriptor::new("echo", "Scale"),
    )
    .unwrap_err();
    assert_eq!(
        err,
        KernelError::InstanceCreation {
            module: "echo".to_string(),
            class_name: "Scale".to_string(),
            message: "Scale requires a 'factor' attribute".to_string(),
        }
    );
}

#[test]
fn scale_rejects_non_float_inputs_at_compute() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("scale_ints", DType::I32),
        ForeignOpDescriptor::new("echo", "Scale").with_attribute("factor", "2"),
    )?;
    let inputs = vec![Tensor::from_vec(Shape::new(vec![1]), vec![1i32])?];
    let mut ctx = KernelContext::new(&inputs, vec![DType::I32]);
    match kernel.compute(&mut ctx) {
        Err(KernelError::Invocation { entry_point, message }) => {
            assert_eq!(entry_point, "compute");
            assert!(message.contains("float32"), "{message}");
        }
        other => panic!("expected Invocation error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn unknown_entry_point_is_an_invocation_error() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("renamed", DType::F32),
        ForeignOpDescriptor::new("echo", "Identity").with_entry_points("forward", "shape_infer"),
    )?;
    let inputs = vec![Tensor::from_vec(Shape::new(vec![1]), vec![1.0f32])?];
    let mut ctx = KernelContext::new(&inputs, vec![DType::F32]);
    assert_eq!(
        kernel.compute(&mut ctx),
        Err(KernelError::Invocation {
            entry_point: "forward".to_string(),
            message: "'Identity' has no entry point 'forward'".to_string(),
        })
    );
    Ok(())
}

#[test]
fn scalar_shape_round_trips() -> Result<()> {
    let kernel = ForeignOpKernel::with_bridge(
        echo_bridge(),
        &info("scalar", DType::F64),
        ForeignOpDescriptor::new("echo", "Identity"),
    )?;
    let inputs = vec![Tensor::from_vec(Shape::scalar(), vec![1.5f64])?];
    assert_eq!(kernel.infer_output_shape(&inputs, 0)?, Shape::scalar());

    let mut ctx = KernelContext::new(&inputs, vec![DType::F64]);
    kernel.compute(&mut ctx)?;
    assert_eq!(ctx.output(0).expect("output").to_vec::<f64>()?, vec![1.5]);
    Ok(())
}
