use crate::codegen::{FunctionEmitter, LlvmCodeGen};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::job::{CompilerJob, FunctionSource, HostType, OutputKind, RuntimeModule};
use crate::llvm::Context;
use crate::runtime::{DepotPath, RuntimeLibrary, RuntimeRegistry, registry::LINK_PREFIX};
use crate::target::Target;
use llvm_sys::LLVMLinkage;
use std::{path::PathBuf, sync::Arc};
use tempfile::tempdir;

fn driver(roots: Vec<PathBuf>) -> Driver {
    let registry = RuntimeRegistry::global();
    Driver::new(RuntimeLibrary::new(
        Context::new(),
        LlvmCodeGen::new(registry.clone()),
        registry,
        DepotPath::new(roots),
    ))
}

fn boxing_kernel(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    let value = emitter.param(0)?;
    let boxed = emitter.call_runtime("box_int64", &[value])?;
    emitter.call_runtime("report_exception", &[boxed])?;
    emitter.ret(None);
    Ok(())
}

fn plain_kernel(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    emitter.ret(None);
    Ok(())
}

fn job(target: Target, body: fn(&mut FunctionEmitter<'_>) -> Result<()>) -> CompilerJob {
    let source = FunctionSource::new("kernel", vec![HostType::Int64], HostType::Nothing, body);
    CompilerJob::new(target, source, Arc::new(RuntimeModule::generic()))
}

#[test]
fn kernel_links_against_runtime() {
    let depot = tempdir().unwrap();
    let mut driver = driver(vec![depot.path().to_path_buf()]);
    let module = driver
        .compile(OutputKind::Llvm, &job(Target::default(), boxing_kernel))
        .unwrap()
        .into_module()
        .unwrap();

    let kernel = module.get_function("kernel").unwrap();
    assert!(!kernel.is_declaration());
    assert_eq!(kernel.linkage(), LLVMLinkage::LLVMExternalLinkage);
    assert_eq!(kernel.call_conv(), 71);

    for function in module.functions() {
        let name = function.name();
        if name.starts_with(LINK_PREFIX) {
            assert!(!function.is_declaration(), "unresolved runtime call to `{name}`");
            assert_ne!(function.linkage(), LLVMLinkage::LLVMExternalLinkage);
        }
    }
    assert!(module.get_function("kernelc_box_float32").is_none());
    module.verify().unwrap();
    assert_eq!(driver.library().build_count(), 1);
}

#[test]
fn runtime_is_built_once_per_configuration() {
    let depot = tempdir().unwrap();
    let kernel = job(Target::default(), boxing_kernel);

    let mut first = driver(vec![depot.path().to_path_buf()]);
    first.compile(OutputKind::Llvm, &kernel).unwrap();
    first.compile(OutputKind::Llvm, &kernel).unwrap();
    assert_eq!(first.library().build_count(), 1);

    let mut second = driver(vec![depot.path().to_path_buf()]);
    second.compile(OutputKind::Llvm, &kernel).unwrap();
    assert_eq!(second.library().build_count(), 0);

    second
        .compile(OutputKind::Llvm, &job(Target::nvptx("sm_80"), boxing_kernel))
        .unwrap();
    assert_eq!(second.library().build_count(), 1);
}

#[test]
fn kernels_without_runtime_calls_skip_the_library() {
    let depot = tempdir().unwrap();
    let mut driver = driver(vec![depot.path().to_path_buf()]);
    let text = driver
        .compile(OutputKind::Llvm, &job(Target::default(), plain_kernel))
        .unwrap()
        .into_text();

    assert!(text.contains("define ptx_kernel void @kernel"));
    assert!(!text.contains(LINK_PREFIX));
    assert_eq!(driver.library().build_count(), 0);
    assert!(!depot.path().join("compiled").exists());
}

#[test]
fn runtime_use_without_depot_fails() {
    let missing = tempdir().unwrap().path().join("absent");
    let mut driver = driver(vec![missing]);
    let err = driver
        .compile(OutputKind::Llvm, &job(Target::default(), boxing_kernel))
        .err()
        .unwrap();
    assert!(matches!(err, Error::NoDepot { .. }));
}

#[test]
fn host_target_emits_assembly() {
    let depot = tempdir().unwrap();
    let mut driver = driver(vec![depot.path().to_path_buf()]);
    let target = Target::new("x86_64-unknown-linux-gnu", "generic");
    let asm = driver
        .compile(OutputKind::Asm, &job(target, boxing_kernel))
        .unwrap()
        .into_text();

    assert!(asm.contains("kernel:"));
    assert!(!asm.contains("kernelc_box_float32"));
}
