use super::*;
use crate::codegen::{CodeGen, FunctionEmitter, LlvmCodeGen};
use crate::error::{Error, Result};
use crate::job::{CompilerJob, FunctionSource, HostType, OutputKind, RuntimeModule};
use crate::llvm::{Builder, Context, Function, IrType, Module};
use crate::target::{Target, NVPTX64_TRIPLE};
use llvm_sys::{LLVMLinkage, LLVMOpcode};
use pretty_assertions::assert_eq;
use std::{
    cell::Cell,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};
use tempfile::tempdir;

struct CountingCodeGen {
    inner: LlvmCodeGen,
    calls: Rc<Cell<usize>>,
}

impl CodeGen for CountingCodeGen {
    fn codegen(
        &self,
        context: &Context,
        kind: OutputKind,
        job: &CompilerJob,
    ) -> Result<(Module, String)> {
        self.calls.set(self.calls.get() + 1);
        self.inner.codegen(context, kind, job)
    }
}

fn library(roots: &[PathBuf]) -> (RuntimeLibrary, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let registry = RuntimeRegistry::global();
    let codegen = CountingCodeGen {
        inner: LlvmCodeGen::new(registry.clone()),
        calls: calls.clone(),
    };
    let library = RuntimeLibrary::new(
        Context::new(),
        codegen,
        registry,
        DepotPath::new(roots.to_vec()),
    );
    (library, calls)
}

fn empty_body(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    emitter.ret(None);
    Ok(())
}

fn job_for(target: Target) -> CompilerJob {
    let source = FunctionSource::new("kernel", vec![], HostType::Nothing, empty_body);
    CompilerJob::new(target, source, Arc::new(RuntimeModule::generic()))
}

fn job(cpu: &str) -> CompilerJob {
    job_for(Target::nvptx(cpu))
}

fn depot(root: &Path) -> PathBuf {
    fs::create_dir_all(root).unwrap();
    root.to_path_buf()
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn built_runtime_defines_every_routine_as_plain_function() {
    let context = Context::new();
    let registry = RuntimeRegistry::global();
    let codegen = LlvmCodeGen::new(registry.clone());
    let module = build_runtime(&context, &codegen, &registry, &job("sm_70")).unwrap();

    module.verify().unwrap();
    for method in registry.iter() {
        let function = module
            .get_function(&method.llvm_name)
            .unwrap_or_else(|| panic!("missing {}", method.llvm_name));
        assert!(!function.is_declaration(), "{} is not defined", method.llvm_name);
        assert_eq!(function.call_conv(), 0, "{} is marked as a kernel", method.llvm_name);
    }
    assert!(module.get_function("malloc").unwrap().is_declaration());
}

#[test]
fn missing_target_hook_is_reported() {
    let tmp = tempdir().unwrap();
    let (mut library, _) = library(&[depot(&tmp.path().join("depot"))]);
    let mut job = job("sm_70");
    job.runtime_module = Arc::new(RuntimeModule::new("bare"));

    match library.load(&job) {
        Err(Error::UnknownRoutine { name }) => assert!(name.starts_with("bare.")),
        other => panic!("expected an unknown routine, got {other:?}"),
    }
}

#[test]
fn load_without_depot_fails() {
    let tmp = tempdir().unwrap();
    let (mut library, calls) = library(&[tmp.path().join("missing")]);
    assert!(matches!(library.load(&job("sm_70")), Err(Error::NoDepot { .. })));
    assert_eq!(calls.get(), 0);
}

#[test]
fn equal_slugs_give_equal_runtimes() {
    let tmp = tempdir().unwrap();
    let (mut first, _) = library(&[depot(&tmp.path().join("a"))]);
    let (mut second, _) = library(&[depot(&tmp.path().join("b"))]);

    let a = first.load(&job("sm_70")).unwrap();
    let b = second.load(&job_for(Target::nvptx("sm_70"))).unwrap();
    assert_eq!(a.print_to_string(), b.print_to_string());

    let other = first.load(&job("sm_80")).unwrap();
    assert!(!Rc::ptr_eq(&a, &other));
    assert_eq!(first.build_count(), 2);
}

#[test]
fn second_load_returns_the_same_module() {
    let tmp = tempdir().unwrap();
    let (mut library, calls) = library(&[depot(&tmp.path().join("depot"))]);

    let first = library.load(&job("sm_70")).unwrap();
    let after_first = calls.get();
    let second = library.load(&job("sm_70")).unwrap();

    assert!(Rc::ptr_eq(&first, &second));
    assert_eq!(calls.get(), after_first);
    assert_eq!(library.build_count(), 1);
}

#[test]
fn fresh_process_reuses_disk_cache() {
    let tmp = tempdir().unwrap();
    let roots = [depot(&tmp.path().join("depot"))];

    let (mut warm, _) = library(&roots);
    let built = warm.load(&job("sm_70")).unwrap();
    let path = warm.runtime_path(&job("sm_70")).unwrap();
    assert!(path.is_file());
    assert_eq!(
        path.file_name().unwrap().to_string_lossy(),
        format!("runtime_{}.bc", job("sm_70").runtime_slug())
    );

    let (mut cold, calls) = library(&roots);
    let loaded = cold.load(&job("sm_70")).unwrap();
    assert_eq!(cold.build_count(), 0);
    assert_eq!(calls.get(), 0);
    assert_eq!(sorted(loaded.defined_names()), sorted(built.defined_names()));
}

#[test]
fn lower_layer_seeds_the_top_layer_once() {
    let tmp = tempdir().unwrap();
    let top = depot(&tmp.path().join("top"));
    let lower = depot(&tmp.path().join("lower"));

    let (mut seed, _) = library(&[lower.clone()]);
    seed.load(&job("sm_70")).unwrap();
    assert!(!DepotPath::cache_dir(&top).exists());

    let (mut layered, calls) = library(&[top.clone(), lower.clone()]);
    layered.load(&job("sm_70")).unwrap();
    assert_eq!(calls.get(), 0);
    let seeded = layered.runtime_path(&job("sm_70")).unwrap();
    assert!(seeded.starts_with(DepotPath::cache_dir(&top)));
    assert!(seeded.is_file());

    // The lower layer is never consulted again, in this process or the next.
    fs::remove_dir_all(&lower).unwrap();
    layered.clear_memory_cache();
    layered.load(&job("sm_70")).unwrap();
    let (mut next, next_calls) = library(&[top.clone(), lower]);
    next.load(&job("sm_70")).unwrap();
    assert_eq!(calls.get(), 0);
    assert_eq!(next_calls.get(), 0);
}

#[test]
fn cache_holds_only_complete_runtimes() {
    let tmp = tempdir().unwrap();
    let top = depot(&tmp.path().join("top"));
    let lower = depot(&tmp.path().join("lower"));
    let (mut seed, _) = library(&[lower.clone()]);
    seed.load(&job("sm_70")).unwrap();

    let (mut layered, _) = library(&[top.clone(), lower]);
    layered.load(&job("sm_70")).unwrap();
    layered.load(&job("sm_80")).unwrap();

    let mut names: Vec<String> = fs::read_dir(DepotPath::cache_dir(&top))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    let mut expected = vec![
        format!("runtime_{}.bc", job("sm_70").runtime_slug()),
        format!("runtime_{}.bc", job("sm_80").runtime_slug()),
    ];
    expected.sort();
    assert_eq!(names, expected);
}

#[test]
fn new_entries_land_in_the_top_layer() {
    let tmp = tempdir().unwrap();
    let top = depot(&tmp.path().join("top"));
    let lower = depot(&tmp.path().join("lower"));
    fs::create_dir_all(DepotPath::cache_dir(&lower)).unwrap();

    let (mut library, _) = library(&[top.clone(), lower.clone()]);
    library.load(&job("sm_75")).unwrap();
    let file = format!("runtime_{}.bc", job("sm_75").runtime_slug());
    assert!(DepotPath::cache_dir(&top).join(&file).is_file());
    assert!(!DepotPath::cache_dir(&lower).join(&file).exists());
}

#[test]
fn corrupt_cache_file_is_not_rebuilt() {
    let tmp = tempdir().unwrap();
    let (mut library, calls) = library(&[depot(&tmp.path().join("depot"))]);
    let path = library.runtime_path(&job("sm_70")).unwrap();
    fs::write(&path, b"not bitcode").unwrap();

    assert!(matches!(library.load(&job("sm_70")), Err(Error::Bitcode { .. })));
    assert_eq!(calls.get(), 0);
    assert_eq!(fs::read(&path).unwrap(), b"not bitcode");
}

#[test]
fn reset_and_clear_force_a_rebuild() {
    let tmp = tempdir().unwrap();
    let (mut library, _) = library(&[depot(&tmp.path().join("depot"))]);
    library.load(&job("sm_70")).unwrap();
    let path = library.runtime_path(&job("sm_70")).unwrap();
    assert_eq!(library.build_count(), 1);

    library.reset().unwrap();
    assert!(!path.exists());
    assert!(path.parent().unwrap().is_dir());

    // Memory still holds the module until it is cleared explicitly.
    library.load(&job("sm_70")).unwrap();
    assert_eq!(library.build_count(), 1);

    library.clear_memory_cache();
    library.load(&job("sm_70")).unwrap();
    assert_eq!(library.build_count(), 2);
    assert!(path.is_file());
}

#[test]
fn reset_tolerates_missing_cache() {
    let tmp = tempdir().unwrap();
    let root = depot(&tmp.path().join("depot"));
    let (library, _) = library(&[root.clone()]);
    library.reset().unwrap();
    library.reset().unwrap();
    assert!(DepotPath::cache_dir(&root).is_dir());
}

fn define<'m>(builder: &Builder<'m>, name: &str, callees: &[Function<'m>]) -> Function<'m> {
    let function = builder.module().add_function(name, &[], IrType::Void);
    builder.position_at_end(builder.append_block(function, "entry"));
    for callee in callees {
        builder.call(*callee, &[], "");
    }
    builder.ret_void();
    function
}

fn runtime_with_helpers(context: &Context) -> Module {
    let runtime = context.create_module("runtime");
    {
        let builder = Builder::new(&runtime);
        let helper1 = define(&builder, "helper1", &[]);
        define(&builder, "helper2", &[]);
        define(&builder, "A", &[helper1]);
    }
    runtime
}

/// A kernel module whose entry `name` calls each of `callees`, declared as `void()`.
fn kernel_calling(context: &Context, name: &str, callees: &[&str]) -> Module {
    let kernel = context.create_module(name);
    {
        let builder = Builder::new(&kernel);
        let declared: Vec<Function<'_>> = callees
            .iter()
            .map(|callee| kernel.add_function(callee, &[], IrType::Void))
            .collect();
        define(&builder, name, &declared);
    }
    kernel
}

#[test]
fn linking_keeps_only_reachable_routines() {
    let context = Context::new();
    let runtime = runtime_with_helpers(&context);
    let mut kernel = kernel_calling(&context, "B", &["A"]);

    link_library(&mut kernel, &runtime).unwrap();
    kernel.verify().unwrap();

    let b = kernel.get_function("B").unwrap();
    assert_eq!(b.linkage(), LLVMLinkage::LLVMExternalLinkage);
    let a = kernel.get_function("A").unwrap();
    assert!(!a.is_declaration());
    assert_eq!(a.linkage(), LLVMLinkage::LLVMInternalLinkage);
    assert!(kernel.get_function("helper1").is_some());
    assert!(kernel.get_function("helper2").is_none());

    // The template itself is untouched.
    assert_eq!(
        sorted(runtime.defined_names()),
        vec!["A".to_string(), "helper1".to_string(), "helper2".to_string()]
    );
}

#[test]
fn linking_unused_runtime_adds_nothing() {
    let context = Context::new();
    let runtime = runtime_with_helpers(&context);
    let mut kernel = kernel_calling(&context, "B", &[]);

    link_library(&mut kernel, &runtime).unwrap();
    let names: Vec<String> = kernel.functions().iter().map(|f| f.name()).collect();
    assert_eq!(names, vec!["B".to_string()]);
}

#[test]
fn linking_twice_from_one_template() {
    let context = Context::new();
    let runtime = runtime_with_helpers(&context);
    for name in ["first", "second"] {
        let mut kernel = kernel_calling(&context, name, &["A"]);
        link_library(&mut kernel, &runtime).unwrap();
        assert!(kernel.get_function("helper1").is_some());
    }
}

#[test]
fn linking_across_contexts_fails() {
    let runtime = runtime_with_helpers(&Context::new());
    let mut kernel = Context::new().create_module("kernel");
    assert!(matches!(
        link_library(&mut kernel, &runtime),
        Err(Error::ContextMismatch { .. })
    ));
}

fn count(function: Function<'_>, opcode: LLVMOpcode) -> usize {
    function
        .instructions()
        .iter()
        .filter(|i| i.opcode() == Some(opcode))
        .count()
}

#[test]
fn pointer_argument_is_converted_once() {
    let context = Context::new();
    let module = context.create_module("kernel");
    module.set_triple(NVPTX64_TRIPLE);
    let builder = Builder::new(&module);
    let kernel = module.add_function("kernel", &[IrType::Ptr], IrType::Void);
    builder.position_at_end(builder.append_block(kernel, "entry"));

    let registry = RuntimeRegistry::global();
    let report = registry.get("report_exception").unwrap();
    let ptr = kernel.param(0).unwrap();
    let call = call_runtime(&builder, report, &[ptr]).unwrap();

    let previous = call.previous_instruction().unwrap();
    assert_eq!(previous.opcode(), Some(LLVMOpcode::LLVMPtrToInt));
    assert_eq!(previous.type_name(), "i64");
    assert_eq!(count(kernel, LLVMOpcode::LLVMPtrToInt), 1);

    let int = builder.const_int(IrType::Int(64), 0);
    let call = call_runtime(&builder, report, &[int]).unwrap();
    assert_eq!(
        call.previous_instruction().unwrap().opcode(),
        Some(LLVMOpcode::LLVMCall)
    );
    assert_eq!(count(kernel, LLVMOpcode::LLVMPtrToInt), 1);

    let declared = module.get_function("kernelc_report_exception").unwrap();
    assert!(declared.is_declaration());
    builder.ret_void();
    module.verify().unwrap();
}

#[test]
fn narrow_targets_convert_pointers_to_narrow_integers() {
    let context = Context::new();
    let module = context.create_module("kernel");
    module.set_triple("nvptx-nvidia-cuda");
    let builder = Builder::new(&module);
    let kernel = module.add_function("kernel", &[IrType::Ptr], IrType::Void);
    builder.position_at_end(builder.append_block(kernel, "entry"));

    let registry = RuntimeRegistry::global();
    let report = registry.get("report_exception").unwrap();
    let call = call_runtime(&builder, report, &[kernel.param(0).unwrap()]).unwrap();
    assert_eq!(call.previous_instruction().unwrap().type_name(), "i32");

    let declared = module.get_function("kernelc_report_exception").unwrap();
    assert_eq!(declared.param_types().len(), 1);
    builder.ret_void();
    module.verify().unwrap();
}

#[test]
fn existing_declaration_type_is_reused() {
    let context = Context::new();
    let module = context.create_module("kernel");
    let builder = Builder::new(&module);
    module.add_function("kernelc_report_exception", &[IrType::Ptr], IrType::Void);
    let kernel = module.add_function("kernel", &[IrType::Ptr], IrType::Void);
    builder.position_at_end(builder.append_block(kernel, "entry"));

    let registry = RuntimeRegistry::global();
    let report = registry.get("report_exception").unwrap();
    call_runtime(&builder, report, &[kernel.param(0).unwrap()]).unwrap();
    assert_eq!(count(kernel, LLVMOpcode::LLVMPtrToInt), 0);
}

#[test]
fn other_mismatches_are_fatal() {
    let context = Context::new();
    let module = context.create_module("kernel");
    let builder = Builder::new(&module);
    let kernel = module.add_function("kernel", &[IrType::Double], IrType::Void);
    builder.position_at_end(builder.append_block(kernel, "entry"));

    let registry = RuntimeRegistry::global();
    let oom = registry.get("report_oom").unwrap();
    match call_runtime(&builder, oom, &[kernel.param(0).unwrap()]) {
        Err(Error::AbiMismatch { routine, index, expected, actual }) => {
            assert_eq!(routine, "report_oom");
            assert_eq!(index, 0);
            assert_eq!(expected, "i64");
            assert_eq!(actual, "double");
        }
        other => panic!("expected an ABI mismatch, got {other:?}"),
    }
    assert!(matches!(
        call_runtime(&builder, oom, &[]),
        Err(Error::AbiMismatch { .. })
    ));
}

#[test]
fn unpositioned_builder_is_rejected() {
    let context = Context::new();
    let module = context.create_module("kernel");
    let builder = Builder::new(&module);
    let registry = RuntimeRegistry::global();
    let signal = registry.get("signal_exception").unwrap();
    assert!(matches!(
        call_runtime(&builder, signal, &[]),
        Err(Error::Codegen { .. })
    ));
}

#[test]
fn builder_in_another_module_is_rejected() {
    let context = Context::new();
    let first = context.create_module("first");
    let second = context.create_module("second");
    let kernel = first.add_function("kernel", &[], IrType::Void);
    let builder = Builder::new(&second);
    builder.position_at_end(builder.append_block(kernel, "entry"));

    let registry = RuntimeRegistry::global();
    let signal = registry.get("signal_exception").unwrap();
    assert!(matches!(
        call_runtime(&builder, signal, &[]),
        Err(Error::Codegen { .. })
    ));
    assert!(second.get_function("kernelc_signal_exception").is_none());
}
