//! Built-in runtime routines and the generic target hooks backing them.

use super::registry::{RoutineSource, RuntimeMethodInstance};
use crate::codegen::FunctionEmitter;
use crate::error::Result;
use crate::job::{HostType, RuntimeModule};
use crate::llvm::IrType;

pub(crate) fn builtin_methods() -> Vec<RuntimeMethodInstance> {
    use HostType::*;
    use RoutineSource::{Builtin, Target};

    let mut methods = vec![
        RuntimeMethodInstance::new("signal_exception", vec![], Nothing, Target("signal_exception")),
        RuntimeMethodInstance::new("report_exception", vec![RawPtr], Nothing, Target("report_exception")),
        RuntimeMethodInstance::new(
            "report_exception_name",
            vec![RawPtr],
            Nothing,
            Target("report_exception_name"),
        ),
        RuntimeMethodInstance::new(
            "report_exception_frame",
            vec![Int32, RawPtr, RawPtr, Int32],
            Nothing,
            Target("report_exception_frame"),
        ),
        RuntimeMethodInstance::new("report_oom", vec![UInt64], Nothing, Target("report_oom")),
        RuntimeMethodInstance::new("malloc", vec![UInt64], RawPtr, Target("malloc"))
            .with_llvm_signature(vec![IrType::Int(64)], IrType::Ptr),
        RuntimeMethodInstance::new("gc_pool_alloc", vec![UInt64], Boxed, Builtin(gc_pool_alloc)),
    ];

    macro_rules! box_routines {
        ($($name:ident => $ty:ident),* $(,)?) => {
            $(
                fn $name(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
                    box_value(emitter, HostType::$ty)
                }
                methods.push(RuntimeMethodInstance::new(
                    stringify!($name),
                    vec![$ty],
                    Boxed,
                    Builtin($name),
                ));
            )*
        };
    }

    box_routines! {
        box_bool => Bool,
        box_int8 => Int8,
        box_int32 => Int32,
        box_int64 => Int64,
        box_uint32 => UInt32,
        box_uint64 => UInt64,
        box_float32 => Float32,
        box_float64 => Float64,
    }

    methods
}

/// Allocates through `malloc`; on failure reports the size and raises.
fn gc_pool_alloc(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    let size = emitter.param(0)?;
    let ptr = emitter.call_runtime("malloc", &[size])?;

    let oom = emitter.append_block("oom");
    let ok = emitter.append_block("ok");
    let builder = emitter.builder();
    let failed = builder.is_null(ptr, "failed");
    builder.cond_br(failed, oom, ok);

    builder.position_at_end(oom);
    emitter.call_runtime("report_oom", &[size])?;
    emitter.call_runtime("signal_exception", &[])?;
    emitter.builder().unreachable();

    emitter.builder().position_at_end(ok);
    emitter.ret(Some(ptr));
    Ok(())
}

fn box_value(emitter: &mut FunctionEmitter<'_>, ty: HostType) -> Result<()> {
    let value = emitter.param(0)?;
    let size = emitter.builder().const_int(IrType::Int(64), ty.size_of());
    let boxed = emitter.call_runtime("gc_pool_alloc", &[size])?;
    emitter.builder().store(value, boxed);
    emitter.ret(Some(boxed));
    Ok(())
}

fn trap(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    emitter.call_extern("llvm.trap", &[], IrType::Void, &[]);
    emitter.ret(None);
    Ok(())
}

fn ignore_report(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    emitter.ret(None);
    Ok(())
}

fn device_malloc(emitter: &mut FunctionEmitter<'_>) -> Result<()> {
    let size = emitter.param(0)?;
    let ptr = emitter.call_extern("malloc", &[IrType::Int(64)], IrType::Ptr, &[size]);
    emitter.ret(Some(ptr));
    Ok(())
}

impl RuntimeModule {
    /// Hooks that work on any target: trap on exceptions, silent reports, device `malloc`.
    pub fn generic() -> Self {
        RuntimeModule::new("generic")
            .with_hook("signal_exception", trap)
            .with_hook("report_exception", ignore_report)
            .with_hook("report_exception_name", ignore_report)
            .with_hook("report_exception_frame", ignore_report)
            .with_hook("report_oom", ignore_report)
            .with_hook("malloc", device_malloc)
    }
}
