use crate::error::{Error, Result};
use crate::job::{CompilerJob, OutputKind};
use crate::llvm::{BasicBlock, Builder, Context, Function, IrType, Module, Value};
use crate::runtime::{call::call_runtime, registry::RuntimeRegistry};
use crate::target::Target;
use log::debug;
use std::sync::Arc;

/// Front-end lowering of a job into a fresh module in `context`.
///
/// Returns the module together with the name of the job's entry function.
/// Linking the runtime library and optimization happen after this step.
pub trait CodeGen {
    fn codegen(
        &self,
        context: &Context,
        kind: OutputKind,
        job: &CompilerJob,
    ) -> Result<(Module, String)>;
}

/// Code generator for sources whose bodies are [`crate::job::EmitFn`] emitters.
pub struct LlvmCodeGen {
    registry: Arc<RuntimeRegistry>,
}

impl LlvmCodeGen {
    pub fn new(registry: Arc<RuntimeRegistry>) -> Self {
        Self { registry }
    }

    fn emit_entry(&self, module: &Module, entry: &str, job: &CompilerJob) -> Result<()> {
        let signature = job.source.lowered_signature(&job.target);
        let function = module.add_function(entry, &signature.params, signature.ret);
        if job.kernel {
            if let Some(conv) = job.target.kernel_calling_conv() {
                function.set_call_conv(conv);
            }
        }

        let builder = Builder::new(module);
        builder.position_at_end(builder.append_block(function, "entry"));
        let mut emitter = FunctionEmitter {
            builder: &builder,
            function,
            job,
            registry: &self.registry,
        };
        (job.source.body)(&mut emitter)
    }
}

impl Default for LlvmCodeGen {
    fn default() -> Self {
        Self::new(RuntimeRegistry::global())
    }
}

impl CodeGen for LlvmCodeGen {
    fn codegen(
        &self,
        context: &Context,
        kind: OutputKind,
        job: &CompilerJob,
    ) -> Result<(Module, String)> {
        let source = &job.source;
        debug!(
            "lowering `{}` for {} ({kind:?}, kernel: {})",
            source.name, job.target.triple, job.kernel
        );
        let module = context.create_module(&source.name);
        module.set_triple(&job.target.triple);
        let entry = entry_symbol(job);
        self.emit_entry(&module, &entry, job)?;

        module
            .verify()
            .map_err(|err| Error::codegen(&source.name, err.to_string()))?;
        Ok((module, entry))
    }
}

/// Kernels keep their source name; other functions get a private prefix so a
/// body may call an external symbol of the same name.
fn entry_symbol(job: &CompilerJob) -> String {
    if job.kernel {
        job.source.name.clone()
    } else {
        format!("_kc_{}", job.source.name)
    }
}

/// What an emitter sees while producing a function body.
pub struct FunctionEmitter<'a> {
    builder: &'a Builder<'a>,
    function: Function<'a>,
    job: &'a CompilerJob,
    registry: &'a RuntimeRegistry,
}

impl<'a> FunctionEmitter<'a> {
    pub fn builder(&self) -> &'a Builder<'a> {
        self.builder
    }

    pub fn module(&self) -> &'a Module {
        self.builder.module()
    }

    pub fn function(&self) -> Function<'a> {
        self.function
    }

    pub fn target(&self) -> &Target {
        &self.job.target
    }

    pub fn job(&self) -> &CompilerJob {
        self.job
    }

    pub fn param(&self, index: u32) -> Result<Value<'a>> {
        self.function.param(index).ok_or_else(|| {
            Error::codegen(
                self.function.name(),
                format!("function has no parameter {index}"),
            )
        })
    }

    pub fn append_block(&self, name: &str) -> BasicBlock<'a> {
        self.builder.append_block(self.function, name)
    }

    /// Calls a registered runtime routine by logical name.
    pub fn call_runtime(&self, routine: &str, args: &[Value<'a>]) -> Result<Value<'a>> {
        let method = self.registry.get(routine)?;
        call_runtime(self.builder, method, args)
    }

    /// Calls an external symbol, declaring it with the given signature if needed.
    pub fn call_extern(
        &self,
        name: &str,
        params: &[IrType],
        ret: IrType,
        args: &[Value<'a>],
    ) -> Value<'a> {
        let module = self.module();
        let callee = module
            .get_function(name)
            .unwrap_or_else(|| module.add_function(name, params, ret));
        self.builder.call(callee, args, "")
    }

    pub fn ret(&self, value: Option<Value<'a>>) {
        match value {
            Some(value) => self.builder.ret(value),
            None => self.builder.ret_void(),
        }
    }
}
