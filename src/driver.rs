use crate::error::Result;
use crate::job::{CompilerJob, OutputKind};
use crate::llvm::{Module, TargetMachine};
use crate::runtime::{RuntimeLibrary, RuntimeRegistry};
use log::{debug, info};

const OPTIMIZE_PIPELINE: &str = "default<O2>";

pub enum CompileOutput {
    Llvm(Module),
    Asm(String),
}

impl CompileOutput {
    pub fn into_module(self) -> Option<Module> {
        match self {
            CompileOutput::Llvm(module) => Some(module),
            CompileOutput::Asm(_) => None,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            CompileOutput::Llvm(module) => module.print_to_string(),
            CompileOutput::Asm(text) => text,
        }
    }
}

/// Lowers, links and optimizes jobs against one runtime library.
pub struct Driver {
    library: RuntimeLibrary,
}

impl Driver {
    pub fn new(library: RuntimeLibrary) -> Self {
        Self { library }
    }

    pub fn library(&self) -> &RuntimeLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut RuntimeLibrary {
        &mut self.library
    }

    pub fn compile(&mut self, kind: OutputKind, job: &CompilerJob) -> Result<CompileOutput> {
        let context = self.library.context().clone();
        let (mut module, entry_name) = self.library.codegen().codegen(&context, kind, job)?;

        if references_runtime(&module, self.library.registry()) {
            self.library.link_into(&mut module, job)?;
        } else {
            debug!("`{entry_name}` does not use the runtime library");
        }

        let machine = match kind {
            OutputKind::Asm => Some(TargetMachine::new(&job.target)?),
            OutputKind::Llvm => TargetMachine::new(&job.target)
                .map_err(|err| debug!("optimizing without a target machine: {err}"))
                .ok(),
        };
        if let Some(machine) = &machine {
            machine.apply_data_layout(&module);
        }
        module.run_passes(OPTIMIZE_PIPELINE, machine.as_ref())?;
        module.verify()?;
        info!("compiled `{entry_name}` for {}", job.target.triple);

        match machine {
            Some(machine) if kind == OutputKind::Asm => {
                Ok(CompileOutput::Asm(machine.emit_assembly(&module)?))
            }
            _ => Ok(CompileOutput::Llvm(module)),
        }
    }
}

fn references_runtime(module: &Module, registry: &RuntimeRegistry) -> bool {
    module
        .functions()
        .iter()
        .any(|f| f.is_declaration() && registry.defines_link_name(&f.name()))
}
