use super::depot::{copy_tree, runtime_file, DepotPath};
use super::link::link_library;
use super::registry::RuntimeRegistry;
use crate::codegen::CodeGen;
use crate::error::{Error, Result};
use crate::job::{CompilerJob, OutputKind};
use crate::llvm::{Context, Module};
use log::{debug, info, warn};
use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    rc::Rc,
    sync::Arc,
};
use tempfile::NamedTempFile;

/// Compiles every registered routine for `job`'s configuration into one module.
pub fn build_runtime(
    context: &Context,
    codegen: &dyn CodeGen,
    registry: &RuntimeRegistry,
    job: &CompilerJob,
) -> Result<Module> {
    let mut module = context.create_module(&format!("kernelc_runtime_{}", job.runtime_slug()));
    module.set_triple(&job.target.triple);
    for method in registry.iter() {
        let method_job = job.for_runtime_method(method)?;
        let (routine, entry) = codegen.codegen(context, OutputKind::Llvm, &method_job)?;
        let function = routine.get_function(&entry).ok_or_else(|| {
            Error::codegen(&method.name, format!("entry `{entry}` is missing from its module"))
        })?;
        function.set_name(&method.llvm_name);
        if function.name() != method.llvm_name {
            return Err(Error::codegen(
                &method.name,
                format!("`{}` is already taken in its module", method.llvm_name),
            ));
        }
        module.link_in(routine)?;
    }
    module.verify()?;
    Ok(module)
}

/// Process-scoped runtime library state: resolved depots plus loaded modules.
///
/// Loaded modules are templates. They are handed out as shared `Rc`s and
/// must be cloned before anything destructive happens to them; [`link_library`]
/// takes care of that.
pub struct RuntimeLibrary {
    context: Context,
    codegen: Box<dyn CodeGen>,
    registry: Arc<RuntimeRegistry>,
    depots: DepotPath,
    output: Option<PathBuf>,
    cache: HashMap<PathBuf, Rc<Module>>,
    builds: usize,
}

impl RuntimeLibrary {
    pub fn new(
        context: Context,
        codegen: impl CodeGen + 'static,
        registry: Arc<RuntimeRegistry>,
        depots: DepotPath,
    ) -> Self {
        Self {
            context,
            codegen: Box::new(codegen),
            registry,
            depots,
            output: None,
            cache: HashMap::new(),
            builds: 0,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn codegen(&self) -> &dyn CodeGen {
        self.codegen.as_ref()
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    pub fn depots(&self) -> &DepotPath {
        &self.depots
    }

    /// How many times this instance had to build a runtime from scratch.
    pub fn build_count(&self) -> usize {
        self.builds
    }

    /// Resolves the writable cache directory, seeding it from a lower layer once.
    fn output_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.output {
            return Ok(dir.clone());
        }
        let resolved = self.depots.resolve()?;
        if resolved.needs_seeding() {
            info!(
                "seeding runtime cache {} from {}",
                resolved.output.display(),
                resolved.input.display()
            );
            copy_tree(&resolved.input, &resolved.output)?;
        }
        fs::create_dir_all(&resolved.output).map_err(|err| Error::io(&resolved.output, err))?;
        self.output = Some(resolved.output.clone());
        Ok(resolved.output)
    }

    pub fn runtime_path(&mut self, job: &CompilerJob) -> Result<PathBuf> {
        Ok(runtime_file(&self.output_dir()?, &job.runtime_slug()))
    }

    pub fn load(&mut self, job: &CompilerJob) -> Result<Rc<Module>> {
        let path = self.runtime_path(job)?;
        if let Some(module) = self.cache.get(&path) {
            debug!("runtime cache hit for {}", path.display());
            return Ok(module.clone());
        }

        let module = if path.is_file() {
            debug!("loading runtime from {}", path.display());
            self.context.read_bitcode(&path)?
        } else {
            info!("building runtime library {}", path.display());
            let module =
                build_runtime(&self.context, self.codegen.as_ref(), &self.registry, job)?;
            self.builds += 1;
            write_bitcode(&module, &path)?;
            module
        };

        let module = Rc::new(module);
        self.cache.insert(path, module.clone());
        Ok(module)
    }

    /// Links the runtime for `job` into `kernel`.
    pub fn link_into(&mut self, kernel: &mut Module, job: &CompilerJob) -> Result<()> {
        let runtime = self.load(job)?;
        link_library(kernel, &runtime)
    }

    /// Wipes the on-disk cache of the first depot. Loaded modules stay in memory
    /// until [`RuntimeLibrary::clear_memory_cache`] is called.
    pub fn reset(&self) -> Result<()> {
        let dir = self.depots.output_dir()?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!("removed runtime cache {}", dir.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("runtime cache {} did not exist", dir.display())
            }
            Err(err) => return Err(Error::io(&dir, err)),
        }
        fs::create_dir_all(&dir).map_err(|err| Error::io(&dir, err))
    }

    pub fn clear_memory_cache(&mut self) {
        self.cache.clear();
    }
}

/// Writes through a temporary file in the same directory so readers never see a partial file.
fn write_bitcode(module: &Module, path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
    let mut file = NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    file.write_all(&module.to_bitcode())
        .map_err(|err| Error::io(file.path(), err))?;
    file.persist(path).map_err(|err| Error::io(path, err.error))?;
    debug!("wrote runtime to {}", path.display());
    Ok(())
}
