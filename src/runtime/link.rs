use crate::error::Result;
use crate::llvm::Module;
use log::debug;

const CLEANUP_PIPELINE: &str = "globalopt,globaldce,strip-dead-prototypes";

/// Links a copy of `runtime` into `kernel` and drops every routine the kernel doesn't reach.
///
/// Symbols the kernel already had, and which the runtime doesn't define,
/// stay external. Everything else is internalized so dead-code elimination
/// can remove unused routines.
pub fn link_library(kernel: &mut Module, runtime: &Module) -> Result<()> {
    let runtime = runtime.clone();

    let provided = runtime.defined_names();
    let mut exports: Vec<String> = kernel
        .functions()
        .into_iter()
        .map(|f| f.name())
        .chain(kernel.global_names())
        .filter(|name| !provided.contains(name))
        .collect();
    exports.sort();
    exports.dedup();
    debug!("linking runtime into `{}`, exports: {:?}", kernel.name(), exports);

    kernel.link_in(runtime)?;
    kernel.internalize(&exports);
    kernel.run_passes(CLEANUP_PIPELINE, None)
}
