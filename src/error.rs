use miette::Diagnostic;
use std::{io, path::PathBuf};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("No depot is initialized (configured: {configured})")]
    #[diagnostic(
        code(kernelc::config::no_depot),
        help("create the first entry of KERNELC_DEPOT_PATH before compiling")
    )]
    NoDepot { configured: String },

    #[error("Invalid configuration in {}: {message}", path.display())]
    #[diagnostic(code(kernelc::config::invalid))]
    Config { path: PathBuf, message: String },

    #[error("Runtime routines `{first}` and `{second}` share link symbol `{symbol}`")]
    #[diagnostic(code(kernelc::registry::duplicate_symbol))]
    DuplicateLinkSymbol {
        symbol: String,
        first: String,
        second: String,
    },

    #[error("Runtime routine `{name}` is registered twice")]
    #[diagnostic(code(kernelc::registry::duplicate_routine))]
    DuplicateRoutine { name: String },

    #[error("Unknown runtime routine `{name}`")]
    #[diagnostic(code(kernelc::registry::unknown_routine))]
    UnknownRoutine { name: String },

    #[error("Cannot pass {actual} as parameter {index} ({expected}) of `{routine}`")]
    #[diagnostic(
        code(kernelc::abi::mismatch),
        help("only pointer arguments to integer parameters are converted implicitly")
    )]
    AbiMismatch {
        routine: String,
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(code(kernelc::io))]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read bitcode from {}: {message}", path.display())]
    #[diagnostic(
        code(kernelc::cache::bitcode),
        help("the cached runtime may be corrupt; run `kernelc reset` to rebuild it")
    )]
    Bitcode { path: PathBuf, message: String },

    #[error("Linking `{module}` failed: {message}")]
    #[diagnostic(code(kernelc::llvm::link))]
    Link { module: String, message: String },

    #[error("Modules `{left}` and `{right}` live in different LLVM contexts")]
    #[diagnostic(code(kernelc::llvm::context))]
    ContextMismatch { left: String, right: String },

    #[error("Pass pipeline `{pipeline}` failed: {message}")]
    #[diagnostic(code(kernelc::llvm::passes))]
    Passes { pipeline: String, message: String },

    #[error("Module `{module}` is malformed: {message}")]
    #[diagnostic(code(kernelc::llvm::verify))]
    Verify { module: String, message: String },

    #[error("Code generation for `{name}` failed: {message}")]
    #[diagnostic(code(kernelc::codegen))]
    Codegen { name: String, message: String },

    #[error("Target `{triple}` is unavailable: {message}")]
    #[diagnostic(code(kernelc::target))]
    Target { triple: String, message: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn codegen(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Codegen {
            name: name.into(),
            message: message.into(),
        }
    }
}
