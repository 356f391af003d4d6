use kernelc::{
    codegen::{FunctionEmitter, LlvmCodeGen},
    config::Config,
    driver::Driver,
    job::{CompilerJob, FunctionSource, HostType, OutputKind, RuntimeModule},
    llvm::Context,
    runtime::{RuntimeLibrary, RuntimeRegistry},
    target::Target,
};
use std::{env, process, sync::Arc};

const USAGE: &str = "Usage: kernelc [runtime|path|reset|asm]";

fn main() -> miette::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("{USAGE}");
        process::exit(1);
    }

    let cwd = env::current_dir().map_err(|err| kernelc::Error::io(".", err))?;
    let config = Config::discover(&cwd)?;
    let registry = RuntimeRegistry::global();
    let mut library = RuntimeLibrary::new(
        Context::new(),
        LlvmCodeGen::new(registry.clone()),
        registry,
        config.depots,
    );
    let target = Target::from_env();
    let job = runtime_job(target.clone());

    match args[1].as_str() {
        "runtime" => {
            let runtime = library.load(&job)?;
            println!("{}", runtime.print_to_string());
        }
        "path" => {
            println!("{}", library.runtime_path(&job)?.display());
        }
        "reset" => {
            library.reset()?;
        }
        "asm" => {
            let mut driver = Driver::new(library);
            let output = driver.compile(OutputKind::Asm, &probe_job(target))?;
            print!("{}", output.into_text());
        }
        _ => {
            eprintln!("Invalid command. {USAGE}");
            process::exit(1);
        }
    }
    Ok(())
}

fn empty(emitter: &mut FunctionEmitter<'_>) -> kernelc::Result<()> {
    emitter.ret(None);
    Ok(())
}

/// Boxes its argument and reports it, pulling in allocation and reporting routines.
fn probe(emitter: &mut FunctionEmitter<'_>) -> kernelc::Result<()> {
    let value = emitter.param(0)?;
    let boxed = emitter.call_runtime("box_int64", &[value])?;
    emitter.call_runtime("report_exception", &[boxed])?;
    emitter.ret(None);
    Ok(())
}

/// A job whose only purpose is to select the runtime configuration.
fn runtime_job(target: Target) -> CompilerJob {
    let source = FunctionSource::new("entry", vec![], HostType::Nothing, empty);
    CompilerJob::new(target, source, Arc::new(RuntimeModule::generic()))
}

fn probe_job(target: Target) -> CompilerJob {
    let source = FunctionSource::new("probe", vec![HostType::Int64], HostType::Nothing, probe);
    CompilerJob::new(target, source, Arc::new(RuntimeModule::generic()))
}
