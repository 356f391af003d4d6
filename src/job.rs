use crate::codegen::FunctionEmitter;
use crate::error::{Error, Result};
use crate::llvm::IrType;
use crate::runtime::registry::{RoutineSource, RuntimeMethodInstance};
use crate::target::{sanitize_name, Target};
use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Emits the body of a function. Stands in for a front-end definition.
pub type EmitFn = fn(&mut FunctionEmitter<'_>) -> Result<()>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Llvm,
    Asm,
}

/// Source-level types as the front end sees them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Nothing,
    Bool,
    Int8,
    Int32,
    Int64,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Raw device pointer; represented as a pointer-sized integer.
    RawPtr,
    /// Reference to a heap-allocated, boxed value.
    Boxed,
}

impl HostType {
    /// Low-level type on a target whose pointers are `pointer_bits` wide.
    pub fn lowered(self, pointer_bits: u32) -> IrType {
        match self {
            HostType::Nothing => IrType::Void,
            HostType::Bool | HostType::Int8 => IrType::Int(8),
            HostType::Int32 | HostType::UInt32 => IrType::Int(32),
            HostType::Int64 | HostType::UInt64 => IrType::Int(64),
            HostType::RawPtr => IrType::Int(pointer_bits),
            HostType::Float32 => IrType::Float,
            HostType::Float64 => IrType::Double,
            HostType::Boxed => IrType::Ptr,
        }
    }

    /// Size of the unboxed payload in bytes.
    pub fn size_of(self) -> u64 {
        match self {
            HostType::Nothing => 0,
            HostType::Bool | HostType::Int8 => 1,
            HostType::Int32 | HostType::UInt32 | HostType::Float32 => 4,
            HostType::Int64
            | HostType::UInt64
            | HostType::Float64
            | HostType::RawPtr
            | HostType::Boxed => 8,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub params: Vec<IrType>,
    pub ret: IrType,
}

/// A function to compile: its name, host-level signature and body.
#[derive(Clone)]
pub struct FunctionSource {
    pub name: String,
    pub params: Vec<HostType>,
    pub ret: HostType,
    pub body: EmitFn,
    /// Explicit low-level signature; the lowered host types are used when absent.
    pub signature: Option<Signature>,
}

impl FunctionSource {
    pub fn new(name: impl Into<String>, params: Vec<HostType>, ret: HostType, body: EmitFn) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            body,
            signature: None,
        }
    }

    pub fn lowered_signature(&self, target: &Target) -> Signature {
        let bits = target.pointer_width_bits();
        self.signature.clone().unwrap_or_else(|| Signature {
            params: self.params.iter().map(|p| p.lowered(bits)).collect(),
            ret: self.ret.lowered(bits),
        })
    }
}

impl PartialEq for FunctionSource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.params == other.params
            && self.ret == other.ret
            && self.body as usize == other.body as usize
            && self.signature == other.signature
    }
}

impl Eq for FunctionSource {}

impl Hash for FunctionSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.params.hash(state);
        self.ret.hash(state);
        (self.body as usize).hash(state);
        self.signature.hash(state);
    }
}

impl fmt::Debug for FunctionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSource")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// Target-provided definitions for runtime hooks, looked up by key.
#[derive(Clone)]
pub struct RuntimeModule {
    name: String,
    hooks: BTreeMap<String, EmitFn>,
}

impl RuntimeModule {
    /// The name is the table's identity: it is part of the runtime cache key,
    /// so two tables with different hooks must not share a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hooks: BTreeMap::new(),
        }
    }

    pub fn with_hook(mut self, name: impl Into<String>, body: EmitFn) -> Self {
        self.hooks.insert(name.into(), body);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lookup(&self, name: &str) -> Result<EmitFn> {
        self.hooks
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownRoutine {
                name: format!("{}.{name}", self.name),
            })
    }
}

// Runtime modules are identified by name; two tables with one name must agree.
impl PartialEq for RuntimeModule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RuntimeModule {}

impl Hash for RuntimeModule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for RuntimeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeModule")
            .field("name", &self.name)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One compilation request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompilerJob {
    pub target: Target,
    pub source: FunctionSource,
    pub runtime_module: Arc<RuntimeModule>,
    pub kernel: bool,
}

impl CompilerJob {
    pub fn new(target: Target, source: FunctionSource, runtime_module: Arc<RuntimeModule>) -> Self {
        Self {
            target,
            source,
            runtime_module,
            kernel: true,
        }
    }

    pub fn with_kernel(mut self, kernel: bool) -> Self {
        self.kernel = kernel;
        self
    }

    /// Key for the runtime library this job needs.
    pub fn runtime_slug(&self) -> String {
        format!(
            "{}-{}",
            self.target.slug(),
            sanitize_name(self.runtime_module.name())
        )
    }

    /// A non-kernel job compiling one runtime routine for this job's target.
    pub fn for_runtime_method(&self, method: &RuntimeMethodInstance) -> Result<Self> {
        let body = match &method.source {
            RoutineSource::Builtin(body) => *body,
            RoutineSource::Target(hook) => self.runtime_module.lookup(hook)?,
        };
        let source = FunctionSource {
            name: method.name.clone(),
            params: method.params.clone(),
            ret: method.ret,
            body,
            signature: Some(method.llvm_signature(self.target.pointer_width_bits())),
        };
        Ok(Self {
            target: self.target.clone(),
            source,
            runtime_module: self.runtime_module.clone(),
            kernel: false,
        })
    }
}
