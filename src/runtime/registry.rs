use super::routines::builtin_methods;
use crate::error::{Error, Result};
use crate::job::{EmitFn, HostType, Signature};
use crate::llvm::IrType;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, OnceLock},
};

pub const LINK_PREFIX: &str = "kernelc_";

/// Where a routine's body comes from.
#[derive(Clone, Copy)]
pub enum RoutineSource {
    /// Defined by the driver itself.
    Builtin(EmitFn),
    /// Provided by the job's runtime module under this hook name.
    Target(&'static str),
}

impl fmt::Debug for RoutineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutineSource::Builtin(_) => write!(f, "Builtin"),
            RoutineSource::Target(hook) => write!(f, "Target({hook})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RuntimeMethodInstance {
    pub name: String,
    pub params: Vec<HostType>,
    pub ret: HostType,
    /// Explicit low-level signature; otherwise the host types are lowered per target.
    pub signature: Option<Signature>,
    pub llvm_name: String,
    pub source: RoutineSource,
}

impl RuntimeMethodInstance {
    pub fn new(
        name: impl Into<String>,
        params: Vec<HostType>,
        ret: HostType,
        source: RoutineSource,
    ) -> Self {
        let name = name.into();
        Self {
            signature: None,
            llvm_name: format!("{LINK_PREFIX}{name}"),
            name,
            params,
            ret,
            source,
        }
    }

    pub fn with_llvm_signature(mut self, params: Vec<IrType>, ret: IrType) -> Self {
        self.signature = Some(Signature { params, ret });
        self
    }

    pub fn llvm_signature(&self, pointer_bits: u32) -> Signature {
        self.signature.clone().unwrap_or_else(|| Signature {
            params: self.params.iter().map(|p| p.lowered(pointer_bits)).collect(),
            ret: self.ret.lowered(pointer_bits),
        })
    }

    pub fn with_link_name(mut self, llvm_name: impl Into<String>) -> Self {
        self.llvm_name = llvm_name.into();
        self
    }
}

/// Immutable table of runtime routines, keyed by logical name.
#[derive(Debug)]
pub struct RuntimeRegistry {
    methods: BTreeMap<String, RuntimeMethodInstance>,
}

impl RuntimeRegistry {
    pub fn new(methods: Vec<RuntimeMethodInstance>) -> Result<Self> {
        let mut by_name = BTreeMap::new();
        let mut by_symbol: HashMap<String, String> = HashMap::new();
        for method in methods {
            if let Some(first) = by_symbol.get(&method.llvm_name) {
                return Err(Error::DuplicateLinkSymbol {
                    symbol: method.llvm_name.clone(),
                    first: first.clone(),
                    second: method.name.clone(),
                });
            }
            if by_name.contains_key(&method.name) {
                return Err(Error::DuplicateRoutine { name: method.name });
            }
            by_symbol.insert(method.llvm_name.clone(), method.name.clone());
            by_name.insert(method.name.clone(), method);
        }
        Ok(Self { methods: by_name })
    }

    /// The process-wide registry of built-in routines.
    pub fn global() -> Arc<RuntimeRegistry> {
        static GLOBAL: OnceLock<Arc<RuntimeRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| match RuntimeRegistry::new(builtin_methods()) {
                Ok(registry) => Arc::new(registry),
                Err(err) => panic!("built-in runtime registry is inconsistent: {err}"),
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Result<&RuntimeMethodInstance> {
        self.methods.get(name).ok_or_else(|| Error::UnknownRoutine {
            name: name.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuntimeMethodInstance> {
        self.methods.values()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn defines_link_name(&self, symbol: &str) -> bool {
        self.methods.values().any(|m| m.llvm_name == symbol)
    }
}
