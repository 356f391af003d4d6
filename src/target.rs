use std::env;

pub const NVPTX64_TRIPLE: &str = "nvptx64-nvidia-cuda";
pub const AMDGCN_TRIPLE: &str = "amdgcn-amd-amdhsa";

const PTX_KERNEL_CC: u32 = 71;
const AMDGPU_KERNEL_CC: u32 = 91;

/// Device configuration a job is compiled for. Every field feeds [`Target::slug`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub triple: String,
    pub cpu: String,
    pub features: String,
    pub debug_info: bool,
}

impl Target {
    pub fn new(triple: impl Into<String>, cpu: impl Into<String>) -> Self {
        Self {
            triple: triple.into(),
            cpu: cpu.into(),
            features: String::new(),
            debug_info: false,
        }
    }

    pub fn nvptx(capability: &str) -> Self {
        Self::new(NVPTX64_TRIPLE, capability)
    }

    pub fn amdgcn(arch: &str) -> Self {
        Self::new(AMDGCN_TRIPLE, arch)
    }

    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        self.features = features.into();
        self
    }

    pub fn with_debug_info(mut self, debug_info: bool) -> Self {
        self.debug_info = debug_info;
        self
    }

    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.trim().is_empty());
        let triple = var("KERNELC_TARGET").unwrap_or_else(|| NVPTX64_TRIPLE.to_string());
        let cpu = var("KERNELC_CPU").unwrap_or_else(|| default_cpu(&triple).to_string());
        Self::new(triple, cpu)
            .with_features(var("KERNELC_FEATURES").unwrap_or_default())
            .with_debug_info(var("KERNELC_DEBUG").is_some_and(|v| v != "0"))
    }

    pub fn arch(&self) -> &str {
        self.triple.split('-').next().unwrap_or_default()
    }

    pub fn is_nvptx(&self) -> bool {
        self.arch().starts_with("nvptx")
    }

    pub fn is_amdgcn(&self) -> bool {
        self.arch() == "amdgcn"
    }

    pub fn pointer_width_bits(&self) -> u32 {
        pointer_width_of(&self.triple)
    }

    /// Calling convention that marks an entry point as a device kernel.
    pub fn kernel_calling_conv(&self) -> Option<u32> {
        if self.is_nvptx() {
            Some(PTX_KERNEL_CC)
        } else if self.is_amdgcn() {
            Some(AMDGPU_KERNEL_CC)
        } else {
            None
        }
    }

    /// Deterministic cache key covering every axis that changes generated code.
    pub fn slug(&self) -> String {
        let mut slug = format!("{}-{}", sanitize_name(&self.triple), sanitize_name(&self.cpu));
        let features: Vec<String> = self
            .features
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| match f.strip_prefix('-') {
                Some(rest) => format!("no{}", sanitize_name(rest)),
                None => sanitize_name(f.trim_start_matches('+')),
            })
            .collect();
        if !features.is_empty() {
            slug.push('-');
            slug.push_str(&features.join("_"));
        }
        if self.debug_info {
            slug.push_str("-dbg");
        }
        slug
    }
}

impl Default for Target {
    fn default() -> Self {
        Self::nvptx(default_cpu(NVPTX64_TRIPLE))
    }
}

fn default_cpu(triple: &str) -> &'static str {
    if triple.starts_with("nvptx") {
        "sm_70"
    } else if triple.starts_with("amdgcn") {
        "gfx900"
    } else {
        "generic"
    }
}

/// Pointer width implied by the architecture component of `triple`.
pub fn pointer_width_of(triple: &str) -> u32 {
    match triple.split('-').next().unwrap_or_default() {
        "nvptx" | "riscv32" | "wasm32" | "arm" | "i686" => 32,
        _ => 64,
    }
}

pub fn sanitize_name(name: &str) -> String {
    let mut out = String::new();
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            out.push(ch);
        } else {
            out.push('-');
        }
    }
    if out.is_empty() {
        "none".into()
    } else {
        out
    }
}
