use super::{c_string, take_message, Module};
use crate::error::{Error, Result};
use crate::target::Target;
use llvm_sys::{
    core::{LLVMDisposeMemoryBuffer, LLVMGetBufferSize, LLVMGetBufferStart},
    target::{
        LLVMDisposeTargetData, LLVMSetModuleDataLayout, LLVM_InitializeAllAsmPrinters,
        LLVM_InitializeAllTargetInfos, LLVM_InitializeAllTargetMCs, LLVM_InitializeAllTargets,
    },
    target_machine::{
        LLVMCodeGenFileType, LLVMCodeGenOptLevel, LLVMCodeModel, LLVMCreateTargetDataLayout,
        LLVMCreateTargetMachine, LLVMDisposeTargetMachine, LLVMGetTargetFromTriple,
        LLVMRelocMode, LLVMTargetMachineEmitToMemoryBuffer, LLVMTargetMachineRef,
    },
};
use std::{ptr, slice, sync::Once};

static INIT_TARGETS: Once = Once::new();

fn initialize_targets() {
    INIT_TARGETS.call_once(|| unsafe {
        LLVM_InitializeAllTargetInfos();
        LLVM_InitializeAllTargets();
        LLVM_InitializeAllTargetMCs();
        LLVM_InitializeAllAsmPrinters();
    });
}

pub struct TargetMachine {
    raw: LLVMTargetMachineRef,
}

impl TargetMachine {
    /// Creates a machine for `target`; fails when this LLVM build lacks the backend.
    pub fn new(target: &Target) -> Result<Self> {
        initialize_targets();
        let triple_c = c_string(&target.triple);
        let cpu_c = c_string(&target.cpu);
        let features_c = c_string(&target.features);
        unsafe {
            let mut llvm_target = ptr::null_mut();
            let mut message = ptr::null_mut();
            if LLVMGetTargetFromTriple(triple_c.as_ptr(), &mut llvm_target, &mut message) != 0 {
                return Err(Error::Target {
                    triple: target.triple.clone(),
                    message: take_message(message),
                });
            }
            let raw = LLVMCreateTargetMachine(
                llvm_target,
                triple_c.as_ptr(),
                cpu_c.as_ptr(),
                features_c.as_ptr(),
                LLVMCodeGenOptLevel::LLVMCodeGenLevelDefault,
                LLVMRelocMode::LLVMRelocDefault,
                LLVMCodeModel::LLVMCodeModelDefault,
            );
            if raw.is_null() {
                return Err(Error::Target {
                    triple: target.triple.clone(),
                    message: "could not create target machine".into(),
                });
            }
            Ok(Self { raw })
        }
    }

    pub fn as_raw(&self) -> LLVMTargetMachineRef {
        self.raw
    }

    pub fn apply_data_layout(&self, module: &Module) {
        unsafe {
            let layout = LLVMCreateTargetDataLayout(self.raw);
            LLVMSetModuleDataLayout(module.as_raw(), layout);
            LLVMDisposeTargetData(layout);
        }
    }

    pub fn emit_assembly(&self, module: &Module) -> Result<String> {
        unsafe {
            let mut message = ptr::null_mut();
            let mut buffer = ptr::null_mut();
            let failed = LLVMTargetMachineEmitToMemoryBuffer(
                self.raw,
                module.as_raw(),
                LLVMCodeGenFileType::LLVMAssemblyFile,
                &mut message,
                &mut buffer,
            );
            if failed != 0 {
                return Err(Error::Codegen {
                    name: module.name(),
                    message: take_message(message),
                });
            }
            let start = LLVMGetBufferStart(buffer) as *const u8;
            let text = String::from_utf8_lossy(slice::from_raw_parts(
                start,
                LLVMGetBufferSize(buffer),
            ))
            .into_owned();
            LLVMDisposeMemoryBuffer(buffer);
            Ok(text)
        }
    }
}

impl Drop for TargetMachine {
    fn drop(&mut self) {
        unsafe {
            if !self.raw.is_null() {
                LLVMDisposeTargetMachine(self.raw);
            }
        }
    }
}
