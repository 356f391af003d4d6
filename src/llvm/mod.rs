//! Owning wrappers around the raw `llvm-sys` handles used by the driver.
//!
//! Handles are plain pointers underneath; ownership is expressed by which
//! wrapper disposes what. A [`Module`] keeps its [`Context`] alive, so a
//! context is only disposed after every module created in it is gone.

#![allow(unsafe_op_in_unsafe_fn)]

mod builder;
mod target_machine;
mod types;

pub use builder::Builder;
pub use target_machine::TargetMachine;
pub use types::IrType;

use crate::error::{Error, Result};
use llvm_sys::{
    LLVMDiagnosticSeverity, LLVMLinkage, LLVMOpcode, LLVMTypeKind,
    analysis::{LLVMVerifierFailureAction, LLVMVerifyModule},
    bit_reader::LLVMParseBitcodeInContext2,
    bit_writer::LLVMWriteBitcodeToMemoryBuffer,
    core::{
        LLVMAddFunction, LLVMCloneModule, LLVMContextCreate, LLVMContextDispose,
        LLVMContextSetDiagnosticHandler, LLVMGetDiagInfoDescription, LLVMGetDiagInfoSeverity, LLVMCountParamTypes,
        LLVMCountParams, LLVMCreateMemoryBufferWithMemoryRangeCopy, LLVMDisposeMemoryBuffer,
        LLVMDisposeMessage, LLVMDisposeModule, LLVMGetBufferSize, LLVMGetBufferStart,
        LLVMGetFirstBasicBlock, LLVMGetFirstFunction, LLVMGetFirstGlobal,
        LLVMGetFirstInstruction, LLVMGetFunctionCallConv, LLVMGetInstructionOpcode,
        LLVMGetIntrinsicID, LLVMGetLinkage, LLVMGetModuleIdentifier, LLVMIsAInstruction,
        LLVMGetNamedFunction, LLVMGetNextBasicBlock, LLVMGetNextFunction, LLVMGetNextGlobal,
        LLVMGetNextInstruction, LLVMGetParam, LLVMGetParamTypes, LLVMGetPreviousInstruction,
        LLVMGetReturnType, LLVMGetTarget, LLVMGetTypeKind, LLVMGetValueName2, LLVMGetVersion,
        LLVMGlobalGetValueType, LLVMIsDeclaration, LLVMModuleCreateWithNameInContext,
        LLVMPrintModuleToString, LLVMPrintTypeToString, LLVMSetFunctionCallConv,
        LLVMSetLinkage, LLVMSetTarget, LLVMSetValueName2, LLVMTypeOf,
    },
    error::{LLVMDisposeErrorMessage, LLVMGetErrorMessage},
    linker::LLVMLinkModules2,
    prelude::*,
    transforms::pass_builder::{
        LLVMCreatePassBuilderOptions, LLVMDisposePassBuilderOptions, LLVMRunPasses,
    },
};
use log::{debug, warn};
use std::{
    cell::RefCell,
    ffi::{c_void, CStr, CString},
    fmt,
    marker::PhantomData,
    mem::ManuallyDrop,
    path::Path,
    ptr,
    rc::Rc,
    slice,
};

/// Major version of the LLVM library this crate is linked against.
pub fn llvm_version() -> u32 {
    let (mut major, mut minor, mut patch) = (0, 0, 0);
    unsafe { LLVMGetVersion(&mut major, &mut minor, &mut patch) };
    major
}

pub(crate) fn c_string(text: &str) -> CString {
    // Interior NULs cannot come from LLVM names; strip them instead of failing.
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

/// Takes ownership of an LLVM-allocated message and frees it.
pub(crate) unsafe fn take_message(message: *mut std::os::raw::c_char) -> String {
    if message.is_null() {
        return String::new();
    }
    let text = CStr::from_ptr(message).to_string_lossy().into_owned();
    LLVMDisposeMessage(message);
    text
}

pub(crate) unsafe fn take_error(error: LLVMErrorRef) -> Option<String> {
    if error.is_null() {
        return None;
    }
    let message = LLVMGetErrorMessage(error);
    let text = CStr::from_ptr(message).to_string_lossy().into_owned();
    LLVMDisposeErrorMessage(message);
    Some(text)
}

unsafe fn value_name(value: LLVMValueRef) -> String {
    let mut len = 0;
    let name = LLVMGetValueName2(value, &mut len);
    if name.is_null() {
        return String::new();
    }
    let bytes = slice::from_raw_parts(name as *const u8, len);
    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) unsafe fn type_to_string(ty: LLVMTypeRef) -> String {
    take_message(LLVMPrintTypeToString(ty))
}

type DiagnosticSink = RefCell<Vec<String>>;

// Without a handler LLVM exits the process on error diagnostics.
extern "C" fn collect_diagnostic(info: LLVMDiagnosticInfoRef, sink: *mut c_void) {
    unsafe {
        let text = take_message(LLVMGetDiagInfoDescription(info));
        match LLVMGetDiagInfoSeverity(info) {
            LLVMDiagnosticSeverity::LLVMDSError => {
                debug!("llvm error: {text}");
                if let Some(sink) = (sink as *const DiagnosticSink).as_ref() {
                    sink.borrow_mut().push(text);
                }
            }
            LLVMDiagnosticSeverity::LLVMDSWarning => warn!("llvm: {text}"),
            _ => debug!("llvm: {text}"),
        }
    }
}

struct ContextHandle {
    raw: LLVMContextRef,
    errors: Box<DiagnosticSink>,
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        unsafe {
            if !self.raw.is_null() {
                LLVMContextDispose(self.raw);
            }
        }
    }
}

/// Shared LLVM context. Cloning shares the same underlying context.
#[derive(Clone)]
pub struct Context(Rc<ContextHandle>);

impl Context {
    pub fn new() -> Self {
        let errors = Box::new(DiagnosticSink::default());
        unsafe {
            let raw = LLVMContextCreate();
            let sink = &*errors as *const DiagnosticSink as *mut c_void;
            LLVMContextSetDiagnosticHandler(raw, Some(collect_diagnostic), sink);
            Self(Rc::new(ContextHandle { raw, errors }))
        }
    }

    pub fn as_raw(&self) -> LLVMContextRef {
        self.0.raw
    }

    /// Error diagnostics reported since the last call.
    fn take_errors(&self) -> String {
        std::mem::take(&mut *self.0.errors.borrow_mut()).join("; ")
    }

    /// Drops diagnostics left over from earlier operations.
    fn clear_errors(&self) {
        let stale = self.take_errors();
        if !stale.is_empty() {
            debug!("discarding earlier llvm errors: {stale}");
        }
    }

    pub fn create_module(&self, name: &str) -> Module {
        let name_c = c_string(name);
        let raw = unsafe { LLVMModuleCreateWithNameInContext(name_c.as_ptr(), self.as_raw()) };
        Module::from_raw(self.clone(), raw)
    }

    /// Parses bitcode produced by [`Module::to_bitcode`] into this context.
    pub fn parse_bitcode(&self, name: &str, bytes: &[u8]) -> std::result::Result<Module, String> {
        let name_c = c_string(name);
        unsafe {
            let buffer = LLVMCreateMemoryBufferWithMemoryRangeCopy(
                bytes.as_ptr() as *const _,
                bytes.len(),
                name_c.as_ptr(),
            );
            let mut raw = ptr::null_mut();
            self.clear_errors();
            let failed = LLVMParseBitcodeInContext2(self.as_raw(), buffer, &mut raw);
            LLVMDisposeMemoryBuffer(buffer);
            if failed != 0 || raw.is_null() {
                let reason = self.take_errors();
                return Err(if reason.is_empty() {
                    format!("`{name}` is not a valid bitcode module")
                } else {
                    reason
                });
            }
            Ok(Module::from_raw(self.clone(), raw))
        }
    }

    pub fn read_bitcode(&self, path: &Path) -> Result<Module> {
        let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
        self.parse_bitcode(&path.display().to_string(), &bytes)
            .map_err(|message| Error::Bitcode {
                path: path.to_path_buf(),
                message,
            })
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.as_raw() == other.as_raw()
    }
}

/// Owning handle to an LLVM module.
pub struct Module {
    raw: LLVMModuleRef,
    context: Context,
}

impl Module {
    fn from_raw(context: Context, raw: LLVMModuleRef) -> Self {
        Self { raw, context }
    }

    pub fn as_raw(&self) -> LLVMModuleRef {
        self.raw
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn name(&self) -> String {
        unsafe {
            let mut len = 0;
            let id = LLVMGetModuleIdentifier(self.raw, &mut len);
            if id.is_null() {
                return String::new();
            }
            String::from_utf8_lossy(slice::from_raw_parts(id as *const u8, len)).into_owned()
        }
    }

    pub fn set_triple(&self, triple: &str) {
        let triple_c = c_string(triple);
        unsafe { LLVMSetTarget(self.raw, triple_c.as_ptr()) };
    }

    pub fn triple(&self) -> String {
        unsafe {
            let triple = LLVMGetTarget(self.raw);
            if triple.is_null() {
                return String::new();
            }
            CStr::from_ptr(triple).to_string_lossy().into_owned()
        }
    }

    pub fn get_function(&self, name: &str) -> Option<Function<'_>> {
        let name_c = c_string(name);
        let raw = unsafe { LLVMGetNamedFunction(self.raw, name_c.as_ptr()) };
        (!raw.is_null()).then(|| Function::new(raw))
    }

    /// Declares `name` with external linkage.
    pub fn add_function(&self, name: &str, params: &[IrType], ret: IrType) -> Function<'_> {
        let name_c = c_string(name);
        let function = unsafe {
            let fn_type = IrType::function_type(self.context.as_raw(), params, ret);
            Function::new(LLVMAddFunction(self.raw, name_c.as_ptr(), fn_type))
        };
        function.set_linkage(LLVMLinkage::LLVMExternalLinkage);
        function
    }

    pub fn functions(&self) -> Vec<Function<'_>> {
        let mut out = Vec::new();
        unsafe {
            let mut current = LLVMGetFirstFunction(self.raw);
            while !current.is_null() {
                out.push(Function::new(current));
                current = LLVMGetNextFunction(current);
            }
        }
        out
    }

    /// Names of global variables, declared or defined.
    pub fn global_names(&self) -> Vec<String> {
        self.globals().into_iter().map(|g| unsafe { value_name(g) }).collect()
    }

    fn globals(&self) -> Vec<LLVMValueRef> {
        let mut out = Vec::new();
        unsafe {
            let mut current = LLVMGetFirstGlobal(self.raw);
            while !current.is_null() {
                out.push(current);
                current = LLVMGetNextGlobal(current);
            }
        }
        out
    }

    /// Names of everything this module defines (functions and globals with a body/initializer).
    pub fn defined_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .functions()
            .into_iter()
            .filter(|f| !f.is_declaration())
            .map(|f| f.name())
            .collect();
        unsafe {
            for global in self.globals() {
                if LLVMIsDeclaration(global) == 0 {
                    names.push(value_name(global));
                }
            }
        }
        names
    }

    /// Gives internal linkage to every definition not named in `exports`.
    pub fn internalize(&self, exports: &[String]) {
        let keep = |name: &str| exports.iter().any(|e| e == name);
        for function in self.functions() {
            if function.is_declaration() || function.is_intrinsic() || keep(&function.name()) {
                continue;
            }
            function.set_linkage(LLVMLinkage::LLVMInternalLinkage);
        }
        unsafe {
            for global in self.globals() {
                if LLVMIsDeclaration(global) != 0 || keep(&value_name(global)) {
                    continue;
                }
                if LLVMGetLinkage(global) == LLVMLinkage::LLVMExternalLinkage {
                    LLVMSetLinkage(global, LLVMLinkage::LLVMInternalLinkage);
                }
            }
        }
    }

    /// Links `other` into this module. The source module is consumed by LLVM.
    pub fn link_in(&mut self, other: Module) -> Result<()> {
        if self.context != other.context {
            return Err(Error::ContextMismatch {
                left: self.name(),
                right: other.name(),
            });
        }
        let source_name = other.name();
        let other = ManuallyDrop::new(other);
        self.context.clear_errors();
        let failed = unsafe { LLVMLinkModules2(self.raw, other.raw) };
        // LLVMLinkModules2 destroys the source module; only the context handle is released here.
        drop(unsafe { ptr::read(&other.context) });
        if failed != 0 {
            let reason = self.context.take_errors();
            return Err(Error::Link {
                module: source_name,
                message: if reason.is_empty() {
                    format!("could not link into `{}`", self.name())
                } else {
                    reason
                },
            });
        }
        Ok(())
    }

    pub fn run_passes(&self, pipeline: &str, machine: Option<&TargetMachine>) -> Result<()> {
        let pipeline_c = c_string(pipeline);
        unsafe {
            let options = LLVMCreatePassBuilderOptions();
            let tm = machine.map_or(ptr::null_mut(), |m| m.as_raw());
            let error = LLVMRunPasses(self.raw, pipeline_c.as_ptr(), tm, options);
            LLVMDisposePassBuilderOptions(options);
            match take_error(error) {
                None => Ok(()),
                Some(message) => Err(Error::Passes {
                    pipeline: pipeline.to_string(),
                    message,
                }),
            }
        }
    }

    pub fn verify(&self) -> Result<()> {
        unsafe {
            let mut message = ptr::null_mut();
            let broken = LLVMVerifyModule(
                self.raw,
                LLVMVerifierFailureAction::LLVMReturnStatusAction,
                &mut message,
            );
            let text = take_message(message);
            if broken != 0 {
                return Err(Error::Verify {
                    module: self.name(),
                    message: text,
                });
            }
        }
        Ok(())
    }

    pub fn to_bitcode(&self) -> Vec<u8> {
        unsafe {
            let buffer = LLVMWriteBitcodeToMemoryBuffer(self.raw);
            let start = LLVMGetBufferStart(buffer) as *const u8;
            let bytes = slice::from_raw_parts(start, LLVMGetBufferSize(buffer)).to_vec();
            LLVMDisposeMemoryBuffer(buffer);
            bytes
        }
    }

    pub fn print_to_string(&self) -> String {
        unsafe { take_message(LLVMPrintModuleToString(self.raw)) }
    }
}

impl Clone for Module {
    fn clone(&self) -> Self {
        let raw = unsafe { LLVMCloneModule(self.raw) };
        Self::from_raw(self.context.clone(), raw)
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        unsafe {
            if !self.raw.is_null() {
                LLVMDisposeModule(self.raw);
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("name", &self.name()).finish()
    }
}

/// A function inside a [`Module`]; cannot outlive it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Function<'m> {
    raw: LLVMValueRef,
    _module: PhantomData<&'m Module>,
}

impl<'m> Function<'m> {
    fn new(raw: LLVMValueRef) -> Self {
        Self {
            raw,
            _module: PhantomData,
        }
    }

    pub fn as_raw(&self) -> LLVMValueRef {
        self.raw
    }

    pub fn name(&self) -> String {
        unsafe { value_name(self.raw) }
    }

    pub fn set_name(&self, name: &str) {
        unsafe { LLVMSetValueName2(self.raw, name.as_ptr() as *const _, name.len()) };
    }

    pub fn is_declaration(&self) -> bool {
        unsafe { LLVMIsDeclaration(self.raw) != 0 }
    }

    pub fn is_intrinsic(&self) -> bool {
        unsafe { LLVMGetIntrinsicID(self.raw) != 0 }
    }

    pub fn linkage(&self) -> LLVMLinkage {
        unsafe { LLVMGetLinkage(self.raw) }
    }

    pub fn set_linkage(&self, linkage: LLVMLinkage) {
        unsafe { LLVMSetLinkage(self.raw, linkage) };
    }

    pub fn call_conv(&self) -> u32 {
        unsafe { LLVMGetFunctionCallConv(self.raw) }
    }

    pub fn set_call_conv(&self, conv: u32) {
        unsafe { LLVMSetFunctionCallConv(self.raw, conv) };
    }

    pub fn param(&self, index: u32) -> Option<Value<'m>> {
        unsafe {
            if index >= LLVMCountParams(self.raw) {
                return None;
            }
            Some(Value::new(LLVMGetParam(self.raw, index)))
        }
    }

    /// The function's own type, as opposed to the pointer type of the global.
    pub fn fn_type(&self) -> LLVMTypeRef {
        unsafe { LLVMGlobalGetValueType(self.raw) }
    }

    pub fn param_types(&self) -> Vec<LLVMTypeRef> {
        unsafe {
            let fn_type = self.fn_type();
            let count = LLVMCountParamTypes(fn_type) as usize;
            let mut params = vec![ptr::null_mut(); count];
            LLVMGetParamTypes(fn_type, params.as_mut_ptr());
            params
        }
    }

    pub fn return_type(&self) -> LLVMTypeRef {
        unsafe { LLVMGetReturnType(self.fn_type()) }
    }

    pub fn instructions(&self) -> Vec<Value<'m>> {
        let mut out = Vec::new();
        unsafe {
            let mut block = LLVMGetFirstBasicBlock(self.raw);
            while !block.is_null() {
                let mut inst = LLVMGetFirstInstruction(block);
                while !inst.is_null() {
                    out.push(Value::new(inst));
                    inst = LLVMGetNextInstruction(inst);
                }
                block = LLVMGetNextBasicBlock(block);
            }
        }
        out
    }
}

/// A basic block created by a [`Builder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BasicBlock<'m> {
    raw: LLVMBasicBlockRef,
    _module: PhantomData<&'m Module>,
}

impl BasicBlock<'_> {
    fn new(raw: LLVMBasicBlockRef) -> Self {
        Self {
            raw,
            _module: PhantomData,
        }
    }

    pub fn as_raw(&self) -> LLVMBasicBlockRef {
        self.raw
    }
}

/// An SSA value: an instruction, argument or constant used in a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Value<'m> {
    raw: LLVMValueRef,
    _module: PhantomData<&'m Module>,
}

impl<'m> Value<'m> {
    fn new(raw: LLVMValueRef) -> Self {
        Self {
            raw,
            _module: PhantomData,
        }
    }

    pub fn as_raw(&self) -> LLVMValueRef {
        self.raw
    }

    pub fn type_of(&self) -> LLVMTypeRef {
        unsafe { LLVMTypeOf(self.raw) }
    }

    pub fn type_kind(&self) -> LLVMTypeKind {
        unsafe { LLVMGetTypeKind(self.type_of()) }
    }

    pub fn type_name(&self) -> String {
        unsafe { type_to_string(self.type_of()) }
    }

    pub fn is_instruction(&self) -> bool {
        unsafe { !LLVMIsAInstruction(self.raw).is_null() }
    }

    /// Opcode when this value is an instruction.
    pub fn opcode(&self) -> Option<LLVMOpcode> {
        self.is_instruction()
            .then(|| unsafe { LLVMGetInstructionOpcode(self.raw) })
    }

    pub fn previous_instruction(&self) -> Option<Value<'m>> {
        if !self.is_instruction() {
            return None;
        }
        let prev = unsafe { LLVMGetPreviousInstruction(self.raw) };
        (!prev.is_null()).then(|| Value::new(prev))
    }
}
