use super::{c_string, BasicBlock, Function, IrType, Module, Value};
use llvm_sys::{
    LLVMIntPredicate,
    core::{
        LLVMAppendBasicBlockInContext, LLVMBuildCall2, LLVMBuildCondBr, LLVMBuildICmp,
        LLVMBuildPtrToInt, LLVMBuildRet, LLVMBuildRetVoid, LLVMBuildStore, LLVMBuildUnreachable,
        LLVMConstInt, LLVMConstNull, LLVMCreateBuilderInContext, LLVMDisposeBuilder,
        LLVMGetBasicBlockParent, LLVMGetGlobalParent, LLVMGetInsertBlock,
        LLVMPositionBuilderAtEnd,
    },
    prelude::*,
};

/// Instruction builder emitting into one module.
pub struct Builder<'m> {
    raw: LLVMBuilderRef,
    module: &'m Module,
}

impl<'m> Builder<'m> {
    pub fn new(module: &'m Module) -> Self {
        let raw = unsafe { LLVMCreateBuilderInContext(module.context().as_raw()) };
        Self { raw, module }
    }

    pub fn as_raw(&self) -> LLVMBuilderRef {
        self.raw
    }

    pub fn module(&self) -> &'m Module {
        self.module
    }

    pub fn append_block(&self, function: Function<'m>, name: &str) -> BasicBlock<'m> {
        let name_c = c_string(name);
        unsafe {
            BasicBlock::new(LLVMAppendBasicBlockInContext(
                self.module.context().as_raw(),
                function.as_raw(),
                name_c.as_ptr(),
            ))
        }
    }

    pub fn position_at_end(&self, block: BasicBlock<'m>) {
        unsafe { LLVMPositionBuilderAtEnd(self.raw, block.as_raw()) };
    }

    /// The function containing the current insertion point.
    pub fn current_function(&self) -> Option<Function<'m>> {
        unsafe {
            let block = LLVMGetInsertBlock(self.raw);
            if block.is_null() {
                return None;
            }
            let parent = LLVMGetBasicBlockParent(block);
            (!parent.is_null()).then(|| Function::new(parent))
        }
    }

    /// Whether the insertion point lies inside a function of this builder's module.
    pub fn is_positioned(&self) -> bool {
        self.current_function()
            .map(|f| self.module.as_raw() == unsafe { LLVMGetGlobalParent(f.as_raw()) })
            .unwrap_or(false)
    }

    pub fn call(&self, function: Function<'m>, args: &[Value<'m>], name: &str) -> Value<'m> {
        let mut raw_args: Vec<LLVMValueRef> = args.iter().map(|a| a.as_raw()).collect();
        // Calls returning void must stay unnamed.
        let name_c = if unsafe { IrType::from_llvm(function.return_type()) } == Some(IrType::Void) {
            c_string("")
        } else {
            c_string(name)
        };
        unsafe {
            Value::new(LLVMBuildCall2(
                self.raw,
                function.fn_type(),
                function.as_raw(),
                raw_args.as_mut_ptr(),
                raw_args.len() as u32,
                name_c.as_ptr(),
            ))
        }
    }

    pub fn ptr_to_int(&self, value: Value<'m>, ty: IrType, name: &str) -> Value<'m> {
        let name_c = c_string(name);
        unsafe {
            let ty = ty.to_llvm(self.module.context().as_raw());
            Value::new(LLVMBuildPtrToInt(self.raw, value.as_raw(), ty, name_c.as_ptr()))
        }
    }

    pub fn is_null(&self, value: Value<'m>, name: &str) -> Value<'m> {
        let name_c = c_string(name);
        unsafe {
            let null = LLVMConstNull(value.type_of());
            Value::new(LLVMBuildICmp(
                self.raw,
                LLVMIntPredicate::LLVMIntEQ,
                value.as_raw(),
                null,
                name_c.as_ptr(),
            ))
        }
    }

    pub fn cond_br(&self, cond: Value<'m>, then_block: BasicBlock<'m>, else_block: BasicBlock<'m>) {
        unsafe {
            LLVMBuildCondBr(self.raw, cond.as_raw(), then_block.as_raw(), else_block.as_raw())
        };
    }

    pub fn store(&self, value: Value<'m>, ptr: Value<'m>) {
        unsafe { LLVMBuildStore(self.raw, value.as_raw(), ptr.as_raw()) };
    }

    pub fn ret(&self, value: Value<'m>) {
        unsafe { LLVMBuildRet(self.raw, value.as_raw()) };
    }

    pub fn ret_void(&self) {
        unsafe { LLVMBuildRetVoid(self.raw) };
    }

    pub fn unreachable(&self) {
        unsafe { LLVMBuildUnreachable(self.raw) };
    }

    pub fn const_int(&self, ty: IrType, value: u64) -> Value<'m> {
        unsafe {
            Value::new(LLVMConstInt(
                ty.to_llvm(self.module.context().as_raw()),
                value,
                0,
            ))
        }
    }
}

impl Drop for Builder<'_> {
    fn drop(&mut self) {
        unsafe {
            if !self.raw.is_null() {
                LLVMDisposeBuilder(self.raw);
            }
        }
    }
}
