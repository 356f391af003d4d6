use llvm_sys::{
    LLVMTypeKind,
    core::{
        LLVMDoubleTypeInContext, LLVMFloatTypeInContext, LLVMFunctionType, LLVMGetIntTypeWidth,
        LLVMGetTypeKind, LLVMIntTypeInContext, LLVMPointerTypeInContext, LLVMVoidTypeInContext,
    },
    prelude::*,
};
use std::fmt;

/// Context-free description of a low-level type.
///
/// Registries are process-wide while LLVM types belong to one context, so
/// signatures are stored as `IrType` and materialized on demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    Void,
    Int(u32),
    Float,
    Double,
    Ptr,
}

impl IrType {
    pub unsafe fn to_llvm(self, context: LLVMContextRef) -> LLVMTypeRef {
        match self {
            IrType::Void => LLVMVoidTypeInContext(context),
            IrType::Int(bits) => LLVMIntTypeInContext(context, bits),
            IrType::Float => LLVMFloatTypeInContext(context),
            IrType::Double => LLVMDoubleTypeInContext(context),
            IrType::Ptr => LLVMPointerTypeInContext(context, 0),
        }
    }

    pub unsafe fn function_type(
        context: LLVMContextRef,
        params: &[IrType],
        ret: IrType,
    ) -> LLVMTypeRef {
        let mut params: Vec<LLVMTypeRef> = params.iter().map(|p| p.to_llvm(context)).collect();
        LLVMFunctionType(
            ret.to_llvm(context),
            params.as_mut_ptr(),
            params.len() as u32,
            0,
        )
    }

    /// Reads back the description of an LLVM type, if it is one we model.
    pub unsafe fn from_llvm(ty: LLVMTypeRef) -> Option<Self> {
        match LLVMGetTypeKind(ty) {
            LLVMTypeKind::LLVMVoidTypeKind => Some(IrType::Void),
            LLVMTypeKind::LLVMIntegerTypeKind => Some(IrType::Int(LLVMGetIntTypeWidth(ty))),
            LLVMTypeKind::LLVMFloatTypeKind => Some(IrType::Float),
            LLVMTypeKind::LLVMDoubleTypeKind => Some(IrType::Double),
            LLVMTypeKind::LLVMPointerTypeKind => Some(IrType::Ptr),
            _ => None,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Int(bits) => write!(f, "i{bits}"),
            IrType::Float => write!(f, "float"),
            IrType::Double => write!(f, "double"),
            IrType::Ptr => write!(f, "ptr"),
        }
    }
}
