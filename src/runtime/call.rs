use super::registry::RuntimeMethodInstance;
use crate::error::{Error, Result};
use crate::llvm::{type_to_string, Builder, IrType, Value};
use crate::target::pointer_width_of;
use llvm_sys::LLVMTypeKind;

/// Emits a call to `method` at the builder's insertion point.
///
/// The routine is declared in the builder's module on first use, lowered for
/// the module's target triple. Pointer arguments passed where the routine
/// takes an integer are converted with a single `ptrtoint`; every other
/// mismatch is an error.
pub fn call_runtime<'m>(
    builder: &Builder<'m>,
    method: &RuntimeMethodInstance,
    args: &[Value<'m>],
) -> Result<Value<'m>> {
    if !builder.is_positioned() {
        return Err(Error::codegen(
            &method.name,
            "builder is not positioned inside a function",
        ));
    }
    let module = builder.module();
    let function = match module.get_function(&method.llvm_name) {
        Some(function) => function,
        None => {
            let signature = method.llvm_signature(pointer_width_of(&module.triple()));
            module.add_function(&method.llvm_name, &signature.params, signature.ret)
        }
    };

    let params = function.param_types();
    if params.len() != args.len() {
        return Err(Error::AbiMismatch {
            routine: method.name.clone(),
            index: params.len().min(args.len()),
            expected: format!("{} arguments", params.len()),
            actual: format!("{} arguments", args.len()),
        });
    }

    let mut converted = Vec::with_capacity(args.len());
    for (index, (&arg, &param)) in args.iter().zip(&params).enumerate() {
        if arg.type_of() == param {
            converted.push(arg);
            continue;
        }
        match (arg.type_kind(), unsafe { IrType::from_llvm(param) }) {
            (LLVMTypeKind::LLVMPointerTypeKind, Some(int @ IrType::Int(_))) => {
                converted.push(builder.ptr_to_int(arg, int, ""));
            }
            _ => {
                return Err(Error::AbiMismatch {
                    routine: method.name.clone(),
                    index,
                    expected: unsafe { type_to_string(param) },
                    actual: arg.type_name(),
                });
            }
        }
    }

    Ok(builder.call(function, &converted, &method.name))
}
