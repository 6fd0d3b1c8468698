//! Small instruction-sequence constructors used by the method transformer
//!
//! Everything here allocates into the method's instruction arena without
//! placing anything; the caller splices the returned handles.

use crate::code::{ConstantData, InsnId, Instruction, InvokeType, MethodCode, MethodRef};
use crate::jvm::{BaseType, BinaryName, FieldType, MethodDescriptor, RefType, UnqualifiedName};
use crate::util::Width;

/// Push an int constant with the shortest encoding
pub(crate) fn push_int(code: &mut MethodCode, value: i32) -> InsnId {
    let insn = match value {
        -1 => Instruction::IConstM1,
        0 => Instruction::IConst0,
        1 => Instruction::IConst1,
        2 => Instruction::IConst2,
        3 => Instruction::IConst3,
        4 => Instruction::IConst4,
        5 => Instruction::IConst5,
        -128..=127 => Instruction::BiPush(value as i8),
        -32768..=32767 => Instruction::SiPush(value as i16),
        _ => Instruction::Ldc(ConstantData::Integer(value)),
    };
    code.alloc(insn)
}

/// Push the default value of a type (zero or null)
pub(crate) fn push_default(code: &mut MethodCode, value_type: &FieldType) -> InsnId {
    let insn = match value_type {
        FieldType::Base(BaseType::Float) => Instruction::FConst0,
        FieldType::Base(BaseType::Long) => Instruction::LConst0,
        FieldType::Base(BaseType::Double) => Instruction::DConst0,
        FieldType::Base(_) => Instruction::IConst0,
        FieldType::Ref(_) => Instruction::AConstNull,
    };
    code.alloc(insn)
}

/// Typed local load
pub(crate) fn load(code: &mut MethodCode, value_type: &FieldType, index: u16) -> InsnId {
    let insn = match value_type {
        FieldType::Base(BaseType::Float) => Instruction::FLoad(index),
        FieldType::Base(BaseType::Long) => Instruction::LLoad(index),
        FieldType::Base(BaseType::Double) => Instruction::DLoad(index),
        FieldType::Base(_) => Instruction::ILoad(index),
        FieldType::Ref(_) => Instruction::ALoad(index),
    };
    code.alloc(insn)
}

/// Typed local store
pub(crate) fn store(code: &mut MethodCode, value_type: &FieldType, index: u16) -> InsnId {
    let insn = match value_type {
        FieldType::Base(BaseType::Float) => Instruction::FStore(index),
        FieldType::Base(BaseType::Long) => Instruction::LStore(index),
        FieldType::Base(BaseType::Double) => Instruction::DStore(index),
        FieldType::Base(_) => Instruction::IStore(index),
        FieldType::Ref(_) => Instruction::AStore(index),
    };
    code.alloc(insn)
}

/// Pop a value of the given type off the stack
pub(crate) fn pop_value(code: &mut MethodCode, value_type: &FieldType) -> InsnId {
    if value_type.width() == 2 {
        code.alloc(Instruction::Pop2)
    } else {
        code.alloc(Instruction::Pop)
    }
}

/// Push an int constant and store it into a local
pub(crate) fn push_and_store_int(code: &mut MethodCode, value: i32, index: u16) -> Vec<InsnId> {
    vec![push_int(code, value), code.alloc(Instruction::IStore(index))]
}

/// Return a default value of the method's return type
pub(crate) fn return_any(code: &mut MethodCode, return_type: Option<&FieldType>) -> Vec<InsnId> {
    match return_type {
        None => vec![code.alloc(Instruction::Return)],
        Some(value_type) => {
            let default = push_default(code, value_type);
            let return_insn = match value_type {
                FieldType::Base(BaseType::Float) => Instruction::FReturn,
                FieldType::Base(BaseType::Long) => Instruction::LReturn,
                FieldType::Base(BaseType::Double) => Instruction::DReturn,
                FieldType::Base(_) => Instruction::IReturn,
                FieldType::Ref(_) => Instruction::AReturn,
            };
            vec![default, code.alloc(return_insn)]
        }
    }
}

/// Bring a record reference under the value it has to store:
/// `[.., value, record] -> [.., record, value]`
pub(crate) fn swap_under(code: &mut MethodCode, value_type: &FieldType) -> Vec<InsnId> {
    if value_type.width() == 2 {
        vec![
            code.alloc(Instruction::DupX2),
            code.alloc(Instruction::Pop),
        ]
    } else {
        vec![code.alloc(Instruction::Swap)]
    }
}

/// Construct a record instance: `new` + `dup` + no-arg `<init>`
pub(crate) fn construct(code: &mut MethodCode, class: &BinaryName) -> Vec<InsnId> {
    vec![
        code.alloc(Instruction::New(class.clone())),
        code.alloc(Instruction::Dup),
        code.alloc(Instruction::Invoke(MethodRef {
            invoke_type: InvokeType::Special,
            owner: class.clone(),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
        })),
    ]
}

pub(crate) fn get_field(
    code: &mut MethodCode,
    owner: &BinaryName,
    name: UnqualifiedName,
    descriptor: FieldType,
) -> InsnId {
    code.alloc(Instruction::GetField(crate::code::FieldRef {
        owner: owner.clone(),
        name,
        descriptor,
    }))
}

pub(crate) fn put_field(
    code: &mut MethodCode,
    owner: &BinaryName,
    name: UnqualifiedName,
    descriptor: FieldType,
) -> InsnId {
    code.alloc(Instruction::PutField(crate::code::FieldRef {
        owner: owner.clone(),
        name,
        descriptor,
    }))
}

// The static runtime entry points rewritten methods link against

pub(crate) fn invoke_dispatch_target(code: &mut MethodCode) -> InsnId {
    invoke_runtime(
        code,
        UnqualifiedName::DISPATCHTARGET,
        MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::int()),
        },
    )
}

pub(crate) fn invoke_is_suspending(code: &mut MethodCode) -> InsnId {
    invoke_runtime(
        code,
        UnqualifiedName::ISSUSPENDING,
        MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::boolean()),
        },
    )
}

pub(crate) fn invoke_pop_frame(code: &mut MethodCode) -> InsnId {
    invoke_runtime(
        code,
        UnqualifiedName::POPFRAME,
        MethodDescriptor {
            parameters: vec![],
            return_type: Some(FieldType::object(BinaryName::SAVEDFRAME)),
        },
    )
}

pub(crate) fn invoke_push_frame(code: &mut MethodCode) -> InsnId {
    invoke_runtime(
        code,
        UnqualifiedName::PUSHFRAME,
        MethodDescriptor {
            parameters: vec![
                FieldType::object(BinaryName::SAVEDFRAME),
                FieldType::int(),
                FieldType::object(BinaryName::OBJECT),
            ],
            return_type: None,
        },
    )
}

fn invoke_runtime(
    code: &mut MethodCode,
    name: UnqualifiedName,
    descriptor: MethodDescriptor,
) -> InsnId {
    code.alloc(Instruction::Invoke(MethodRef {
        invoke_type: InvokeType::Static,
        owner: BinaryName::CONTINUATION,
        name,
        descriptor,
    }))
}

/// Check-cast to a record class
pub(crate) fn checkcast(code: &mut MethodCode, class: &BinaryName) -> InsnId {
    code.alloc(Instruction::CheckCast(RefType::Object(class.clone())))
}
