use super::Error;
use crate::analyzer::{Frame, FrameItem};
use crate::code::{Instruction, InvokeType, MethodRef};
use crate::jvm::{BinaryName, FieldType, MethodDescriptor, Name, ParseDescriptor, RenderDescriptor};
use crate::util::Width;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One live value at a pointcut
///
/// Storable values get a concrete field type and a slot in the generated
/// record; `Top`, `Null`, and uninitialized references don't (they need no
/// storage, or cannot safely be persisted).
#[derive(Clone, Debug)]
pub struct PointcutStructureItem {
    pub frame_item: FrameItem,
    pub value_type: Option<FieldType>,

    /// Index of the record field (`_0`, `_1`, ...) in canonical sorted order
    pub field: Option<usize>,
}

impl PointcutStructureItem {
    fn unstorable(frame_item: FrameItem) -> PointcutStructureItem {
        PointcutStructureItem {
            frame_item,
            value_type: None,
            field: None,
        }
    }

    fn storable(frame_item: FrameItem, value_type: FieldType) -> PointcutStructureItem {
        PointcutStructureItem {
            frame_item,
            value_type: Some(value_type),
            field: None,
        }
    }
}

/// Everything the transformer needs to save and restore one call site
///
/// Two call sites with the same `sorted_types` share one generated record
/// class: the class name is derived from a content hash of the sorted
/// descriptors, so the number of auxiliary classes is bounded by distinct
/// live-type signatures, not by call-site count.
#[derive(Debug)]
pub struct PointcutFrameStructure {
    /// Live locals by index
    pub locals: BTreeMap<u16, PointcutStructureItem>,

    /// Live stack items below the call's own arguments, bottom first
    pub stack: Vec<PointcutStructureItem>,

    /// Receiver of the call, for non-static non-reflective invocations
    pub receiver: Option<PointcutStructureItem>,

    /// Value types of all storable items, in canonical descriptor order
    pub sorted_types: Vec<FieldType>,

    /// Generated record class for this live-type signature
    pub record_class: BinaryName,

    /// Types to refill as dummy call arguments when resuming
    pub argument_types: Vec<FieldType>,

    pub method_static: bool,
    pub return_type: Option<FieldType>,
    pub reflective: bool,
}

impl PointcutFrameStructure {
    /// The record field index carrying the receiver, if any
    pub fn receiver_field(&self) -> Option<usize> {
        self.receiver.as_ref().and_then(|item| item.field)
    }
}

/// Not persistable: dead slots, nulls (rebuilt as `aconst_null`), and
/// references to unconstructed objects (rebuilt by re-running `new`)
fn is_storable(item: &FrameItem) -> bool {
    !matches!(item, FrameItem::Top | FrameItem::Null) && !item.is_uninitialized_reference()
}

/// Partition a pointcut's entry frame into call arguments and live state
pub fn build_structure(
    invocation_frame: &Frame,
    call: &Instruction,
    method_static: bool,
) -> Result<PointcutFrameStructure, Error> {
    let descriptor = invocation_descriptor(call)?;
    let invocation_static = is_invocation_static(call)?;
    let reflective = is_reflective_invocation(call);

    let mut argument_types = vec![];
    if reflective {
        // The invoked-method handle rides along as a synthetic extra argument
        // so a generic reflective dispatch can itself be resumed
        argument_types.push(FieldType::object(BinaryName::REFLECT_METHOD));
    }
    let mut argument_length = 0;
    for parameter in &descriptor.parameters {
        argument_length += parameter.width();
        argument_types.push(parameter.clone());
    }
    if !invocation_static {
        argument_length += 1;
    }

    let mut locals: BTreeMap<u16, PointcutStructureItem> = BTreeMap::new();
    let mut stack: Vec<PointcutStructureItem> = vec![];
    let mut receiver: Option<PointcutStructureItem> = None;

    // Which storable slots exist, in discovery order
    enum SlotRef {
        Local(u16),
        Stack(usize),
        Receiver,
    }
    let mut storable_slots: Vec<(SlotRef, FieldType)> = vec![];

    for (index, frame_item) in invocation_frame.locals.iter().enumerate() {
        let index = index as u16;
        if !is_storable(frame_item) {
            if frame_item != &FrameItem::Top {
                locals.insert(index, PointcutStructureItem::unstorable(FrameItem::Null));
            }
        } else if frame_item != &FrameItem::Top && frame_item.is_starting_word() {
            let value_type = frame_item.field_type().map_err(Error::Analyze)?;
            storable_slots.push((SlotRef::Local(index), value_type.clone()));
            locals.insert(
                index,
                PointcutStructureItem::storable(frame_item.clone(), value_type),
            );
        }
    }

    if invocation_frame.stack.len() < argument_length {
        return Err(Error::Internal("call arguments exceed the operand stack"));
    }
    let receiver_stack_index = invocation_frame.stack.len() - argument_length;
    for frame_item in &invocation_frame.stack[..receiver_stack_index] {
        if !is_storable(frame_item) {
            stack.push(PointcutStructureItem::unstorable(frame_item.clone()));
        } else if frame_item.is_starting_word() {
            let value_type = frame_item.field_type().map_err(Error::Analyze)?;
            storable_slots.push((SlotRef::Stack(stack.len()), value_type.clone()));
            stack.push(PointcutStructureItem::storable(
                frame_item.clone(),
                value_type,
            ));
        }
    }

    if !invocation_static && !reflective {
        let frame_item = &invocation_frame.stack[receiver_stack_index];
        if !frame_item.is_initialized_reference() {
            return Err(Error::ReceiverNotInitialized(frame_item.clone()));
        }
        let value_type = frame_item.field_type().map_err(Error::Analyze)?;
        storable_slots.push((SlotRef::Receiver, value_type.clone()));
        receiver = Some(PointcutStructureItem::storable(
            frame_item.clone(),
            value_type,
        ));
    }

    // Canonical order: stable sort by rendered descriptor
    storable_slots.sort_by(|(_, type1), (_, type2)| type1.render().cmp(&type2.render()));
    let sorted_types: Vec<FieldType> = storable_slots
        .iter()
        .map(|(_, value_type)| value_type.clone())
        .collect();

    for (field, (slot, _)) in storable_slots.iter().enumerate() {
        let item = match slot {
            SlotRef::Local(index) => locals.get_mut(index),
            SlotRef::Stack(index) => stack.get_mut(*index),
            SlotRef::Receiver => receiver.as_mut(),
        };
        item.expect("storable slot refers to a recorded item").field = Some(field);
    }

    Ok(PointcutFrameStructure {
        locals,
        stack,
        receiver,
        record_class: record_class_name(&sorted_types),
        sorted_types,
        argument_types,
        method_static,
        return_type: descriptor.return_type.clone(),
        reflective,
    })
}

/// Record class for a live-type signature: the runtime base class when
/// nothing needs storage, else a subclass named by a content hash of the
/// sorted descriptors
pub fn record_class_name(sorted_types: &[FieldType]) -> BinaryName {
    if sorted_types.is_empty() {
        return BinaryName::SAVEDFRAME;
    }
    let mut hasher = Sha256::new();
    for value_type in sorted_types {
        hasher.update(value_type.render().as_bytes());
    }
    let digest = hasher.finalize();
    let mut hash_hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hash_hex.push_str(&format!("{:02x}", byte));
    }
    BinaryName::saved_frame_record(&hash_hex)
}

fn invocation_descriptor(call: &Instruction) -> Result<MethodDescriptor, Error> {
    match call {
        Instruction::Invoke(method) => Ok(method.descriptor.clone()),
        Instruction::InvokeDynamic(descriptor) => Ok(descriptor.clone()),
        _ => Err(Error::Internal("pointcut is not an invocation instruction")),
    }
}

fn is_invocation_static(call: &Instruction) -> Result<bool, Error> {
    match call {
        Instruction::Invoke(method) => Ok(method.is_static()),
        Instruction::InvokeDynamic(_) => Ok(true),
        _ => Err(Error::Internal("pointcut is not an invocation instruction")),
    }
}

/// Is this `java.lang.reflect.Method.invoke(Object, Object[])`?
fn is_reflective_invocation(call: &Instruction) -> bool {
    let reflective_descriptor =
        MethodDescriptor::parse("(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;")
            .expect("reflective invoke descriptor parses");
    matches!(
        call,
        Instruction::Invoke(MethodRef {
            invoke_type: InvokeType::Virtual,
            owner,
            name,
            descriptor,
        }) if owner == &BinaryName::REFLECT_METHOD
            && name.as_str() == "invoke"
            && descriptor == &reflective_descriptor
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::UnqualifiedName;

    fn call_to(owner: &str, is_static: bool, descriptor: &str) -> Instruction {
        Instruction::Invoke(MethodRef {
            invoke_type: if is_static {
                InvokeType::Static
            } else {
                InvokeType::Virtual
            },
            owner: BinaryName::from_str(owner).unwrap(),
            name: UnqualifiedName::from_str("target").unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        })
    }

    #[test]
    fn partitions_arguments_from_live_stack() {
        let mut frame = Frame::new();
        frame.locals = vec![FrameItem::Int, FrameItem::Top, FrameItem::Null];
        frame.stack = vec![
            FrameItem::Float,                          // live below the call
            FrameItem::Object(BinaryName::STRING),     // receiver
            FrameItem::Int,                            // argument
            FrameItem::Long0,                          // argument
            FrameItem::Long1,
        ];

        let structure =
            build_structure(&frame, &call_to("java/lang/String", false, "(IJ)V"), false).unwrap();

        assert_eq!(structure.stack.len(), 1);
        assert_eq!(structure.stack[0].frame_item, FrameItem::Float);
        assert!(structure.receiver.is_some());
        assert_eq!(
            structure.locals.keys().copied().collect::<Vec<u16>>(),
            vec![0, 2]
        );
        // local 0 (int) is storable, local 2 (null) is not
        assert!(structure.locals[&0].field.is_some());
        assert!(structure.locals[&2].field.is_none());

        // F, I, Ljava/lang/String; in descriptor order
        assert_eq!(
            structure.sorted_types,
            vec![
                FieldType::float(),
                FieldType::int(),
                FieldType::object(BinaryName::STRING),
            ]
        );
        assert_eq!(structure.receiver_field(), Some(2));
        assert_eq!(structure.return_type, None);
        assert!(!structure.method_static);
    }

    #[test]
    fn identical_signatures_share_a_record_class() {
        let mut frame1 = Frame::new();
        frame1.locals = vec![FrameItem::Int];
        frame1.stack = vec![FrameItem::Object(BinaryName::STRING)];

        let mut frame2 = Frame::new();
        frame2.locals = vec![FrameItem::Int];
        frame2.stack = vec![FrameItem::Object(BinaryName::STRING)];

        let call1 = call_to("a/First", true, "()V");
        let call2 = call_to("b/Second", true, "(Ljava/lang/String;)I");

        let structure1 = build_structure(&frame1, &call1, true).unwrap();
        // The argument to call2 is consumed off frame2's stack, leaving the
        // same live signature as frame1 under call1
        frame2.stack.push(FrameItem::Object(BinaryName::STRING));
        let structure2 = build_structure(&frame2, &call2, true).unwrap();

        assert_eq!(structure1.sorted_types, structure2.sorted_types);
        assert_eq!(structure1.record_class, structure2.record_class);
    }

    #[test]
    fn empty_live_set_uses_the_base_record() {
        let frame = Frame::new();
        let structure = build_structure(&frame, &call_to("a/First", true, "()V"), true).unwrap();
        assert!(structure.sorted_types.is_empty());
        assert_eq!(structure.record_class, BinaryName::SAVEDFRAME);
    }

    #[test]
    fn reflective_calls_get_a_synthetic_method_argument() {
        let mut frame = Frame::new();
        frame.stack = vec![
            FrameItem::Object(BinaryName::REFLECT_METHOD),
            FrameItem::Null,
            FrameItem::Null,
        ];
        let call = Instruction::Invoke(MethodRef {
            invoke_type: InvokeType::Virtual,
            owner: BinaryName::REFLECT_METHOD,
            name: UnqualifiedName::INVOKE,
            descriptor: MethodDescriptor::parse(
                "(Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
            )
            .unwrap(),
        });

        let structure = build_structure(&frame, &call, true).unwrap();
        assert!(structure.reflective);
        assert!(structure.receiver.is_none());
        assert_eq!(
            structure.argument_types[0],
            FieldType::object(BinaryName::REFLECT_METHOD)
        );
        assert_eq!(structure.argument_types.len(), 3);
    }
}
