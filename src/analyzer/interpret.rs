//! Per-instruction transfer functions
//!
//! Each instruction kind has a fixed stack/local effect; applying one to an
//! entry frame yields the frame its successors start with, plus the set of
//! possible successor instructions.

use super::{AnalyzeError, Frame, FrameItem};
use crate::code::{ConstantData, InsnId, Instruction, InvokeType, MethodCode, MethodRef};
use crate::jvm::{BaseType, BinaryName, ClassGraph, FieldType, MethodDescriptor, Name};
use std::collections::HashMap;

pub(crate) struct StepResult {
    pub frame: Frame,
    pub successors: Vec<InsnId>,
}

/// Apply one instruction's type-level effect to its entry frame
pub(crate) fn step<'g>(
    frame: &Frame,
    id: InsnId,
    code: &MethodCode,
    positions: &HashMap<InsnId, usize>,
    graph: &'g ClassGraph<'g>,
) -> Result<StepResult, AnalyzeError> {
    use Instruction::*;

    let next = || -> Result<InsnId, AnalyzeError> {
        let pos = positions[&id];
        code.order()
            .get(pos + 1)
            .copied()
            .ok_or(AnalyzeError::UnexpectedMethodEnd)
    };
    let fall_through = |frame: Frame| -> Result<StepResult, AnalyzeError> {
        Ok(StepResult {
            frame,
            successors: vec![next()?],
        })
    };
    let terminal = |frame: Frame| -> Result<StepResult, AnalyzeError> {
        Ok(StepResult {
            frame,
            successors: vec![],
        })
    };

    let mut out = frame.clone();
    match code.get(id) {
        Nop => fall_through(out),

        // Constants
        AConstNull => {
            out.stack.push(FrameItem::Null);
            fall_through(out)
        }
        IConstM1 | IConst0 | IConst1 | IConst2 | IConst3 | IConst4 | IConst5 | BiPush(_)
        | SiPush(_) => {
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        LConst0 | LConst1 => {
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        FConst0 | FConst1 | FConst2 => {
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        DConst0 | DConst1 => {
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        Ldc(constant) => {
            match constant {
                ConstantData::Integer(_) => out.stack.push(FrameItem::Int),
                ConstantData::Float(_) => out.stack.push(FrameItem::Float),
                ConstantData::Long(_) => out.stack.extend(FrameItem::LONG),
                ConstantData::Double(_) => out.stack.extend(FrameItem::DOUBLE),
                ConstantData::String(_) => out.stack.push(FrameItem::Object(BinaryName::STRING)),
                ConstantData::Class(_) => out.stack.push(FrameItem::Object(BinaryName::CLASS)),
                ConstantData::MethodType(_) => {
                    out.stack.push(FrameItem::Object(BinaryName::METHODTYPE))
                }
                ConstantData::MethodHandle(_) => {
                    out.stack.push(FrameItem::Object(BinaryName::METHODHANDLE))
                }
            }
            fall_through(out)
        }

        // Local variable loads
        ILoad(index) => {
            check_local(&out, *index, &FrameItem::Int)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        LLoad(index) => {
            check_locals(&out, *index, &FrameItem::LONG)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        FLoad(index) => {
            check_local(&out, *index, &FrameItem::Float)?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        DLoad(index) => {
            check_locals(&out, *index, &FrameItem::DOUBLE)?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        ALoad(index) => {
            let item = check_local_is_reference(&out, *index, false)?;
            out.stack.push(item);
            fall_through(out)
        }

        // Local variable stores
        IStore(index) => {
            pop_int(&mut out)?;
            out.set_local(*index, FrameItem::Int);
            fall_through(out)
        }
        LStore(index) => {
            pop_long(&mut out)?;
            out.set_locals(*index, &FrameItem::LONG);
            fall_through(out)
        }
        FStore(index) => {
            pop_float(&mut out)?;
            out.set_local(*index, FrameItem::Float);
            fall_through(out)
        }
        DStore(index) => {
            pop_double(&mut out)?;
            out.set_locals(*index, &FrameItem::DOUBLE);
            fall_through(out)
        }
        AStore(index) => {
            let item = pop_reference(&mut out, false)?;
            out.set_local(*index, item);
            fall_through(out)
        }
        IInc(index, _) => {
            check_local(&out, *index, &FrameItem::Int)?;
            fall_through(out)
        }

        // Array loads
        IALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Int])?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        LALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Long])?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        FALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Float])?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        DALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Double])?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        AALoad => {
            pop_int(&mut out)?;
            let array = pop_reference_array_or_null(&mut out)?;
            out.stack.push(reference_array_element(array));
            fall_through(out)
        }
        BALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Boolean, BaseType::Byte])?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        CALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Char])?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        SALoad => {
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Short])?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }

        // Array stores
        IAStore => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Int])?;
            fall_through(out)
        }
        LAStore => {
            pop_long(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Long])?;
            fall_through(out)
        }
        FAStore => {
            pop_float(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Float])?;
            fall_through(out)
        }
        DAStore => {
            pop_double(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Double])?;
            fall_through(out)
        }
        AAStore => {
            pop_reference(&mut out, true)?;
            pop_int(&mut out)?;
            pop_reference_array_or_null(&mut out)?;
            fall_through(out)
        }
        BAStore => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Boolean, BaseType::Byte])?;
            fall_through(out)
        }
        CAStore => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Char])?;
            fall_through(out)
        }
        SAStore => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            pop_primitive_array_or_null(&mut out, &[BaseType::Short])?;
            fall_through(out)
        }

        // Stack manipulation
        Pop => {
            pop_1word(&mut out)?;
            fall_through(out)
        }
        Pop2 => {
            pop_2words(&mut out)?;
            fall_through(out)
        }
        Dup => {
            let item = pop_1word(&mut out)?;
            out.stack.push(item.clone());
            out.stack.push(item);
            fall_through(out)
        }
        DupX1 => {
            let item1 = pop_1word(&mut out)?;
            let item2 = pop_1word(&mut out)?;
            out.stack.push(item1.clone());
            out.stack.push(item2);
            out.stack.push(item1);
            fall_through(out)
        }
        DupX2 => {
            let item1 = pop_1word(&mut out)?;
            let items = pop_2words(&mut out)?;
            out.stack.push(item1.clone());
            out.stack.extend(items);
            out.stack.push(item1);
            fall_through(out)
        }
        Dup2 => {
            let items = pop_2words(&mut out)?;
            out.stack.extend(items.iter().cloned());
            out.stack.extend(items);
            fall_through(out)
        }
        Dup2X1 => {
            let items = pop_2words(&mut out)?;
            let item = pop_1word(&mut out)?;
            out.stack.extend(items.iter().cloned());
            out.stack.push(item);
            out.stack.extend(items);
            fall_through(out)
        }
        Dup2X2 => {
            let items1 = pop_2words(&mut out)?;
            let items2 = pop_2words(&mut out)?;
            out.stack.extend(items1.iter().cloned());
            out.stack.extend(items2);
            out.stack.extend(items1);
            fall_through(out)
        }
        Swap => {
            let item1 = pop_1word(&mut out)?;
            let item2 = pop_1word(&mut out)?;
            out.stack.push(item1);
            out.stack.push(item2);
            fall_through(out)
        }

        // Arithmetic and logic
        IAdd | ISub | IMul | IDiv | IRem | IShl | IShr | IUShr | IAnd | IOr | IXor => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
            pop_long(&mut out)?;
            pop_long(&mut out)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        FAdd | FSub | FMul | FDiv | FRem => {
            pop_float(&mut out)?;
            pop_float(&mut out)?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        DAdd | DSub | DMul | DDiv | DRem => {
            pop_double(&mut out)?;
            pop_double(&mut out)?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        INeg | I2B | I2C | I2S => {
            check_last(&out, &FrameItem::Int)?;
            fall_through(out)
        }
        LNeg => {
            check_last_items(&out, &FrameItem::LONG)?;
            fall_through(out)
        }
        FNeg => {
            check_last(&out, &FrameItem::Float)?;
            fall_through(out)
        }
        DNeg => {
            check_last_items(&out, &FrameItem::DOUBLE)?;
            fall_through(out)
        }
        LShl | LShr | LUShr => {
            pop_int(&mut out)?;
            pop_long(&mut out)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }

        // Conversions
        I2L => {
            pop_int(&mut out)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        I2F => {
            pop_int(&mut out)?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        I2D => {
            pop_int(&mut out)?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        L2I => {
            pop_long(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        L2F => {
            pop_long(&mut out)?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }
        L2D => {
            pop_long(&mut out)?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        F2I => {
            pop_float(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        F2L => {
            pop_float(&mut out)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        F2D => {
            pop_float(&mut out)?;
            out.stack.extend(FrameItem::DOUBLE);
            fall_through(out)
        }
        D2I => {
            pop_double(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        D2L => {
            pop_double(&mut out)?;
            out.stack.extend(FrameItem::LONG);
            fall_through(out)
        }
        D2F => {
            pop_double(&mut out)?;
            out.stack.push(FrameItem::Float);
            fall_through(out)
        }

        // Comparisons
        LCmp => {
            pop_long(&mut out)?;
            pop_long(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        FCmpL | FCmpG => {
            pop_float(&mut out)?;
            pop_float(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        DCmpL | DCmpG => {
            pop_double(&mut out)?;
            pop_double(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }

        // Conditional jumps: two successors
        IfEq(target) | IfNe(target) | IfLt(target) | IfGe(target) | IfGt(target)
        | IfLe(target) => {
            pop_int(&mut out)?;
            Ok(StepResult {
                frame: out,
                successors: vec![next()?, *target],
            })
        }
        IfICmpEq(target) | IfICmpNe(target) | IfICmpLt(target) | IfICmpGe(target)
        | IfICmpGt(target) | IfICmpLe(target) => {
            pop_int(&mut out)?;
            pop_int(&mut out)?;
            Ok(StepResult {
                frame: out,
                successors: vec![next()?, *target],
            })
        }
        IfACmpEq(target) | IfACmpNe(target) => {
            pop_reference(&mut out, false)?;
            pop_reference(&mut out, false)?;
            Ok(StepResult {
                frame: out,
                successors: vec![next()?, *target],
            })
        }
        IfNull(target) | IfNonNull(target) => {
            pop_reference(&mut out, false)?;
            Ok(StepResult {
                frame: out,
                successors: vec![next()?, *target],
            })
        }
        Goto(target) => Ok(StepResult {
            frame: out,
            successors: vec![*target],
        }),
        Jsr(_) => Err(AnalyzeError::Unsupported("jsr")),
        Ret(_) => Err(AnalyzeError::Unsupported("ret")),

        // Switches: one successor per label, plus the default
        TableSwitch { targets, default, .. } => {
            pop_int(&mut out)?;
            let mut successors: Vec<InsnId> = targets.clone();
            successors.push(*default);
            Ok(StepResult {
                frame: out,
                successors,
            })
        }
        LookupSwitch { pairs, default } => {
            pop_int(&mut out)?;
            let mut successors: Vec<InsnId> = pairs.iter().map(|(_, target)| *target).collect();
            successors.push(*default);
            Ok(StepResult {
                frame: out,
                successors,
            })
        }

        // Returns
        IReturn => {
            check_last(&out, &FrameItem::Int)?;
            check_this_initialized(&out)?;
            terminal(out)
        }
        LReturn => {
            check_last_items(&out, &FrameItem::LONG)?;
            check_this_initialized(&out)?;
            terminal(out)
        }
        FReturn => {
            check_last(&out, &FrameItem::Float)?;
            check_this_initialized(&out)?;
            terminal(out)
        }
        DReturn => {
            check_last_items(&out, &FrameItem::DOUBLE)?;
            check_this_initialized(&out)?;
            terminal(out)
        }
        AReturn => {
            check_last_reference(&out, true)?;
            check_this_initialized(&out)?;
            terminal(out)
        }
        Return => {
            check_this_initialized(&out)?;
            terminal(out)
        }

        // Fields
        GetStatic(field) => {
            out.stack
                .extend(FrameItem::of_field_type(&field.descriptor, graph)?);
            fall_through(out)
        }
        PutStatic(field) => {
            pop_of_type(&mut out, &field.descriptor, graph)?;
            fall_through(out)
        }
        GetField(field) => {
            pop_of_type(&mut out, &FieldType::object(field.owner.clone()), graph)?;
            out.stack
                .extend(FrameItem::of_field_type(&field.descriptor, graph)?);
            fall_through(out)
        }
        PutField(field) => {
            pop_of_type(&mut out, &field.descriptor, graph)?;
            pop_of_type(&mut out, &FieldType::object(field.owner.clone()), graph)?;
            fall_through(out)
        }

        // Method invocations
        Invoke(method) => {
            perform_invoke(&mut out, method, graph)?;
            fall_through(out)
        }
        InvokeDynamic(descriptor) => {
            pop_method_arguments(&mut out, descriptor, graph)?;
            push_method_return(&mut out, descriptor, graph)?;
            fall_through(out)
        }

        // Objects and arrays
        New(class) => {
            out.stack.push(FrameItem::UninitializedObject {
                site: id,
                class: class.clone(),
            });
            fall_through(out)
        }
        NewArray(base_type) => {
            pop_int(&mut out)?;
            out.stack.push(FrameItem::PrimitiveArray(*base_type));
            fall_through(out)
        }
        ANewArray(element_type) => {
            pop_int(&mut out)?;
            let element = FrameItem::of_ref_type(element_type, graph)?;
            out.stack.push(FrameItem::ReferenceArray(Box::new(element)));
            fall_through(out)
        }
        MultiANewArray(descriptor, dims) => {
            for _ in 0..*dims {
                pop_int(&mut out)?;
            }
            out.stack.extend(FrameItem::of_field_type(descriptor, graph)?);
            fall_through(out)
        }
        ArrayLength => {
            pop_array_or_null(&mut out)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        AThrow => {
            check_last_null_or_subclass(&out, &BinaryName::THROWABLE, graph)?;
            terminal(out)
        }
        CheckCast(target_type) => {
            pop_reference(&mut out, true)?;
            out.stack.push(FrameItem::of_ref_type(target_type, graph)?);
            fall_through(out)
        }
        InstanceOf(_) => {
            pop_reference(&mut out, true)?;
            out.stack.push(FrameItem::Int);
            fall_through(out)
        }
        MonitorEnter | MonitorExit => {
            pop_reference(&mut out, false)?;
            fall_through(out)
        }
    }
}

// invocation handling

fn perform_invoke<'g>(
    frame: &mut Frame,
    method: &MethodRef,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    pop_method_arguments(frame, &method.descriptor, graph)?;

    if method.invoke_type == InvokeType::Special && method.name == crate::jvm::UnqualifiedName::INIT
    {
        let invoked = pop_reference(frame, false)?;
        match &invoked {
            FrameItem::UninitializedObject { class, .. } => {
                if class != &method.owner {
                    return Err(AnalyzeError::InvalidStackItem {
                        found: invoked.clone(),
                        expected: format!("uninitialized {}", method.owner.as_str()),
                    });
                }
            }
            FrameItem::UninitializedThis(_) => {
                if frame.this_initialized {
                    return Err(AnalyzeError::ThisAlreadyInitialized);
                }
                frame.this_initialized = true;
            }
            _ => {
                return Err(AnalyzeError::InvalidStackItem {
                    found: invoked,
                    expected: format!("uninitialized {}", method.owner.as_str()),
                });
            }
        }
        init_object(frame, &invoked, graph)?;
    } else {
        match method.invoke_type {
            InvokeType::Virtual | InvokeType::Special | InvokeType::Interface => {
                let invoked = pop_reference(frame, true)?;
                let owner_item = FrameItem::Object(graph.frame_class(&method.owner)?);
                if !is_sub_item(graph, &owner_item, &invoked)? {
                    return Err(AnalyzeError::InvalidStackItem {
                        found: invoked,
                        expected: format!("{:?}", owner_item),
                    });
                }
            }
            InvokeType::Static => {}
        }
    }

    push_method_return(frame, &method.descriptor, graph)
}

/// Replace the freshly-constructed value everywhere in the frame
fn init_object<'g>(
    frame: &mut Frame,
    uninitialized: &FrameItem,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    let class = match uninitialized {
        FrameItem::UninitializedObject { class, .. } => class,
        FrameItem::UninitializedThis(class) => class,
        other => {
            return Err(AnalyzeError::InvalidStackItem {
                found: other.clone(),
                expected: String::from("uninitialized object"),
            })
        }
    };
    let initialized = FrameItem::Object(graph.frame_class(class)?);
    frame.replace_all(uninitialized, &initialized);
    Ok(())
}

fn pop_method_arguments<'g>(
    frame: &mut Frame,
    descriptor: &MethodDescriptor,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    for parameter in descriptor.parameters.iter().rev() {
        pop_of_type(frame, parameter, graph)?;
    }
    Ok(())
}

fn push_method_return<'g>(
    frame: &mut Frame,
    descriptor: &MethodDescriptor,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    if let Some(return_type) = &descriptor.return_type {
        frame
            .stack
            .extend(FrameItem::of_field_type(return_type, graph)?);
    }
    Ok(())
}

// stack helpers

fn last_raw<'a>(frame: &'a Frame, expected: &'static str) -> Result<&'a FrameItem, AnalyzeError> {
    frame
        .stack
        .last()
        .ok_or(AnalyzeError::EmptyStack { expected })
}

fn check_last(frame: &Frame, item: &FrameItem) -> Result<(), AnalyzeError> {
    let last = last_raw(frame, "typed item")?;
    if last != item {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: format!("{:?}", item),
        });
    }
    Ok(())
}

/// Check the last `items.len()` stack words against `items` without popping
fn check_last_items(frame: &Frame, items: &[FrameItem]) -> Result<(), AnalyzeError> {
    if frame.stack.len() < items.len() {
        return Err(AnalyzeError::EmptyStack {
            expected: "multi-word item",
        });
    }
    let tail = &frame.stack[frame.stack.len() - items.len()..];
    if tail != items {
        return Err(AnalyzeError::InvalidStackItem {
            found: tail[0].clone(),
            expected: format!("{:?}", items),
        });
    }
    Ok(())
}

fn pop_items(frame: &mut Frame, items: &[FrameItem]) -> Result<(), AnalyzeError> {
    check_last_items(frame, items)?;
    for _ in items {
        frame.stack.pop();
    }
    Ok(())
}

fn pop_int(frame: &mut Frame) -> Result<(), AnalyzeError> {
    check_last(frame, &FrameItem::Int)?;
    frame.stack.pop();
    Ok(())
}

fn pop_float(frame: &mut Frame) -> Result<(), AnalyzeError> {
    check_last(frame, &FrameItem::Float)?;
    frame.stack.pop();
    Ok(())
}

fn pop_long(frame: &mut Frame) -> Result<(), AnalyzeError> {
    pop_items(frame, &FrameItem::LONG)
}

fn pop_double(frame: &mut Frame) -> Result<(), AnalyzeError> {
    pop_items(frame, &FrameItem::DOUBLE)
}

fn check_last_reference(frame: &Frame, initialized: bool) -> Result<(), AnalyzeError> {
    let last = last_raw(frame, "reference")?;
    let correct = if initialized {
        last.is_initialized_reference()
    } else {
        last.is_reference()
    };
    if !correct {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: String::from("reference"),
        });
    }
    Ok(())
}

fn pop_reference(frame: &mut Frame, initialized: bool) -> Result<FrameItem, AnalyzeError> {
    check_last_reference(frame, initialized)?;
    Ok(frame.stack.pop().unwrap())
}

fn pop_primitive_array_or_null(
    frame: &mut Frame,
    element_types: &[BaseType],
) -> Result<FrameItem, AnalyzeError> {
    let last = last_raw(frame, "primitive array")?;
    let correct = match last {
        FrameItem::Null => true,
        FrameItem::PrimitiveArray(base) => element_types.contains(base),
        _ => false,
    };
    if !correct {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: format!("array of {:?}", element_types),
        });
    }
    Ok(frame.stack.pop().unwrap())
}

fn pop_reference_array_or_null(frame: &mut Frame) -> Result<FrameItem, AnalyzeError> {
    let last = last_raw(frame, "reference array")?;
    if !matches!(last, FrameItem::Null | FrameItem::ReferenceArray(_)) {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: String::from("reference array"),
        });
    }
    Ok(frame.stack.pop().unwrap())
}

/// Loading from a null array is a valid frame state: the result item is null
fn reference_array_element(array_or_null: FrameItem) -> FrameItem {
    match array_or_null {
        FrameItem::Null => FrameItem::Null,
        FrameItem::ReferenceArray(element) => *element,
        _ => unreachable!("checked by pop_reference_array_or_null"),
    }
}

fn pop_array_or_null(frame: &mut Frame) -> Result<FrameItem, AnalyzeError> {
    let last = last_raw(frame, "array")?;
    if !matches!(
        last,
        FrameItem::Null | FrameItem::ReferenceArray(_) | FrameItem::PrimitiveArray(_)
    ) {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: String::from("array"),
        });
    }
    Ok(frame.stack.pop().unwrap())
}

fn pop_1word(frame: &mut Frame) -> Result<FrameItem, AnalyzeError> {
    let last = last_raw(frame, "1-word item")?;
    if last.words_number() != 1 {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: String::from("1-word item"),
        });
    }
    Ok(frame.stack.pop().unwrap())
}

/// Pop one 2-word value or two 1-word values, in stack order
fn pop_2words(frame: &mut Frame) -> Result<Vec<FrameItem>, AnalyzeError> {
    if frame.stack.len() < 2 {
        return Err(AnalyzeError::EmptyStack {
            expected: "2-word item or two 1-word items",
        });
    }
    let item2 = frame.stack[frame.stack.len() - 1].clone();
    let item1 = frame.stack[frame.stack.len() - 2].clone();
    let correct =
        item1.words_number() == 2 || (item1.words_number() == 1 && item2.words_number() == 1);
    if !correct {
        return Err(AnalyzeError::InvalidStackItem {
            found: item1,
            expected: String::from("2-word item or two 1-word items"),
        });
    }
    frame.stack.pop();
    frame.stack.pop();
    Ok(vec![item1, item2])
}

fn check_last_null_or_subclass<'g>(
    frame: &Frame,
    class: &BinaryName,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    let last = last_raw(frame, "throwable")?;
    let correct = match last {
        FrameItem::Null => true,
        FrameItem::Object(thrown) => graph.is_subclass(thrown, class)?,
        _ => false,
    };
    if !correct {
        return Err(AnalyzeError::InvalidStackItem {
            found: last.clone(),
            expected: format!("null or {}", class.as_str()),
        });
    }
    Ok(())
}

/// Is `sub_item` assignable to `super_item`?
fn is_sub_item<'g>(
    graph: &'g ClassGraph<'g>,
    super_item: &FrameItem,
    sub_item: &FrameItem,
) -> Result<bool, AnalyzeError> {
    if sub_item == &FrameItem::Null {
        return Ok(true);
    }
    if super_item == &FrameItem::Null {
        return Ok(false);
    }
    match (super_item, sub_item) {
        (FrameItem::Object(super_class), _) if super_class == &BinaryName::OBJECT => Ok(true),
        (FrameItem::PrimitiveArray(base1), FrameItem::PrimitiveArray(base2)) => Ok(base1 == base2),
        (FrameItem::Object(super_class), FrameItem::Object(sub_class)) => {
            Ok(graph.is_subclass(sub_class, super_class)?)
        }
        (FrameItem::ReferenceArray(element1), FrameItem::ReferenceArray(element2)) => {
            is_sub_item(graph, element1, element2)
        }
        _ => Ok(false),
    }
}

/// Pop a value matching the declared type (subtyping allowed for references)
fn pop_of_type<'g>(
    frame: &mut Frame,
    field_type: &FieldType,
    graph: &'g ClassGraph<'g>,
) -> Result<(), AnalyzeError> {
    let expected_items = FrameItem::of_field_type(field_type, graph)?;
    if expected_items[0].is_initialized_reference() {
        let last = last_raw(frame, "reference")?.clone();
        if !last.is_initialized_reference() || !is_sub_item(graph, &expected_items[0], &last)? {
            return Err(AnalyzeError::InvalidStackItem {
                found: last,
                expected: format!("{:?}", expected_items[0]),
            });
        }
        frame.stack.pop();
        Ok(())
    } else {
        pop_items(frame, &expected_items)
    }
}

// local variable helpers

fn check_local(frame: &Frame, index: u16, item: &FrameItem) -> Result<(), AnalyzeError> {
    let local = frame.local(index);
    if &local != item {
        return Err(AnalyzeError::InvalidLocal {
            index,
            found: local,
            expected: format!("{:?}", item),
        });
    }
    Ok(())
}

fn check_locals(frame: &Frame, index: u16, items: &[FrameItem]) -> Result<(), AnalyzeError> {
    for (offset, item) in items.iter().enumerate() {
        check_local(frame, index + offset as u16, item)?;
    }
    Ok(())
}

fn check_local_is_reference(
    frame: &Frame,
    index: u16,
    initialized: bool,
) -> Result<FrameItem, AnalyzeError> {
    let local = frame.local(index);
    let correct = if initialized {
        local.is_initialized_reference()
    } else {
        local.is_reference()
    };
    if !correct {
        return Err(AnalyzeError::InvalidLocal {
            index,
            found: local,
            expected: String::from("reference"),
        });
    }
    Ok(local)
}

fn check_this_initialized(frame: &Frame) -> Result<(), AnalyzeError> {
    if !frame.this_initialized {
        return Err(AnalyzeError::ReturnBeforeThisInitialized);
    }
    Ok(())
}
