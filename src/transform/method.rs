use super::{
    build_structure, emit, Error, PointcutFrameStructure, SavedFrameRecords, TransformPolicy,
};
use crate::analyzer::{AnalyzeMethodResult, Frame, FrameItem, MethodAnalyzer};
use crate::code::{Class, ExceptionTableEntry, InsnId, Instruction, Method, MethodCode};
use crate::jvm::{BinaryName, ClassGraph, FieldType, Name, UnqualifiedName};
use crate::util::Width;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Rewrites methods into resumable state machines
///
/// The transformer mutates method bodies in place and accumulates the
/// generated saved-frame record classes; the same instance should be reused
/// across methods and classes so records with identical live-type signatures
/// are shared.
pub struct ContinuationMethodTransformer<'g> {
    policy: Box<dyn TransformPolicy>,
    analyzer: MethodAnalyzer<'g>,
    records: SavedFrameRecords,
}

impl<'g> ContinuationMethodTransformer<'g> {
    pub fn new(
        graph: &'g ClassGraph<'g>,
        policy: Box<dyn TransformPolicy>,
    ) -> ContinuationMethodTransformer<'g> {
        ContinuationMethodTransformer {
            policy,
            analyzer: MethodAnalyzer::new(graph),
            records: SavedFrameRecords::new(),
        }
    }

    /// The record classes generated so far, as raw class-file bytes
    pub fn auxiliary_classes(&self) -> &HashMap<BinaryName, Vec<u8>> {
        self.records.classes()
    }

    pub fn is_auxiliary_class(&self, class_name: &BinaryName) -> bool {
        self.records.contains(class_name)
    }

    /// Rewrite every policy-selected method of `class`
    ///
    /// Returns how many methods were actually instrumented.
    pub fn transform_class(&mut self, class: &mut Class) -> Result<usize, Error> {
        if !self.policy.should_transform_class(&class.name) {
            return Ok(0);
        }
        let mut transformed = 0;
        for method in &mut class.methods {
            if self.policy.should_transform_method(&class.name, method)
                && self.transform_method_internal(&class.name, method)?
            {
                transformed += 1;
            }
        }
        Ok(transformed)
    }

    /// Rewrite one method in place
    ///
    /// Returns `false` (and leaves the method untouched) when the policy
    /// selects no call site in it.
    pub fn transform_method(
        &mut self,
        class_name: &BinaryName,
        method: &mut Method,
    ) -> Result<bool, Error> {
        self.transform_method_internal(class_name, method)
    }

    fn transform_method_internal(
        &mut self,
        class_name: &BinaryName,
        method: &mut Method,
    ) -> Result<bool, Error> {
        if method.name == UnqualifiedName::INIT || method.name == UnqualifiedName::CLINIT {
            return Err(Error::ConstructorTransform);
        }

        let analysis = self.analyzer.analyze(class_name, method)?;
        if !method.is_static() && contains_store_to_receiver(method, &analysis) {
            return Err(Error::StoresToReceiverSlot);
        }

        // Find the pointcuts, in program order
        let mut pointcuts: Vec<InsnId> = vec![];
        for id in method.code.order().to_vec() {
            let insn = method.code.get(id);
            if insn.is_invocation()
                && analysis.is_reachable(id)
                && self
                    .policy
                    .should_transform_call_site(class_name, method, insn)
            {
                if insn.is_constructor_invocation() {
                    return Err(Error::ConstructorPointcut);
                }
                pointcuts.push(id);
            }
        }
        if pointcuts.is_empty() {
            return Ok(false);
        }
        log::debug!(
            "transforming {}.{:?}: {} pointcuts",
            class_name.as_str(),
            method.name,
            pointcuts.len(),
        );

        let method_static = method.is_static();
        let pointcut_local = locals_number(method, &analysis) as u16;
        let aux_local = pointcut_local + 1;

        // Snapshot the pristine program order; the analyzer's frames and all
        // jump targets are in terms of these instructions
        let original_order: Vec<InsnId> = method.code.order().to_vec();
        let mut next_original: HashMap<InsnId, InsnId> = HashMap::new();
        for window in original_order.windows(2) {
            next_original.insert(window[0], window[1]);
        }
        let first_insn = original_order[0];

        // Read the resumption target into a fresh dispatch local before
        // anything else runs; the store doubles as the entry dispatch anchor
        let get_target = emit::invoke_dispatch_target(&mut method.code);
        let entry_anchor = method.code.alloc(Instruction::IStore(pointcut_local));
        method.code.insert_before(first_insn, vec![get_target, entry_anchor]);

        let mut aux_insns: HashSet<InsnId> = HashSet::new();
        aux_insns.insert(get_target);
        aux_insns.insert(entry_anchor);

        // Dispatch point -> (default target, case bodies by pointcut number)
        let mut dispatch: BTreeMap<InsnId, (InsnId, BTreeMap<u32, Vec<InsnId>>)> = BTreeMap::new();
        dispatch.insert(entry_anchor, (first_insn, BTreeMap::new()));

        let mut max_aux_used = aux_local as usize;

        for (index, pointcut) in pointcuts.iter().copied().enumerate() {
            let pointcut_number = (index + 1) as u32;

            // An in-flight allocation cannot be serialized: every `new` whose
            // uninitialized value is live at the call gets its own dispatch
            // point that replays the allocation before falling through
            let mut distributions = vec![entry_anchor];
            distributions.extend(new_instruction_chain(&analysis, pointcut)?);

            let after_frame = |d: InsnId| -> Result<Frame, Error> {
                let at = if d == entry_anchor {
                    first_insn
                } else {
                    *next_original
                        .get(&d)
                        .ok_or(Error::Internal("allocation site has no successor"))?
                };
                analysis
                    .frame(at)
                    .cloned()
                    .ok_or(Error::Internal("dispatch continuation point is unreachable"))
            };

            // Intermediate hops: refill the frame shape, then re-trigger the
            // next allocation in the chain
            for window_start in 0..distributions.len() - 1 {
                let d = distributions[window_start];
                let d_next = distributions[window_start + 1];
                let current = after_frame(d)?;
                let target = analysis
                    .frame(d_next)
                    .ok_or(Error::AllocationChainBroken)?
                    .clone();

                let mut body = transform_frame_instructions(&mut method.code, &current, &target)?;
                body.push(method.code.alloc(Instruction::Goto(d_next)));

                let default_target = if d == entry_anchor {
                    first_insn
                } else {
                    *next_original
                        .get(&d)
                        .ok_or(Error::Internal("allocation site has no successor"))?
                };
                dispatch
                    .entry(d)
                    .or_insert_with(|| (default_target, BTreeMap::new()))
                    .1
                    .insert(pointcut_number, body);
            }

            let invocation_frame = analysis
                .frame(pointcut)
                .ok_or(Error::Internal("pointcut is unreachable"))?;
            let structure =
                build_structure(invocation_frame, method.code.get(pointcut), method_static)?;

            // Final hop: restore the live values and jump back into the call
            let last = *distributions.last().unwrap();
            let last_frame = after_frame(last)?;
            let (mut body, aux_used) = load_saved_frame_instructions(
                &mut method.code,
                &last_frame,
                &structure,
                aux_local,
            )?;
            max_aux_used = max_aux_used.max(aux_used);
            body.extend(emit::push_and_store_int(&mut method.code, 0, pointcut_local));
            body.push(method.code.alloc(Instruction::Goto(pointcut)));
            let last_default = if last == entry_anchor {
                first_insn
            } else {
                *next_original
                    .get(&last)
                    .ok_or(Error::Internal("allocation site has no successor"))?
            };
            dispatch
                .entry(last)
                .or_insert_with(|| (last_default, BTreeMap::new()))
                .1
                .insert(pointcut_number, body);

            // Save path: if the callee suspended, capture the live values
            // into a record and propagate the suspension by returning
            let after_invocation = *next_original
                .get(&pointcut)
                .ok_or(Error::Internal("pointcut has no successor"))?;
            let mut save = vec![
                emit::invoke_is_suspending(&mut method.code),
                method.code.alloc(Instruction::IfEq(after_invocation)),
            ];
            if let Some(return_type) = &structure.return_type {
                save.push(emit::pop_value(&mut method.code, return_type));
            }
            save.extend(save_frame_instructions(
                &mut method.code,
                &structure,
                pointcut_number,
                aux_local,
            ));
            max_aux_used = max_aux_used.max(aux_local as usize + 1);
            save.extend(emit::return_any(
                &mut method.code,
                method.descriptor.return_type.as_ref(),
            ));
            aux_insns.extend(save.iter().copied());
            method.code.insert_after(pointcut, save);

            self.records
                .ensure(&structure.record_class, &structure.sorted_types)?;
        }

        // Materialize one switch per dispatch point
        for (anchor, (default_target, cases)) in dispatch {
            let mut block = vec![
                method.code.alloc(Instruction::ILoad(pointcut_local)),
                method.code.alloc(Instruction::LookupSwitch {
                    pairs: cases
                        .iter()
                        .map(|(number, body)| (*number as i32, body[0]))
                        .collect(),
                    default: default_target,
                }),
            ];
            for (_, body) in cases {
                block.extend(body);
            }
            aux_insns.extend(block.iter().copied());
            method.code.insert_after(anchor, block);
        }

        reslice_exception_table(&mut method.code, &aux_insns);

        // The rewritten method needs room for the dispatch local, the
        // auxiliary locals, and the record shuffling on the stack
        method.code.max_locals = method.code.max_locals.max(max_aux_used as u16);
        method.code.max_stack = method
            .code
            .max_stack
            .max(analysis.max_stack as u16 + 4)
            .max(4);

        Ok(true)
    }
}

/// Size of the local-variable array the original method actually uses
fn locals_number(method: &Method, analysis: &AnalyzeMethodResult) -> usize {
    use Instruction::*;

    let mut result = if method.is_static() { 0 } else { 1 };
    for parameter in &method.descriptor.parameters {
        result += parameter.width();
    }
    for id in method.code.order() {
        if !analysis.is_reachable(*id) {
            continue;
        }
        let used = match method.code.get(*id) {
            ILoad(index) | FLoad(index) | ALoad(index) | IStore(index) | FStore(index)
            | AStore(index) | IInc(index, _) => Some(*index as usize + 1),
            LLoad(index) | DLoad(index) | LStore(index) | DStore(index) => {
                Some(*index as usize + 2)
            }
            _ => None,
        };
        if let Some(used) = used {
            result = result.max(used);
        }
    }
    result
}

/// Does any reachable instruction store into local 0?
fn contains_store_to_receiver(method: &Method, analysis: &AnalyzeMethodResult) -> bool {
    use Instruction::*;

    method.code.order().iter().any(|id| {
        analysis.is_reachable(*id)
            && matches!(
                method.code.get(*id),
                IStore(0) | LStore(0) | FStore(0) | DStore(0) | AStore(0)
            )
    })
}

/// Uninitialized-object values live in a frame
fn uninitialized_set(frame: &Frame) -> HashSet<FrameItem> {
    frame
        .locals
        .iter()
        .chain(frame.stack.iter())
        .filter(|item| matches!(item, FrameItem::UninitializedObject { .. }))
        .cloned()
        .collect()
}

/// The `new` instruction that most recently contributed to the live
/// uninitialized values of `frame`, if any
fn previous_new_site(
    frame: &Frame,
    analysis: &AnalyzeMethodResult,
) -> Result<Option<InsnId>, Error> {
    let live = uninitialized_set(frame);
    if live.is_empty() {
        return Ok(None);
    }
    for item in &live {
        let site = match item {
            FrameItem::UninitializedObject { site, .. } => *site,
            _ => unreachable!("filtered by uninitialized_set"),
        };
        let before_new = analysis.frame(site).ok_or(Error::AllocationChainBroken)?;
        let mut after_new = before_new.clone();
        after_new.stack.push(item.clone());
        if live.is_subset(&uninitialized_set(&after_new)) {
            return Ok(Some(site));
        }
    }
    Err(Error::AllocationChainBroken)
}

/// Allocation sites whose values are live at `last`, outermost first
fn new_instruction_chain(
    analysis: &AnalyzeMethodResult,
    last: InsnId,
) -> Result<Vec<InsnId>, Error> {
    let mut chain = vec![];
    let mut frame = analysis.frame(last).ok_or(Error::Internal("pointcut is unreachable"))?;
    while let Some(site) = previous_new_site(frame, analysis)? {
        chain.insert(0, site);
        frame = analysis.frame(site).ok_or(Error::AllocationChainBroken)?;
    }
    Ok(chain)
}

/// Filler instructions turning `current` into `target`
///
/// Only the shapes javac emits around an argument-position allocation are
/// supported: `target` extends `current`'s locals and stack by a suffix,
/// optionally duplicating the current top of stack first. Anything else is an
/// unsupported construct, deliberately so.
fn transform_frame_instructions(
    code: &mut MethodCode,
    current: &Frame,
    target: &Frame,
) -> Result<Vec<InsnId>, Error> {
    let current_locals = current.locals.len();
    if current_locals > target.locals.len()
        || current.locals[..] != target.locals[..current_locals]
    {
        return Err(Error::UnsupportedFrameShape);
    }
    if target
        .locals
        .iter()
        .any(|item| item.is_uninitialized_reference())
    {
        return Err(Error::UnsupportedFrameShape);
    }

    let current_stack = current.stack.len();
    if current_stack > target.stack.len() || current.stack[..] != target.stack[..current_stack] {
        return Err(Error::UnsupportedFrameShape);
    }
    let mut stack_suffix = &target.stack[current_stack..];
    let duplicate_top = current_stack > 0
        && !stack_suffix.is_empty()
        && current.stack[current_stack - 1] == stack_suffix[0];
    if duplicate_top {
        stack_suffix = &stack_suffix[1..];
    }
    if stack_suffix
        .iter()
        .any(|item| item.is_uninitialized_reference())
    {
        return Err(Error::UnsupportedFrameShape);
    }

    let mut out = vec![];

    // Append locals with default values
    let mut local_index = current_locals as u16;
    for item in &target.locals[current_locals..] {
        if item.is_starting_word() && item != &FrameItem::Top {
            let value_type = filler_type(item)?;
            out.push(emit::push_default(code, &value_type));
            out.push(emit::store(code, &value_type, local_index));
        }
        local_index += 1;
    }

    // Append stack with default values
    if duplicate_top {
        out.push(code.alloc(Instruction::Dup));
    }
    for item in stack_suffix {
        if item.is_starting_word() && item != &FrameItem::Top {
            let value_type = filler_type(item)?;
            out.push(emit::push_default(code, &value_type));
        }
    }

    Ok(out)
}

/// The type to synthesize a default value of, for a filler slot
fn filler_type(item: &FrameItem) -> Result<FieldType, Error> {
    match item {
        FrameItem::Int => Ok(FieldType::int()),
        FrameItem::Float => Ok(FieldType::float()),
        FrameItem::Long0 => Ok(FieldType::long()),
        FrameItem::Double0 => Ok(FieldType::double()),
        item if item.is_initialized_reference() => Ok(FieldType::object(BinaryName::OBJECT)),
        _ => Err(Error::UnsupportedFrameShape),
    }
}

/// Restore path: clear the current frame shape, take the next saved record
/// from the runtime, and reload every live value into position
///
/// Returns the emitted block and one past the highest auxiliary local used.
fn load_saved_frame_instructions(
    code: &mut MethodCode,
    current_frame: &Frame,
    structure: &PointcutFrameStructure,
    aux_local: u16,
) -> Result<(Vec<InsnId>, usize), Error> {
    let mut out = vec![];
    let mut aux_counter = aux_local;
    let mut uninitialized_locals: HashMap<FrameItem, u16> = HashMap::new();

    // Unwind the current stack, parking reconstructed in-flight allocations
    for item in current_frame.stack.iter().rev() {
        if !item.is_starting_word() {
            continue;
        }
        if item.is_uninitialized_reference() && !uninitialized_locals.contains_key(item) {
            out.push(code.alloc(Instruction::AStore(aux_counter)));
            uninitialized_locals.insert(item.clone(), aux_counter);
            aux_counter += 1;
        } else if item.words_number() == 1 {
            out.push(code.alloc(Instruction::Pop));
        } else {
            out.push(code.alloc(Instruction::Pop2));
        }
    }
    for (index, item) in current_frame.locals.iter().enumerate() {
        if item.is_uninitialized_reference() && !uninitialized_locals.contains_key(item) {
            out.push(code.alloc(Instruction::ALoad(index as u16)));
            out.push(code.alloc(Instruction::AStore(aux_counter)));
            uninitialized_locals.insert(item.clone(), aux_counter);
            aux_counter += 1;
        }
    }

    // Fetch the saved record
    out.push(emit::invoke_pop_frame(code));
    let record_local = if structure.sorted_types.is_empty() {
        out.push(code.alloc(Instruction::Pop));
        None
    } else {
        out.push(emit::checkcast(code, &structure.record_class));
        let record_local = aux_counter;
        out.push(code.alloc(Instruction::AStore(record_local)));
        aux_counter += 1;
        Some(record_local)
    };

    // Refill locals
    for (index, slot) in &structure.locals {
        match &slot.frame_item {
            FrameItem::Null => {
                out.push(code.alloc(Instruction::AConstNull));
                out.push(code.alloc(Instruction::AStore(*index)));
            }
            item if item.is_uninitialized_reference() => {
                let parked = uninitialized_locals
                    .get(item)
                    .copied()
                    .ok_or_else(|| Error::MissingUninitializedValue(item.clone()))?;
                out.push(code.alloc(Instruction::ALoad(parked)));
                out.push(code.alloc(Instruction::AStore(*index)));
            }
            _ => {
                let record_local =
                    record_local.ok_or(Error::Internal("storable local without a record"))?;
                let value_type = slot
                    .value_type
                    .clone()
                    .ok_or(Error::Internal("storable local without a value type"))?;
                let field = slot
                    .field
                    .ok_or(Error::Internal("storable local without a field"))?;
                out.push(code.alloc(Instruction::ALoad(record_local)));
                out.push(emit::get_field(
                    code,
                    &structure.record_class,
                    UnqualifiedName::record_field(field),
                    value_type.clone(),
                ));
                out.push(emit::store(code, &value_type, *index));
            }
        }
    }

    // Rebuild the stack below the call arguments, bottom first
    for slot in &structure.stack {
        match &slot.frame_item {
            FrameItem::Top | FrameItem::Null => {
                out.push(code.alloc(Instruction::AConstNull));
            }
            item if item.is_uninitialized_reference() => {
                let parked = uninitialized_locals
                    .get(item)
                    .copied()
                    .ok_or_else(|| Error::MissingUninitializedValue(item.clone()))?;
                out.push(code.alloc(Instruction::ALoad(parked)));
            }
            _ => {
                let record_local =
                    record_local.ok_or(Error::Internal("storable stack item without a record"))?;
                let value_type = slot
                    .value_type
                    .clone()
                    .ok_or(Error::Internal("storable stack item without a value type"))?;
                let field = slot
                    .field
                    .ok_or(Error::Internal("storable stack item without a field"))?;
                out.push(code.alloc(Instruction::ALoad(record_local)));
                out.push(emit::get_field(
                    code,
                    &structure.record_class,
                    UnqualifiedName::record_field(field),
                    value_type,
                ));
            }
        }
    }

    // Reload the receiver the call will re-enter on
    if let Some(receiver) = &structure.receiver {
        let record_local =
            record_local.ok_or(Error::Internal("receiver without a record"))?;
        let value_type = receiver
            .value_type
            .clone()
            .ok_or(Error::Internal("receiver without a value type"))?;
        let field = receiver
            .field
            .ok_or(Error::Internal("receiver without a field"))?;
        out.push(code.alloc(Instruction::ALoad(record_local)));
        out.push(emit::get_field(
            code,
            &structure.record_class,
            UnqualifiedName::record_field(field),
            value_type,
        ));
    }

    // Drop the record reference so it does not pin the record alive
    if let Some(record_local) = record_local {
        out.extend(emit::push_and_store_int(code, 0, record_local));
    }

    // Dummy call arguments; the callee restores its own real state
    for argument_type in &structure.argument_types {
        out.push(emit::push_default(code, argument_type));
    }

    Ok((out, aux_counter as usize))
}

/// Save path: copy every live value into a fresh record and register it
fn save_frame_instructions(
    code: &mut MethodCode,
    structure: &PointcutFrameStructure,
    pointcut_number: u32,
    aux_local: u16,
) -> Vec<InsnId> {
    let mut out = vec![];
    let record_local = aux_local;

    out.extend(emit::construct(code, &structure.record_class));
    out.push(code.alloc(Instruction::AStore(record_local)));

    // Stack items, top first
    for slot in structure.stack.iter().rev() {
        match (&slot.value_type, slot.field) {
            (Some(value_type), Some(field)) => {
                out.push(code.alloc(Instruction::ALoad(record_local)));
                out.extend(emit::swap_under(code, value_type));
                out.push(emit::put_field(
                    code,
                    &structure.record_class,
                    UnqualifiedName::record_field(field),
                    value_type.clone(),
                ));
            }
            // Top, null, and uninitialized values need no storage
            _ => out.push(code.alloc(Instruction::Pop)),
        }
    }

    // Locals
    for (index, slot) in &structure.locals {
        if let (Some(value_type), Some(field)) = (&slot.value_type, slot.field) {
            out.push(code.alloc(Instruction::ALoad(record_local)));
            out.push(emit::load(code, value_type, *index));
            out.push(emit::put_field(
                code,
                &structure.record_class,
                UnqualifiedName::record_field(field),
                value_type.clone(),
            ));
        }
    }

    // Stamp the pointcut number on the record
    out.push(code.alloc(Instruction::ALoad(record_local)));
    out.push(emit::push_int(code, pointcut_number as i32));
    out.push(emit::put_field(
        code,
        &BinaryName::SAVEDFRAME,
        UnqualifiedName::POINTCUT,
        FieldType::int(),
    ));

    // Hand the record to the runtime, registering our own receiver for the
    // frame one level up
    out.push(code.alloc(Instruction::ALoad(record_local)));
    let receiver_slot = structure
        .receiver_field()
        .map(|field| field as i32)
        .unwrap_or(-1);
    out.push(emit::push_int(code, receiver_slot));
    if structure.method_static {
        out.push(code.alloc(Instruction::AConstNull));
    } else {
        out.push(code.alloc(Instruction::ALoad(0)));
    }
    out.push(emit::invoke_push_frame(code));

    out
}

/// Exclude the inserted save/dispatch instructions from protected regions:
/// they run outside the original try semantics
fn reslice_exception_table(code: &mut MethodCode, aux_insns: &HashSet<InsnId>) {
    let positions = code.positions();
    let mut new_table = vec![];
    for entry in code.exception_table.clone() {
        let start = positions[&entry.start];
        let end = positions[&entry.end];
        let mut segment_start: Option<InsnId> = None;
        for id in &code.order()[start..end] {
            if aux_insns.contains(id) {
                if let Some(segment) = segment_start.take() {
                    new_table.push(ExceptionTableEntry {
                        start: segment,
                        end: *id,
                        handler: entry.handler,
                        catch_type: entry.catch_type.clone(),
                    });
                }
            } else if segment_start.is_none() {
                segment_start = Some(*id);
            }
        }
        if let Some(segment) = segment_start {
            new_table.push(ExceptionTableEntry {
                start: segment,
                end: entry.end,
                handler: entry.handler,
                catch_type: entry.catch_type.clone(),
            });
        }
    }
    code.exception_table = new_table;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::code::Instruction::*;
    use crate::code::{InvokeType, MethodRef};
    use crate::jvm::{
        ClassData, ClassGraphArenas, MethodAccessFlags, MethodDescriptor, ParseDescriptor,
    };

    fn name(s: &str) -> BinaryName {
        BinaryName::from_str(s).unwrap()
    }

    fn test_graph(arenas: &ClassGraphArenas) -> ClassGraph<'_> {
        let graph = ClassGraph::new(arenas);
        graph.insert_java_library_types();
        graph.add_class(ClassData::new(name("t/Example"), Some(BinaryName::OBJECT)));
        graph.add_class(ClassData::new(name("t/Helper"), Some(BinaryName::OBJECT)));
        graph
    }

    /// Only calls into `t/Helper` are pointcuts
    struct HelperCallsOnly;

    impl TransformPolicy for HelperCallsOnly {
        fn should_transform_class(&self, _class_name: &BinaryName) -> bool {
            true
        }

        fn should_transform_method(&self, _class_name: &BinaryName, _method: &Method) -> bool {
            true
        }

        fn should_transform_call_site(
            &self,
            _class_name: &BinaryName,
            _method: &Method,
            call: &Instruction,
        ) -> bool {
            matches!(call, Instruction::Invoke(m) if m.owner == name("t/Helper"))
        }
    }

    fn helper_call(descriptor: &str) -> Instruction {
        Invoke(MethodRef {
            invoke_type: InvokeType::Static,
            owner: name("t/Helper"),
            name: UnqualifiedName::from_str("step").unwrap(),
            descriptor: MethodDescriptor::parse(descriptor).unwrap(),
        })
    }

    fn static_method(descriptor: &str) -> Method {
        Method::new(
            UnqualifiedName::from_str("work").unwrap(),
            MethodDescriptor::parse(descriptor).unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
    }

    fn transformer<'g>(graph: &'g ClassGraph<'g>) -> ContinuationMethodTransformer<'g> {
        ContinuationMethodTransformer::new(graph, Box::new(HelperCallsOnly))
    }

    fn is_runtime_call(insn: &Instruction, method_name: &UnqualifiedName) -> bool {
        matches!(
            insn,
            Instruction::Invoke(m)
                if m.owner == BinaryName::CONTINUATION && &m.name == method_name
        )
    }

    #[test]
    fn no_pointcuts_is_a_no_op() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);
        let mut method = static_method("()V");
        method.code.push(Return);
        let before = method.code.order().to_vec();

        let mut transformer = transformer(&graph);
        assert!(!transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());
        assert_eq!(method.code.order(), &before[..]);
        assert!(transformer.auxiliary_classes().is_empty());
    }

    #[test]
    fn single_pointcut_gets_dispatch_and_save_paths() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);

        // int x = 5; Helper.step(); return x;
        let mut method = static_method("()I");
        let code = &mut method.code;
        code.push(IConst5);
        code.push(IStore(0));
        let call = code.push(helper_call("()V"));
        let load = code.push(ILoad(0));
        code.push(IReturn);

        let mut transformer = transformer(&graph);
        assert!(transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());

        let order = method.code.order().to_vec();
        // Dispatch prologue: read the target, store it, switch on it
        assert!(is_runtime_call(
            method.code.get(order[0]),
            &UnqualifiedName::DISPATCHTARGET
        ));
        assert_eq!(method.code.get(order[1]), &IStore(1));
        assert_eq!(method.code.get(order[2]), &ILoad(1));
        match method.code.get(order[3]) {
            LookupSwitch { pairs, default } => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].0, 1);
                assert_eq!(*default, order[0..].iter().copied().find(|id| {
                    method.code.get(*id) == &IConst5
                }).unwrap());
            }
            other => panic!("expected dispatch switch, got {:?}", other),
        }

        // The restore case pulls the saved record and jumps back to the call
        assert!(order
            .iter()
            .any(|id| is_runtime_call(method.code.get(*id), &UnqualifiedName::POPFRAME)));
        assert!(order
            .iter()
            .any(|id| method.code.get(*id) == &Goto(call)));

        // The save path checks for suspension right after the call
        let call_position = order.iter().position(|id| *id == call).unwrap();
        assert!(is_runtime_call(
            method.code.get(order[call_position + 1]),
            &UnqualifiedName::ISSUSPENDING
        ));
        assert_eq!(
            method.code.get(order[call_position + 2]),
            &IfEq(load)
        );
        assert!(order
            .iter()
            .any(|id| is_runtime_call(method.code.get(*id), &UnqualifiedName::PUSHFRAME)));
        // Suspension propagates by returning a default int
        assert!(order[call_position..]
            .iter()
            .any(|id| method.code.get(*id) == &IConst0));

        // One live int -> one generated record class
        assert_eq!(transformer.auxiliary_classes().len(), 1);
    }

    #[test]
    fn identical_live_sets_share_one_record_class() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);

        // Two call sites, both with a single live int local
        let mut method = static_method("()V");
        let code = &mut method.code;
        code.push(IConst3);
        code.push(IStore(0));
        code.push(helper_call("()V"));
        code.push(helper_call("()V"));
        code.push(Return);

        let mut transformer = transformer(&graph);
        assert!(transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());
        assert_eq!(transformer.auxiliary_classes().len(), 1);
    }

    #[test]
    fn distinct_live_sets_get_distinct_record_classes() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);

        // First call has a live int, second a live long
        let mut method = static_method("()V");
        let code = &mut method.code;
        code.push(IConst3);
        code.push(IStore(0));
        code.push(helper_call("()V"));
        code.push(LConst0);
        code.push(LStore(0));
        code.push(helper_call("()V"));
        code.push(Return);

        let mut transformer = transformer(&graph);
        assert!(transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());
        assert_eq!(transformer.auxiliary_classes().len(), 2);
    }

    #[test]
    fn constructors_are_rejected() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);
        let mut method = Method::new(
            UnqualifiedName::INIT,
            MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        method.code.push(Return);

        assert!(matches!(
            transformer(&graph).transform_method(&name("t/Example"), &mut method),
            Err(Error::ConstructorTransform)
        ));
    }

    #[test]
    fn receiver_slot_stores_are_rejected() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);
        let mut method = Method::new(
            UnqualifiedName::from_str("work").unwrap(),
            MethodDescriptor::parse("()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        let code = &mut method.code;
        code.push(AConstNull);
        code.push(AStore(0));
        code.push(helper_call("()V"));
        code.push(Return);

        assert!(matches!(
            transformer(&graph).transform_method(&name("t/Example"), &mut method),
            Err(Error::StoresToReceiverSlot)
        ));
    }

    #[test]
    fn protected_regions_exclude_inserted_instructions() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);

        let mut method = static_method("()V");
        let code = &mut method.code;
        let call = code.push(helper_call("()V"));
        let end = code.push(Return);
        let handler = code.push(AThrow);
        code.exception_table.push(ExceptionTableEntry {
            start: call,
            end,
            handler,
            catch_type: Some(BinaryName::RUNTIMEEXCEPTION),
        });

        let mut transformer = transformer(&graph);
        assert!(transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());

        // The protected region now covers exactly the original call; the
        // inserted suspension check right after it is outside
        assert_eq!(method.code.exception_table.len(), 1);
        let entry = &method.code.exception_table[0];
        assert_eq!(entry.start, call);
        assert!(is_runtime_call(
            method.code.get(entry.end),
            &UnqualifiedName::ISSUSPENDING
        ));
        assert_eq!(entry.handler, handler);
    }

    #[test]
    fn pointcut_under_inflight_allocation_replays_the_allocation() {
        let arenas = ClassGraphArenas::new();
        let graph = test_graph(&arenas);

        let example_init = Invoke(MethodRef {
            invoke_type: InvokeType::Special,
            owner: name("t/Example"),
            name: UnqualifiedName::INIT,
            descriptor: MethodDescriptor::parse("(I)V").unwrap(),
        });

        // new Example(Helper.step())
        let mut method = static_method("()V");
        let code = &mut method.code;
        let new_insn = code.push(New(name("t/Example")));
        code.push(Dup);
        let call = code.push(helper_call("()I"));
        code.push(example_init);
        code.push(Pop);
        code.push(Return);

        let mut transformer = transformer(&graph);
        assert!(transformer
            .transform_method(&name("t/Example"), &mut method)
            .unwrap());

        // The allocation site got its own dispatch switch right behind it
        let order = method.code.order().to_vec();
        let new_position = order.iter().position(|id| *id == new_insn).unwrap();
        assert_eq!(
            method.code.get(order[new_position + 1]),
            &ILoad(0),
            "allocation site is followed by a dispatch load",
        );
        assert!(matches!(
            method.code.get(order[new_position + 2]),
            LookupSwitch { .. }
        ));

        // The entry dispatch re-triggers the allocation, the allocation
        // dispatch jumps back into the call
        assert!(order.iter().any(|id| method.code.get(*id) == &Goto(new_insn)));
        assert!(order.iter().any(|id| method.code.get(*id) == &Goto(call)));

        // Nothing storable is live: no record class needed
        assert!(transformer.auxiliary_classes().is_empty());
    }
}
