use super::{InsnId, Instruction};
use crate::jvm::{BinaryName, MethodAccessFlags, MethodDescriptor, UnqualifiedName};
use std::collections::HashMap;

/// Entry in a method's exception table
///
/// The protected range is `[start, end)` in program order, exactly like the
/// class-file encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start: InsnId,
    pub end: InsnId,
    pub handler: InsnId,

    /// Caught class; `None` is a catch-all (`finally` ranges)
    pub catch_type: Option<BinaryName>,
}

/// A method with its body
#[derive(Debug)]
pub struct Method {
    pub name: UnqualifiedName,
    pub descriptor: MethodDescriptor,
    pub access_flags: MethodAccessFlags,
    pub code: MethodCode,
}

impl Method {
    pub fn new(
        name: UnqualifiedName,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
    ) -> Method {
        Method {
            name,
            descriptor,
            access_flags,
            code: MethodCode::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }
}

/// A method body: an instruction arena plus program order
///
/// Handles returned by [`MethodCode::push`] and [`MethodCode::alloc`] stay
/// valid forever; splicing via [`MethodCode::insert_before`] /
/// [`MethodCode::insert_after`] only rewrites the order list. This is what
/// lets the transformer keep jump targets and per-instruction frames keyed by
/// handle while it rewrites the method underneath them.
#[derive(Debug, Default)]
pub struct MethodCode {
    insns: Vec<Instruction>,
    order: Vec<InsnId>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub max_locals: u16,
    pub max_stack: u16,
}

impl MethodCode {
    pub fn new() -> MethodCode {
        MethodCode {
            insns: vec![],
            order: vec![],
            exception_table: vec![],
            max_locals: 0,
            max_stack: 0,
        }
    }

    /// Allocate an instruction and append it to the program order
    pub fn push(&mut self, insn: Instruction) -> InsnId {
        let id = self.alloc(insn);
        self.order.push(id);
        id
    }

    /// Allocate an instruction without placing it
    ///
    /// The handle can be used as a jump target right away; the instruction
    /// becomes executable once some `insert_*` call places it.
    pub fn alloc(&mut self, insn: Instruction) -> InsnId {
        let id = InsnId(self.insns.len());
        self.insns.push(insn);
        id
    }

    pub fn get(&self, id: InsnId) -> &Instruction {
        &self.insns[id.0]
    }

    /// Number of placed instructions
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Current program order
    pub fn order(&self) -> &[InsnId] {
        &self.order
    }

    /// First instruction in program order
    pub fn first(&self) -> Option<InsnId> {
        self.order.first().copied()
    }

    /// Position map for the current program order
    ///
    /// Positions go stale after an `insert_*` call; recompute as needed.
    pub fn positions(&self) -> HashMap<InsnId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(pos, id)| (*id, pos))
            .collect()
    }

    /// Instruction following `id` in the current program order
    pub fn next_in_order(&self, id: InsnId) -> Option<InsnId> {
        let pos = self.order.iter().position(|other| *other == id)?;
        self.order.get(pos + 1).copied()
    }

    /// Splice a block of allocated instructions in front of `anchor`
    pub fn insert_before(&mut self, anchor: InsnId, block: Vec<InsnId>) {
        let pos = self.position_of(anchor);
        self.order.splice(pos..pos, block);
    }

    /// Splice a block of allocated instructions right behind `anchor`
    pub fn insert_after(&mut self, anchor: InsnId, block: Vec<InsnId>) {
        let pos = self.position_of(anchor) + 1;
        self.order.splice(pos..pos, block);
    }

    fn position_of(&self, anchor: InsnId) -> usize {
        self.order
            .iter()
            .position(|other| *other == anchor)
            .expect("anchor instruction is not placed")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::Name;
    use Instruction::*;

    fn empty_method() -> Method {
        Method::new(
            UnqualifiedName::from_str("work").unwrap(),
            MethodDescriptor {
                parameters: vec![],
                return_type: None,
            },
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
    }

    #[test]
    fn handles_survive_insertion() {
        let mut method = empty_method();
        let code = &mut method.code;
        let a = code.push(IConst0);
        let b = code.push(IStore(0));
        let c = code.push(Return);

        let x = code.alloc(IConst1);
        let y = code.alloc(Pop);
        code.insert_after(a, vec![x, y]);

        let z = code.alloc(Nop);
        code.insert_before(a, vec![z]);

        assert_eq!(code.order(), &[z, a, x, y, b, c]);
        assert_eq!(code.get(a), &IConst0);
        assert_eq!(code.next_in_order(a), Some(x));
        assert_eq!(code.next_in_order(y), Some(b));
        assert_eq!(code.first(), Some(z));
    }
}
