use super::interpret::step;
use super::{exception_frame, initial_frame, merge_frames, AnalyzeError, Frame};
use crate::code::{ExceptionTableEntry, InsnId, Method};
use crate::jvm::{BinaryName, ClassGraph, Name};
use std::collections::{HashMap, HashSet, VecDeque};

/// Outcome of analyzing one method: the entry frame of every reachable
/// instruction, plus the maximum observed locals count and stack depth
///
/// Instructions the fixed point never reached are simply absent from the map.
#[derive(Debug)]
pub struct AnalyzeMethodResult {
    pub frames: HashMap<InsnId, Frame>,
    pub max_locals: usize,
    pub max_stack: usize,
}

impl AnalyzeMethodResult {
    pub fn is_reachable(&self, id: InsnId) -> bool {
        self.frames.contains_key(&id)
    }

    pub fn frame(&self, id: InsnId) -> Option<&Frame> {
        self.frames.get(&id)
    }
}

/// Work-list fixed-point analyzer over a method's implicit CFG
pub struct MethodAnalyzer<'g> {
    graph: &'g ClassGraph<'g>,
}

impl<'g> MethodAnalyzer<'g> {
    pub fn new(graph: &'g ClassGraph<'g>) -> MethodAnalyzer<'g> {
        MethodAnalyzer { graph }
    }

    /// Compute per-instruction entry frames for `method`
    pub fn analyze(
        &self,
        owner: &BinaryName,
        method: &Method,
    ) -> Result<AnalyzeMethodResult, AnalyzeError> {
        if method.code.is_empty() {
            return Err(AnalyzeError::NoInstructions);
        }

        let positions = method.code.positions();

        // Which try ranges protect each instruction
        let mut try_catch: HashMap<InsnId, Vec<&ExceptionTableEntry>> = HashMap::new();
        for entry in &method.code.exception_table {
            let start = positions[&entry.start];
            let end = positions[&entry.end];
            for id in &method.code.order()[start..end] {
                try_catch.entry(*id).or_default().push(entry);
            }
        }

        let mut internal = Internal {
            graph: self.graph,
            frames: HashMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            max_locals: 0,
            max_stack: 0,
        };

        let first = method.code.first().ok_or(AnalyzeError::NoInstructions)?;
        let initial = initial_frame(owner, method, self.graph)?;
        internal.update_frame(first, initial)?;

        while let Some(id) = internal.pop_queue() {
            let frame = internal.frames[&id].clone();
            internal.update_handler_frames(&try_catch, id, &frame)?;

            let result = step(&frame, id, &method.code, &positions, self.graph)?;

            // A store may have changed the locals mid-instruction; the handler
            // must be sound for both the before and after states
            if result.frame.locals != frame.locals {
                internal.update_handler_frames(&try_catch, id, &result.frame)?;
            }

            for successor in result.successors {
                internal.update_frame(successor, result.frame.clone())?;
            }
        }

        log::debug!(
            "analyzed {}.{:?}: {} reachable instructions, {} locals, stack {}",
            owner.as_str(),
            method.name,
            internal.frames.len(),
            internal.max_locals,
            internal.max_stack,
        );

        Ok(AnalyzeMethodResult {
            frames: internal.frames,
            max_locals: internal.max_locals,
            max_stack: internal.max_stack,
        })
    }
}

struct Internal<'g> {
    graph: &'g ClassGraph<'g>,
    frames: HashMap<InsnId, Frame>,
    queue: VecDeque<InsnId>,
    queued: HashSet<InsnId>,
    max_locals: usize,
    max_stack: usize,
}

impl<'g> Internal<'g> {
    /// Record a new entry frame for `id`, merging with any previous one, and
    /// re-enqueue the instruction if its entry frame changed
    fn update_frame(&mut self, id: InsnId, frame: Frame) -> Result<(), AnalyzeError> {
        self.max_locals = self.max_locals.max(frame.locals.len());
        self.max_stack = self.max_stack.max(frame.stack.len());

        match self.frames.get(&id) {
            Some(current) => {
                let merged = merge_frames(current, &frame, self.graph)?;
                if &merged != current {
                    self.frames.insert(id, merged);
                    self.enqueue(id);
                }
            }
            None => {
                self.frames.insert(id, frame);
                self.enqueue(id);
            }
        }
        Ok(())
    }

    /// Propagate the current frame into every handler protecting `id`
    fn update_handler_frames(
        &mut self,
        try_catch: &HashMap<InsnId, Vec<&ExceptionTableEntry>>,
        id: InsnId,
        frame: &Frame,
    ) -> Result<(), AnalyzeError> {
        if let Some(entries) = try_catch.get(&id) {
            for entry in entries {
                let handler_frame = exception_frame(frame, entry.catch_type.as_ref(), self.graph)?;
                self.update_frame(entry.handler, handler_frame)?;
            }
        }
        Ok(())
    }

    fn enqueue(&mut self, id: InsnId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }

    fn pop_queue(&mut self) -> Option<InsnId> {
        let id = self.queue.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }
}
