//! Frame analyzer: abstract interpretation over a method's control-flow graph
//!
//! For every reachable instruction the analyzer computes the exact type state
//! of the local-variable array and the operand stack on entry to that
//! instruction. The transformer consumes these frames to decide what is live
//! across a suspension point.

mod analyze;
mod frame;
mod interpret;

pub use analyze::*;
pub use frame::*;

use crate::jvm;

/// Errors discovered while computing the frame fixed point
///
/// All of these are fatal for the method being analyzed; none are retried.
#[derive(Debug)]
pub enum AnalyzeError {
    /// The method has no instructions (it is abstract or native)
    NoInstructions,

    /// A transfer function tried to pop an empty stack
    EmptyStack { expected: &'static str },

    /// The top of the stack is inconsistent with the instruction
    InvalidStackItem {
        found: FrameItem,
        expected: String,
    },

    /// A local is inconsistent with the instruction
    InvalidLocal {
        index: u16,
        found: FrameItem,
        expected: String,
    },

    /// Two frames meeting at a confluence point disagree on stack depth
    StackSizeMismatch { size1: usize, size2: usize },

    /// Two frames meeting at a confluence point disagree on `this` state
    ThisInitializedMismatch,

    /// A constructor returned before chaining to a superclass constructor
    ReturnBeforeThisInitialized,

    /// A constructor was invoked on an already-initialized `this`
    ThisAlreadyInitialized,

    /// The item has no storable value type (`Top`, `Null`, uninitialized)
    NotStorable(FrameItem),

    /// Subroutine instructions are not analyzable
    Unsupported(&'static str),

    /// Control fell off the end of the instruction list
    UnexpectedMethodEnd,

    /// The hierarchy oracle failed to resolve a class
    Class(jvm::Error),
}

impl From<jvm::Error> for AnalyzeError {
    fn from(err: jvm::Error) -> AnalyzeError {
        AnalyzeError::Class(err)
    }
}
