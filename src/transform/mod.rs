//! Continuation transformer: rewrites method bodies into explicit resumable
//! state machines
//!
//! Call sites selected by the [`TransformPolicy`] become *pointcuts*: after
//! each one the transformer inserts a "did the callee suspend?" check that
//! saves the frame's live values into a generated record and returns, and at
//! method entry (plus at each in-flight allocation site) a dispatch switch
//! that restores the live values and jumps back to the call.

mod emit;
mod method;
mod policy;
mod records;
mod structure;

pub use method::*;
pub use policy::*;
pub use records::*;
pub use structure::*;

use crate::analyzer::{AnalyzeError, FrameItem};
use crate::jvm;

/// Errors from the transformation pipeline
#[derive(Debug)]
pub enum Error {
    /// The frame analysis of the method failed
    Analyze(AnalyzeError),

    /// Constructors and static initializers cannot be transformed
    ConstructorTransform,

    /// A non-static method that stores to local 0 would corrupt the receiver
    /// slot the dispatch bookkeeping relies on
    StoresToReceiverSlot,

    /// Constructor call sites cannot be pointcuts
    ConstructorPointcut,

    /// The filler step only supports frames that extend the current frame by
    /// a suffix (plus at most one duplicated top-of-stack value)
    UnsupportedFrameShape,

    /// The receiver of a pointcut call was not an initialized reference
    ReceiverNotInitialized(FrameItem),

    /// A live uninitialized value had no reconstructed copy to restore from
    MissingUninitializedValue(FrameItem),

    /// The chain of allocation sites feeding a pointcut is inconsistent with
    /// the analyzer's frames
    AllocationChainBroken,

    /// Internal inconsistency between the structure builder and the frames
    Internal(&'static str),

    /// Class-file emission failed
    Class(jvm::Error),
}

impl From<AnalyzeError> for Error {
    fn from(err: AnalyzeError) -> Error {
        Error::Analyze(err)
    }
}

impl From<jvm::Error> for Error {
    fn from(err: jvm::Error) -> Error {
        Error::Class(err)
    }
}
