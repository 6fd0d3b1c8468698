//! Suspend and resume ordinary JVM methods
//!
//! The class-file format has no suspend/resume primitive. This crate gives
//! plain bytecode methods one anyway, in two tightly-coupled steps:
//!
//!   - the [`analyzer`] computes, for every reachable instruction of a method
//!     body, the exact type state of the locals and the operand stack (a
//!     verifier-style abstract interpretation with a finite merge lattice);
//!
//!   - the [`transform`] module uses those frames to rewrite the method into
//!     an explicit state machine: every call site that may suspend is split
//!     into a "save live state and return" path and a "restore live state
//!     and jump back in" path, selected at method entry by a dispatch number.
//!
//! The live values of each instrumented frame travel in generated
//! saved-frame record classes (one per distinct live-type signature), and
//! the [`runtime`] module provides the thread-bound protocol the rewritten
//! code drives: [`runtime::Continuation::perform`] runs a task until it
//! finishes or suspends, and [`runtime::Continuation::resume`] re-enters it.
//!
//! ### Sketch
//!
//! ```no_run
//! use classflow::code::Class;
//! use classflow::jvm::class_graph::{ClassGraph, ClassGraphArenas, ClassPathResolver};
//! use classflow::transform::{ContinuationMethodTransformer, DefaultPolicy};
//!
//! # fn example(mut class: Class) -> Result<(), classflow::transform::Error> {
//! let arenas = ClassGraphArenas::new();
//! let graph = ClassGraph::with_resolver(
//!     &arenas,
//!     Box::new(ClassPathResolver::new(vec!["classes".into()])),
//! );
//! graph.insert_java_library_types();
//!
//! let mut transformer = ContinuationMethodTransformer::new(&graph, Box::new(DefaultPolicy));
//! let rewritten = transformer.transform_class(&mut class)?;
//! println!(
//!     "rewrote {} methods, {} record classes",
//!     rewritten,
//!     transformer.auxiliary_classes().len(),
//! );
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod code;
pub mod jvm;
pub mod runtime;
pub mod transform;
pub mod util;
