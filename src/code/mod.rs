//! Method bodies as data
//!
//! A method body is an ordered sequence of instructions plus an exception
//! table. Instructions live in an append-only arena addressed by stable
//! [`InsnId`] handles; program order is a separate index list, so the
//! transformer can splice new instruction blocks in front of or behind any
//! existing instruction without invalidating handles, jump targets, or the
//! analyzer's frame map.

mod class;
mod instructions;
mod method;

pub use class::*;
pub use instructions::*;
pub use method::*;
