//! nearfield-compiler-core: the code-generation layer.
//!
//! Compiles ordinary continuous arithmetic and decision logic into the two
//! primitives the Nearfield substrate offers: additive blend fragments over
//! 1-2 driving registers, and guarded state machines with entry-time constant
//! drives. Built on top of those, this crate provides:
//!
//! - a register allocator that requests names through an external
//!   [`alloc::RegisterBroker`] (global namespace + synchronized-parameter
//!   budget),
//! - the linear IR primitives in [`program::Program`] (constant, affine copy,
//!   weighted add, bilinear multiply, reciprocal, hysteresis comparison,
//!   conditional select),
//! - one-frame delay, change-gated latch and differentiation in [`delay`],
//! - the proximity-sensor to metric-distance derivation pipeline in
//!   [`proximity`],
//! - the nearest-candidate exclusive selector in [`selector`].
//!
//! Every builder returns a fatal [`error::BuildError`] when a primitive is
//! used outside its documented numeric domain; nothing degrades silently.

pub mod alloc;
pub mod delay;
pub mod error;
pub mod program;
pub mod proximity;
pub mod selector;

pub use alloc::{LocalBroker, RegisterBroker};
pub use error::{BuildError, ReserveError};
pub use program::{Normalized, Operand, Program, SelectBranch, Term};
