//! nearfield-substrate-core: data model and reference evaluator for the
//! Nearfield execution substrate.
//!
//! The substrate is what the host engine actually runs, once per rendered
//! frame: a flat table of named scalar registers, a set of additive
//! weighted-interpolation fragments ("blend trees") that each write one
//! derived register, and guarded state machines whose transitions compare
//! registers against constant thresholds and whose states can drive registers
//! to constants on entry.
//!
//! The compiler crate emits a [`BuildArtifact`]; the [`eval::Evaluator`] here
//! reproduces the host's per-tick semantics so compiled programs can be
//! validated without the host.

pub mod artifact;
pub mod blend;
pub mod eval;
pub mod graph;
pub mod registers;

pub use artifact::BuildArtifact;
pub use blend::{BlendFragment, BlendNode};
pub use eval::Evaluator;
pub use graph::{Condition, DriveAction, Predicate, State, StateId, StateMachine, Transition};
pub use registers::{
    BoolReg, BoolSink, FloatReg, FloatSink, IntReg, RegisterDef, RegisterId, RegisterKind,
    RegisterTable, StorageClass, Value,
};
