//! # Parley Merge
//!
//! Fact merger for the Parley engine: reduces the ordered facts of a stream
//! to exactly one net effect per entity.

pub mod effect;
pub mod merger;
pub mod splice;

pub use effect::{Assignment, Changes, Delta, EffectShape, NetEffect};
pub use merger::{merge, merge_stream};
pub use splice::{Pivot, PivotNotFound, SpliceOp};
