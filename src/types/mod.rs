//! Shared data structures for the tag-processing pipeline
//!
//! This module defines the types that cross component boundaries:
//! - Ingestion: [`Tag`] (one timestamped event from the tagger)
//! - Phase assignment: [`DataChannel`], [`PhaseEvent`]
//! - Coincidence: [`CoincidencePair`]
//! - Hand-off: [`Snapshot`] (one drained block of derived series)

mod tag;
mod snapshot;

pub use tag::*;
pub use snapshot::*;
