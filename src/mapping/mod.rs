//! Profile model and the evaluation pipeline from physical channels to one
//! virtual-pad snapshot.
//!
//! ```text
//! SourceEvent ──► SourceCache ──► [Binding transform] ──► aggregation ──► PadState
//!                                  invert / remap / curve   OR · max · last-writer
//! ```

pub mod binding;
pub mod evaluator;
pub mod output;
pub mod state;

pub use binding::Binding;
pub use evaluator::evaluate;
pub use output::{MappingProfile, OutputKind, OutputMapping, PadOutput};
pub use state::PadState;
