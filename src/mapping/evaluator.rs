//! Pure aggregation of the active profile over the live source cache.
//!
//! One call produces one fully-populated [`PadState`], regardless of how
//! many outputs are mapped. Aggregation per output kind:
//!
//! - Button / d-pad: logical OR over all bindings.
//! - Trigger: max over all transformed values, 0 with no contribution.
//! - Axis: the transformed value of the binding whose source changed most
//!   recently; center (0.5) when no bound source has ever moved.
//!
//! Bindings whose device is not in the cache contribute nothing.

use tracing::trace;

use crate::input::SourceCache;
use crate::mapping::output::{MappingProfile, OutputKind, OutputMapping};
use crate::mapping::state::PadState;

/// Evaluates `profile` against `cache` into a fresh snapshot.
///
/// Runs in O(total bindings) and never fails: degraded inputs fall back to
/// the output's neutral value.
pub fn evaluate(profile: &MappingProfile, cache: &SourceCache) -> PadState {
    let mut state = PadState::default();

    for (output, mapping) in &profile.mappings {
        match output.kind() {
            OutputKind::Button => {
                state.set_button(*output, any_active(mapping, cache));
            }
            OutputKind::Trigger => {
                state.set_trigger(*output, strongest_press(mapping, cache));
            }
            OutputKind::Axis => {
                state.set_axis(*output, last_writer(mapping, cache));
            }
        }
    }

    state
}

// OR over every binding that has a live value.
fn any_active(mapping: &OutputMapping, cache: &SourceCache) -> bool {
    mapping.bindings.iter().any(|binding| {
        cache
            .value(&binding.source_id())
            .map(|raw| binding.is_active(raw))
            .unwrap_or(false)
    })
}

// Strongest press wins; no binding or no live value means released.
fn strongest_press(mapping: &OutputMapping, cache: &SourceCache) -> f64 {
    mapping
        .bindings
        .iter()
        .filter_map(|binding| {
            cache
                .value(&binding.source_id())
                .map(|raw| binding.transform(raw, OutputKind::Trigger))
        })
        .fold(0.0, f64::max)
}

// The binding whose source moved last. Sources that never reported a change
// (stamp 0) are not candidates; on equal stamps the earlier binding wins,
// so binding order only matters for sources that move in the same instant.
fn last_writer(mapping: &OutputMapping, cache: &SourceCache) -> f64 {
    let mut winner: Option<(u64, f64)> = None;

    for binding in &mapping.bindings {
        let id = binding.source_id();
        let (Some(stamp), Some(raw)) = (cache.last_change(&id), cache.value(&id)) else {
            continue;
        };
        if stamp == 0 {
            continue;
        }
        if winner.map(|(best, _)| stamp > best).unwrap_or(true) {
            let value = binding.transform(raw, OutputKind::Axis);
            trace!("Axis {} led by {} (tick {})", mapping.output, id, stamp);
            winner = Some((stamp, value));
        }
    }

    winner.map(|(_, value)| value).unwrap_or(0.5)
}
