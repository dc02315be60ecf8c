//! Intent snapshots and drift tracking.
//!
//! Every analysis pass produces an [`IntentSnapshot`]. Snapshots are
//! append-only per session; each one after the first may carry a
//! [`DriftVector`] describing how the understood intent moved since the
//! previous snapshot.
//!
//! ```text
//! snapshot #1 ──drift──▶ snapshot #2 ──drift──▶ snapshot #3
//!   goal: "Build something"   goal: "Build a recipe app"   + constraint "iOS"
//! ```

mod drift;
mod schema;
mod store;
mod tracker;
mod types;

pub use drift::{
    compute_drift, AMBIGUITY_DELTA_THRESHOLD, CONSTRAINT_WEIGHT, CRITERION_WEIGHT, GOAL_WEIGHT,
    SCOPE_WEIGHT,
};
pub use schema::{get_schema_version, initialize_schema, is_initialized, SCHEMA_VERSION};
pub use store::{InMemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use tracker::{extract_initial_intent, IntentTracker};
pub use types::{DriftVector, ExtractedIntent, IntentSnapshot, SnapshotId};
