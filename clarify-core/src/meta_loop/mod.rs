//! The clarification loop.
//!
//! [`MetaLoop`] composes the scorer, the sub-agent orchestrator, the intent
//! tracker and the goal echo into a per-session state machine driven by two
//! entry points, [`MetaLoop::start_session`] and [`MetaLoop::continue_session`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use clarify_core::MetaLoop;
//!
//! let meta = MetaLoop::builder().build();
//! let outcome = meta.start_session("s1", "I want to build something").await?;
//! if outcome.needs_clarification {
//!     println!("{}", outcome.response);
//! }
//! ```

mod engine;
mod responses;
mod state;

pub use engine::{MetaLoop, MetaLoopBuilder};
pub use responses::{ERROR_RESPONSE, REFINED_NOTE, RESET_RESPONSE, ROUND_CAP_NOTE, SKIP_NOTE};
pub use state::{ConversationTurn, LoopConfig, SessionState, SessionStatus, TurnOutcome, TurnRole};
