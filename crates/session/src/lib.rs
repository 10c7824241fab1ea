//! Session and tab lifecycle on top of the browser engine.
//!
//! The [`SessionStore`] owns the engine handle, every live session, and the
//! background idle reaper. The gateway layer talks only to the store; the
//! engine is injected through the `porthole_engine` traits so the whole crate
//! is testable against fakes.

pub mod navigate;
mod reaper;
pub mod search;
pub mod store;

pub use navigate::{HistoryMove, NavigateOutcome};
pub use store::{NewSession, Session, SessionStore, StatusReport, TabClose};
