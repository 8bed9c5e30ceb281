//! Shared state and messaging between the view loop and its front end
//!
//! The view loop is the only writer of [`ViewState`]; the terminal front end
//! reads snapshots and sends [`ViewCommand`]s back.

pub mod messages;
pub mod state;

pub use messages::ViewCommand;
pub use state::{PipelineStats, SharedViewState, ViewState};
