//! Session workflow
//!
//! State machine, transition outcomes, action gating and cancellation for
//! a single video creation request.

mod cancellation;
mod events;
mod gate;
mod state;

pub use cancellation::SessionCancellation;
pub use events::Transition;
pub use gate::{download_target, upload_target};
pub use state::{
    FailureKind, Phase, Session, CANCELLED_MESSAGE, SUCCESS_MARKER, TRANSPORT_FAILURE_MESSAGE,
};
