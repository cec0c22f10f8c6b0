//! Meeting recording lifecycle.
//!
//! Detects meetings through the engine, asks the user for consent, obtains
//! the upload credential, registers the meeting URL and drives the engine
//! through start, pause and stop.

pub mod consent;
pub mod controller;
pub mod registrar;
pub mod session;
pub mod status;
pub mod suppression;

pub use consent::ConsentState;
pub use controller::{Collaborators, ControllerError, ControllerInput, SessionController};
pub use registrar::{MeetingRegistrar, RegistrationOutcome, RegistrationState};
pub use session::MeetingSession;
pub use status::{ControllerSnapshot, RecordingState};
pub use suppression::SuppressionSet;
