//! Session authentication

pub mod middleware;
pub mod sessions;

pub use middleware::{gate_applies, require_session, session_gate, GateState, ONBOARDING_PATH};
pub use sessions::{Session, SessionError, SessionVerifier, SESSION_COOKIE};
