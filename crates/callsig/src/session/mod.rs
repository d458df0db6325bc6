//! Call sessions: negotiation bookkeeping and the orchestrating state machine

pub mod negotiation;
pub mod orchestrator;
pub mod state;

pub use negotiation::{CandidateDisposition, NegotiationTracker};
pub use orchestrator::{CallSession, SessionEvent, SessionHandle, SessionOptions};
pub use state::{BandwidthStrategy, CallState, NegotiationRole};
