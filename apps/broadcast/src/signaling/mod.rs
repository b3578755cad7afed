pub mod correlator;
pub mod machine;

pub use correlator::{NotFound, PendingAction, PendingRequest, RequestCorrelator};
pub use machine::{
    Classification, NegotiationRole, SignalingMachine, SignalingState, classify,
};
