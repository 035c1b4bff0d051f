pub mod engine;
pub mod service;
pub mod states;

pub use engine::{LifecycleEngine, DEFAULT_LINK_BASE_PATH};
pub use service::{Clock, QuoteDocument, RequestService, DEFAULT_MAX_ATTACHMENT_BYTES};
pub use states::{
    Effect, Operation, OperationKind, QuoteChange, Recipient, RequestSnapshot, TransitionOutcome,
};
