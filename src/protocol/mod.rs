pub mod envelope;
pub mod operation;
pub mod registry;

pub use envelope::{RequestEnvelope, RequestHeader, ResponseBody, ResponseOutcome};
pub use operation::Operation;
pub use registry::ProtocolRegistry;
