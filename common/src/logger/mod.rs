mod init;
mod spans;
mod trace_id;

pub use init::init_tracing;
pub use spans::{child_span, cycle_span, warn_if_slow};
pub use trace_id::TraceId;
