pub mod config;
pub mod cycle;
pub mod error;
pub mod events;
pub mod force_close;
pub mod funding;
pub mod mailbox;
pub mod retry;
pub mod selection;
pub mod state;

pub use config::{ConfigError, ExecutorConfig};
pub use cycle::{CycleReport, OrderExecutor, ProtectionOutcome};
pub use error::CycleError;
pub use events::{EventBus, TradeEvent};
pub use force_close::ForceCloser;
pub use funding::FundingState;
pub use mailbox::Mailbox;
pub use retry::{Exhausted, RetryPolicy};
pub use selection::SymbolSelection;
pub use state::{CycleState, StateTracker};
