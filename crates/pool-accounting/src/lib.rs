pub mod config;
pub mod confirmation;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod oracle;
pub mod payout;
pub mod shares;
pub mod window;

pub use config::PoolConfig;
pub use coordinator::PoolCoordinator;
pub use error::{PoolError, Result};
