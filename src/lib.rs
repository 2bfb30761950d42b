//! Topic-based publish/subscribe broker: registration, leader election,
//! and dual-mode (centralized/decentralized) message dissemination.

pub mod broker;
pub mod config;
pub mod dissemination;
pub mod error;
pub mod port_pool;
pub mod presence;
pub mod registration;
pub mod topic;
pub mod transport;
pub mod wire;

pub use broker::{Broker, BrokerState, ShutdownHandle};
pub use config::{BrokerConfig, BrokerConfigBuilder, EventLoopBound};
pub use dissemination::Mode;
pub use error::{BrokerError, BrokerResult};
