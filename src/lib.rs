pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod logging;
pub mod push;
pub mod repository;
pub mod server;
pub mod transport;

pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use push::{DeliveryCoordinator, DeliverySummary, NotificationRequest};
pub use server::BridgeServer;
