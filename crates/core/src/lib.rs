pub mod common;
pub mod config;
pub mod error;
pub mod services;

pub use common::{RequestSource, SchedulingUnit, BROADCAST_DEVICE_ID, BROADCAST_DEVICE_UUID};
pub use config::Config;
pub use error::CoreError;
pub use services::ServiceRegistration;
