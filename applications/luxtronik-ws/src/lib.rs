pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod layout;
pub mod mqtt;
pub mod session;
pub mod snapshot;
pub mod value;
pub mod xml;

pub use bridge::{Bridge, EntityHost};
pub use config::Config;
pub use coordinator::{validate_credentials, Coordinator};
pub use entity::{DeviceInfo, EntityDescriptor, EntitySet, SensorKind};
pub use error::{AppError, Result, SetupError};
pub use layout::{FirmwareLayout, LayoutTable};
pub use snapshot::Snapshot;
pub use value::{Reading, SensorValue};
