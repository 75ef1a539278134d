//! Client for the EcoWater HydroLink cloud.
//!
//! [`HydroLinkApi`] logs in, pokes each softener's live socket so the cloud
//! pulls fresh values, and fetches the resulting [`Snapshot`].
//! [`Coordinator`] polls it on a fixed interval, and [`sensor`] turns the
//! raw property map into scaled, described readings.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod mqtt;
pub mod property;
pub mod scaling;
pub mod sensor;
mod traits;

pub use api::{HydroLinkApi, SnapshotSource};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle, UpdateStatus};
pub use error::{Error, Result};
pub use property::{Device, Property, PropertyValue, Snapshot};
pub use sensor::{Sensor, build_sensors};
