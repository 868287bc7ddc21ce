pub mod config;

pub use config::{AppConfig, DeviceType, GridSettings, ModelSettings, PollingSettings};
