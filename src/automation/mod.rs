pub mod config;
pub mod engine;
pub mod pause;
pub mod state_cache;

pub use config::{AutomationConfig, AutomationConfigUpdate, AutomationSettings};
pub use engine::{AutomationAction, AutomationEngine};
pub use pause::DataProcessingPause;
pub use state_cache::DeviceStateCache;
