pub mod batcher;
pub mod engine;
pub mod settings;

pub use engine::{AlertEngine, AlertTransition};
pub use settings::AlertSettings;
