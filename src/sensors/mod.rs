pub mod service;

pub use service::{parse_reading, IngestOutcome, SensorService};
