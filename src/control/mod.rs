pub mod service;

pub use service::{CommandPublisher, ControlRequest, DeviceController, DEFAULT_PUBLISH_TIMEOUT};
