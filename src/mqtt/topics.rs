use crate::db::models::DeviceType;

/// Subscription filter covering every sensor under `prefix`.
pub fn sensor_filter(prefix: &str) -> String {
    format!("{prefix}/sensors/+")
}

/// The `<name>` of a `<prefix>/sensors/<name>` topic.
pub fn sensor_name<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let name = topic
        .strip_prefix(prefix)?
        .strip_prefix('/')?
        .strip_prefix("sensors/")?;
    (!name.is_empty() && !name.contains('/')).then_some(name)
}

pub fn control_topic(prefix: &str, device: DeviceType) -> String {
    format!("{prefix}/devices/{device}/control")
}
