pub mod alerts;
pub mod api;
pub mod app;
pub mod automation;
pub mod broadcast;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod merge;
pub mod mqtt;
pub mod notify;
pub mod reading_cache;
pub mod sensors;

#[cfg(test)]
mod testing;
