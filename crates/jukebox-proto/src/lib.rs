pub mod config;
pub mod display;
pub mod model;
pub mod platform;
pub mod protocol;
