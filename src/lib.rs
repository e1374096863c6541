pub mod config;
pub mod curve;
pub mod gameplay;
pub mod powertrain;
pub mod vehicle;
pub mod wheel;
