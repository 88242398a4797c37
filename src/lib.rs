pub mod config;
pub mod desk;
pub mod error;
pub mod fixture;
pub mod logging;
pub mod model;
pub mod notify;
pub mod products;
pub mod progress;
pub mod session;
pub mod store;
