pub mod controller;

pub use controller::{CONFIG_ENV, CONFIG_PATHS, Emailit, SHUTDOWN_BROADCAST, Services};
