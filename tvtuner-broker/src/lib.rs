//! tvtuner-broker: brokers access to a tuner driver for network clients.
//!
//! - [`hal`]: the driver interface and a simulated driver.
//! - [`service`]: driver binding and session bookkeeping.
//! - [`server`]: TCP front end speaking the `tvtuner-protocol` frames.

pub mod hal;
pub mod logging;
pub mod server;
pub mod service;
