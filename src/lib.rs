//! PV-aware control engine for a water boiler relay and an EV wallbox.
//!
//! A polling [`controller::Scheduler`] reads the system mode every tick and
//! either follows seasonal time windows or decides from live PV surplus, a
//! cloud-cover forecast and day-ahead price statistics.

pub mod clock;
pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod events;
pub mod forecast;
pub mod power_flow;
pub mod repo;
pub mod store;
pub mod telemetry;
