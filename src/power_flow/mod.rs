//! Live power balance of the installation.
//!
//! Reduces the latest inverter/meter/battery reading to the single surplus
//! figure the decision trees consume.

pub mod surplus;

pub use surplus::PvSurplusEvaluator;
