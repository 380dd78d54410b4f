//! Common utilities, types, and configurations shared across Conflux crates.
//!
//! This crate contains the base building blocks for the execution runtime, including:
//! - **Configuration**: Strongly typed application configuration (`config`).
//! - **Time**: Injectable clocks for age computations (`clock`).
//! - **Telemetry**: Logging and OpenTelemetry setup (`telemetry`).
//! - **Logging hygiene**: Literal scrubbing for SQL written to logs (`scrubber`).
pub mod clock;
pub mod config;
pub mod scrubber;
pub mod telemetry;
