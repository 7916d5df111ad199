#![forbid(unsafe_code)]

//! Survey mission daemon: vehicle link, mission state machine, telemetry and
//! the operator channels.

pub mod app;
pub mod channel;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod mission;
pub mod telemetry;
pub mod vehicle;
