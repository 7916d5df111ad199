#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for the aerial survey mission engine.

pub mod api;
pub mod geodesy;
pub mod model;
pub mod pattern;
pub mod validation;

mod util;

pub use util::{new_ulid, now_secs};
