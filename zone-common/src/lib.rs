//! Zone Common - shared configuration, error types, and logging setup for
//! the zone screening services.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::Config;
pub use error::Error;
