//! Common utilities shared by the session core and the front end

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
