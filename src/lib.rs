pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod eams;
pub mod error;
pub mod fmt;
pub mod gateway;
pub mod http;
pub mod logging;
pub mod portal;
pub mod utils;

pub use error::{AuthError, Error, Result};
