pub mod config;
pub mod crypto;
pub mod entities;
pub mod error;
pub mod ports;
pub mod use_cases;

pub use error::Error;
