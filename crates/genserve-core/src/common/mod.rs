pub mod engine;
pub mod error;
pub mod request;
pub mod sampling;
pub mod types;

pub use error::*;
