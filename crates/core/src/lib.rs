pub mod config;
pub mod error;
pub mod event;

pub use error::*;
pub use event::*;
