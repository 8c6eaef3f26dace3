pub mod config;
pub mod position;
pub mod service;

pub use config::*;
pub use position::*;
pub use service::*;
