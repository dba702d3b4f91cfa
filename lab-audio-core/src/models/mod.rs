pub mod config;
pub mod device;
pub mod error;
pub mod message;
pub mod policy;
pub mod state;
pub mod stream;
