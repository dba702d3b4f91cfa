pub mod microphone;
pub mod registry;
pub mod selection;
pub mod speaker;
