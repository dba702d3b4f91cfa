pub mod driver;
pub mod listener;
