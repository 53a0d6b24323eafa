pub mod aggregate;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod durable;
pub mod error;
pub mod event;
pub mod visitor;
