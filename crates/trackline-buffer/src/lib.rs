//! Buffer store implementations.
//!
//! [`RedisBuffer`] is the production store and can be shared by several
//! server processes. [`MemoryBuffer`] keeps the same semantics inside one
//! process; it backs tests and single-node deployments without Redis.

pub mod keys;
pub mod memory;
pub mod redis_store;

pub use crate::memory::MemoryBuffer;
pub use crate::redis_store::RedisBuffer;
