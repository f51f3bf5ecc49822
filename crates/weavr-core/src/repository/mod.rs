//! Repository trait for the durable scheduler store.

pub mod store;
