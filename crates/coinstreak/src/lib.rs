//! Umbrella crate for Coinstreak.
//!
//! This crate is intentionally small: it re-exports the engine and protocol crates
//! so downstream code can depend on a single crate name (`coinstreak`).

pub use coinstreak_engine as engine;
pub use coinstreak_protocol as protocol;
