//! Run-time resource manager daemon: event loop, wire protocol, CLI
//! surface and platform backends. The domain model itself (resource
//! ledger, schedulable lifecycle, synchronization protocol, power
//! monitor) lives in the `rust/knhk-*` member crates; this crate is the
//! composition root.

pub mod cli;
pub mod control_loop;
pub mod default_policy;
pub mod deferrable;
pub mod platform;
pub mod power_source;
pub mod rtlib_proto;
