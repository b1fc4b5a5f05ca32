//! Per-ceremony protocol owner for one operator.
//!
//! A [`LocalOwner`] lives inside a dedicated task spawned by the switch. It
//! consumes peer messages relayed by the initiator, drives the DKG engine,
//! and pushes its own signed broadcasts onto an outbound channel the HTTP
//! handler reads with a bounded timeout.

pub use error::OwnerError;
pub use owner::{LocalOwner, OwnerOpts, PhaseTimer};

mod error;
mod owner;

#[cfg(test)]
mod owner_tests;
