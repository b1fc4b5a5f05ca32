//! Operator-side ceremony service: the [`Switch`] multiplexes authenticated
//! ceremony instances, the server exposes them over HTTP.

pub use server::{router, run};
pub use switch::{Switch, SwitchConfig, SwitchError, MAX_INSTANCES, MAX_INSTANCE_TIME};

mod server;
mod switch;

#[cfg(test)]
mod switch_tests;
