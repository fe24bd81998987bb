//! Request and response bodies for the HTTP API.

mod billing;
mod scheduling;

pub use billing::*;
pub use scheduling::*;
