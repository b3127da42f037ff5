//! Utilities shared by the integration tests of the workspace.

#[macro_use]
extern crate tracing;

mod addr;
mod mock;

pub use addr::{get_closed_port, get_unused_addr};
pub use mock::{MockLocalNodes, MockResponse};
