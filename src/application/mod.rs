//! Application layer - Use cases and boundary interfaces
//!
//! Services implement the use cases over outbound ports; nothing in this
//! layer knows which store or queue backend is wired in.

pub mod ports;
pub mod services;
