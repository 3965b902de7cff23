//! Application Layer
//!
//! Use cases orchestrating the domain over the infrastructure.

pub mod dispatch;
