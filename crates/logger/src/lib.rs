//! Shared tracing setup for the pulsewatch binaries.

mod subscriber;

pub use subscriber::init_tracing_with;
