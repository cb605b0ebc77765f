//! Common code shared between `infer_loop` and `demo_server`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
