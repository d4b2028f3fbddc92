//! Application-level error types shared by the binary and the HTTP layer.

pub mod error;
