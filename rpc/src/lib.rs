/// JSON-RPC request bindings
pub mod request;

/// JSON-RPC response bindings
pub mod response;

/// JSON-RPC error bindings
pub mod error;

/// Fixed-width hex parsing and emission for 256-bit quantities
pub mod hex;
