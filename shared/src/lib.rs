/// Shared types for the YTM native host: wire protocol, framing, errors.
pub mod errors;
pub mod framing;
pub mod ipc_protocol;
