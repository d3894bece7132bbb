//! Application layer: the transfer registry, the payload cache behind it and
//! the orchestrator driving transfers through reserve, transmit and confirm.

pub mod orchestrator;
pub mod payloads;
pub mod registry;
