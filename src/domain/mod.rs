//! Pure domain model: the transfer and session state machines, records and
//! their projection, derived views, and the ports the application drives.

pub mod ports;
pub mod record;
pub mod session;
pub mod transfer;
pub mod views;
