//! Transport front door: client websockets in, session transports out.

pub mod events;
pub mod handler;
pub mod server;
pub mod socket;
