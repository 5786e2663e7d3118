//! WebSocket gateway: pushes live query snapshots to identified clients.

pub mod connection;
pub mod dispatcher;
