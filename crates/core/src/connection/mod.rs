//! Per-client connection state machine.

mod machine;
mod policy;
mod types;

pub use machine::{Connection, ConnectionHandle, PendingWrite, WriteCompletion};
pub use policy::{Admission, StartPolicy, StartRejection};
pub use types::{ConnectionEvent, ConnectionId, ConnectionStatus, PeerInfo};
