//! The relay: registry of live connections plus the relay-wide start policy.

mod admission;
mod events;
mod hook;
mod options;
mod server;

pub use admission::{AdmissionPolicy, DESTINATION_NOT_ALLOWED, LIMIT_REACHED};
pub use events::RelayEvent;
pub use hook::{StartHook, TemplateError, TemplateRewrite};
pub use options::RelayOptions;
pub use server::{ClientChannel, RelayServer};
