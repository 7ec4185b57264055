//! TCP front end: accepts clients and streams synthesized audio back to them.
//!
//! Each accepted socket gets its own task running a [`ConnectionHandler`].
//! The accept loop never waits on a handler, and a failure inside one
//! connection only ever closes that connection.

mod admission;
mod connection;
mod listener;

pub use admission::AdmissionPolicy;
pub use connection::StreamSettings;
pub use listener::Server;
