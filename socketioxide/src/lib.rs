//! Server-side Socket.IO v5 multiplexing layer, built on top of the
//! [`engineioxide`] Engine.IO session layer.
//!
//! [`SocketIoServer`] implements `engineioxide::EngineIoHandler`; mount it
//! via `EngineIo::new` + `EngineIoService` the same way any other handler
//! is mounted. Namespaces, rooms and acks are declared through
//! [`SocketIoBinding`] or directly through [`Namespace`]/[`Operators`].

pub mod adapter;
pub mod binding;
pub mod errors;
pub mod io;
pub mod ns;
pub mod operators;
pub mod packet;
pub mod parser;
pub mod socket;

pub use adapter::{Adapter, LocalAdapter};
pub use binding::SocketIoBinding;
pub use errors::{AckError, BroadcastError, Error};
pub use io::SocketIoServer;
pub use ns::Namespace;
pub use operators::{Operators, Room};
pub use packet::{PacketType, SocketIoPacket, DEFAULT_NAMESPACE};
pub use parser::{deconstruct, reconstruct, Payload, SocketIoParser};
pub use socket::{AckSender, NamespaceSocket};
