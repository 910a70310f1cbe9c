pub mod gateway;
pub mod registry;

pub use gateway::{ConnectionStream, StreamFrame, StreamGateway};
pub use registry::{Connection, ConnectionRegistry};
