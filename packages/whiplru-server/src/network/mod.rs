//! Connection handling: authentication, request dispatch, and the
//! accept-loop server lifecycle.

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod middleware;
pub mod server;
pub mod shutdown;

pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, Phase};
pub use dispatch::RequestHandler;
pub use server::NetworkModule;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
