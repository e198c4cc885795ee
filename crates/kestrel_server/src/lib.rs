pub mod config;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use dispatch::{ChannelHandler, DispatchOutcome, Dispatcher};
pub use server::KestrelServer;
