pub mod config;
pub mod error;
pub mod types;

pub use config::KestrelConfig;
pub use error::{CoordinatorError, KestrelError, KestrelResult};
pub use types::{
    ChannelId, ChannelKey, ConnId, Gxid, LocalXid, NodeId, Participant, Snapshot, TxnStatus, Vote,
};
