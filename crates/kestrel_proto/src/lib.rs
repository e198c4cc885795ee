pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode_frame, decode_reply, decode_request, encode_reply, FrameBuilder};
pub use error::ProtocolError;
pub use types::*;
