//! Shared protocol definitions for the Xtty wire format.

pub mod codec;
pub mod packet;
pub mod room_code;

pub use codec::{CodecError, decode, encode};
pub use packet::{Packet, PacketType, Payload};
