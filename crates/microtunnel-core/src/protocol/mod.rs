//! Protocol module containing message types, the binary codec, and the frame
//! assembler.

pub mod assembler;
pub mod codec;
pub mod messages;

pub use assembler::{AssemblerPhase, AssemblyEvent, FrameAssembler};
pub use codec::{decode_request, decode_response, encode_request, encode_response, ProtocolError};
pub use messages::*;
