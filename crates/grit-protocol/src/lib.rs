//! Smart transfer protocol for grit.
//!
//! Implements both sides of object exchange over an already-authenticated
//! byte stream:
//!
//! - **upload-pack** serves a fetch: advertise refs, read `want`/`have`
//!   lines, and stream a pack of the objects the client is missing
//! - **receive-pack** serves a push: advertise refs, read ref update
//!   commands and a pack, and apply the updates with per-ref
//!   compare-and-swap
//!
//! All negotiation messages ride on pkt-line framing ([`pktline`]); the
//! pack itself is streamed raw after negotiation ends.

pub mod closure;
pub mod error;
pub mod pktline;
pub mod receive_pack;
pub mod repo;
pub mod upload_pack;

pub use closure::{collect_closure, verify_connected};
pub use error::{ProtocolError, ProtocolResult};
pub use pktline::{Packet, PktLineReader, PktLineWriter, MAX_PKT_PAYLOAD};
pub use receive_pack::{run_receive_pack, ReceivePack};
pub use repo::Repository;
pub use upload_pack::{run_upload_pack, SessionState, UploadPack};
