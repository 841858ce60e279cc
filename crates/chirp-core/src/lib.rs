//! # chirp-core
//!
//! Shared library for Chirp containing the text command codec and the domain
//! types every node agrees on: device identities, peer addresses, discovery
//! advertisements, and the notification tone table.
//!
//! It has zero dependencies on radio stacks, sockets, audio hardware, or the
//! async runtime, so it can be used from the node binary, the test suites, and
//! the benchmarks alike.
//!
//! # Architecture overview
//!
//! Chirp runs on small handheld units that find each other over a short-range
//! radio and swap tiny text commands: chat lines, "play this sound" triggers,
//! notification tones, and identity pings.
//!
//! - **`protocol`** – How a command travels over the air.  Every command is a
//!   single ASCII line `"<senderId>:<kindTag>:<payload>"` that fits in one
//!   radio send unit.
//!
//! - **`domain`** – Identity, peer addressing, the well-known service and
//!   characteristic identifiers, and the fixed tone / sample catalogue.

pub mod domain;
pub mod protocol;

pub use domain::identity::{DeviceIdentity, IdentityError, DEVICE_ID_RANGE};
pub use domain::peer::{
    Advertisement, PeerAddress, PeerRole, PeerState, PendingTarget, ServiceIds,
    DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID,
};
pub use domain::tone::{NotificationKind, ToneSpec, SAMPLE_CATALOGUE};
pub use protocol::codec::{decode_message, decode_str, encode_bounded, encode_message, DecodeError};
pub use protocol::messages::{Message, MessageKind, MAX_PAYLOAD_LEN};
