//! Radio transport bindings.
//!
//! # Sub-modules
//!
//! - **`memory`** – `MemoryRadio`, an in-process air medium.  Any number of
//!   nodes attach to it; it supports both modes and fault injection, and backs
//!   the integration tests and the `--simulate` option.
//!
//! - **`lan_mesh`** – Mesh mode over a LAN: UDP advertisement beacons carrying
//!   the service UUID, TCP links verified by a characteristic handshake.
//!
//! - **`lan_broadcast`** – Broadcast mode over a LAN: one UDP datagram per
//!   command to the subnet broadcast address.
//!
//! - **`mock`** – Recording `MockLink` / `MockTransport` for unit tests.

pub mod lan_broadcast;
pub mod lan_mesh;
pub mod memory;
pub mod mock;

pub use lan_broadcast::LanBroadcastTransport;
pub use lan_mesh::{LanMeshConfig, LanMeshTransport};
pub use memory::{MemoryRadio, MemoryTransport};
