//! Domain types shared by every Chirp node.
//!
//! - **`identity`** – the per-boot numeric id and display name.
//! - **`peer`** – transport-opaque peer addresses, advertisements seen during
//!   discovery, and the well-known service / characteristic identifiers.
//! - **`tone`** – the fixed notification tone table and sample catalogue.

pub mod identity;
pub mod peer;
pub mod tone;
