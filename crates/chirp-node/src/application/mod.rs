//! Application layer for the Chirp node.
//!
//! Use cases in this layer depend on the [`transport::Transport`],
//! [`audio::AudioTrigger`] and [`chat::DisplaySink`] abstractions, never on
//! sockets, files, or the terminal directly.
//!
//! # Sub-modules
//!
//! - **`transport`** – The transport binding contract every radio satisfies,
//!   plus the error kinds transports report.
//!
//! - **`audio`** – The audio trigger facade the mesh calls for tones and samples.
//!
//! - **`registry`** – The set of connected peers and their send handles.
//!
//! - **`dispatcher`** – Fans one outgoing command out to every reachable peer.
//!
//! - **`connection_manager`** – Dual-role state machine: accepts inbound
//!   peers, connects to discovered ones, cleans up after disconnects.
//!
//! - **`discovery`** – The periodic scan that feeds the connection manager.
//!
//! - **`chat`** – The handheld session: line buffer, local commands, and what
//!   happens when a command arrives from a peer.

pub mod audio;
pub mod chat;
pub mod connection_manager;
pub mod discovery;
pub mod dispatcher;
pub mod registry;
pub mod transport;
