//! chirp-node library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does a Chirp node do?
//!
//! Each handheld unit is simultaneously a *server* that accepts inbound
//! peers and a *client* that scans for and connects to other units.  The node:
//!
//! 1. Starts the radio transport: advertise the Chirp service and listen.
//! 2. Scans on a fixed interval and connects to one newly discovered peer
//!    at a time.
//! 3. Keeps a registry of connected peers and fans every typed line out to
//!    all of them (or, in broadcast mode, sends one datagram to everyone).
//! 4. Decodes inbound commands and turns them into display lines and sounds.

/// Application layer: registry, dispatcher, connection manager, scheduler, chat session.
pub mod application;

/// Infrastructure layer: radio transports, audio, display, input, config storage.
pub mod infrastructure;

/// Wiring of all tasks into a running node.
pub mod node;
