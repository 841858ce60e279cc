//! Infrastructure layer for the Chirp node.
//!
//! Contains host-facing adapters: radio transports, audio playback, the
//! console display, stdin key input, and TOML config storage.
//!
//! **Dependency rule**: this layer may depend on `application` and `chirp_core`,
//! but MUST NOT be imported by the `application` layer outside of tests.

pub mod audio;
pub mod display;
pub mod input;
pub mod storage;
pub mod transport;
