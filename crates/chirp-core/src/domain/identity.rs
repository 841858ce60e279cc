//! Per-boot device identity.
//!
//! Every node picks a pseudo-random numeric id in [`DEVICE_ID_RANGE`] when it
//! starts.  The id is the sender field of every outgoing command and lets a
//! node recognise (and ignore) its own commands echoed back by the radio.
//! Identities are not persisted; a reboot yields a new one.

use std::fmt;
use std::ops::Range;

use rand::Rng;
use thiserror::Error;

/// Range numeric ids are drawn from.
pub const DEVICE_ID_RANGE: Range<u32> = 1500..2500;

/// Error returned when constructing an identity by hand.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("device id {0} is outside 1500..2500")]
    OutOfRange(u32),
    #[error("display name must not be empty")]
    EmptyName,
}

/// Immutable identity of this node for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    numeric_id: u32,
    display_name: String,
}

impl DeviceIdentity {
    /// Builds an identity from explicit values.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the id is out of range or the name is empty.
    pub fn new(numeric_id: u32, display_name: impl Into<String>) -> Result<Self, IdentityError> {
        if !DEVICE_ID_RANGE.contains(&numeric_id) {
            return Err(IdentityError::OutOfRange(numeric_id));
        }
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(IdentityError::EmptyName);
        }
        Ok(Self {
            numeric_id,
            display_name,
        })
    }

    /// Generates a fresh identity from the thread-local RNG.
    pub fn generate(display_name: Option<&str>) -> Self {
        Self::generate_with(&mut rand::thread_rng(), display_name)
    }

    /// Generates a fresh identity from `rng`.
    ///
    /// A missing or blank `display_name` falls back to `chirp-<id>`.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, display_name: Option<&str>) -> Self {
        let numeric_id = rng.gen_range(DEVICE_ID_RANGE);
        let display_name = match display_name.map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => default_display_name(numeric_id),
        };
        Self {
            numeric_id,
            display_name,
        }
    }

    pub fn numeric_id(&self) -> u32 {
        self.numeric_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.display_name, self.numeric_id)
    }
}

fn default_display_name(numeric_id: u32) -> String {
    format!("chirp-{numeric_id}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
