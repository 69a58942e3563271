//! Swarmlink cryptography
//!
//! Primitives for mutable swarm pointers:
//! - Pointer identities (Ed25519 key pairs derived from a seed)
//! - The signed record codec (canonical payload, signing, verification)

pub mod error;
pub mod identity;
pub mod record;

pub use error::{CryptoError, Result};
pub use identity::{Address, ExportedIdentity, Identity};
pub use record::{Signature, Stuff, Value};

/// Initialize the cryptography library
///
/// This must be called before using any cryptographic functions.
/// It initializes the underlying sodiumoxide library.
pub fn init() -> Result<()> {
    sodiumoxide::init().map_err(|_| CryptoError::InitializationFailed)
}
