//! Tabula Crypto - versioned credential encryption
//!
//! Connection credentials are encrypted at rest and decrypted per
//! request. This crate owns the envelope format, key derivation, password
//! hashing and token generation:
//!
//! - `Envelope` - tagged union of the versioned and legacy wire formats
//! - `Codec` - encrypt/decrypt with the process secret or a caller
//!   supplied master password
//! - `hash_password`/`verify_password` - salted, iterated one-way hashing
//! - `random_token` - hex tokens from the system CSPRNG
//!
//! The encoder only ever emits the versioned format; the legacy format
//! stays readable forever but is never written again.

mod codec;
mod envelope;

pub use codec::*;
pub use envelope::*;
