//! Payload encryption for the storefront API.
//!
//! Every response body (and optionally request bodies) travels as an
//! opaque encrypted envelope. See [`PayloadCipher`] for the wire format.

pub mod cipher;

pub use cipher::{CipherError, PayloadCipher};
