//! Encoding and symmetric crypto primitives for the JQOpenClaw node.
//!
//! [`encoding`] holds the strict base64url codec and the normalization
//! helpers used by device auth and TLS pinning. [`secretbox`] is the
//! ChaCha20-Poly1305 AEAD used by the startup self-test and for sealing
//! payloads.

#![forbid(unsafe_code)]

pub mod encoding;
pub mod secretbox;
