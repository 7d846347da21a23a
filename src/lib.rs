//! keywarden — a personal secrets vault with multi-device push sync.
//!
//! The server stores per-user records (free text, binary blobs, payment
//! cards, credentials) encrypted at rest, and wakes every registered
//! device of a user after each successful mutation so clients re-pull
//! without polling. Clients can additionally export their full record set
//! into a portable, passphrase-protected snapshot file readable offline.

pub mod client;
pub mod config;
pub mod crypto;
pub mod model;
pub mod server;
