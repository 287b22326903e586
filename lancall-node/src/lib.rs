//! # lancall-node — headless LAN call peer
//!
//! Runs the lancall transport/session layer without any media
//! devices attached: discovery, keepalive, chat, and diagnostics all
//! work, which makes it the tool for bringing up and soak-testing
//! the protocol between two machines (or two terminals with
//! `allow_loopback`). Stdin lines become chat messages; session
//! events and periodic stats land in the log.

pub mod config;
