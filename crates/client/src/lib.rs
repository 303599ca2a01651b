//! Fsgw core library — persistent Feishu gateway stream listener, in-process
//! event fan-out, and outbound send used by the CLI and any embedding host.

pub mod client;
pub mod config;
pub mod event;
pub mod router;
