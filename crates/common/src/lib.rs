// negotiator-common: protocol and command plumbing shared by the host and guest agents

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod shutdown;
pub mod transport;
