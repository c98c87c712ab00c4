//! `aram_client`
//!
//! Client-side systems:
//! - Input capture and sequenced input samples
//! - Prediction and reconciliation of the local player
//! - Interpolation for remote player states
//! - A session that ties them to an inbound/outbound message boundary

pub mod client;
pub mod input;
pub mod interp;
pub mod prediction;

pub use client::{ClientSession, Inbound, InboundSender, SessionState};
