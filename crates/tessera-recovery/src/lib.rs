//! Seat recovery for Tessera sessions.
//!
//! A seat outlives the connection that fills it. This crate tracks, per
//! seat, whether a live connection backs it and what happens when one goes
//! away:
//!
//! ```text
//!   Connected ──(lost)──→ Disconnected ──(token, in window)──→ Reconnected
//!                              │
//!                              └──(attempts exhausted)──→ Failed
//! ```
//!
//! plus the terminal `Left` and `Removed` standings. The [`RecoveryManager`]
//! is plain data with no clock of its own: it tells its owner how long to
//! wait before each attempt and the owner arms the timer. That keeps every
//! transition on the session's single mutation path.
//!
//! Identity is resolved at handshake through the [`Authenticator`] hook.

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod link;
mod manager;

pub use auth::{Authenticator, ClaimedIdentity};
pub use error::RecoveryError;
pub use link::{LinkState, RecoveryConfig, SeatLink};
pub use manager::{Attempt, RecoveryManager, Rejoin};
