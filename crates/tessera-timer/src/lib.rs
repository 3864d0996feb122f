//! Scheduled work for Tessera session actors.
//!
//! Two primitives, both designed to sit inside an actor's `tokio::select!`
//! loop and both owned by the entity they serve:
//!
//! - [`Deadlines`]: one-shot timers keyed by what they belong to (a seat's
//!   reconnect window, the current turn's deadline). Rescheduling a key
//!   replaces its timer; tearing down a seat or session cancels its keys, so
//!   no callback ever fires against state that is gone.
//! - [`Cadence`]: a fixed-interval tick for periodic work such as score
//!   republishing and auto-save.
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* mutate, maybe reschedule */ }
//!         key = deadlines.next_expired() => { /* handle timer `key` */ }
//!         _ = cadence.tick() => { /* periodic work */ }
//!     }
//! }
//! ```
//!
//! Neither future mutates anything until it resolves, so losing a `select!`
//! race never drops a timer.

mod cadence;
mod deadlines;

pub use cadence::Cadence;
pub use deadlines::Deadlines;
