//! Game sessions for Tessera.
//!
//! A session is the live game that a lobby turns into. Each one runs as an
//! isolated Tokio task (actor model) that owns its [`SessionCore`]: the
//! single writer of the board, the turn order, seat links and scores.
//!
//! # Key types
//!
//! - [`RuleEngine`]: the trait a game implements
//! - [`SessionRegistry`]: creates, restores and finds sessions
//! - [`SessionHandle`]: send commands to a running session
//! - [`SessionCore`]: the Move Arbiter, driven synchronously
//! - [`TurnCoordinator`] and [`ScoreLedger`]: turn and score bookkeeping
//! - [`SessionConfig`]: deadlines, recovery, score sync and persistence

mod actor;
mod config;
mod error;
mod logic;
mod persist;
mod reconciler;
mod registry;
mod score;
mod session;
mod turn;

pub use actor::{SeatSender, SessionEvent, SessionHandle};
pub use config::{ScoreConfig, SessionConfig, TurnConfig};
pub use error::{Rejection, SessionError};
pub use logic::{Outcome, RuleEngine, ScoreDelta};
pub use registry::{SeatAttachment, SessionRegistry};
pub use score::ScoreLedger;
pub use session::{Effect, Outbound, ScoreCheck, SessionCore, SessionRecord, TimerKey};
pub use turn::{TurnCoordinator, TurnRecord};
