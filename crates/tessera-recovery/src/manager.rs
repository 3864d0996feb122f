//! The seat-link registry of one session.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use tessera_protocol::{PlayerId, SeatStatus};
use tracing::{debug, info, warn};

use crate::{LinkState, RecoveryConfig, RecoveryError, SeatLink};

/// Outcome of spending one recovery attempt on a disconnected seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Still held. Arm the next attempt after `next_in`.
    Retry { attempt: u32, attempts_left: u32, next_in: Duration },
    /// No attempts left; the seat is now [`LinkState::Failed`].
    Exhausted,
    /// The seat is not disconnected any more; nothing to do.
    Stale,
}

/// How a successful rejoin landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejoin {
    /// The seat was disconnected and is now [`LinkState::Reconnected`].
    Recovered,
    /// The seat was still marked live; the new connection replaces the old.
    Replaced,
}

/// Tracks every seat of one session.
///
/// Owned by the session it serves, so every transition happens on that
/// session's mutation path. Holds no clock: [`disconnect`](Self::disconnect)
/// and [`attempt`](Self::attempt) return how long to wait before the next
/// attempt and the owner arms the timer.
#[derive(Debug)]
pub struct RecoveryManager {
    links: BTreeMap<PlayerId, SeatLink>,
    config: RecoveryConfig,
}

impl RecoveryManager {
    /// All seats connected, each with a fresh token.
    pub fn new(
        config: RecoveryConfig,
        seats: impl IntoIterator<Item = PlayerId>,
    ) -> Self {
        let links = seats
            .into_iter()
            .map(|player_id| {
                let link = SeatLink {
                    player_id: player_id.clone(),
                    state: LinkState::Connected,
                    token: generate_token(),
                };
                (player_id, link)
            })
            .collect();
        Self { links, config }
    }

    /// Rebuilds the registry for a session restored from disk.
    ///
    /// Every seat starts disconnected, with its persisted token, and must
    /// reclaim itself within a fresh window. Seats that had already left or
    /// failed stay that way.
    pub fn restore(
        config: RecoveryConfig,
        seats: impl IntoIterator<Item = (PlayerId, String, SeatStatus)>,
    ) -> Self {
        let links = seats
            .into_iter()
            .map(|(player_id, token, status)| {
                let state = match status {
                    SeatStatus::Failed => LinkState::Failed,
                    SeatStatus::Left => LinkState::Left,
                    SeatStatus::Removed => LinkState::Removed,
                    _ => LinkState::Disconnected { attempts: 0 },
                };
                let link = SeatLink {
                    player_id: player_id.clone(),
                    state,
                    token,
                };
                (player_id, link)
            })
            .collect();
        Self { links, config }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn get(&self, player_id: &PlayerId) -> Option<&SeatLink> {
        self.links.get(player_id)
    }

    pub fn state(&self, player_id: &PlayerId) -> Option<LinkState> {
        self.links.get(player_id).map(|l| l.state)
    }

    pub fn status(&self, player_id: &PlayerId) -> Option<SeatStatus> {
        self.state(player_id).map(|s| s.status())
    }

    pub fn token(&self, player_id: &PlayerId) -> Option<&str> {
        self.links.get(player_id).map(|l| l.token.as_str())
    }

    /// Every seat's token, for persistence.
    pub fn tokens(&self) -> BTreeMap<PlayerId, String> {
        self.links
            .iter()
            .map(|(id, link)| (id.clone(), link.token.clone()))
            .collect()
    }

    pub fn is_connected(&self, player_id: &PlayerId) -> bool {
        self.state(player_id).is_some_and(|s| s.is_connected())
    }

    pub fn is_active(&self, player_id: &PlayerId) -> bool {
        self.state(player_id).is_some_and(|s| s.is_active())
    }

    /// Seats still participating: connected or held open.
    pub fn active_count(&self) -> usize {
        self.links.values().filter(|l| l.state.is_active()).count()
    }

    /// Seats that are currently disconnected and held open.
    pub fn held(&self) -> impl Iterator<Item = &PlayerId> {
        self.links
            .values()
            .filter(|l| matches!(l.state, LinkState::Disconnected { .. }))
            .map(|l| &l.player_id)
    }

    /// A live seat lost its connection. Returns the wait before the first
    /// recovery attempt.
    ///
    /// # Errors
    /// [`RecoveryError::NotConnected`] if the seat was not live.
    pub fn disconnect(
        &mut self,
        player_id: &PlayerId,
    ) -> Result<Duration, RecoveryError> {
        let link = self.link_mut(player_id)?;
        if !link.state.is_connected() {
            return Err(RecoveryError::NotConnected(player_id.clone()));
        }
        link.state = LinkState::Disconnected { attempts: 0 };
        info!(%player_id, "seat disconnected, holding open");
        Ok(self.config.delay_for(1))
    }

    /// Spends one recovery attempt on a held seat. Called when the timer
    /// armed by [`disconnect`](Self::disconnect) or a previous `attempt`
    /// fires.
    pub fn attempt(&mut self, player_id: &PlayerId) -> Attempt {
        let config = &self.config;
        let max = config.max_attempts;

        let Some(link) = self.links.get_mut(player_id) else {
            return Attempt::Stale;
        };
        let LinkState::Disconnected { attempts } = link.state else {
            return Attempt::Stale;
        };

        let spent = attempts + 1;
        if spent >= max {
            link.state = LinkState::Failed;
            warn!(%player_id, attempts = spent, "seat failed, reconnection attempts exhausted");
            return Attempt::Exhausted;
        }

        link.state = LinkState::Disconnected { attempts: spent };
        debug!(%player_id, attempt = spent, "seat still disconnected");
        Attempt::Retry {
            attempt: spent,
            attempts_left: max - spent,
            next_in: config.delay_for(spent + 1),
        }
    }

    /// A connection presents `token` to reclaim `player_id`'s seat.
    ///
    /// # Errors
    /// - [`RecoveryError::NotFound`]: no such seat.
    /// - [`RecoveryError::InvalidToken`]: wrong token.
    /// - [`RecoveryError::Failed`]: attempts already exhausted.
    /// - [`RecoveryError::Gone`]: the seat left or was removed.
    pub fn reconnect(
        &mut self,
        player_id: &PlayerId,
        token: &str,
    ) -> Result<Rejoin, RecoveryError> {
        let link = self.link_mut(player_id)?;
        if link.token != token {
            return Err(RecoveryError::InvalidToken);
        }

        match link.state {
            LinkState::Disconnected { .. } => {
                link.state = LinkState::Reconnected;
                info!(%player_id, "seat reconnected");
                Ok(Rejoin::Recovered)
            }
            LinkState::Connected | LinkState::Reconnected => {
                debug!(%player_id, "seat taken over by a new connection");
                Ok(Rejoin::Replaced)
            }
            LinkState::Failed => Err(RecoveryError::Failed(player_id.clone())),
            LinkState::Left | LinkState::Removed => {
                Err(RecoveryError::Gone(player_id.clone()))
            }
        }
    }

    /// The seat leaves voluntarily.
    pub fn leave(&mut self, player_id: &PlayerId) -> Result<(), RecoveryError> {
        let link = self.link_mut(player_id)?;
        if !link.state.is_active() {
            return Err(RecoveryError::Gone(player_id.clone()));
        }
        link.state = LinkState::Left;
        info!(%player_id, "seat left");
        Ok(())
    }

    /// The seat is thrown out for skipping too many turns.
    pub fn remove(&mut self, player_id: &PlayerId) -> Result<(), RecoveryError> {
        let link = self.link_mut(player_id)?;
        if !link.state.is_active() {
            return Err(RecoveryError::Gone(player_id.clone()));
        }
        link.state = LinkState::Removed;
        info!(%player_id, "seat removed");
        Ok(())
    }

    fn link_mut(
        &mut self,
        player_id: &PlayerId,
    ) -> Result<&mut SeatLink, RecoveryError> {
        self.links
            .get_mut(player_id)
            .ok_or_else(|| RecoveryError::NotFound(player_id.clone()))
    }
}

/// 128 random bits, hex-encoded.
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
