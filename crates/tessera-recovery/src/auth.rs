//! Identity hook for the connection handshake.
//!
//! Tessera does not authenticate players. The handshake carries a claimed
//! player id; an [`Authenticator`] decides whether to accept it and which
//! id the connection really speaks for. Deployments that need real identity
//! plug in their own implementation; the server defaults to
//! [`ClaimedIdentity`].

use tessera_protocol::PlayerId;

use crate::RecoveryError;

/// Resolves the identity behind a handshake.
///
/// `Send + Sync + 'static` because one instance is shared by every
/// connection task for the lifetime of the server.
///
/// ```rust
/// use tessera_protocol::PlayerId;
/// use tessera_recovery::{Authenticator, RecoveryError};
///
/// /// Only lets in players from an allow-list.
/// struct AllowList(Vec<PlayerId>);
///
/// impl Authenticator for AllowList {
///     async fn authenticate(
///         &self,
///         claimed: &PlayerId,
///         _name: &str,
///     ) -> Result<PlayerId, RecoveryError> {
///         if self.0.contains(claimed) {
///             Ok(claimed.clone())
///         } else {
///             Err(RecoveryError::AuthFailed(format!("{claimed} not allowed")))
///         }
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Returns the id this connection acts as, or
    /// [`RecoveryError::AuthFailed`].
    fn authenticate(
        &self,
        claimed: &PlayerId,
        name: &str,
    ) -> impl std::future::Future<Output = Result<PlayerId, RecoveryError>> + Send;
}

/// Accepts whatever id the client claims, as long as it is non-empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaimedIdentity;

impl Authenticator for ClaimedIdentity {
    async fn authenticate(
        &self,
        claimed: &PlayerId,
        _name: &str,
    ) -> Result<PlayerId, RecoveryError> {
        if claimed.as_str().trim().is_empty() {
            return Err(RecoveryError::AuthFailed("empty player id".into()));
        }
        Ok(claimed.clone())
    }
}
