/// Changes to the authentication state, broadcast by the API client.
///
/// The presentation layer subscribes to these instead of the client
/// navigating anywhere itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    /// A rejected access token was replaced using the refresh token
    Refreshed,
    LoggedOut,
    /// Credentials were cleared because the session could not be recovered
    Invalidated(InvalidationReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// No refresh token was stored
    NoRefreshCredential,
    /// The refresh endpoint rejected the refresh token or returned garbage
    RefreshRejected,
    /// The refresh endpoint could not be reached
    RefreshUnreachable,
    /// The replayed request was rejected again
    ReplayRejected,
}
