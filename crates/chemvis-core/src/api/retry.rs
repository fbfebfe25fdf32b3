//! Per-request authentication retry state machine.
//!
//! ```text
//! Normal --401--> Refreshing --ok--> Replayed --401--> ForcedLogout
//!                     |                  |
//!                     +--failed--> ForcedLogout
//! any other response in Normal or Replayed --> delivered to the caller
//! ```
//!
//! A request leaves `Normal` at most once, so it is refreshed and replayed at
//! most once no matter how the server keeps answering.

use reqwest::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// First attempt, not yet rejected
    Normal,
    /// Rejected once; waiting for a new access token
    Refreshing,
    /// Sent again with the new access token
    Replayed,
    /// Session is unrecoverable; credentials must be cleared
    ForcedLogout,
}

/// What the pipeline must do next for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Hand the response to the caller unchanged
    Deliver,
    /// Obtain a new access token, then replay
    Refresh,
    /// Clear credentials and fail the request
    ForceLogout,
}

/// Tracks one logical request through at most one refresh-and-replay cycle.
#[derive(Debug, Clone, Copy)]
pub struct RetryCycle {
    state: AuthState,
}

impl Default for RetryCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryCycle {
    pub fn new() -> Self {
        Self {
            state: AuthState::Normal,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Whether this request has already used its one replay
    pub fn has_retried(&self) -> bool {
        !matches!(self.state, AuthState::Normal)
    }

    /// Feed the status of the latest response.
    pub fn observe(&mut self, status: StatusCode) -> Step {
        let rejected = status == StatusCode::UNAUTHORIZED;
        match (self.state, rejected) {
            (AuthState::Normal | AuthState::Replayed, false) => Step::Deliver,
            (AuthState::Normal, true) => {
                // Marked before anything else so a second rejection can't loop
                self.state = AuthState::Refreshing;
                Step::Refresh
            }
            (AuthState::Replayed, true) => {
                self.state = AuthState::ForcedLogout;
                Step::ForceLogout
            }
            // No response is expected while refreshing, and nothing leaves ForcedLogout
            (AuthState::Refreshing | AuthState::ForcedLogout, _) => {
                self.state = AuthState::ForcedLogout;
                Step::ForceLogout
            }
        }
    }

    /// A new access token is available; the request is about to be replayed.
    pub fn refreshed(&mut self) {
        self.state = match self.state {
            AuthState::Refreshing => AuthState::Replayed,
            _ => AuthState::ForcedLogout,
        };
    }

    pub fn refresh_failed(&mut self) {
        self.state = AuthState::ForcedLogout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_delivered() {
        let mut cycle = RetryCycle::new();
        assert_eq!(cycle.observe(StatusCode::OK), Step::Deliver);
        assert_eq!(cycle.state(), AuthState::Normal);
        assert!(!cycle.has_retried());
    }

    #[test]
    fn test_other_errors_are_delivered_unchanged() {
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let mut cycle = RetryCycle::new();
            assert_eq!(cycle.observe(status), Step::Deliver);
        }
    }

    #[test]
    fn test_first_rejection_refreshes() {
        let mut cycle = RetryCycle::new();
        assert_eq!(cycle.observe(StatusCode::UNAUTHORIZED), Step::Refresh);
        assert_eq!(cycle.state(), AuthState::Refreshing);
        assert!(cycle.has_retried());

        cycle.refreshed();
        assert_eq!(cycle.state(), AuthState::Replayed);
        assert_eq!(cycle.observe(StatusCode::OK), Step::Deliver);
    }

    #[test]
    fn test_second_rejection_forces_logout() {
        let mut cycle = RetryCycle::new();
        assert_eq!(cycle.observe(StatusCode::UNAUTHORIZED), Step::Refresh);
        cycle.refreshed();
        assert_eq!(cycle.observe(StatusCode::UNAUTHORIZED), Step::ForceLogout);
        assert_eq!(cycle.state(), AuthState::ForcedLogout);

        // Terminal: never asks for another refresh
        assert_eq!(cycle.observe(StatusCode::UNAUTHORIZED), Step::ForceLogout);
        assert_eq!(cycle.observe(StatusCode::OK), Step::ForceLogout);
    }

    #[test]
    fn test_failed_refresh_forces_logout() {
        let mut cycle = RetryCycle::new();
        cycle.observe(StatusCode::UNAUTHORIZED);
        cycle.refresh_failed();
        assert_eq!(cycle.state(), AuthState::ForcedLogout);

        // A late refresh result cannot revive it
        cycle.refreshed();
        assert_eq!(cycle.state(), AuthState::ForcedLogout);
    }

    #[test]
    fn test_at_most_one_refresh_per_request() {
        let mut cycle = RetryCycle::new();
        let mut refreshes = 0;
        for _ in 0..10 {
            match cycle.observe(StatusCode::UNAUTHORIZED) {
                Step::Refresh => {
                    refreshes += 1;
                    cycle.refreshed();
                }
                Step::ForceLogout => break,
                Step::Deliver => unreachable!(),
            }
        }
        assert_eq!(refreshes, 1);
    }
}
