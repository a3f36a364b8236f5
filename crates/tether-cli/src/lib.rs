//! Tether CLI - command-line client for the companion channel
//!
//! This crate provides a command-line interface for:
//! - Pairing with the companion and unpairing
//! - Establishing secure sessions
//! - Sending encrypted requests
//! - Checking companion availability

pub mod cli;
pub mod companion;
pub mod config;
pub mod output;

#[cfg(test)]
mod proptests;

pub use cli::Cli;
pub use config::{CliOverrides, Config};
pub use output::{JsonResponse, OutputFormat, OutputFormatter};

use tether_core::{ChannelError, SecurityError};
use tether_transport::TransportError;

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Authentication failed - secret missing or wrong, signature rejected
/// - 3: Timeout
/// - 4: Connection failed - companion could not be started or went away
/// - 5: Invalid input
/// - 6: Not paired - pairing required
/// - 7: Session failed - handshake or secure request failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    AuthenticationFailed = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    NotPaired = 6,
    SessionFailed = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&ChannelError> for ExitCode {
    fn from(error: &ChannelError) -> Self {
        match error {
            ChannelError::Auth(_) => ExitCode::AuthenticationFailed,
            ChannelError::Pairing(_) => ExitCode::InvalidInput,
            ChannelError::Security(SecurityError::NotPaired) => ExitCode::NotPaired,
            ChannelError::Security(SecurityError::PeerIdentityKeysUnavailable) => {
                ExitCode::NotPaired
            }
            ChannelError::Security(_) => ExitCode::AuthenticationFailed,
            ChannelError::Session(_) => ExitCode::SessionFailed,
            ChannelError::Transport(TransportError::Timeout) => ExitCode::Timeout,
            ChannelError::Transport(_) => ExitCode::ConnectionFailed,
            ChannelError::Identity(_)
            | ChannelError::Store(_)
            | ChannelError::Protocol(_)
            | ChannelError::Remote { .. } => ExitCode::GeneralError,
        }
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Get the exit code name as a string
    pub fn name(&self) -> &'static str {
        match self {
            ExitCode::Success => "SUCCESS",
            ExitCode::GeneralError => "GENERAL_ERROR",
            ExitCode::AuthenticationFailed => "AUTH_FAILED",
            ExitCode::Timeout => "TIMEOUT",
            ExitCode::ConnectionFailed => "CONNECTION_FAILED",
            ExitCode::InvalidInput => "INVALID_INPUT",
            ExitCode::NotPaired => "NOT_PAIRED",
            ExitCode::SessionFailed => "SESSION_FAILED",
        }
    }
}

#[cfg(test)]
mod exit_code_tests {
    use super::*;
    use tether_core::{AuthError, SessionError};

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Success as i32, 0);
        assert_eq!(ExitCode::GeneralError as i32, 1);
        assert_eq!(ExitCode::AuthenticationFailed as i32, 2);
        assert_eq!(ExitCode::Timeout as i32, 3);
        assert_eq!(ExitCode::ConnectionFailed as i32, 4);
        assert_eq!(ExitCode::InvalidInput as i32, 5);
        assert_eq!(ExitCode::NotPaired as i32, 6);
        assert_eq!(ExitCode::SessionFailed as i32, 7);
    }

    #[test]
    fn test_channel_errors_map_to_exit_codes() {
        let cases: [(ChannelError, ExitCode); 7] = [
            (AuthError::SecretInvalid.into(), ExitCode::AuthenticationFailed),
            (SecurityError::NotPaired.into(), ExitCode::NotPaired),
            (SecurityError::SignatureInvalid.into(), ExitCode::AuthenticationFailed),
            (SessionError::DecryptFailed.into(), ExitCode::SessionFailed),
            (TransportError::Timeout.into(), ExitCode::Timeout),
            (TransportError::Disconnected.into(), ExitCode::ConnectionFailed),
            (ChannelError::Protocol("x".into()), ExitCode::GeneralError),
        ];
        for (error, expected) in cases {
            assert_eq!(ExitCode::from(&error), expected, "{error}");
        }
    }

    #[test]
    fn test_exit_code_names() {
        assert_eq!(ExitCode::Success.name(), "SUCCESS");
        assert_eq!(ExitCode::NotPaired.name(), "NOT_PAIRED");
        assert_eq!(ExitCode::SessionFailed.name(), "SESSION_FAILED");
    }
}
