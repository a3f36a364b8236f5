//! Property-based tests for the tether CLI
//!
//! These tests verify configuration and error-reporting properties using proptest.

use proptest::prelude::*;
use std::path::PathBuf;

use tether_core::{ChannelError, ErrorCode};
use tether_transport::{FramingKind, RemoteError};

use crate::config::{CliOverrides, Config, TimeoutsConfig};
use crate::ExitCode;

fn framing() -> impl Strategy<Value = FramingKind> {
    prop_oneof![
        Just(FramingKind::LengthNative),
        Just(FramingKind::LengthBigEndian),
        Just(FramingKind::Passthrough),
    ]
}

fn level() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["error", "warn", "info", "debug", "trace"]).prop_map(String::from)
}

prop_compose! {
    fn valid_config()(
        command in "[a-z/._-]{1,24}",
        args in prop::collection::vec("[a-z-]{1,8}", 0..4),
        framing in framing(),
        short_ms in 1u64..10_000,
        default_ms in 1u64..100_000,
        long_ms in 1u64..1_000_000,
        level in level(),
    ) -> Config {
        let mut config = Config::default();
        config.companion.command = command;
        config.companion.args = args;
        config.companion.framing = framing;
        config.timeouts = TimeoutsConfig { short_ms, default_ms, long_ms };
        config.logging.level = level;
        config
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A saved valid config loads back unchanged.
    #[test]
    fn prop_valid_config_survives_toml(config in valid_config()) {
        prop_assert!(config.validate().is_ok());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        prop_assert_eq!(parsed, config);
    }

    /// Any zero timeout is rejected no matter what else is set.
    #[test]
    fn prop_zero_timeout_rejected(config in valid_config(), which in 0usize..3) {
        let mut config = config;
        match which {
            0 => config.timeouts.short_ms = 0,
            1 => config.timeouts.default_ms = 0,
            _ => config.timeouts.long_ms = 0,
        }
        prop_assert!(config.validate().is_err());
    }

    /// CLI overrides win over whatever the file says.
    #[test]
    fn prop_overrides_win(config in valid_config(), command in "[a-z]{1,12}", path in "[a-z]{1,12}") {
        let overrides = CliOverrides {
            command: Some(command.clone()),
            storage: Some(PathBuf::from(&path)),
            verbose: None,
            debug: None,
        };
        let config = config.with_overrides(&overrides);
        prop_assert_eq!(config.companion.command, command);
        prop_assert_eq!(config.storage.path, Some(PathBuf::from(path)));
    }

    /// Unknown companion codes never report success and keep their code.
    #[test]
    fn prop_unknown_remote_codes_are_general_errors(code in "[a-z]{3}_[a-z]{3,10}_x") {
        let error = ChannelError::from_remote(RemoteError::new(code.clone(), "m"));
        prop_assert_eq!(error.code(), ErrorCode::Remote);
        prop_assert_eq!(ExitCode::from(&error), ExitCode::GeneralError);
    }
}
