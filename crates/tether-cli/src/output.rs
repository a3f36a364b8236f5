//! Output formatting for CLI results
//!
//! Three output formats are supported:
//! - Table: Human-readable tables (default)
//! - JSON: Structured JSON for scripting and automation
//! - Quiet: Minimal output, exit codes only

use std::str::FromStr;

use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;
use serde_json::Value;

use tether_core::protocol::encode_b64;
use tether_core::{Availability, PinnedPeerIdentity};

use crate::ExitCode;

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Quiet,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "quiet" => Ok(Self::Quiet),
            _ => Err(format!("Unknown output format: {s}")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Quiet => write!(f, "quiet"),
        }
    }
}

/// Standard JSON response wrapper for consistent schema
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// ISO 8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl<T: Serialize> JsonResponse<T> {
    /// Create a successful response with command context
    pub fn success_with_command(data: T, command: &str) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: Some(command.to_string()),
        }
    }
}

impl JsonResponse<()> {
    /// Create an error response
    pub fn error(message: &str) -> JsonResponse<()> {
        JsonResponse {
            success: false,
            data: None,
            error: Some(message.to_string()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            command: None,
        }
    }
}

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub state: String,
    pub paired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Whether the companion still knows this client; unknown when unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion_knows_client: Option<bool>,
}

#[derive(Serialize)]
struct PairingOutput {
    fingerprint: String,
    signing_public_key: String,
    exchange_public_key: String,
}

impl From<&PinnedPeerIdentity> for PairingOutput {
    fn from(identity: &PinnedPeerIdentity) -> Self {
        Self {
            fingerprint: identity.fingerprint.clone(),
            signing_public_key: encode_b64(&identity.signing_public_key),
            exchange_public_key: encode_b64(&identity.exchange_public_key),
        }
    }
}

#[derive(Serialize)]
struct SessionOutput<'a> {
    session_id: &'a str,
}

/// Formats output for different modes
pub struct OutputFormatter {
    format: OutputFormat,
    verbose: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }

    /// Format a freshly pinned companion identity
    pub fn format_pairing(&self, identity: &PinnedPeerIdentity) -> String {
        match self.format {
            OutputFormat::Table => {
                let output = PairingOutput::from(identity);
                let mut table = new_table(&["Field", "Value"]);
                table.add_row(vec!["Fingerprint", output.fingerprint.as_str()]);
                table.add_row(vec!["Signing key", output.signing_public_key.as_str()]);
                table.add_row(vec!["Exchange key", output.exchange_public_key.as_str()]);
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(&PairingOutput::from(identity), "pair"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_status(&self, report: &StatusReport) -> String {
        match self.format {
            OutputFormat::Table => {
                let mut table = new_table(&["Field", "Value"]);
                table.add_row(vec!["State".to_string(), report.state.clone()]);
                table.add_row(vec!["Paired".to_string(), yes_no(report.paired)]);
                if let Some(ref fingerprint) = report.fingerprint {
                    table.add_row(vec!["Fingerprint".to_string(), fingerprint.clone()]);
                }
                table.add_row(vec!["Companion available".to_string(), yes_no(report.available)]);
                if let Some(ref message) = report.message {
                    table.add_row(vec!["Message".to_string(), message.clone()]);
                }
                if let Some(known) = report.companion_knows_client {
                    table.add_row(vec!["Known to companion".to_string(), yes_no(known)]);
                }
                table.to_string()
            }
            OutputFormat::Json => self.to_json_response(report, "status"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_availability(&self, availability: &Availability) -> String {
        match self.format {
            OutputFormat::Table => match (availability.available, &availability.message) {
                (true, _) => "Companion available".to_string(),
                (false, Some(message)) => format!("Companion unavailable: {message}"),
                (false, None) => "Companion unavailable".to_string(),
            },
            OutputFormat::Json => self.to_json_response(availability, "ping"),
            OutputFormat::Quiet => String::new(),
        }
    }

    pub fn format_session(&self, session_id: &str) -> String {
        match self.format {
            OutputFormat::Table => format!("Secure session established: {session_id}"),
            OutputFormat::Json => self.to_json_response(&SessionOutput { session_id }, "handshake"),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format the decrypted result of a secure request
    pub fn format_value(&self, value: &Value, command: &str) -> String {
        match self.format {
            OutputFormat::Table => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
            OutputFormat::Json => self.to_json_response(value, command),
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Format error with exit code context
    pub fn format_error_with_code(&self, error: &dyn std::error::Error, code: ExitCode) -> String {
        match self.format {
            OutputFormat::Table => format!("Error: {error}"),
            OutputFormat::Json => {
                let mut output = serde_json::to_value(JsonResponse::error(&error.to_string()))
                    .unwrap_or(Value::Null);
                if let Value::Object(ref mut map) = output {
                    map.insert("exit_code".into(), serde_json::json!(code as i32));
                    map.insert("exit_code_name".into(), serde_json::json!(code.name()));
                }
                self.to_json(&output)
            }
            OutputFormat::Quiet => String::new(),
        }
    }

    /// Progress message, only shown in verbose mode
    pub fn progress(&self, message: &str) {
        if self.verbose && self.format == OutputFormat::Table {
            eprintln!("... {message}");
        }
    }

    pub fn success(&self, message: &str) {
        if self.format == OutputFormat::Table {
            println!("✓ {message}");
        }
    }

    fn to_json<T: Serialize>(&self, value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    }

    fn to_json_response<T: Serialize>(&self, value: &T, command: &str) -> String {
        self.to_json(&JsonResponse::success_with_command(value, command))
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header.to_vec());
    table
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity() -> PinnedPeerIdentity {
        PinnedPeerIdentity {
            fingerprint: "0a1b2c3d4e5f6071".into(),
            signing_public_key: [1u8; 32],
            exchange_public_key: [2u8; 32],
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_pairing_table_shows_fingerprint() {
        let out = OutputFormatter::new(OutputFormat::Table, false).format_pairing(&identity());
        assert!(out.contains("0a1b2c3d4e5f6071"));
    }

    #[test]
    fn test_pairing_json_schema() {
        let out = OutputFormatter::new(OutputFormat::Json, false).format_pairing(&identity());
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["command"], "pair");
        assert_eq!(value["data"]["fingerprint"], "0a1b2c3d4e5f6071");
        assert_eq!(value["data"]["signing_public_key"], encode_b64(&[1u8; 32]));
    }

    #[test]
    fn test_quiet_prints_nothing() {
        let formatter = OutputFormatter::new(OutputFormat::Quiet, true);
        assert!(formatter.format_pairing(&identity()).is_empty());
        assert!(formatter.format_value(&json!({"a": 1}), "request").is_empty());
    }

    #[test]
    fn test_error_json_carries_exit_code() {
        let error = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let out = OutputFormatter::new(OutputFormat::Json, false)
            .format_error_with_code(&error, ExitCode::Timeout);
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "boom");
        assert_eq!(value["exit_code"], 3);
        assert_eq!(value["exit_code_name"], "TIMEOUT");
    }

    #[test]
    fn test_status_table_omits_unknowns() {
        let report = StatusReport {
            state: "unpaired".into(),
            paired: false,
            fingerprint: None,
            available: false,
            message: Some("not running".into()),
            companion_knows_client: None,
        };
        let out = OutputFormatter::new(OutputFormat::Table, false).format_status(&report);
        assert!(out.contains("not running"));
        assert!(!out.contains("Known to companion"));
    }
}
