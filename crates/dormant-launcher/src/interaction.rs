//! Signed chat-command interactions.
//!
//! The chat platform signs `timestamp || body` with Ed25519 and sends the
//! hex signature and timestamp as headers. Requests whose timestamp is more
//! than [`DEFAULT_MAX_AGE`] away from the local clock are refused, so a
//! captured request cannot be replayed later. Pings are answered with a pong;
//! application commands carry the verb (`start` / `stop`) as their first
//! option and get a channel message back.

use std::time::Duration;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::{Value, json};

use dormant_core::epoch_secs;

use crate::error::LaunchError;
use crate::launch::{LaunchStatus, Launcher, StopStatus};

pub const SIGNATURE_HEADER: &str = "x-signature-ed25519";
pub const TIMESTAMP_HEADER: &str = "x-signature-timestamp";

/// Largest accepted distance between a request's timestamp and now.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

const PING: u8 = 1;
const APPLICATION_COMMAND: u8 = 2;
const PONG: u8 = 1;
const CHANNEL_MESSAGE: u8 = 4;

#[derive(Debug, Clone)]
pub struct InteractionVerifier {
    key: VerifyingKey,
    max_age: Duration,
}

impl InteractionVerifier {
    pub fn from_hex(public_key_hex: &str) -> Result<Self, LaunchError> {
        let bytes = decode_hex_array::<32>(public_key_hex.trim(), "interaction public key")?;
        let key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| LaunchError::BadSignature(format!("parse interaction public key failed: {e}")))?;
        Ok(Self {
            key,
            max_age: DEFAULT_MAX_AGE,
        })
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn verify(&self, timestamp: &str, body: &[u8], signature_hex: &str) -> Result<(), LaunchError> {
        self.verify_at(timestamp, body, signature_hex, epoch_secs())
    }

    /// Verify against the clock reading `now` (unix seconds).
    pub fn verify_at(
        &self,
        timestamp: &str,
        body: &[u8],
        signature_hex: &str,
        now: u64,
    ) -> Result<(), LaunchError> {
        let sent_at: u64 = timestamp
            .parse()
            .map_err(|_| LaunchError::BadSignature("timestamp must be unix seconds".into()))?;
        if now.abs_diff(sent_at) > self.max_age.as_secs() {
            return Err(LaunchError::BadSignature(format!(
                "timestamp {sent_at} is outside the accepted window"
            )));
        }

        let signature_bytes = decode_hex_array::<64>(signature_hex, "signature")?;
        let signature = Signature::from_bytes(&signature_bytes);

        let mut payload = Vec::with_capacity(timestamp.len() + body.len());
        payload.extend_from_slice(timestamp.as_bytes());
        payload.extend_from_slice(body);

        self.key
            .verify(&payload, &signature)
            .map_err(|e| LaunchError::BadSignature(e.to_string()))
    }
}

fn decode_hex_array<const N: usize>(raw: &str, label: &str) -> Result<[u8; N], LaunchError> {
    let bytes =
        hex::decode(raw).map_err(|_| LaunchError::BadSignature(format!("{label} must be valid hex")))?;
    bytes
        .try_into()
        .map_err(|_| LaunchError::BadSignature(format!("{label} must be {N}-byte hex")))
}

#[derive(Debug, Deserialize)]
struct Interaction {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Option<CommandData>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandData {
    #[serde(default)]
    options: Vec<CommandOption>,
}

#[derive(Debug, Deserialize)]
struct CommandOption {
    name: String,
    #[serde(default)]
    value: Value,
}

impl CommandData {
    /// The verb is the first option's value.
    fn verb(&self) -> Option<&str> {
        self.options.first().and_then(|o| o.value.as_str())
    }

    fn world(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.name == "world")
            .and_then(|o| o.value.as_str())
    }
}

/// Handle an already-verified interaction body and build the reply.
pub async fn handle_interaction(launcher: &Launcher, body: &[u8]) -> Result<Value, LaunchError> {
    let interaction: Interaction =
        serde_json::from_slice(body).map_err(|e| LaunchError::Malformed(e.to_string()))?;

    match interaction.kind {
        PING => Ok(json!({ "type": PONG })),
        APPLICATION_COMMAND => {
            let data = interaction.data.unwrap_or_default();
            let world = match data.world() {
                Some(world) => world,
                None => launcher.default_world()?,
            };
            let content = match data.verb() {
                Some("start") => match launcher.launch(world).await?.status {
                    LaunchStatus::Started => format!("Starting {world}, it will be up in a few minutes."),
                    LaunchStatus::AlreadyRunning => {
                        format!("{world} is already running or starting, try again in a moment.")
                    }
                },
                Some("stop") => match launcher.stop(world).await?.status {
                    StopStatus::Stopping => format!("Stopping {world}."),
                    StopStatus::AlreadyStopped => format!("{world} is already stopped."),
                },
                _ => "Unknown command, use 'start' or 'stop'.".to_string(),
            };
            Ok(message(&content))
        }
        other => Err(LaunchError::Malformed(format!("unsupported interaction type {other}"))),
    }
}

fn message(content: &str) -> Value {
    json!({
        "type": CHANNEL_MESSAGE,
        "data": {
            "tts": false,
            "content": content,
            "embeds": [],
            "allowed_mentions": { "parse": [] },
        }
    })
}
