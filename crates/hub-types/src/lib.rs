//! Farcaster hub wire types for Rust
//!
//! Typed views of the JSON returned by a hub's HTTP API, plus the validation
//! step that turns raw wire messages into the internal [`Cast`] shape. Nothing
//! downstream should reach into wire structs directly; go through
//! [`Cast::try_from_message`] and friends so a shape change upstream fails in
//! one place.
//!
//! # Example
//!
//! ```
//! use hub_types::{Cast, Message};
//!
//! let json = r#"{
//!     "data": {
//!         "type": "MESSAGE_TYPE_CAST_ADD",
//!         "fid": 3,
//!         "timestamp": 100,
//!         "castAddBody": { "text": "gm", "mentions": [], "mentionsPositions": [], "embeds": [] }
//!     },
//!     "hash": "0x0000000000000000000000000000000000000001",
//!     "signer": "0xabcd"
//! }"#;
//!
//! let message: Message = serde_json::from_str(json)?;
//! let cast = Cast::try_from_message(&message)?;
//! assert_eq!(cast.fid, 3);
//! assert_eq!(cast.timestamp, hub_types::PROTOCOL_EPOCH + 100);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unix timestamp (seconds) of protocol time zero
pub const PROTOCOL_EPOCH: i64 = 1_609_459_200;

/// Length of a message hash in hex characters, without the `0x` prefix
pub const HASH_HEX_LEN: usize = 40;

/// Errors raised while validating hub responses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unexpected message type: expected {expected}, found {found}")]
    UnexpectedMessageType { expected: &'static str, found: String },

    #[error("message is missing its {0}")]
    MissingBody(&'static str),

    #[error("invalid message hash: {0}")]
    InvalidHash(String),

    #[error("mentions ({mentions}) and mention positions ({positions}) differ in length")]
    MismatchedMentions { mentions: usize, positions: usize },

    #[error("invalid hex string: {0}")]
    InvalidHex(String),
}

/// Result type for schema validation
pub type Result<T> = std::result::Result<T, SchemaError>;

pub const MESSAGE_TYPE_CAST_ADD: &str = "MESSAGE_TYPE_CAST_ADD";
pub const MESSAGE_TYPE_LINK_ADD: &str = "MESSAGE_TYPE_LINK_ADD";
pub const MESSAGE_TYPE_USER_DATA_ADD: &str = "MESSAGE_TYPE_USER_DATA_ADD";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// A signed hub message as served over HTTP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub data: MessageData,
    pub hash: String,
    #[serde(default)]
    pub signer: String,
}

/// Message payload; exactly one body is populated for a well-formed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    #[serde(rename = "type")]
    pub message_type: String,
    pub fid: u64,
    /// Seconds since [`PROTOCOL_EPOCH`]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_add_body: Option<CastAddBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_body: Option<LinkBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_body: Option<UserDataBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastAddBody {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub mentions: Vec<u64>,
    #[serde(default)]
    pub mentions_positions: Vec<u32>,
    #[serde(default)]
    pub embeds: Vec<WireEmbed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cast_id: Option<CastId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEmbed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_id: Option<CastId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkBody {
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default)]
    pub target_fid: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDataBody {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub value: String,
}

/// One page of messages; an empty `nextPageToken` means the listing is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedMessages {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl PaginatedMessages {
    /// Continuation token, normalizing the empty string hubs send on the last page
    pub fn continuation(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Username proof from `/v1/userNameProofByName` and `/v1/userNameProofsByFid`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNameProof {
    #[serde(default)]
    pub timestamp: i64,
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub fid: u64,
    #[serde(rename = "type", default)]
    pub proof_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNameProofs {
    #[serde(default)]
    pub proofs: Vec<UserNameProof>,
}

/// On-chain signer registration event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerEvent {
    #[serde(default)]
    pub chain_id: u64,
    #[serde(default)]
    pub block_timestamp: i64,
    #[serde(default)]
    pub transaction_hash: String,
    pub fid: u64,
    pub signer_event_body: SignerEventBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerEventBody {
    pub key: String,
    #[serde(default)]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerEvents {
    #[serde(default)]
    pub events: Vec<SignerEvent>,
}

/// Response of `/v1/storageLimitsByFid`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLimits {
    #[serde(default)]
    pub limits: Vec<StorageLimit>,
    #[serde(default)]
    pub units: u64,
    #[serde(default)]
    pub unit_details: Vec<UnitDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageLimit {
    pub store_type: String,
    pub name: String,
    pub limit: u64,
    pub used: u64,
    #[serde(default)]
    pub earliest_timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitDetail {
    pub unit_type: String,
    pub unit_size: u64,
}

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

/// Reference to a cast by author and hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CastId {
    pub fid: u64,
    pub hash: String,
}

/// A cast embed: either a URL or a quoted cast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cast_id: Option<CastId>,
}

/// A validated cast
///
/// `timestamp` is unix seconds (protocol time plus [`PROTOCOL_EPOCH`]).
/// `text` starts out equal to `raw_text`; hydration may rewrite mentions into it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cast {
    pub fid: u64,
    pub hash: String,
    pub text: Option<String>,
    pub raw_text: Option<String>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub mentions: Vec<u64>,
    #[serde(default)]
    pub mentions_positions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cast_id: Option<CastId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_url: Option<String>,
    pub timestamp: i64,
    pub signer: String,
}

impl Cast {
    /// Validate a wire message and convert it into a cast
    pub fn try_from_message(message: &Message) -> Result<Self> {
        if message.data.message_type != MESSAGE_TYPE_CAST_ADD {
            return Err(SchemaError::UnexpectedMessageType {
                expected: MESSAGE_TYPE_CAST_ADD,
                found: message.data.message_type.clone(),
            });
        }
        let body = message
            .data
            .cast_add_body
            .as_ref()
            .ok_or(SchemaError::MissingBody("castAddBody"))?;

        if body.mentions.len() != body.mentions_positions.len() {
            return Err(SchemaError::MismatchedMentions {
                mentions: body.mentions.len(),
                positions: body.mentions_positions.len(),
            });
        }

        let hash = normalize_hash(&message.hash)?;
        let parent_cast_id = body
            .parent_cast_id
            .as_ref()
            .map(|p| {
                Ok::<_, SchemaError>(CastId {
                    fid: p.fid,
                    hash: normalize_hash(&p.hash)?,
                })
            })
            .transpose()?;

        let embeds = body
            .embeds
            .iter()
            .map(|e| Embed {
                url: e.url.clone(),
                cast_id: e.cast_id.clone(),
            })
            .collect();

        Ok(Self {
            fid: message.data.fid,
            hash,
            text: body.text.clone(),
            raw_text: body.text.clone(),
            embeds,
            mentions: body.mentions.clone(),
            mentions_positions: body.mentions_positions.clone(),
            parent_cast_id,
            parent_url: body.parent_url.clone(),
            timestamp: PROTOCOL_EPOCH + message.data.timestamp,
            signer: message.signer.to_lowercase(),
        })
    }

    /// Convert every cast-add message in a page, skipping anything else
    ///
    /// Non-cast messages are silently dropped; malformed cast messages are
    /// reported back so the caller can log them.
    pub fn collect_from(messages: &[Message]) -> (Vec<Cast>, Vec<SchemaError>) {
        let mut casts = Vec::with_capacity(messages.len());
        let mut errors = Vec::new();
        for message in messages {
            if message.data.message_type != MESSAGE_TYPE_CAST_ADD {
                continue;
            }
            match Cast::try_from_message(message) {
                Ok(cast) => casts.push(cast),
                Err(e) => errors.push(e),
            }
        }
        (casts, errors)
    }
}

/// Target fid of a follow link, if the message is one
pub fn follow_target(message: &Message) -> Option<u64> {
    if message.data.message_type != MESSAGE_TYPE_LINK_ADD {
        return None;
    }
    let link = message.data.link_body.as_ref()?;
    if link.link_type != "follow" {
        return None;
    }
    link.target_fid
}

/// User data type as exposed by the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDataType {
    Pfp,
    Display,
    Bio,
    Url,
    Username,
}

impl UserDataType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            UserDataType::Pfp => "USER_DATA_TYPE_PFP",
            UserDataType::Display => "USER_DATA_TYPE_DISPLAY",
            UserDataType::Bio => "USER_DATA_TYPE_BIO",
            UserDataType::Url => "USER_DATA_TYPE_URL",
            UserDataType::Username => "USER_DATA_TYPE_USERNAME",
        }
    }
}

/// Find the first value of a user data type in a page of user data messages
pub fn user_data_value(messages: &[Message], data_type: UserDataType) -> Option<String> {
    messages
        .iter()
        .filter(|m| m.data.message_type == MESSAGE_TYPE_USER_DATA_ADD)
        .filter_map(|m| m.data.user_data_body.as_ref())
        .find(|b| b.data_type == data_type.as_wire())
        .map(|b| b.value.clone())
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

/// Lowercase a `0x`-prefixed message hash and check its shape
pub fn normalize_hash(hash: &str) -> Result<String> {
    let body = hash
        .strip_prefix("0x")
        .ok_or_else(|| SchemaError::InvalidHash(hash.to_string()))?;
    if body.len() != HASH_HEX_LEN || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SchemaError::InvalidHash(hash.to_string()));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// Encode bytes as a `0x`-prefixed lowercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode a `0x`-prefixed hex string
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>> {
    let body = hex
        .strip_prefix("0x")
        .ok_or_else(|| SchemaError::InvalidHex(hex.to_string()))?;
    if body.len() % 2 != 0 {
        return Err(SchemaError::InvalidHex(hex.to_string()));
    }
    (0..body.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&body[i..i + 2], 16)
                .map_err(|_| SchemaError::InvalidHex(hex.to_string()))
        })
        .collect()
}
