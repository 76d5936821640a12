//! Matchlobby Session Data Model
//!
//! This crate defines the Protobuf message types describing a hosted session:
//! the settings a host submits, the results a search returns, and the beacon a
//! hosting provider publishes on a LAN segment. Providers and the session
//! orchestrator both depend on this crate so a beacon written by one peer
//! decodes identically on another.
//!
//! # Message Categories
//!
//! - **Settings**: what a host asks the provider to create
//! - **Discovery**: search results and LAN beacons
//!
//! Advertised key/value settings live in an ordered map so encodings are
//! byte-stable across peers.

#![deny(unsafe_code)]

use std::collections::BTreeMap;

use prost::Message;
use sha2::{Digest, Sha256};

// ============================================================================
// Well-known Keys and Defaults
// ============================================================================

/// Advertised settings key carrying the match type tag.
pub const MATCH_TYPE_KEY: &str = "MatchType";

/// Compatibility identifier used when no build version is supplied.
pub const DEFAULT_BUILD_UNIQUE_ID: u32 = 1;

// ============================================================================
// Settings
// ============================================================================

/// Settings describing a session to create.
#[derive(Clone, PartialEq, Message)]
pub struct SessionSettings {
    /// Number of publicly joinable connections.
    #[prost(uint32, tag = "1")]
    pub num_public_connections: u32,

    /// LAN-only session (offline provider).
    #[prost(bool, tag = "2")]
    pub is_lan_match: bool,

    /// Clients may join after the session has started.
    #[prost(bool, tag = "3")]
    pub allow_join_in_progress: bool,

    #[prost(bool, tag = "4")]
    pub allow_join_via_presence: bool,

    /// Publish the session so searches can discover it.
    #[prost(bool, tag = "5")]
    pub should_advertise: bool,

    #[prost(bool, tag = "6")]
    pub uses_presence: bool,

    #[prost(bool, tag = "7")]
    pub use_lobbies_if_available: bool,

    /// Build compatibility identifier. Searches only match equal ids.
    #[prost(uint32, tag = "8")]
    pub build_unique_id: u32,

    /// Advertised key/value settings (sorted by key).
    #[prost(btree_map = "string, string", tag = "9")]
    pub settings: BTreeMap<String, String>,
}

impl SessionSettings {
    /// Set an advertised setting, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(key.into(), value.into());
    }

    /// Get an advertised setting.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// The advertised match type tag, if any.
    pub fn match_type(&self) -> Option<&str> {
        self.get(MATCH_TYPE_KEY)
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// A session returned by a search.
///
/// Opaque to the orchestrator apart from the match type tag.
#[derive(Clone, PartialEq, Message)]
pub struct SessionSearchResult {
    /// Provider-scoped session identifier.
    #[prost(string, tag = "1")]
    pub session_id: String,

    /// Display name of the hosting user.
    #[prost(string, tag = "2")]
    pub owning_user_name: String,

    /// Round-trip estimate in milliseconds (0 if unknown).
    #[prost(uint32, tag = "3")]
    pub ping_ms: u32,

    /// Public connections still open.
    #[prost(uint32, tag = "4")]
    pub open_public_connections: u32,

    /// Settings the host advertised.
    #[prost(message, optional, tag = "5")]
    pub settings: Option<SessionSettings>,
}

impl SessionSearchResult {
    /// The advertised match type tag, if any.
    pub fn match_type(&self) -> Option<&str> {
        self.settings.as_ref().and_then(SessionSettings::match_type)
    }
}

/// Beacon a hosting provider publishes on a LAN segment.
#[derive(Clone, PartialEq, Message)]
pub struct AdvertisedSession {
    #[prost(string, tag = "1")]
    pub session_id: String,

    #[prost(string, tag = "2")]
    pub owning_user_name: String,

    /// Address a joining client travels to.
    #[prost(string, tag = "3")]
    pub host_address: String,

    #[prost(uint32, tag = "4")]
    pub open_public_connections: u32,

    #[prost(message, optional, tag = "5")]
    pub settings: Option<SessionSettings>,
}

impl AdvertisedSession {
    /// Build compatibility id of the advertised settings (0 when missing).
    pub fn build_unique_id(&self) -> u32 {
        self.settings
            .as_ref()
            .map(|s| s.build_unique_id)
            .unwrap_or_default()
    }

    /// Decode a beacon from its encoded bytes.
    pub fn decode_beacon(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }

    /// Encode this beacon for publication.
    pub fn encode_beacon(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

impl From<AdvertisedSession> for SessionSearchResult {
    fn from(a: AdvertisedSession) -> Self {
        Self {
            session_id: a.session_id,
            owning_user_name: a.owning_user_name,
            ping_ms: 0,
            open_public_connections: a.open_public_connections,
            settings: a.settings,
        }
    }
}

// ============================================================================
// Build Compatibility
// ============================================================================

/// Derive a build compatibility identifier from a version string.
///
/// First four bytes (big-endian) of the SHA-256 of `version`.
pub fn build_unique_id(version: &str) -> u32 {
    let digest = Sha256::digest(version.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

// ============================================================================
// Tests
// ============================================================================
