//! Orchestrator configuration.

use matchlobby_wire::{DEFAULT_BUILD_UNIQUE_ID, build_unique_id};

/// Well-known name every session request is issued under.
pub const GAME_SESSION_NAME: &str = "GameSession";

/// Subsystem name identifying the offline/LAN provider.
pub const NULL_SUBSYSTEM_NAME: &str = "NULL";

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub session_name: String,
    /// A provider reporting this subsystem name gets LAN settings and LAN queries.
    pub null_subsystem_name: String,
    pub build_unique_id: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            session_name: GAME_SESSION_NAME.to_string(),
            null_subsystem_name: NULL_SUBSYSTEM_NAME.to_string(),
            build_unique_id: DEFAULT_BUILD_UNIQUE_ID,
        }
    }
}

impl OrchestratorConfig {
    /// Default configuration with the compatibility id derived from `version`.
    pub fn for_build(version: &str) -> Self {
        Self {
            build_unique_id: build_unique_id(version),
            ..Default::default()
        }
    }
}
