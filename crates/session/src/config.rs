//! Session configuration.
//!
//! Loaded once from JSON when the session starts, then updated one key at a
//! time through [`SessionConfig::apply`]. Missing keys take their defaults.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sm64sync_sim::MarioSettings;
use thiserror::Error;

use crate::assets::DEFAULT_MARIO_URL;

// ============================================================================
// Defaults
// ============================================================================

/// Fixed-tick period in milliseconds.
pub const GAME_TICK_MS: u32 = 20;

/// Global actor cap. Zero disables it.
pub const MAX_MARIO_COUNT: u32 = 5;

/// Remote actors farther than this from the viewer stop simulating.
pub const MARIO_CULL_DISTANCE: f32 = 5.0;

pub const DEFAULT_WATER_LEVEL: f32 = -100.0;
pub const DEFAULT_GAS_LEVEL: f32 = -200.0;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown config key `{0}`")]
    UnknownKey(String),

    #[error("config key `{key}` expects {expected}, got {found}")]
    WrongType {
        key: ConfigKey,
        expected: &'static str,
        found: &'static str,
    },

    #[error("config key `{key}` out of range: {reason}")]
    OutOfRange { key: ConfigKey, reason: &'static str },

    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Keys & Values
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    GameTickMs,
    MaxMarioCount,
    MarioCullDistance,
    DeleteAfterDeath,
    PlayCapMusic,
    MarioUrl,
    DefaultWaterLevel,
    DefaultGasLevel,
    RenderSlotLocal,
    DebugLogging,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 10] = [
        ConfigKey::GameTickMs,
        ConfigKey::MaxMarioCount,
        ConfigKey::MarioCullDistance,
        ConfigKey::DeleteAfterDeath,
        ConfigKey::PlayCapMusic,
        ConfigKey::MarioUrl,
        ConfigKey::DefaultWaterLevel,
        ConfigKey::DefaultGasLevel,
        ConfigKey::RenderSlotLocal,
        ConfigKey::DebugLogging,
    ];

    /// JSON field name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GameTickMs => "game_tick_ms",
            Self::MaxMarioCount => "max_mario_count",
            Self::MarioCullDistance => "mario_cull_distance",
            Self::DeleteAfterDeath => "delete_after_death",
            Self::PlayCapMusic => "play_cap_music",
            Self::MarioUrl => "mario_url",
            Self::DefaultWaterLevel => "default_water_level",
            Self::DefaultGasLevel => "default_gas_level",
            Self::RenderSlotLocal => "render_slot_local",
            Self::DebugLogging => "debug_logging",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// A typed value for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    U32(u32),
    F32(f32),
    /// `None` clears an optional text setting.
    Text(Option<String>),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U32(_) => "u32",
            Self::F32(_) => "f32",
            Self::Text(_) => "text",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        Self::U32(value)
    }
}

impl From<f32> for ConfigValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(Some(value.to_string()))
    }
}

// ============================================================================
// Session Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub game_tick_ms: u32,
    pub max_mario_count: u32,
    pub mario_cull_distance: f32,
    pub delete_after_death: bool,
    pub play_cap_music: bool,
    /// Non-modified visual representation. Falls back to [`DEFAULT_MARIO_URL`].
    pub mario_url: Option<String>,
    pub default_water_level: f32,
    pub default_gas_level: f32,
    /// Debug: keep renderer meshes out of the replicated scene.
    pub render_slot_local: bool,
    /// Debug: warn about interactables skipped for unready geometry.
    pub debug_logging: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            game_tick_ms: GAME_TICK_MS,
            max_mario_count: MAX_MARIO_COUNT,
            mario_cull_distance: MARIO_CULL_DISTANCE,
            delete_after_death: true,
            play_cap_music: true,
            mario_url: None,
            default_water_level: DEFAULT_WATER_LEVEL,
            default_gas_level: DEFAULT_GAS_LEVEL,
            render_slot_local: true,
            debug_logging: false,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_tick_ms(self.game_tick_ms)?;
        check_cull_distance(self.mario_cull_distance)?;
        check_finite(ConfigKey::DefaultWaterLevel, self.default_water_level)?;
        check_finite(ConfigKey::DefaultGasLevel, self.default_gas_level)?;
        Ok(())
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(u64::from(self.game_tick_ms))
    }

    /// Identifier of the non-modified visual representation.
    pub fn mario_url(&self) -> &str {
        self.mario_url.as_deref().unwrap_or(DEFAULT_MARIO_URL)
    }

    /// The subset every actor consults while ticking.
    pub fn mario_settings(&self) -> MarioSettings {
        MarioSettings {
            cull_distance: self.mario_cull_distance,
            play_cap_music: self.play_cap_music,
            delete_after_death: self.delete_after_death,
            default_water_level: self.default_water_level,
            default_gas_level: self.default_gas_level,
            render_slot_local: self.render_slot_local,
        }
    }

    /// Apply one live update. Nothing changes when the value is rejected.
    pub fn apply(&mut self, key: ConfigKey, value: ConfigValue) -> Result<(), ConfigError> {
        let wrong_type = |expected: &'static str| ConfigError::WrongType {
            key,
            expected,
            found: value.type_name(),
        };

        match (key, &value) {
            (ConfigKey::GameTickMs, ConfigValue::U32(ms)) => {
                check_tick_ms(*ms)?;
                self.game_tick_ms = *ms;
            }
            (ConfigKey::MaxMarioCount, ConfigValue::U32(count)) => {
                self.max_mario_count = *count;
            }
            (ConfigKey::MarioCullDistance, ConfigValue::F32(distance)) => {
                check_cull_distance(*distance)?;
                self.mario_cull_distance = *distance;
            }
            (ConfigKey::DeleteAfterDeath, ConfigValue::Bool(on)) => self.delete_after_death = *on,
            (ConfigKey::PlayCapMusic, ConfigValue::Bool(on)) => self.play_cap_music = *on,
            (ConfigKey::MarioUrl, ConfigValue::Text(url)) => self.mario_url = url.clone(),
            (ConfigKey::DefaultWaterLevel, ConfigValue::F32(level)) => {
                check_finite(key, *level)?;
                self.default_water_level = *level;
            }
            (ConfigKey::DefaultGasLevel, ConfigValue::F32(level)) => {
                check_finite(key, *level)?;
                self.default_gas_level = *level;
            }
            (ConfigKey::RenderSlotLocal, ConfigValue::Bool(on)) => self.render_slot_local = *on,
            (ConfigKey::DebugLogging, ConfigValue::Bool(on)) => self.debug_logging = *on,

            (ConfigKey::GameTickMs | ConfigKey::MaxMarioCount, _) => return Err(wrong_type("u32")),
            (
                ConfigKey::MarioCullDistance
                | ConfigKey::DefaultWaterLevel
                | ConfigKey::DefaultGasLevel,
                _,
            ) => return Err(wrong_type("f32")),
            (ConfigKey::MarioUrl, _) => return Err(wrong_type("text")),
            (
                ConfigKey::DeleteAfterDeath
                | ConfigKey::PlayCapMusic
                | ConfigKey::RenderSlotLocal
                | ConfigKey::DebugLogging,
                _,
            ) => return Err(wrong_type("bool")),
        }
        Ok(())
    }
}

fn check_tick_ms(ms: u32) -> Result<(), ConfigError> {
    if ms == 0 {
        return Err(ConfigError::OutOfRange {
            key: ConfigKey::GameTickMs,
            reason: "tick period must be positive",
        });
    }
    Ok(())
}

fn check_cull_distance(distance: f32) -> Result<(), ConfigError> {
    if !distance.is_finite() || distance < 0.0 {
        return Err(ConfigError::OutOfRange {
            key: ConfigKey::MarioCullDistance,
            reason: "distance must be finite and non-negative",
        });
    }
    Ok(())
}

fn check_finite(key: ConfigKey, value: f32) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::OutOfRange {
            key,
            reason: "level must be finite",
        });
    }
    Ok(())
}
