//! Configuration for Troupe
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for a Troupe stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TroupeConfig {
    /// Per-actor defaults
    #[serde(default)]
    pub actor: ActorConfig,

    /// Stage (registry) configuration
    #[serde(default)]
    pub stage: StageConfig,
}

impl TroupeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.actor.validate()?;
        self.stage.validate()?;
        Ok(())
    }
}

/// Per-actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Quota used when an actor is created without an explicit one
    #[serde(default = "default_quota")]
    pub quota_default: usize,

    /// Largest quota an actor may request
    #[serde(default = "default_quota_max")]
    pub quota_max: usize,

    /// Messages an actor may buffer while suspended before further ones bounce
    #[serde(default = "default_suspended_buffer")]
    pub suspended_buffer_max: usize,
}

fn default_quota() -> usize {
    MAILBOX_QUOTA_COUNT_DEFAULT
}

fn default_quota_max() -> usize {
    MAILBOX_QUOTA_COUNT_MAX
}

fn default_suspended_buffer() -> usize {
    SUSPENDED_BUFFER_COUNT_MAX
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            quota_default: default_quota(),
            quota_max: default_quota_max(),
            suspended_buffer_max: default_suspended_buffer(),
        }
    }
}

impl ActorConfig {
    fn validate(&self) -> Result<()> {
        if self.quota_default == 0 {
            return Err(Error::InvalidConfiguration {
                field: "actor.quota_default".into(),
                reason: "must be positive".into(),
            });
        }

        if self.quota_max > MAILBOX_QUOTA_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.quota_max".into(),
                reason: format!("{} exceeds limit {}", self.quota_max, MAILBOX_QUOTA_COUNT_MAX),
            });
        }

        if self.quota_default > self.quota_max {
            return Err(Error::InvalidConfiguration {
                field: "actor.quota_default".into(),
                reason: format!(
                    "{} exceeds actor.quota_max {}",
                    self.quota_default, self.quota_max
                ),
            });
        }

        if self.suspended_buffer_max == 0 {
            return Err(Error::InvalidConfiguration {
                field: "actor.suspended_buffer_max".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(())
    }
}

/// Stage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Maximum number of live actors in the stage
    #[serde(default = "default_max_actors")]
    pub actors_count_max: usize,
}

fn default_max_actors() -> usize {
    STAGE_ACTORS_COUNT_DEFAULT
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            actors_count_max: default_max_actors(),
        }
    }
}

impl StageConfig {
    fn validate(&self) -> Result<()> {
        if self.actors_count_max == 0 || self.actors_count_max > ACTOR_CONCURRENT_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "stage.actors_count_max".into(),
                reason: format!(
                    "{} outside 1..={}",
                    self.actors_count_max, ACTOR_CONCURRENT_COUNT_MAX
                ),
            });
        }
        Ok(())
    }
}
