//! Node domain model.
//!
//! A node is a unit of stimulus/work handed to participants as trials.
//! Collaborative nodes also collect [`ResponseUnit`]s from the crowd.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::asset::AssetDeclaration;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Node can still be assigned
    Active,
    /// Node converged; terminal
    Frozen,
    /// Node ran out of iterations without converging; terminal
    Retired,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Frozen => "frozen",
            Self::Retired => "retired",
        }
    }

    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Frozen => 1,
            Self::Retired => 2,
        }
    }

    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Frozen,
            2 => Self::Retired,
            _ => Self::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(&self) -> Vec<NodeState> {
        match self {
            Self::Active => vec![Self::Frozen, Self::Retired],
            Self::Frozen | Self::Retired => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Node declaration as produced by a node source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Opaque stimulus description
    #[serde(default)]
    pub definition: Value,
    /// Named assets the stimulus needs
    #[serde(default)]
    pub assets: BTreeMap<String, AssetDeclaration>,
}

impl NodeSpec {
    pub fn new(definition: Value) -> Self {
        Self {
            definition,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, name: impl Into<String>, asset: AssetDeclaration) -> Self {
        self.assets.insert(name.into(), asset);
        self
    }
}

/// A piece of crowd-contributed content on a node, e.g. a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseUnit {
    pub id: Uuid,
    pub text: String,
    pub author: Uuid,
    pub rating_count: u32,
    pub mean_rating: f64,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
}

impl ResponseUnit {
    pub fn new(text: impl Into<String>, author: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            author,
            rating_count: 0,
            mean_rating: 0.0,
            frozen: false,
            created_at: Utc::now(),
        }
    }

    /// Normalized form used for duplicate detection.
    pub fn normalized(text: &str) -> String {
        text.trim().to_lowercase()
    }

    /// Apply one rating with a streaming mean update.
    ///
    /// Frozen units ignore ratings. Returns `true` if this rating froze the unit.
    pub fn rate(&mut self, rating: f64, freeze_on_n_ratings: u32, freeze_on_mean_rating: f64) -> bool {
        if self.frozen {
            return false;
        }
        self.rating_count += 1;
        self.mean_rating += (rating - self.mean_rating) / f64::from(self.rating_count);
        if self.rating_count >= freeze_on_n_ratings && self.mean_rating >= freeze_on_mean_rating {
            self.frozen = true;
            return true;
        }
        false
    }
}

/// Read-only snapshot of a node, handed to analyzers and renderers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: Uuid,
    pub definition: Value,
    /// Asset name to public URL
    pub asset_urls: BTreeMap<String, String>,
    pub state: NodeState,
    pub exposure_count: u32,
    pub iterations: u32,
    pub units: Vec<ResponseUnit>,
}
