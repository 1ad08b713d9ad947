//! Core types shared across Spotwise components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Spot settings for one node pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotConfig {
    /// Request spot capacity at all
    pub enabled: bool,

    /// Share of the pool placed on spot, 0-100 (0 = unset)
    pub spot_percentage: u32,

    /// Price ceiling per hour (0 = unset)
    pub max_spot_price: f64,

    /// Provision on-demand when spot is rejected
    pub fallback_on_demand: bool,
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            spot_percentage: 0,
            max_spot_price: 0.0,
            fallback_on_demand: true,
        }
    }
}

impl SpotConfig {
    /// Spot enabled for the whole pool, no price ceiling
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Set spot percentage
    pub fn with_percentage(mut self, percentage: u32) -> Self {
        self.spot_percentage = percentage;
        self
    }

    /// Set price ceiling
    pub fn with_max_price(mut self, price: f64) -> Self {
        self.max_spot_price = price;
        self
    }

    /// Set on-demand fallback
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback_on_demand = fallback;
        self
    }

    /// A price ceiling has been configured
    pub fn has_price_limit(&self) -> bool {
        self.max_spot_price > 0.0
    }
}

/// Spot price for an instance type in one zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub instance_type: String,
    pub zone: String,
    pub price: f64,
}

/// Instance shape handed to the provider adapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    pub instance_type: String,
    pub zone: String,
    pub labels: HashMap<String, String>,
}

/// One node of a pool asking for capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRequest {
    /// Registered provider name (e.g. "aws", "gcp")
    pub provider: String,

    /// Node name, used as the instance name
    pub node_name: String,

    /// Instance type to request
    pub instance_type: String,

    /// Candidate zones; a single entry pins the zone
    pub zones: Vec<String>,

    /// Index of this node within its pool
    pub node_index: usize,

    /// Size of the pool
    pub total_nodes: usize,

    /// Spot settings of the pool
    pub spot: SpotConfig,

    /// Extra labels for the instance
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl NodeRequest {
    /// Create a request for node `node_index` of `total_nodes`
    pub fn new(
        provider: impl Into<String>,
        node_name: impl Into<String>,
        instance_type: impl Into<String>,
        node_index: usize,
        total_nodes: usize,
    ) -> Self {
        Self {
            provider: provider.into(),
            node_name: node_name.into(),
            instance_type: instance_type.into(),
            zones: Vec::new(),
            node_index,
            total_nodes,
            spot: SpotConfig::enabled(),
            labels: HashMap::new(),
        }
    }

    /// Pin the request to a single zone
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zones = vec![zone.into()];
        self
    }

    /// Let the allocation strategy choose among several zones
    pub fn with_zones<I, S>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.zones = zones.into_iter().map(Into::into).collect();
        self
    }

    /// Set spot settings
    pub fn with_spot(mut self, spot: SpotConfig) -> Self {
        self.spot = spot;
        self
    }

    /// Add an instance label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Node config for the chosen zone
    pub fn node_config(&self, zone: &str) -> NodeConfig {
        NodeConfig {
            name: self.node_name.clone(),
            instance_type: self.instance_type.clone(),
            zone: zone.to_string(),
            labels: self.labels.clone(),
        }
    }
}

/// Handle to a created spot instance, as returned by the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub id: String,
    pub provider: String,
    pub zone: String,
}

impl std::fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

/// Notice that a spot instance is about to be reclaimed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionEvent {
    /// Unique id for log correlation
    pub id: Uuid,

    /// Node being reclaimed
    pub node_id: String,

    /// Provider that issued the notice
    pub provider: String,

    /// When the notice was received
    pub timestamp: DateTime<Utc>,

    /// Seconds until the provider acts, when known
    pub seconds_until_action: Option<u64>,
}

impl InterruptionEvent {
    /// Create an event stamped with the current time
    pub fn new(provider: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.into(),
            provider: provider.into(),
            timestamp: Utc::now(),
            seconds_until_action: None,
        }
    }

    /// Attach the time remaining before reclamation
    pub fn with_seconds_until_action(mut self, secs: u64) -> Self {
        self.seconds_until_action = Some(secs);
        self
    }
}

/// Coarse status the completion poller acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollStatus {
    /// Not finished yet
    Pending,
    /// Terminal, successful
    Succeeded,
    /// Terminal, failed
    Failed,
}

impl PollStatus {
    /// Terminal statuses end a wait
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollStatus::Pending)
    }
}

/// Phase of an asynchronous backup or restore job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    New,
    InProgress,
    WaitingForPluginOperations,
    Finalizing,
    Completed,
    Failed,
    PartiallyFailed,
    FailedValidation,
    /// Phase string not recognised; treated as still running
    Unknown(String),
}

impl JobPhase {
    /// Parse from the phase string reported by the backup tool
    pub fn parse(s: &str) -> Self {
        match s {
            "" | "New" => Self::New,
            "InProgress" => Self::InProgress,
            "WaitingForPluginOperations" => Self::WaitingForPluginOperations,
            "Finalizing" => Self::Finalizing,
            "Completed" => Self::Completed,
            "Failed" => Self::Failed,
            "PartiallyFailed" => Self::PartiallyFailed,
            "FailedValidation" => Self::FailedValidation,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Map onto the poller's status taxonomy
    pub fn status(&self) -> PollStatus {
        match self {
            JobPhase::Completed => PollStatus::Succeeded,
            JobPhase::Failed | JobPhase::PartiallyFailed | JobPhase::FailedValidation => {
                PollStatus::Failed
            }
            JobPhase::New
            | JobPhase::InProgress
            | JobPhase::WaitingForPluginOperations
            | JobPhase::Finalizing
            | JobPhase::Unknown(_) => PollStatus::Pending,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::New => write!(f, "New"),
            JobPhase::InProgress => write!(f, "InProgress"),
            JobPhase::WaitingForPluginOperations => write!(f, "WaitingForPluginOperations"),
            JobPhase::Finalizing => write!(f, "Finalizing"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
            JobPhase::PartiallyFailed => write!(f, "PartiallyFailed"),
            JobPhase::FailedValidation => write!(f, "FailedValidation"),
            JobPhase::Unknown(s) => write!(f, "{}", s),
        }
    }
}
