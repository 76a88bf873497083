//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Caller-chosen identifier correlating a request with its reply or timeout
pub type ApiId = u64;

/// Logical category of request; each kind owns one callback slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKind {
    Version,
    RankResult,
    Reward,
}

impl fmt::Display for ApiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiKind::Version => write!(f, "version"),
            ApiKind::RankResult => write!(f, "rank_result"),
            ApiKind::Reward => write!(f, "reward"),
        }
    }
}

/// Request payloads understood by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Query the runtime's version string
    Version,

    /// Fetch the ranking computed for a previously submitted handle
    RankResult { handle: u64 },

    /// Fetch the reward distribution for a block height under a given algorithm version
    Reward { height: u64, version: String },
}

impl ApiRequest {
    /// The callback slot this request reports to
    pub fn kind(&self) -> ApiKind {
        match self {
            ApiRequest::Version => ApiKind::Version,
            ApiRequest::RankResult { .. } => ApiKind::RankResult,
            ApiRequest::Reward { .. } => ApiKind::Reward,
        }
    }
}

/// Version reported by the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
}

/// One ranked account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub account: String,
    pub score: f64,
}

/// Ranking computed for a handle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankResult {
    pub handle: u64,
    pub ranks: Vec<RankEntry>,
}

/// One reward payout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub account: String,
    pub amount: u64,
}

/// Reward distribution for a height
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardResult {
    pub height: u64,
    pub version: String,
    pub rewards: Vec<RewardEntry>,
}

/// Decoded reply payloads, one variant per [`ApiKind`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ApiResult {
    Version(VersionInfo),
    RankResult(RankResult),
    Reward(RewardResult),
}

impl ApiResult {
    pub fn kind(&self) -> ApiKind {
        match self {
            ApiResult::Version(_) => ApiKind::Version,
            ApiResult::RankResult(_) => ApiKind::RankResult,
            ApiResult::Reward(_) => ApiKind::Reward,
        }
    }
}

/// Typed result of one API kind.
///
/// The `Default` value is the payload handed to handlers on every non-success status.
pub trait ApiResponse: Default + Send + 'static {
    /// Slot this result type is registered under
    const KIND: ApiKind;

    /// Extract the typed payload, handing back mismatched results untouched
    fn from_result(result: ApiResult) -> Result<Self, ApiResult>;
}

impl ApiResponse for VersionInfo {
    const KIND: ApiKind = ApiKind::Version;

    fn from_result(result: ApiResult) -> Result<Self, ApiResult> {
        match result {
            ApiResult::Version(info) => Ok(info),
            other => Err(other),
        }
    }
}

impl ApiResponse for RankResult {
    const KIND: ApiKind = ApiKind::RankResult;

    fn from_result(result: ApiResult) -> Result<Self, ApiResult> {
        match result {
            ApiResult::RankResult(rank) => Ok(rank),
            other => Err(other),
        }
    }
}

impl ApiResponse for RewardResult {
    const KIND: ApiKind = ApiKind::Reward;

    fn from_result(result: ApiResult) -> Result<Self, ApiResult> {
        match result {
            ApiResult::Reward(reward) => Ok(reward),
            other => Err(other),
        }
    }
}

/// Messages sent from the host to the runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    /// Issue (or re-issue) a request
    Call { api_id: ApiId, request: ApiRequest },

    /// Ask the runtime to exit
    Shutdown,
}

/// Messages sent from the runtime to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeMessage {
    /// Answer to a `Call`
    Reply { api_id: ApiId, result: ApiResult },

    /// Runtime finished initialising
    Ready { version: String },
}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}
