// ── Wire models ──
//
// Payloads exchanged with the queue server. The status snapshot is kept
// mostly opaque: only `manager_state` is typed, every other field the
// server sends is preserved in `extra`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Metadata for a single allowed plan (parameters, description, ...).
pub type PlanMetadata = Map<String, Value>;

/// Plan name -> plan metadata.
pub type PlansMap = BTreeMap<String, PlanMetadata>;

// ── StatusSnapshot ───────────────────────────────────────────────────

/// Point-in-time status report from the run engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Manager state, e.g. `"idle"`, `"executing_queue"`, `"paused"`.
    pub manager_state: String,

    /// All remaining fields the server sends.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusSnapshot {
    /// Look up an untyped status field by its wire name.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Whether the RE worker environment is open.
    pub fn worker_environment_exists(&self) -> bool {
        self.field("worker_environment_exists")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Number of items in the plan queue, if reported.
    pub fn items_in_queue(&self) -> Option<u64> {
        self.field("items_in_queue").and_then(Value::as_u64)
    }
}

// ── StatusWsMessage ──────────────────────────────────────────────────

/// Frame pushed over the status WebSocket:
/// `{ "time": 1700000000.0, "msg": { "status": { ... } } }`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusWsMessage {
    #[serde(default)]
    pub time: Option<f64>,
    pub msg: StatusWsPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusWsPayload {
    pub status: StatusSnapshot,
}

impl StatusWsMessage {
    /// Decode a text frame into the status it carries.
    pub fn parse(text: &str) -> Result<StatusSnapshot, Error> {
        serde_json::from_str::<Self>(text)
            .map(|m| m.msg.status)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: text.to_owned(),
            })
    }
}

// ── Allowed plans ────────────────────────────────────────────────────

/// Response envelope of `GET /api/plans/allowed`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlansAllowedResponse {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub plans_allowed: PlansMap,
}

impl PlansAllowedResponse {
    /// Decode the raw response map returned by
    /// [`RunEngineService::plans_allowed_raw`](crate::RunEngineService::plans_allowed_raw).
    pub fn from_raw(raw: Map<String, Value>) -> Result<Self, Error> {
        let value = Value::Object(raw);
        serde_json::from_value(value.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: value.to_string(),
        })
    }

    /// Unwrap the plans, turning `success: false` into [`Error::Rejected`].
    pub fn into_plans(self) -> Result<PlansMap, Error> {
        if self.success {
            Ok(self.plans_allowed)
        } else {
            Err(Error::Rejected { message: self.msg })
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
