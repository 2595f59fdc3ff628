//! Wire types shared by the HTTP API and the controller client.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::controller::{JournalEntry, SnapshotRecord, Volume, VolumeState};
use crate::error::Error;
use crate::rebuild::RebuildDescriptor;
use crate::state::{PeerDetails, QuorumStatus, Registration, Replica, ReplicaState, ReplicaType};

/// Path prefix of every versioned route
pub const API_PREFIX: &str = "/v1";

/// Path of a replica resource, with the address percent-encoded
pub fn replica_path(address: &str) -> String {
    format!("{}/replicas/{}", API_PREFIX, urlencoding::encode(address))
}

/// Path of a volume resource
pub fn volume_path(name: &str) -> String {
    format!("{}/volumes/{}", API_PREFIX, urlencoding::encode(name))
}

/// Volume as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeResource {
    pub id: String,
    pub name: String,
    pub uuid: uuid::Uuid,
    pub state: VolumeState,
    pub generation: u64,
    pub revision: u64,
    pub replicas: Vec<String>,
    pub quorum: QuorumStatus,
    pub snapshots: Vec<SnapshotRecord>,
    pub updated_at: DateTime<Utc>,
    pub links: BTreeMap<String, String>,
    pub actions: BTreeMap<String, String>,
}

impl From<Volume> for VolumeResource {
    fn from(volume: Volume) -> Self {
        let path = volume_path(&volume.name);
        let links = BTreeMap::from([("self".to_string(), path.clone())]);
        let actions = ["start", "snapshot", "revert"]
            .into_iter()
            .map(|action| (action.to_string(), format!("{}/{}", path, action)))
            .collect();

        Self {
            id: volume.name.clone(),
            name: volume.name,
            uuid: volume.id,
            state: volume.state,
            generation: volume.generation,
            revision: volume.revision,
            replicas: volume.replicas.into_iter().collect(),
            quorum: volume.quorum,
            snapshots: volume.snapshots,
            updated_at: volume.updated_at,
            links,
            actions,
        }
    }
}

/// Volume collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCollection {
    pub data: Vec<VolumeResource>,
}

/// Replica as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaResource {
    pub id: String,
    pub address: String,
    pub replica_type: ReplicaType,
    pub state: ReplicaState,
    pub revision_count: u64,
    pub peer_details: PeerDetails,
    pub up_time_secs: u64,
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub links: BTreeMap<String, String>,
    pub actions: BTreeMap<String, String>,
}

impl From<Replica> for ReplicaResource {
    fn from(replica: Replica) -> Self {
        let path = replica_path(&replica.address);
        let links = BTreeMap::from([("self".to_string(), path.clone())]);
        let actions = ["preparerebuild", "verifyrebuild"]
            .into_iter()
            .map(|action| (action.to_string(), format!("{}/{}", path, action)))
            .collect();

        Self {
            id: replica.address.clone(),
            address: replica.address,
            replica_type: replica.replica_type,
            state: replica.state,
            revision_count: replica.revision_count,
            peer_details: replica.peer_details,
            up_time_secs: replica.up_time.as_secs(),
            failure_reason: replica.failure_reason,
            registered_at: replica.registered_at,
            updated_at: replica.updated_at,
            links,
            actions,
        }
    }
}

/// Replica collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaCollection {
    pub data: Vec<ReplicaResource>,
}

/// Journal collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalCollection {
    pub data: Vec<JournalEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInput {
    pub replicas: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotInput {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotOutput {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertInput {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalInput {
    #[serde(default = "default_journal_limit")]
    pub limit: usize,
}

fn default_journal_limit() -> usize {
    100
}

/// Registration as sent by a replica process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterInput {
    pub address: String,
    pub revision_count: u64,
    #[serde(default)]
    pub peer_details: PeerDetails,
    pub replica_type: ReplicaType,
    #[serde(default)]
    pub up_time_secs: u64,
    pub state: ReplicaState,
}

impl From<RegisterInput> for Registration {
    fn from(input: RegisterInput) -> Self {
        Registration {
            address: input.address,
            revision_count: input.revision_count,
            peer_details: input.peer_details,
            replica_type: input.replica_type,
            up_time: Duration::from_secs(input.up_time_secs),
            state: input.state,
        }
    }
}

impl From<Registration> for RegisterInput {
    fn from(reg: Registration) -> Self {
        RegisterInput {
            address: reg.address,
            revision_count: reg.revision_count,
            peer_details: reg.peer_details,
            replica_type: reg.replica_type,
            up_time_secs: reg.up_time.as_secs(),
            state: reg.state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReplicaInput {
    pub address: String,
    #[serde(default = "default_replica_type")]
    pub replica_type: ReplicaType,
}

fn default_replica_type() -> ReplicaType {
    ReplicaType::Quorum
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReplicaInput {
    pub state: ReplicaState,
}

/// Verify report; a present `failure` marks the rebuild as failed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyRebuildInput {
    #[serde(default)]
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareRebuildOutput {
    pub descriptor: RebuildDescriptor,
}

/// Error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    /// Variant payload, used to rebuild the typed error on the client side
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl From<&Error> for ErrorResponse {
    fn from(err: &Error) -> Self {
        let detail = match err {
            Error::NotFound(msg)
            | Error::Conflict(msg)
            | Error::NoOutstandingTicket(msg)
            | Error::Timeout(msg)
            | Error::InvalidRequest(msg)
            | Error::Config(msg) => json!(msg),
            Error::StaleRevision {
                address,
                stored,
                incoming,
            } => json!({ "address": address, "stored": stored, "incoming": incoming }),
            Error::NotQuorate { ready, required } => {
                json!({ "ready": ready, "required": required })
            }
            _ => serde_json::Value::Null,
        };

        Self {
            error: err.to_string(),
            code: err.kind().to_string(),
            detail,
        }
    }
}

impl ErrorResponse {
    /// Turn a decoded error body back into the error it was produced from
    pub fn into_error(self, status: u16) -> Error {
        let text = |detail: &serde_json::Value, fallback: &str| {
            detail.as_str().unwrap_or(fallback).to_string()
        };
        let number = |detail: &serde_json::Value, key: &str| detail[key].as_u64().unwrap_or(0);

        match self.code.as_str() {
            "NOT_FOUND" => Error::NotFound(text(&self.detail, &self.error)),
            "CONFLICT" => Error::Conflict(text(&self.detail, &self.error)),
            "NO_OUTSTANDING_TICKET" => Error::NoOutstandingTicket(text(&self.detail, &self.error)),
            "TIMEOUT" => Error::Timeout(text(&self.detail, &self.error)),
            "CONFIG" => Error::Config(text(&self.detail, &self.error)),
            "INVALID_REQUEST" => Error::InvalidRequest(text(&self.detail, &self.error)),
            "STALE_REVISION" => Error::StaleRevision {
                address: self.detail["address"].as_str().unwrap_or_default().to_string(),
                stored: number(&self.detail, "stored"),
                incoming: number(&self.detail, "incoming"),
            },
            "NOT_QUORATE" => Error::NotQuorate {
                ready: number(&self.detail, "ready") as usize,
                required: number(&self.detail, "required") as usize,
            },
            _ => Error::Api {
                status,
                message: self.error,
            },
        }
    }
}
