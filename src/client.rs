//! Controller Client
//!
//! HTTP client for the controller's REST API. Volume and replica actions are
//! reached through the `actions` links the server returns on each resource.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::api::types::*;
use crate::controller::JournalEntry;
use crate::error::{Error, Result};
use crate::rebuild::RebuildDescriptor;
use crate::state::{Registration, ReplicaState, ReplicaType};

/// Client for one controller endpoint
#[derive(Debug, Clone)]
pub struct ControllerClient {
    base: String,
    http: Client,
}

impl ControllerClient {
    /// Create a client for `endpoint` (e.g. http://127.0.0.1:9501)
    pub fn new(endpoint: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base, path)
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        tracing::debug!("Controller returned {}: {}", status, body);
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) => Err(err.into_error(status.as_u16())),
            Err(_) => Err(Error::Api {
                status: status.as_u16(),
                message: body,
            }),
        }
    }

    fn action<'a>(
        actions: &'a std::collections::BTreeMap<String, String>,
        name: &str,
    ) -> Result<&'a str> {
        actions
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Internal(format!("resource has no '{}' action", name)))
    }

    // ============ Volume ============

    pub async fn get_volume(&self) -> Result<VolumeResource> {
        let collection: VolumeCollection = self
            .send(self.http.get(self.url(&format!("{}/volumes", API_PREFIX))))
            .await?;
        collection
            .data
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("volume".into()))
    }

    pub async fn start(&self, replicas: Vec<String>) -> Result<VolumeResource> {
        let volume = self.get_volume().await?;
        let url = self.url(Self::action(&volume.actions, "start")?);
        self.send(self.http.post(url).json(&StartInput { replicas }))
            .await
    }

    /// Take a snapshot and return its name
    pub async fn snapshot(&self, name: &str) -> Result<String> {
        let volume = self.get_volume().await?;
        let url = self.url(Self::action(&volume.actions, "snapshot")?);
        let output: SnapshotOutput = self
            .send(self.http.post(url).json(&SnapshotInput {
                name: name.to_string(),
            }))
            .await?;
        Ok(output.id)
    }

    pub async fn revert_volume(&self, name: &str) -> Result<VolumeResource> {
        let volume = self.get_volume().await?;
        let url = self.url(Self::action(&volume.actions, "revert")?);
        self.send(self.http.post(url).json(&RevertInput {
            name: name.to_string(),
        }))
        .await
    }

    pub async fn list_journal(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let collection: JournalCollection = self
            .send(
                self.http
                    .post(self.url(&format!("{}/journal", API_PREFIX)))
                    .json(&JournalInput { limit }),
            )
            .await?;
        Ok(collection.data)
    }

    // ============ Replicas ============

    pub async fn list_replicas(&self) -> Result<Vec<ReplicaResource>> {
        let collection: ReplicaCollection = self
            .send(self.http.get(self.url(&format!("{}/replicas", API_PREFIX))))
            .await?;
        Ok(collection.data)
    }

    pub async fn get_replica(&self, address: &str) -> Result<ReplicaResource> {
        self.send(self.http.get(self.url(&replica_path(address))))
            .await
    }

    pub async fn create_replica(
        &self,
        address: &str,
        replica_type: ReplicaType,
    ) -> Result<ReplicaResource> {
        self.send(
            self.http
                .post(self.url(&format!("{}/replicas", API_PREFIX)))
                .json(&CreateReplicaInput {
                    address: address.to_string(),
                    replica_type,
                }),
        )
        .await
    }

    pub async fn update_replica(
        &self,
        address: &str,
        state: ReplicaState,
    ) -> Result<ReplicaResource> {
        self.send(
            self.http
                .put(self.url(&replica_path(address)))
                .json(&UpdateReplicaInput { state }),
        )
        .await
    }

    /// Remove a replica and return its last record
    pub async fn delete_replica(&self, address: &str) -> Result<ReplicaResource> {
        self.send(self.http.delete(self.url(&replica_path(address))))
            .await
    }

    pub async fn register(&self, registration: Registration) -> Result<ReplicaResource> {
        self.send(
            self.http
                .post(self.url(&format!("{}/register", API_PREFIX)))
                .json(&RegisterInput::from(registration)),
        )
        .await
    }

    // ============ Rebuild ============

    pub async fn prepare_rebuild(&self, address: &str) -> Result<RebuildDescriptor> {
        let replica = self.get_replica(address).await?;
        let url = self.url(Self::action(&replica.actions, "preparerebuild")?);
        let output: PrepareRebuildOutput = self.send(self.http.post(url)).await?;
        Ok(output.descriptor)
    }

    /// Report the rebuild result; `failure` carries the reason when it failed
    pub async fn verify_rebuild_replica(
        &self,
        address: &str,
        failure: Option<String>,
    ) -> Result<ReplicaResource> {
        let replica = self.get_replica(address).await?;
        let url = self.url(Self::action(&replica.actions, "verifyrebuild")?);
        self.send(self.http.post(url).json(&VerifyRebuildInput { failure }))
            .await
    }
}
