//! Volume Controller
//!
//! Owns the registry, the rebuild coordinator and the volume record for one
//! volume behind a single lock. Every mutation runs against a working copy
//! that is settled (tickets reconciled, quorum and state recomputed) and
//! written to the catalog before it replaces the live state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use super::journal::{Journal, JournalEntry};
use super::operation::{Operation, OperationKind, OperationOutput};
use super::volume::{SnapshotRecord, Volume, VolumeState};
use crate::catalog::{VolumeCatalog, VolumeRecord};
use crate::config::WolfBlockConfig;
use crate::error::{Error, Result};
use crate::rebuild::{RebuildCoordinator, RebuildDescriptor, VerifyOutcome};
use crate::state::{QuorumStatus, Registration, Replica, ReplicaRegistry, ReplicaState, ReplicaType};

const RESTART_REASON: &str = "rebuild interrupted by controller restart";

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub volume_name: String,
    pub ticket_ttl: Duration,
    pub journal_capacity: usize,
    /// Start the volume from these replicas once every one has registered
    pub start_replicas: Vec<String>,
}

impl ControllerConfig {
    pub fn new(volume_name: impl Into<String>) -> Self {
        Self {
            volume_name: volume_name.into(),
            ticket_ttl: Duration::from_secs(300),
            journal_capacity: 1024,
            start_replicas: Vec::new(),
        }
    }

    pub fn from_config(config: &WolfBlockConfig) -> Self {
        Self {
            volume_name: config.volume.name.clone(),
            ticket_ttl: config.ticket_ttl(),
            journal_capacity: config.journal.capacity,
            start_replicas: config.volume.replicas.clone(),
        }
    }
}

/// State guarded by the volume lock
#[derive(Debug, Clone)]
struct VolumeInner {
    volume: Volume,
    registry: ReplicaRegistry,
    rebuild: RebuildCoordinator,
}

impl VolumeInner {
    fn record(&self) -> VolumeRecord {
        VolumeRecord {
            volume: self.volume.clone(),
            replicas: self.registry.list(),
        }
    }

    /// Bring derived state back in line with the registry
    fn settle(&mut self) {
        let stale: Vec<String> = self
            .rebuild
            .tickets()
            .map(|t| t.address().to_string())
            .filter(|addr| !matches!(self.registry.get(addr), Ok(r) if r.state.is_mid_rebuild()))
            .collect();
        for addr in stale {
            self.rebuild.release(&addr);
        }

        // Once the volume has data, newcomers wait for a rebuild.
        if self.registry.has_ready() {
            for replica in self
                .registry
                .iter_mut()
                .filter(|r| r.state == ReplicaState::Registering)
            {
                if let Err(e) = replica.transition(ReplicaState::AwaitingRebuild) {
                    tracing::warn!("Could not queue {} for rebuild: {}", replica.address, e);
                }
            }
        }

        self.volume.refresh(&self.registry);
    }

    fn replica(&self, address: &str) -> Result<Replica> {
        self.registry.get(address).cloned()
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.volume.state == VolumeState::Healthy {
            return Ok(());
        }
        Err(Error::NotQuorate {
            ready: self.volume.quorum.ready,
            required: self.volume.quorum.required,
        })
    }

    fn register(&mut self, reg: Registration, start_replicas: &[String]) -> Result<Replica> {
        let address = reg.address.clone();
        self.registry.register(reg)?;

        if !start_replicas.is_empty()
            && !self.registry.has_ready()
            && start_replicas.iter().all(|a| self.registry.contains(a))
        {
            let mut trial = self.clone();
            match trial.start(start_replicas) {
                Ok(volume) => {
                    tracing::info!(
                        "All {} configured replicas registered, started volume at generation {}",
                        start_replicas.len(),
                        volume.generation
                    );
                    *self = trial;
                }
                Err(e) => tracing::warn!("Automatic start deferred: {}", e),
            }
        }

        self.settle();
        self.replica(&address)
    }

    fn create_replica(&mut self, address: &str, replica_type: ReplicaType) -> Result<Replica> {
        self.registry.insert(address.to_string(), replica_type)?;
        tracing::info!("Created replica {} ({})", address, replica_type);
        self.settle();
        self.replica(address)
    }

    fn update_replica(&mut self, address: &str, state: ReplicaState) -> Result<Replica> {
        let replica = self.registry.get_mut(address)?;
        match state {
            ReplicaState::Ready => {
                return Err(Error::Conflict(format!(
                    "replica {} can only become READY through start or a verified rebuild",
                    address
                )));
            }
            s if s.is_mid_rebuild() => {
                return Err(Error::Conflict(format!(
                    "{} is driven by the rebuild handshake and cannot be set on {}",
                    s, address
                )));
            }
            ReplicaState::Failed => replica.fail("marked failed by operator")?,
            other => replica.transition(other)?,
        }
        self.settle();
        self.replica(address)
    }

    fn remove_replica(&mut self, address: &str) -> Result<Replica> {
        let removed = self.registry.remove(address)?;
        self.rebuild.release(address);
        tracing::info!("Removed replica {} ({})", address, removed.state);
        self.settle();
        Ok(removed)
    }

    fn start(&mut self, replicas: &[String]) -> Result<Volume> {
        let Some(first) = replicas.first() else {
            return Err(Error::Conflict("start needs at least one replica".into()));
        };
        if let Some(ready) = self.registry.primary() {
            return Err(Error::Conflict(format!(
                "volume already started, {} is READY",
                ready.address
            )));
        }

        let mut seed = first;
        let mut seed_revision = 0;
        for (i, address) in replicas.iter().enumerate() {
            let replica = self.registry.get(address)?;
            if replica.state == ReplicaState::Failed {
                return Err(Error::Conflict(format!("replica {} is FAILED", address)));
            }
            if i == 0 || replica.revision_count > seed_revision {
                seed = address;
                seed_revision = replica.revision_count;
            }
        }

        let replica = self.registry.get_mut(seed)?;
        if replica.state != ReplicaState::Registering {
            return Err(Error::Conflict(format!(
                "seed replica {} is {}, expected REGISTERING",
                seed, replica.state
            )));
        }
        replica.transition(ReplicaState::Ready)?;
        self.volume.generation = self.volume.generation.max(seed_revision);
        tracing::info!(
            "Volume {} started from {} at generation {}",
            self.volume.name,
            seed,
            self.volume.generation
        );

        self.settle();
        Ok(self.volume.clone())
    }

    fn snapshot(&mut self, name: &str) -> Result<String> {
        self.ensure_healthy()?;

        let name = if name.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            name.to_string()
        };
        if self.volume.snapshot(&name).is_some() {
            return Err(Error::Conflict(format!("snapshot {} already exists", name)));
        }
        let source = self
            .registry
            .primary()
            .map(|r| r.address.clone())
            .ok_or_else(|| Error::Conflict("no ready replica holds the volume data".into()))?;

        self.volume.snapshots.push(SnapshotRecord {
            name: name.clone(),
            generation: self.volume.generation,
            source,
            created_at: Utc::now(),
        });
        self.volume.generation += 1;
        let generation = self.volume.generation;
        for replica in self.registry.iter_mut().filter(|r| r.is_ready()) {
            replica.raise_revision(generation);
        }
        tracing::info!("Snapshot {} taken, generation now {}", name, generation);

        self.settle();
        Ok(name)
    }

    fn revert(&mut self, name: &str) -> Result<Volume> {
        self.ensure_healthy()?;

        let pos = self
            .volume
            .snapshots
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("snapshot {}", name)))?;

        let source = &self.volume.snapshots[pos].source;
        let holder = match self.registry.get(source) {
            Ok(r) if r.is_ready() => r.address.clone(),
            _ => self
                .registry
                .primary()
                .map(|r| r.address.clone())
                .ok_or_else(|| Error::Conflict("no ready replica holds the volume data".into()))?,
        };

        self.volume.snapshots.truncate(pos + 1);
        for replica in self
            .registry
            .iter_mut()
            .filter(|r| r.is_ready() && r.address != holder)
        {
            replica.transition(ReplicaState::AwaitingRebuild)?;
        }
        tracing::info!("Volume {} reverted to {} held by {}", self.volume.name, name, holder);

        self.settle();
        Ok(self.volume.clone())
    }

    fn prepare_rebuild(&mut self, address: &str, now: Instant) -> Result<RebuildDescriptor> {
        let VolumeInner {
            volume,
            registry,
            rebuild,
        } = self;
        let descriptor = rebuild.prepare(registry, volume, address, now)?;
        self.settle();
        Ok(descriptor)
    }

    fn verify_rebuild(&mut self, address: &str, outcome: VerifyOutcome) -> Result<Replica> {
        let VolumeInner {
            volume,
            registry,
            rebuild,
        } = self;
        rebuild.verify(registry, volume, address, outcome)?;
        self.settle();
        self.replica(address)
    }
}

/// Orchestrator for one volume
pub struct VolumeController {
    inner: RwLock<VolumeInner>,
    catalog: Arc<dyn VolumeCatalog>,
    journal: Mutex<Journal>,
    start_replicas: Vec<String>,
}

impl VolumeController {
    /// Load the volume from the catalog, or create it if it was never stored
    pub async fn open(config: ControllerConfig, catalog: Arc<dyn VolumeCatalog>) -> Result<Self> {
        let (volume, registry) = match catalog.load(&config.volume_name).await? {
            Some(record) => {
                let mut registry = ReplicaRegistry::from_records(record.replicas);
                for replica in registry.iter_mut().filter(|r| r.state.is_mid_rebuild()) {
                    tracing::warn!("Replica {} was {}: {}", replica.address, replica.state, RESTART_REASON);
                    replica.fail(RESTART_REASON)?;
                }
                tracing::info!(
                    "Loaded volume {} (generation {}, {} replicas)",
                    record.volume.name,
                    record.volume.generation,
                    registry.len()
                );
                (record.volume, registry)
            }
            None => {
                tracing::info!("Creating volume {}", config.volume_name);
                (Volume::new(config.volume_name.clone()), ReplicaRegistry::new())
            }
        };

        let mut inner = VolumeInner {
            volume,
            registry,
            rebuild: RebuildCoordinator::new(config.ticket_ttl),
        };
        inner.settle();
        catalog.store(&inner.record()).await?;

        Ok(Self {
            inner: RwLock::new(inner),
            catalog,
            journal: Mutex::new(Journal::new(config.journal_capacity)),
            start_replicas: config.start_replicas,
        })
    }

    /// Apply a mutation to a working copy and commit it once the catalog has
    /// it. `journal` runs before the volume lock is released, so journal
    /// order matches commit order.
    async fn apply<T, F, J>(&self, f: F, journal: J) -> Result<T>
    where
        F: FnOnce(&mut VolumeInner) -> Result<T>,
        J: FnOnce(&mut Journal, &Result<T>),
    {
        let mut inner = self.inner.write().await;
        let result = self.commit(&mut inner, f).await;
        journal(&mut *self.journal.lock().await, &result);
        result
    }

    async fn commit<T, F>(&self, inner: &mut VolumeInner, f: F) -> Result<T>
    where
        F: FnOnce(&mut VolumeInner) -> Result<T>,
    {
        let mut work = inner.clone();
        work.volume.revision += 1;
        work.volume.updated_at = Utc::now();

        let out = f(&mut work)?;
        work.settle();

        if let Err(e) = self.catalog.store(&work.record()).await {
            tracing::error!("Catalog rejected volume {}: {}", work.volume.name, e);
            return Err(e);
        }
        *inner = work;
        Ok(out)
    }

    /// Apply and journal an inbound operation
    async fn mutate<T, F>(&self, kind: OperationKind, target: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut VolumeInner) -> Result<T>,
    {
        self.apply(f, |journal, result| {
            if let Err(e) = result {
                if e.is_caller_error() {
                    tracing::warn!("Rejected {} {}: {}", kind, target, e);
                }
            }
            journal.record(kind, target, result.as_ref().err());
        })
        .await
    }

    /// Insert or update a replica from its own registration
    pub async fn register(&self, reg: Registration) -> Result<Replica> {
        let target = reg.address.clone();
        let start_replicas = self.start_replicas.as_slice();
        self.mutate(OperationKind::Register, &target, |inner| {
            inner.register(reg, start_replicas)
        })
        .await
    }

    /// Admit a replica that has not registered yet
    pub async fn create_replica(&self, address: &str, replica_type: ReplicaType) -> Result<Replica> {
        self.mutate(OperationKind::CreateReplica, address, |inner| {
            inner.create_replica(address, replica_type)
        })
        .await
    }

    /// Operator-driven state change
    pub async fn update_replica(&self, address: &str, state: ReplicaState) -> Result<Replica> {
        self.mutate(OperationKind::UpdateReplica, address, |inner| {
            inner.update_replica(address, state)
        })
        .await
    }

    pub async fn remove_replica(&self, address: &str) -> Result<Replica> {
        self.mutate(OperationKind::RemoveReplica, address, |inner| {
            inner.remove_replica(address)
        })
        .await
    }

    pub async fn start(&self, replicas: Vec<String>) -> Result<Volume> {
        let target = replicas.join(",");
        self.mutate(OperationKind::Start, &target, |inner| inner.start(&replicas))
            .await
    }

    pub async fn snapshot(&self, name: &str) -> Result<String> {
        self.mutate(OperationKind::Snapshot, name, |inner| inner.snapshot(name))
            .await
    }

    pub async fn revert(&self, name: &str) -> Result<Volume> {
        self.mutate(OperationKind::Revert, name, |inner| inner.revert(name))
            .await
    }

    pub async fn prepare_rebuild(&self, address: &str) -> Result<RebuildDescriptor> {
        let now = Instant::now();
        self.mutate(OperationKind::PrepareRebuild, address, |inner| {
            inner.prepare_rebuild(address, now)
        })
        .await
    }

    pub async fn verify_rebuild(&self, address: &str, outcome: VerifyOutcome) -> Result<Replica> {
        self.mutate(OperationKind::VerifyRebuild, address, |inner| {
            inner.verify_rebuild(address, outcome)
        })
        .await
    }

    /// Run one volume or rebuild operation
    pub async fn dispatch(&self, op: Operation) -> Result<OperationOutput> {
        match op {
            Operation::Start { replicas } => self.start(replicas).await.map(OperationOutput::Started),
            Operation::Revert { name } => self.revert(&name).await.map(OperationOutput::Reverted),
            Operation::Snapshot { name } => {
                self.snapshot(&name).await.map(OperationOutput::SnapshotTaken)
            }
            Operation::PrepareRebuild { address } => self
                .prepare_rebuild(&address)
                .await
                .map(OperationOutput::RebuildPrepared),
            Operation::VerifyRebuild { address, outcome } => self
                .verify_rebuild(&address, outcome)
                .await
                .map(OperationOutput::RebuildVerified),
        }
    }

    /// Fail replicas whose rebuild ticket passed its deadline at `now`
    pub async fn expire_tickets(&self, now: Instant) -> Result<Vec<String>> {
        {
            let inner = self.inner.read().await;
            if !inner.rebuild.tickets().any(|t| t.is_expired(now)) {
                return Ok(Vec::new());
            }
        }

        self.apply(
            |inner| Ok(inner.rebuild.expire(&mut inner.registry, now)),
            |journal, result| {
                for address in result.iter().flatten() {
                    let err = Error::Timeout(format!("rebuild ticket for {} expired", address));
                    journal.record(OperationKind::Expire, address, Some(&err));
                }
            },
        )
        .await
    }

    pub async fn volume(&self) -> Volume {
        self.inner.read().await.volume.clone()
    }

    pub async fn list_replicas(&self) -> Vec<Replica> {
        self.inner.read().await.registry.list()
    }

    pub async fn get_replica(&self, address: &str) -> Result<Replica> {
        self.inner.read().await.replica(address)
    }

    pub async fn quorum(&self) -> QuorumStatus {
        self.inner.read().await.volume.quorum
    }

    /// Descriptors of outstanding rebuild tickets
    pub async fn tickets(&self) -> Vec<RebuildDescriptor> {
        self.inner
            .read()
            .await
            .rebuild
            .tickets()
            .map(|t| t.descriptor.clone())
            .collect()
    }

    /// Most recent journal entries, oldest first
    pub async fn journal(&self, limit: usize) -> Vec<JournalEntry> {
        self.journal.lock().await.recent(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::state::PeerDetails;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    const A: &str = "tcp://10.0.0.1:9502";
    const B: &str = "tcp://10.0.0.2:9502";
    const C: &str = "tcp://10.0.0.3:9502";

    fn reg(address: &str, revision: u64, state: ReplicaState) -> Registration {
        Registration {
            address: address.to_string(),
            revision_count: revision,
            peer_details: PeerDetails {
                replica_count: 3,
                quorum_replica_count: 3,
            },
            replica_type: ReplicaType::Quorum,
            up_time: Duration::from_secs(revision),
            state,
        }
    }

    async fn controller() -> VolumeController {
        let config = ControllerConfig {
            ticket_ttl: Duration::from_secs(30),
            ..ControllerConfig::new("vol1")
        };
        VolumeController::open(config, Arc::new(MemoryCatalog::new()))
            .await
            .unwrap()
    }

    /// Three Ready replicas at generation 5
    async fn healthy_controller() -> VolumeController {
        let ctl = controller().await;
        ctl.register(reg(A, 5, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 3, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(C, 3, ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![B.into(), A.into(), C.into()]).await.unwrap();

        for addr in [B, C] {
            ctl.prepare_rebuild(addr).await.unwrap();
            ctl.verify_rebuild(addr, VerifyOutcome::Success).await.unwrap();
        }
        assert_eq!(ctl.volume().await.state, VolumeState::Healthy);
        ctl
    }

    #[tokio::test]
    async fn test_register_keeps_latest_values() {
        let ctl = controller().await;
        for rev in [1, 2, 2, 7] {
            ctl.register(reg(A, rev, ReplicaState::Registering)).await.unwrap();
        }

        let replica = ctl.get_replica(A).await.unwrap();
        assert_eq!(replica.revision_count, 7);
        assert_eq!(replica.up_time, Duration::from_secs(7));
        assert_eq!(replica.state, ReplicaState::Registering);

        let err = ctl
            .register(reg(A, 3, ReplicaState::Registering))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleRevision { stored: 7, incoming: 3, .. }));
        assert_eq!(ctl.get_replica(A).await.unwrap().revision_count, 7);
    }

    #[tokio::test]
    async fn test_start_seeds_highest_revision() {
        let ctl = controller().await;
        ctl.register(reg(A, 2, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 9, ReplicaState::Registering)).await.unwrap();

        let volume = ctl.start(vec![A.into(), B.into()]).await.unwrap();
        assert_eq!(volume.generation, 9);
        assert_eq!(ctl.get_replica(B).await.unwrap().state, ReplicaState::Ready);
        assert_eq!(
            ctl.get_replica(A).await.unwrap().state,
            ReplicaState::AwaitingRebuild
        );

        let err = ctl.start(vec![A.into()]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Late registrations queue for rebuild
        let late = ctl.register(reg(C, 0, ReplicaState::Registering)).await.unwrap();
        assert_eq!(late.state, ReplicaState::AwaitingRebuild);
    }

    #[tokio::test]
    async fn test_start_unknown_replica() {
        let ctl = controller().await;
        let err = ctl.start(vec![A.into()]).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let err = ctl.start(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_configured_start() {
        let config = ControllerConfig {
            start_replicas: vec![A.into(), B.into()],
            ..ControllerConfig::new("vol1")
        };
        let ctl = VolumeController::open(config, Arc::new(MemoryCatalog::new()))
            .await
            .unwrap();

        ctl.register(reg(A, 4, ReplicaState::Registering)).await.unwrap();
        assert!(!ctl.list_replicas().await.iter().any(|r| r.is_ready()));

        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        assert!(ctl.get_replica(A).await.unwrap().is_ready());
        assert_eq!(ctl.volume().await.generation, 4);
    }

    #[tokio::test]
    async fn test_healthy_volume() {
        let ctl = healthy_controller().await;
        let volume = ctl.volume().await;
        assert_eq!(volume.replicas.len(), 3);
        assert_eq!(volume.quorum.required, 2);
        assert_eq!(volume.quorum.ready, 3);
        for replica in ctl.list_replicas().await {
            assert_eq!(replica.revision_count, 5);
        }
    }

    #[tokio::test]
    async fn test_prepare_twice_conflicts() {
        let ctl = controller().await;
        let non_quorum = |state| Registration {
            replica_type: ReplicaType::NonQuorum,
            ..reg(B, 1, state)
        };
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
        ctl.register(non_quorum(ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![A.into()]).await.unwrap();
        assert_eq!(ctl.volume().await.state, VolumeState::Degraded);

        let out = ctl
            .dispatch(Operation::PrepareRebuild { address: B.into() })
            .await
            .unwrap();
        let OperationOutput::RebuildPrepared(desc) = out else {
            panic!("unexpected output {:?}", out);
        };
        assert_eq!(desc.source, A);
        assert_eq!(ctl.volume().await.state, VolumeState::Rebuilding);

        let err = ctl
            .dispatch(Operation::PrepareRebuild { address: B.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(ctl.tickets().await.len(), 1);

        // A duplicate Rebuilding report is harmless
        ctl.register(non_quorum(ReplicaState::Rebuilding)).await.unwrap();
        ctl.register(non_quorum(ReplicaState::Rebuilding)).await.unwrap();
        assert_eq!(ctl.get_replica(B).await.unwrap().state, ReplicaState::Rebuilding);
    }

    #[tokio::test]
    async fn test_verify_without_prepare() {
        let ctl = controller().await;
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();

        let err = ctl
            .dispatch(Operation::VerifyRebuild {
                address: A.into(),
                outcome: VerifyOutcome::Success,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoOutstandingTicket(_)));
        assert_eq!(ctl.get_replica(A).await.unwrap().state, ReplicaState::Registering);

        let entries = ctl.journal(1).await;
        assert_eq!(entries[0].kind, OperationKind::VerifyRebuild);
        assert!(!entries[0].success);
    }

    #[tokio::test]
    async fn test_snapshot_and_revert_need_healthy_volume() {
        let ctl = controller().await;
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![A.into()]).await.unwrap();
        assert_eq!(ctl.volume().await.state, VolumeState::Faulted);

        let before = ctl.list_replicas().await;
        let revision = ctl.volume().await.revision;

        let err = ctl.snapshot("s1").await.unwrap_err();
        assert!(matches!(err, Error::NotQuorate { ready: 1, required: 2 }));
        let err = ctl.revert("s1").await.unwrap_err();
        assert!(matches!(err, Error::NotQuorate { .. }));

        assert_eq!(ctl.list_replicas().await, before);
        assert_eq!(ctl.volume().await.revision, revision);
    }

    #[tokio::test]
    async fn test_snapshot_advances_generation() {
        let ctl = healthy_controller().await;

        let name = ctl.snapshot("s1").await.unwrap();
        assert_eq!(name, "s1");
        let generated = ctl.snapshot("").await.unwrap();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());

        let volume = ctl.volume().await;
        assert_eq!(volume.generation, 7);
        assert_eq!(volume.snapshots[0].generation, 5);
        assert_eq!(volume.snapshot_chain(), vec!["s1".to_string(), generated]);
        for replica in ctl.list_replicas().await {
            assert_eq!(replica.revision_count, 7);
        }

        let err = ctl.snapshot("s1").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_revert_sends_others_to_rebuild() {
        let ctl = healthy_controller().await;
        ctl.snapshot("s1").await.unwrap();
        ctl.snapshot("s2").await.unwrap();

        let err = ctl.revert("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let holder = ctl.volume().await.snapshots[0].source.clone();
        let holder_before = ctl.get_replica(&holder).await.unwrap();

        let out = ctl
            .dispatch(Operation::Revert { name: "s1".into() })
            .await
            .unwrap();
        let OperationOutput::Reverted(volume) = out else {
            panic!("unexpected output {:?}", out);
        };
        assert_eq!(volume.snapshot_chain(), vec!["s1".to_string()]);

        assert_eq!(ctl.get_replica(&holder).await.unwrap(), holder_before);
        for replica in ctl.list_replicas().await {
            if replica.address != holder {
                assert_eq!(replica.state, ReplicaState::AwaitingRebuild);
            }
        }

        // The rebuilt replicas replay the truncated chain
        let other = [A, B, C].into_iter().find(|a| *a != holder).unwrap();
        let desc = ctl.prepare_rebuild(other).await.unwrap();
        assert_eq!(desc.source, holder);
        assert_eq!(desc.snapshot_chain, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn test_ticket_expiry() {
        let ctl = controller().await;
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![A.into()]).await.unwrap();
        ctl.prepare_rebuild(B).await.unwrap();

        assert!(ctl.expire_tickets(Instant::now()).await.unwrap().is_empty());

        let deadline = Instant::now() + Duration::from_secs(30);
        let expired = ctl.expire_tickets(deadline).await.unwrap();
        assert_eq!(expired, vec![B.to_string()]);
        let replica = ctl.get_replica(B).await.unwrap();
        assert_eq!(replica.state, ReplicaState::Failed);

        assert!(ctl.expire_tickets(deadline).await.unwrap().is_empty());
        let entries = ctl.journal(10).await;
        let expiries: Vec<_> = entries
            .iter()
            .filter(|e| e.kind == OperationKind::Expire)
            .collect();
        assert_eq!(expiries.len(), 1);
        assert!(expiries[0].error.as_deref().unwrap().starts_with("TIMEOUT"));

        ctl.prepare_rebuild(B).await.unwrap();
        assert_eq!(
            ctl.get_replica(B).await.unwrap().state,
            ReplicaState::PreparingRebuild
        );
    }

    #[tokio::test]
    async fn test_failure_report_drops_ticket() {
        let ctl = controller().await;
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![A.into()]).await.unwrap();
        ctl.prepare_rebuild(B).await.unwrap();

        ctl.register(reg(B, 1, ReplicaState::Failed)).await.unwrap();
        assert!(ctl.tickets().await.is_empty());

        let err = ctl
            .verify_rebuild(B, VerifyOutcome::Success)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoOutstandingTicket(_)));
    }

    #[tokio::test]
    async fn test_update_and_remove_replica() {
        let ctl = healthy_controller().await;

        let err = ctl.update_replica(C, ReplicaState::Rebuilding).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let failed = ctl.update_replica(C, ReplicaState::Failed).await.unwrap();
        assert_eq!(failed.failure_reason.as_deref(), Some("marked failed by operator"));
        assert_eq!(ctl.volume().await.state, VolumeState::Degraded);

        let err = ctl.update_replica(C, ReplicaState::Ready).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let removed = ctl.remove_replica(C).await.unwrap();
        assert_eq!(removed.state, ReplicaState::Failed);
        assert_eq!(ctl.volume().await.state, VolumeState::Healthy);

        let err = ctl.remove_replica(C).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let created = ctl.create_replica(C, ReplicaType::NonQuorum).await.unwrap();
        assert_eq!(created.state, ReplicaState::AwaitingRebuild);
        let err = ctl.create_replica(C, ReplicaType::NonQuorum).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_restart_fails_interrupted_rebuilds() {
        let catalog = Arc::new(MemoryCatalog::new());
        {
            let ctl = VolumeController::open(ControllerConfig::new("vol1"), catalog.clone())
                .await
                .unwrap();
            ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
            ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
            ctl.start(vec![A.into()]).await.unwrap();
            ctl.prepare_rebuild(B).await.unwrap();
        }

        let ctl = VolumeController::open(ControllerConfig::new("vol1"), catalog)
            .await
            .unwrap();
        let replica = ctl.get_replica(B).await.unwrap();
        assert_eq!(replica.state, ReplicaState::Failed);
        assert_eq!(replica.failure_reason.as_deref(), Some(RESTART_REASON));
        assert!(ctl.get_replica(A).await.unwrap().is_ready());
        assert!(ctl.tickets().await.is_empty());
    }

    struct FlakyCatalog {
        inner: MemoryCatalog,
        fail: AtomicBool,
    }

    #[async_trait]
    impl VolumeCatalog for FlakyCatalog {
        async fn load(&self, volume_name: &str) -> Result<Option<VolumeRecord>> {
            self.inner.load(volume_name).await
        }

        async fn store(&self, record: &VolumeRecord) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Catalog("disk full".into()));
            }
            self.inner.store(record).await
        }
    }

    #[tokio::test]
    async fn test_catalog_failure_leaves_state_unchanged() {
        let catalog = Arc::new(FlakyCatalog {
            inner: MemoryCatalog::new(),
            fail: AtomicBool::new(false),
        });
        let ctl = VolumeController::open(ControllerConfig::new("vol1"), catalog.clone())
            .await
            .unwrap();
        ctl.register(reg(A, 1, ReplicaState::Registering)).await.unwrap();
        let before = ctl.volume().await;

        catalog.fail.store(true, Ordering::SeqCst);
        let err = ctl
            .register(reg(B, 1, ReplicaState::Registering))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
        assert_eq!(ctl.list_replicas().await.len(), 1);
        assert_eq!(ctl.volume().await, before);

        catalog.fail.store(false, Ordering::SeqCst);
        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        assert_eq!(ctl.list_replicas().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_prepare_issues_one_ticket() {
        let ctl = Arc::new(controller().await);
        ctl.register(reg(A, 3, ReplicaState::Registering)).await.unwrap();
        ctl.register(reg(B, 1, ReplicaState::Registering)).await.unwrap();
        ctl.start(vec![A.into()]).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ctl = Arc::clone(&ctl);
                tokio::spawn(async move { ctl.prepare_rebuild(B).await })
            })
            .collect();

        let mut issued = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => issued += 1,
                Err(e) => assert!(matches!(e, Error::Conflict(_)), "unexpected {:?}", e),
            }
        }
        assert_eq!(issued, 1);
        assert_eq!(ctl.tickets().await.len(), 1);
        assert_eq!(
            ctl.get_replica(B).await.unwrap().state,
            ReplicaState::PreparingRebuild
        );

        // Journal order follows commit order: the granted prepare comes first
        let prepares: Vec<_> = ctl
            .journal(100)
            .await
            .into_iter()
            .filter(|e| e.kind == OperationKind::PrepareRebuild)
            .collect();
        assert_eq!(prepares.len(), 16);
        assert!(prepares[0].success);
        assert!(prepares[1..].iter().all(|e| !e.success));
        assert!(prepares.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_keeps_highest_revision() {
        let ctl = Arc::new(controller().await);

        let handles: Vec<_> = (1..=32u64)
            .map(|rev| {
                let ctl = Arc::clone(&ctl);
                tokio::spawn(async move { ctl.register(reg(A, rev, ReplicaState::Registering)).await })
            })
            .collect();

        for handle in handles {
            if let Err(e) = handle.await.unwrap() {
                assert!(matches!(e, Error::StaleRevision { .. }), "unexpected {:?}", e);
            }
        }

        let replica = ctl.get_replica(A).await.unwrap();
        assert_eq!(replica.revision_count, 32);
        assert_eq!(replica.up_time, Duration::from_secs(32));
        assert_eq!(ctl.list_replicas().await.len(), 1);
    }
}
