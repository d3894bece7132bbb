//! Registry of transfer records.
//!
//! The registry is the single owner of every transfer: one arena keyed by id
//! holding the state machine, the file metadata and the cancellation token of
//! each transfer. Payload handles live in a separate [`PayloadCache`] and the
//! serializable projection goes to the injected [`ProjectionStore`]. Every
//! mutation runs under the registry lock and writes the projection first; the
//! live entry only changes once the store has accepted the write, so a failed
//! write leaves both sides as they were.

use super::payloads::PayloadCache;
use crate::domain::ports::ProjectionStoreBox;
use crate::domain::record::{FileMeta, Payload, PersistedTransfer, TransferId, TransferRecord};
use crate::domain::session::{SessionMachine, SessionState};
use crate::domain::transfer::{TransferEvent, TransferMachine, TransferState};
use crate::domain::views::{self, SessionSummary};
use crate::error::{Result, TransferError};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

/// Change notification published by the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Transfer {
        id: TransferId,
        state: TransferState,
        progress: u8,
    },
    Removed {
        id: TransferId,
    },
    Cleared,
    Session {
        state: SessionState,
        overall_progress: u8,
    },
}

#[derive(Debug, Clone, Default)]
pub enum TokenUpdate {
    #[default]
    Keep,
    Set(CancellationToken),
    Clear,
}

/// Partial update applied to one record: events in order, then the token.
#[derive(Debug, Clone, Default)]
pub struct TransferUpdate {
    pub events: Vec<TransferEvent>,
    pub token: TokenUpdate,
    /// When non-empty, the update is skipped unless the record is in one of
    /// these states.
    pub only_from: Vec<TransferState>,
}

impl TransferUpdate {
    pub fn event(event: TransferEvent) -> Self {
        Self::events([event])
    }

    pub fn events(events: impl IntoIterator<Item = TransferEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = TokenUpdate::Set(token);
        self
    }

    pub fn clear_token(mut self) -> Self {
        self.token = TokenUpdate::Clear;
        self
    }

    pub fn only_from(mut self, states: &[TransferState]) -> Self {
        self.only_from = states.to_vec();
        self
    }
}

struct Entry {
    machine: TransferMachine,
    file: FileMeta,
    payload_size: u64,
    cancel: Option<CancellationToken>,
}

impl Entry {
    fn new(
        id: &TransferId,
        file: FileMeta,
        payload_size: u64,
        events: &broadcast::Sender<RegistryEvent>,
    ) -> Self {
        let mut machine = TransferMachine::new();
        let tx = events.clone();
        let listener_id = id.clone();
        machine.subscribe(Box::new(move |state, ctx| {
            // No receivers is fine.
            let _ = tx.send(RegistryEvent::Transfer {
                id: listener_id.clone(),
                state,
                progress: ctx.progress,
            });
        }));
        Self {
            machine,
            file,
            payload_size,
            cancel: None,
        }
    }

    fn record(&self, id: &TransferId) -> TransferRecord {
        let ctx = self.machine.context();
        TransferRecord {
            id: id.clone(),
            file: self.file.clone(),
            state: self.machine.state(),
            progress: ctx.progress,
            error: ctx.error.clone(),
            destination: ctx.destination.clone(),
            has_cancel_token: self.cancel.is_some(),
            payload_size: self.payload_size,
        }
    }

    /// The record that `events` and `token` would produce. The entry is left
    /// untouched.
    fn preview(
        &self,
        id: &TransferId,
        events: &[TransferEvent],
        token: &TokenUpdate,
    ) -> TransferRecord {
        let (state, ctx) = self.machine.preview(events);
        let has_cancel_token = match token {
            TokenUpdate::Keep => self.cancel.is_some(),
            TokenUpdate::Set(_) => true,
            TokenUpdate::Clear => false,
        };
        TransferRecord {
            id: id.clone(),
            file: self.file.clone(),
            state,
            progress: ctx.progress,
            error: ctx.error,
            destination: ctx.destination,
            has_cancel_token,
            payload_size: self.payload_size,
        }
    }

    fn commit(&mut self, events: Vec<TransferEvent>, token: TokenUpdate) {
        self.machine.send_all(events);
        match token {
            TokenUpdate::Keep => {}
            TokenUpdate::Set(token) => self.cancel = Some(token),
            TokenUpdate::Clear => self.cancel = None,
        }
    }

    fn abort(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    fn cancel(&mut self) {
        self.abort();
        self.machine.send(TransferEvent::Cancel);
    }
}

struct Inner {
    entries: BTreeMap<TransferId, Entry>,
    ids: ulid::Generator,
}

impl Inner {
    fn next_id(&mut self) -> TransferId {
        let ulid = self.ids.generate().unwrap_or_else(|_| ulid::Ulid::new());
        TransferId::new(ulid.to_string())
    }

    fn records(&self) -> Vec<TransferRecord> {
        self.entries
            .iter()
            .map(|(id, entry)| entry.record(id))
            .collect()
    }
}

pub struct TransferRegistry {
    store: ProjectionStoreBox,
    payloads: PayloadCache,
    inner: Mutex<Inner>,
    session: Mutex<SessionMachine>,
    events: broadcast::Sender<RegistryEvent>,
}

impl TransferRegistry {
    /// Creates an empty registry over `store`, caching payloads in `payloads`.
    ///
    /// Call [`rehydrate`](Self::rehydrate) afterwards to load persisted records.
    pub fn new(store: ProjectionStoreBox, payloads: PayloadCache) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let mut session = SessionMachine::new();
        let tx = events.clone();
        session.subscribe(Box::new(move |state, ctx| {
            let _ = tx.send(RegistryEvent::Session {
                state,
                overall_progress: ctx.overall_progress,
            });
        }));
        Self {
            store,
            payloads,
            inner: Mutex::new(Inner {
                entries: BTreeMap::new(),
                ids: ulid::Generator::new(),
            }),
            session: Mutex::new(session),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn payload_cache(&self) -> &PayloadCache {
        &self.payloads
    }

    /// Queues one transfer per payload.
    ///
    /// Malformed payloads reject the whole batch before any state change. Once
    /// the session has started the call is a no-op returning no ids.
    pub async fn add_transfers(&self, payloads: Vec<Payload>) -> Result<Vec<TransferId>> {
        validate_payloads(&payloads)?;

        let mut inner = self.inner.lock().await;
        if views::is_session_started(&inner.records()) {
            warn!(
                files = payloads.len(),
                "session already started, new files rejected"
            );
            return Ok(Vec::new());
        }

        // The whole batch is persisted before any of it goes live.
        let mut staged: Vec<(TransferId, Entry, Payload)> = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let id = inner.next_id();
            let entry = Entry::new(&id, payload.meta.clone(), payload.len(), &self.events);
            let record = entry.preview(&id, &[TransferEvent::AddFile], &TokenUpdate::Keep);
            if let Err(e) = self.store.put(PersistedTransfer::from(&record)).await {
                for (written, _, _) in &staged {
                    if let Err(rollback) = self.store.delete(written).await {
                        warn!(
                            transfer = %written,
                            error = %rollback,
                            "rollback of queued transfer failed"
                        );
                    }
                }
                return Err(e);
            }
            staged.push((id, entry, payload));
        }

        let mut ids = Vec::with_capacity(staged.len());
        for (id, mut entry, payload) in staged {
            entry.machine.send(TransferEvent::AddFile);
            self.payloads.insert(id.clone(), payload).await;
            debug!(transfer = %id, file = %entry.file.name, "transfer queued");
            inner.entries.insert(id.clone(), entry);
            ids.push(id);
        }
        drop(inner);

        self.session_summary().await;
        Ok(ids)
    }

    /// Applies `update` to the record `id`. Unknown ids are ignored.
    pub async fn update(
        &self,
        id: &TransferId,
        update: TransferUpdate,
    ) -> Result<Option<TransferRecord>> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get_mut(id) else {
            debug!(transfer = %id, "update for unknown transfer ignored");
            return Ok(None);
        };

        if !update.only_from.is_empty() && !update.only_from.contains(&entry.machine.state()) {
            return Ok(Some(entry.record(id)));
        }

        let next = entry.preview(id, &update.events, &update.token);
        self.store.put(PersistedTransfer::from(&next)).await?;
        entry.commit(update.events, update.token);

        let record = entry.record(id);
        drop(inner);

        self.session_summary().await;
        Ok(Some(record))
    }

    /// Deletes the projection, then aborts, fires `REMOVE` and evicts the
    /// payload.
    pub async fn remove(&self, id: &TransferId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.entries.contains_key(id) {
            return Ok(false);
        }
        self.store.delete(id).await?;
        if let Some(entry) = inner.entries.remove(id) {
            self.discard(id, entry).await;
        }
        drop(inner);

        self.session_summary().await;
        Ok(true)
    }

    /// Drops every record, in-flight or not.
    pub async fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.store.clear().await?;
        for entry in inner.entries.values_mut() {
            if !entry.machine.state().is_settled() {
                entry.abort();
            }
        }
        let count = inner.entries.len();
        inner.entries.clear();
        self.payloads.clear().await;
        drop(inner);

        let _ = self.events.send(RegistryEvent::Cleared);
        info!(count, "all transfers cleared");
        self.session_summary().await;
        Ok(())
    }

    /// Removes everything except transfers that are currently uploading.
    pub async fn clear_removable(&self) -> Result<Vec<TransferId>> {
        let mut inner = self.inner.lock().await;
        let removable: Vec<TransferId> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.machine.state() != TransferState::Uploading)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &removable {
            self.store.delete(id).await?;
            if let Some(entry) = inner.entries.remove(id) {
                self.discard(id, entry).await;
            }
        }
        drop(inner);

        self.session_summary().await;
        Ok(removable)
    }

    /// Cancels one transfer, keeping its record and payload.
    pub async fn cancel(&self, id: &TransferId) -> Result<Option<TransferRecord>> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get_mut(id) else {
            return Ok(None);
        };
        let next = entry.preview(id, &[TransferEvent::Cancel], &TokenUpdate::Clear);
        self.store.put(PersistedTransfer::from(&next)).await?;
        entry.cancel();

        let record = entry.record(id);
        drop(inner);

        self.session_summary().await;
        Ok(Some(record))
    }

    /// Cancels every reserving or uploading transfer; other states are left
    /// alone.
    pub async fn cancel_all(&self) -> Result<Vec<TransferId>> {
        let mut inner = self.inner.lock().await;
        let mut canceled = Vec::new();
        for (id, entry) in inner.entries.iter_mut() {
            if !entry.machine.state().is_active() {
                continue;
            }
            let next = entry.preview(id, &[TransferEvent::Cancel], &TokenUpdate::Clear);
            self.store.put(PersistedTransfer::from(&next)).await?;
            entry.cancel();
            canceled.push(id.clone());
        }
        drop(inner);

        if !canceled.is_empty() {
            info!(count = canceled.len(), "active transfers canceled");
        }
        self.session_summary().await;
        Ok(canceled)
    }

    /// Rebuilds live records from the store. Meant to run once at startup.
    ///
    /// Records whose payload is still cached replay the events that produce
    /// their stored status. Records without a payload get a zero-byte
    /// placeholder and are forced into `error`.
    pub async fn rehydrate(&self) -> Result<usize> {
        let projections = self.store.all().await?;
        let mut inner = self.inner.lock().await;
        let mut restored = 0;

        for projection in projections {
            let id = projection.id.clone();
            if inner.entries.contains_key(&id) {
                continue;
            }
            if projection.status == TransferState::Idle {
                self.store.delete(&id).await?;
                continue;
            }

            let meta = projection.file_meta();
            let cached = self.payloads.get(&id).await;
            let lost = cached.is_none();
            let payload_size = cached.as_ref().map_or(0, Payload::len);
            let mut entry = Entry::new(&id, meta.clone(), payload_size, &self.events);
            let events = if lost {
                projection.placeholder_events()
            } else {
                projection.replay_events()
            };

            let record = entry.preview(&id, &events, &TokenUpdate::Clear);
            self.store.put(PersistedTransfer::from(&record)).await?;
            entry.commit(events, TokenUpdate::Clear);

            if lost {
                warn!(transfer = %id, file = %meta.name, "payload lost across restart");
                self.payloads
                    .insert(id.clone(), Payload::placeholder(meta))
                    .await;
            }
            inner.entries.insert(id, entry);
            restored += 1;
        }
        drop(inner);

        info!(restored, "registry rehydrated");
        self.session_summary().await;
        Ok(restored)
    }

    /// Re-supplies the payload of a placeholder under its original id.
    pub async fn restore_payload(
        &self,
        id: &TransferId,
        payload: Payload,
    ) -> Result<Option<TransferRecord>> {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get_mut(id) else {
            return Ok(None);
        };
        if !entry.record(id).is_placeholder() {
            return Err(TransferError::ValidationError(format!(
                "transfer {id} still has its file data"
            )));
        }
        if payload.meta.name != entry.file.name || payload.is_empty() {
            return Err(TransferError::ValidationError(format!(
                "expected a non-empty '{}'",
                entry.file.name
            )));
        }

        let mut record = entry.record(id);
        record.file = payload.meta.clone();
        record.payload_size = payload.len();
        self.store.put(PersistedTransfer::from(&record)).await?;

        entry.file = payload.meta.clone();
        entry.payload_size = payload.len();
        self.payloads.insert(id.clone(), payload).await;
        drop(inner);

        info!(transfer = %id, "payload restored");
        self.session_summary().await;
        Ok(Some(record))
    }

    pub async fn get(&self, id: &TransferId) -> Option<TransferRecord> {
        let inner = self.inner.lock().await;
        inner.entries.get(id).map(|entry| entry.record(id))
    }

    /// All records in creation order.
    pub async fn list(&self) -> Vec<TransferRecord> {
        self.inner.lock().await.records()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn payload(&self, id: &TransferId) -> Option<Payload> {
        self.payloads.get(id).await
    }

    pub async fn is_session_started(&self) -> bool {
        views::is_session_started(&self.list().await)
    }

    /// Recomputes the session aggregate from a consistent snapshot.
    pub async fn session_summary(&self) -> SessionSummary {
        let records = self.list().await;
        let mut session = self.session.lock().await;
        let state = session.update(views::session_context(&records));
        SessionSummary::new(state, &records)
    }

    /// Tears down an entry whose projection is already deleted.
    async fn discard(&self, id: &TransferId, mut entry: Entry) {
        entry.abort();
        entry.machine.send(TransferEvent::Remove);
        self.payloads.remove(id).await;
        let _ = self.events.send(RegistryEvent::Removed { id: id.clone() });
        debug!(transfer = %id, "transfer removed");
    }
}

fn validate_payloads(payloads: &[Payload]) -> Result<()> {
    for payload in payloads {
        if payload.meta.name.trim().is_empty() {
            return Err(TransferError::ValidationError(
                "file name must not be empty".to_string(),
            ));
        }
        if payload.is_empty() {
            return Err(TransferError::ValidationError(format!(
                "'{}' is empty",
                payload.meta.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ProjectionStore;
    use crate::domain::record::{Destination, UploadMethod};
    use crate::error::PAYLOAD_LOST_MESSAGE;
    use crate::infrastructure::in_memory::InMemoryProjectionStore;

    fn payload(name: &str, size: usize) -> Payload {
        Payload::new(name, "application/octet-stream", 1_700_000_000_000, vec![7; size])
    }

    fn destination(n: u32) -> Destination {
        Destination {
            remote_id: format!("upload_{n}_x"),
            transmit_target: format!("file:///tmp/{n}"),
            method: UploadMethod::Put,
        }
    }

    fn registry_over(store: &InMemoryProjectionStore, cache: &PayloadCache) -> TransferRegistry {
        TransferRegistry::new(Box::new(store.clone()), cache.clone())
    }

    async fn reserved(registry: &TransferRegistry, id: &TransferId, n: u32) {
        registry
            .update(
                id,
                TransferUpdate::events([
                    TransferEvent::StartReserve,
                    TransferEvent::ReserveSuccess(destination(n)),
                ]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let store = InMemoryProjectionStore::new();
        let cache = PayloadCache::new();
        let registry = registry_over(&store, &cache);
        let mut events = registry.subscribe();

        let ids = registry.add_transfers(vec![payload("a.bin", 10)]).await.unwrap();
        let id = &ids[0];
        assert!(store.get(id).await.unwrap().is_some());

        assert!(registry.remove(id).await.unwrap());

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RegistryEvent::Transfer { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states, vec![TransferState::Queued, TransferState::Idle]);
        assert!(registry.list().await.is_empty());
        assert!(!cache.contains(id).await);
        assert!(store.get(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_payloads_rejected_before_state_change() {
        let registry = registry_over(&InMemoryProjectionStore::new(), &PayloadCache::new());
        let result = registry
            .add_transfers(vec![payload("ok.bin", 3), payload("", 3)])
            .await;
        assert!(matches!(result, Err(TransferError::ValidationError(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_intake_frozen_once_started() {
        let registry = registry_over(&InMemoryProjectionStore::new(), &PayloadCache::new());
        let ids = registry.add_transfers(vec![payload("a.bin", 10)]).await.unwrap();
        reserved(&registry, &ids[0], 1).await;
        registry
            .update(&ids[0], TransferUpdate::event(TransferEvent::StartUpload))
            .await
            .unwrap();

        let added = registry.add_transfers(vec![payload("b.bin", 10)]).await.unwrap();
        assert!(added.is_empty());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_ignored() {
        let registry = registry_over(&InMemoryProjectionStore::new(), &PayloadCache::new());
        let result = registry
            .update(
                &TransferId::new("missing"),
                TransferUpdate::event(TransferEvent::Cancel),
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_update_guard_skips_other_states() {
        let registry = registry_over(&InMemoryProjectionStore::new(), &PayloadCache::new());
        let ids = registry.add_transfers(vec![payload("a.bin", 10)]).await.unwrap();
        let record = registry
            .update(
                &ids[0],
                TransferUpdate::event(TransferEvent::StartUpload)
                    .with_token(CancellationToken::new())
                    .only_from(&[TransferState::Ready]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TransferState::Queued);
        assert!(!record.has_cancel_token);
    }

    #[tokio::test]
    async fn test_cancel_all_only_touches_active() {
        let registry = registry_over(&InMemoryProjectionStore::new(), &PayloadCache::new());
        let ids = registry
            .add_transfers(vec![payload("a", 1), payload("b", 1), payload("c", 1)])
            .await
            .unwrap();

        let upload_token = CancellationToken::new();
        reserved(&registry, &ids[0], 0).await;
        registry
            .update(
                &ids[0],
                TransferUpdate::event(TransferEvent::StartUpload).with_token(upload_token.clone()),
            )
            .await
            .unwrap();

        let reserve_token = CancellationToken::new();
        registry
            .update(
                &ids[1],
                TransferUpdate::event(TransferEvent::StartReserve).with_token(reserve_token.clone()),
            )
            .await
            .unwrap();

        reserved(&registry, &ids[2], 2).await;
        registry
            .update(
                &ids[2],
                TransferUpdate::events([TransferEvent::StartUpload, TransferEvent::UploadSuccess]),
            )
            .await
            .unwrap();

        let canceled = registry.cancel_all().await.unwrap();
        assert_eq!(canceled.len(), 2);
        assert!(upload_token.is_cancelled());
        assert!(reserve_token.is_cancelled());

        let records = registry.list().await;
        assert_eq!(records[0].state, TransferState::Canceled);
        assert!(!records[0].has_cancel_token);
        assert_eq!(records[1].state, TransferState::Canceled);
        assert!(!records[1].has_cancel_token);
        assert_eq!(records[2].state, TransferState::Success);
    }

    #[tokio::test]
    async fn test_clear_removable_keeps_uploading() {
        let cache = PayloadCache::new();
        let registry = registry_over(&InMemoryProjectionStore::new(), &cache);
        let ids = registry
            .add_transfers(vec![payload("a", 1), payload("b", 1)])
            .await
            .unwrap();
        reserved(&registry, &ids[0], 0).await;
        registry
            .update(&ids[0], TransferUpdate::event(TransferEvent::StartUpload))
            .await
            .unwrap();

        let removed = registry.clear_removable().await.unwrap();
        assert_eq!(removed, vec![ids[1].clone()]);
        assert_eq!(registry.len().await, 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_all_aborts_and_wipes() {
        let store = InMemoryProjectionStore::new();
        let cache = PayloadCache::new();
        let registry = registry_over(&store, &cache);
        let ids = registry.add_transfers(vec![payload("a", 1)]).await.unwrap();
        let token = CancellationToken::new();
        registry
            .update(
                &ids[0],
                TransferUpdate::event(TransferEvent::StartReserve).with_token(token.clone()),
            )
            .await
            .unwrap();

        registry.clear_all().await.unwrap();
        assert!(token.is_cancelled());
        assert!(registry.is_empty().await);
        assert!(cache.is_empty().await);
        assert!(store.all().await.unwrap().is_empty());
        assert_eq!(registry.session_summary().await.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_rehydrate_with_payloads_round_trips() {
        let store = InMemoryProjectionStore::new();
        let cache = PayloadCache::new();
        let first = registry_over(&store, &cache);
        let ids = first
            .add_transfers(vec![payload("a", 5), payload("b", 5), payload("c", 5)])
            .await
            .unwrap();
        reserved(&first, &ids[0], 0).await;
        reserved(&first, &ids[1], 1).await;
        first
            .update(
                &ids[1],
                TransferUpdate::events([
                    TransferEvent::StartUpload,
                    TransferEvent::UploadProgress(70),
                    TransferEvent::UploadError("reset by peer".into()),
                ]),
            )
            .await
            .unwrap();
        let before = first.list().await;

        let second = registry_over(&store, &cache);
        assert_eq!(second.rehydrate().await.unwrap(), 3);
        let after = second.list().await;

        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.state, b.state);
            assert_eq!(a.progress, b.progress);
            assert_eq!(a.destination, b.destination);
            assert_eq!(a.error, b.error);
        }
    }

    #[tokio::test]
    async fn test_rehydrate_without_payloads_forces_error() {
        let store = InMemoryProjectionStore::new();
        let first = registry_over(&store, &PayloadCache::new());
        let ids = first
            .add_transfers(vec![payload("a", 5), payload("b", 5)])
            .await
            .unwrap();
        reserved(&first, &ids[0], 0).await;
        first
            .update(
                &ids[0],
                TransferUpdate::events([TransferEvent::StartUpload, TransferEvent::UploadSuccess]),
            )
            .await
            .unwrap();

        let second = registry_over(&store, &PayloadCache::new());
        second.rehydrate().await.unwrap();

        for record in second.list().await {
            assert_eq!(record.state, TransferState::Error);
            assert_eq!(record.error.as_deref(), Some(PAYLOAD_LOST_MESSAGE));
            assert_eq!(record.file.size, 5);
            assert!(record.is_placeholder());
        }
        let persisted = store.all().await.unwrap();
        assert!(persisted.iter().all(|p| p.status == TransferState::Error));

        let summary = second.session_summary().await;
        assert!(summary.counts.has_placeholder_files);
        assert!(!summary.counts.has_retryable_files);
    }

    #[tokio::test]
    async fn test_restore_payload_clears_placeholder() {
        let store = InMemoryProjectionStore::new();
        let first = registry_over(&store, &PayloadCache::new());
        let ids = first.add_transfers(vec![payload("a.bin", 5)]).await.unwrap();

        let second = registry_over(&store, &PayloadCache::new());
        second.rehydrate().await.unwrap();

        let wrong = second.restore_payload(&ids[0], payload("other.bin", 5)).await;
        assert!(matches!(wrong, Err(TransferError::ValidationError(_))));

        let record = second
            .restore_payload(&ids[0], payload("a.bin", 5))
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_placeholder());
        assert!(record.is_retryable());
        assert_eq!(second.payload(&ids[0]).await.unwrap().len(), 5);
    }
}
