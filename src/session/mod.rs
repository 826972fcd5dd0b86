//! One leader/follower pair and its round protocol.
//!
//! A [`Session`] owns one half of a pair: the duplex transport for bulk
//! payloads and the shared store both parties signal through. A round is
//! negotiated entirely over the store. The sender publishes `PUSH`, the
//! receiver answers `PULL`, the payload crosses the transport, and both
//! parties return to `ZOMBIE`.
//!
//! The two roles wait differently. A follower blocks on the handshake,
//! polling the leader's half of the store up to a hard timeout. A leader
//! never blocks on a peer that has not shown the matching status; it
//! returns [`TransferOutcome::NotReady`] and the caller sweeps the
//! session again later.

pub mod collector;
pub mod status;
pub mod transform;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    mem,
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    common::Role,
    params::{ParamArena, ParamId},
    settings::SessionSettings,
    store::{half_key, KvStore},
    task::TaskInfo,
    transport::{PairConn, PairTransport, TransportError},
};

use self::collector::Collector;
use self::status::{Status, StatusRecord};
use self::transform::{
    Payload, PayloadEntry, Transform, TransformChain, TransformError, PARAM_FIELD,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("peer `{0}` is offline")]
    DeviceOffline(String),
    #[error("no matching peer status within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("pending transfer did not complete within {0:?}")]
    TransferTimeout(Duration),
    #[error("a transfer is already in flight on this session")]
    TransferInFlight,
    #[error("bulk transfer failed: {0}")]
    Transfer(TransportError),
    #[error("store access failed: {0}")]
    Store(anyhow::Error),
    #[error("payload codec failed: {0}")]
    Codec(#[from] bincode::Error),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error("no parameter named `{0}` is registered")]
    UnknownParameter(String),
    #[error("payload key `{0}` is already bound")]
    DuplicateKey(String),
    #[error("a collector named `{0}` is already registered")]
    DuplicateCollector(String),
    #[error("`{0}` is a reserved status record field")]
    ReservedCollector(String),
}

/// Status record fields collectors may not shadow.
const RESERVED_FIELDS: &[&str] = &[
    "status",
    "task_info",
    "upload_version",
    "download_version",
    "nick_name",
    "timestamp",
];

/// The direction of one bulk transfer, seen from this party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// What a call to [`Session::upload`] or [`Session::download`] produced.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Handshake and bulk transfer both finished inline.
    Complete,
    /// Leader only: the peer has not shown the matching status yet.
    /// Nothing was written; sweep again later.
    NotReady,
    /// Leader only, with pending transfers enabled: the handshake
    /// matched and the bulk transfer runs in the background.
    Pending(PendingTransfer),
}

/// A bulk transfer running off-session.
///
/// The session's transport is inside the background task until
/// [`finish`](PendingTransfer::finish) hands it back; the session
/// refuses further transfers in the meantime. Finishing consumes the
/// handle, so a transfer cannot be settled twice.
pub struct PendingTransfer {
    direction: Direction,
    handle: JoinHandle<Result<(Box<dyn PairTransport>, Option<Vec<u8>>), TransportError>>,
    started: Instant,
    timeout: Duration,
}

impl fmt::Debug for PendingTransfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTransfer")
            .field("direction", &self.direction)
            .field("started", &self.started)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PendingTransfer {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether the background transfer has finished (in either way).
    pub fn is_completed(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn is_expired(&self) -> bool {
        !self.handle.is_finished() && self.started.elapsed() > self.timeout
    }

    /// Settles the transfer on its session: restores the transport,
    /// commits a downloaded payload, and closes the round.
    ///
    /// An expired transfer is aborted and leaves the session without a
    /// transport; the pair is unusable afterwards.
    pub async fn finish(self, session: &mut Session) -> Result<(), SessionError> {
        if self.is_expired() {
            self.handle.abort();
            return Err(SessionError::TransferTimeout(self.timeout));
        }
        let (transport, received) = self
            .handle
            .await
            .map_err(|e| SessionError::Transfer(anyhow::anyhow!("transfer task failed: {}", e)))?
            .map_err(SessionError::Transfer)?;
        session.transport = Some(transport);
        if let Some(bytes) = received {
            session.commit_received(bytes)?;
        }
        session.finish_round().await
    }
}

/// One established pair, from this party's point of view.
pub struct Session {
    role: Role,
    version: i64,
    store: Arc<dyn KvStore>,
    /// Taken while a pending transfer holds the channel.
    transport: Option<Box<dyn PairTransport>>,
    chain: TransformChain,
    collectors: Vec<Box<dyn Collector>>,
    payload: Payload,
    bindings: HashMap<String, ParamId>,
    bound: HashSet<ParamId>,
    record: StatusRecord,
    /// Last successfully read peer record; degraded in place when a
    /// read fails.
    peer_cache: StatusRecord,
    settings: SessionSettings,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.role)
            .field("version", &self.version)
            .finish()
    }
}

impl Session {
    /// Wraps one pair connection and announces this party in the store.
    pub async fn new(
        conn: PairConn,
        role: Role,
        settings: SessionSettings,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            role,
            version: 0,
            store: conn.store,
            transport: Some(conn.transport),
            chain: TransformChain::new(),
            collectors: Vec::new(),
            payload: Payload::new(),
            bindings: HashMap::new(),
            bound: HashSet::new(),
            record: StatusRecord::initial(settings.nick_name.clone()),
            peer_cache: StatusRecord::initial(""),
            settings,
        };
        session.write_own().await?;
        Ok(session)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The current round number. Versions only move through
    /// [`advance_round`](Self::advance_round); transfers stamp the
    /// current value into the status record.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn advance_round(&mut self) {
        self.version += 1;
    }

    pub fn nick_name(&self) -> &str {
        &self.record.nick_name
    }

    pub fn peer_record(&self) -> &StatusRecord {
        &self.peer_cache
    }

    pub fn peer_nick_name(&self) -> &str {
        &self.peer_cache.nick_name
    }

    pub fn peer_task_info(&self) -> &TaskInfo {
        &self.peer_cache.task_info
    }

    pub fn peer_upload_version(&self) -> i64 {
        self.peer_cache.upload_version
    }

    /// Extra fields of the peer's status record, as published by its
    /// collectors.
    pub fn peer_extra(&self) -> &BTreeMap<String, Value> {
        &self.peer_cache.extra
    }

    /// Sets the task info published with the next transfer.
    pub fn set_task_info(&mut self, info: TaskInfo) {
        self.record.task_info = info;
    }

    pub fn register_transform(&mut self, transform: Box<dyn Transform>) {
        self.chain.register(transform);
    }

    pub fn register_collector(
        &mut self,
        collector: Box<dyn Collector>,
    ) -> Result<(), SessionError> {
        let name = collector.name();
        if RESERVED_FIELDS.contains(&name) {
            return Err(SessionError::ReservedCollector(name.to_string()));
        }
        if self.collectors.iter().any(|c| c.name() == name) {
            return Err(SessionError::DuplicateCollector(name.to_string()));
        }
        self.collectors.push(collector);
        Ok(())
    }

    /// Binds named parameters to payload keys, one key per parameter.
    pub fn set_state_dict(
        &mut self,
        arena: &ParamArena,
        names: &[&str],
    ) -> Result<(), SessionError> {
        for &name in names {
            let id = arena
                .id_of(name)
                .ok_or_else(|| SessionError::UnknownParameter(name.to_string()))?;
            if self.bindings.contains_key(name) || !self.bound.insert(id) {
                return Err(SessionError::DuplicateKey(name.to_string()));
            }
            self.bindings.insert(name.to_string(), id);
        }
        Ok(())
    }

    /// Drops all bindings and rebinds from scratch.
    pub fn reset_state_dict(
        &mut self,
        arena: &ParamArena,
        names: &[&str],
    ) -> Result<(), SessionError> {
        self.bindings.clear();
        self.bound.clear();
        self.set_state_dict(arena, names)
    }

    /// Copies every bound parameter into the outgoing payload.
    pub fn pack_state(&mut self, arena: &ParamArena) {
        for (key, &id) in &self.bindings {
            let mut entry = PayloadEntry::new();
            entry.insert(PARAM_FIELD.to_string(), arena.get(id).data.clone());
            self.payload.insert(key.clone(), entry);
        }
    }

    /// Merges fields into the staged entry under `key`, creating the
    /// entry if needed. Existing fields of the same name are replaced.
    pub fn pack(&mut self, key: impl Into<String>, fields: PayloadEntry) {
        self.payload.entry(key.into()).or_default().extend(fields);
    }

    /// The subset of the stored fields under `key` that are present.
    /// Missing fields (or a missing key) are silently omitted.
    pub fn unpack(&self, key: &str, fields: &[&str]) -> PayloadEntry {
        let entry = match self.payload.get(key) {
            Some(entry) => entry,
            None => return PayloadEntry::new(),
        };
        fields
            .iter()
            .filter_map(|&field| {
                entry
                    .get(field)
                    .map(|value| (field.to_string(), value.clone()))
            })
            .collect()
    }

    /// Writes downloaded parameter values back into the arena, for every
    /// bound key the received payload carries.
    pub fn load_received(&self, arena: &mut ParamArena) {
        for (key, &id) in &self.bindings {
            if let Some(value) = self.payload.get(key).and_then(|e| e.get(PARAM_FIELD)) {
                arena.get_mut(id).data = value.clone();
            }
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn take_payload(&mut self) -> Payload {
        mem::take(&mut self.payload)
    }

    /// Sends the staged payload to the peer.
    pub async fn upload(&mut self) -> Result<TransferOutcome, SessionError> {
        self.transfer(Direction::Upload).await
    }

    /// Receives the peer's payload. On success the payload is committed
    /// into this session, replacing whatever was staged.
    pub async fn download(&mut self) -> Result<TransferOutcome, SessionError> {
        self.transfer(Direction::Download).await
    }

    /// Publishes a terminal `OFFLINE` so the peer fails fast instead of
    /// waiting out its handshake timeout.
    pub async fn mark_offline(&mut self) -> Result<(), SessionError> {
        self.record.status = Status::Offline;
        self.write_own().await
    }

    async fn transfer(&mut self, direction: Direction) -> Result<TransferOutcome, SessionError> {
        if self.transport.is_none() {
            return Err(SessionError::TransferInFlight);
        }
        let own_status = match direction {
            Direction::Upload => Status::Push,
            Direction::Download => Status::Pull,
        };
        match direction {
            Direction::Upload => self.record.upload_version = self.version,
            Direction::Download => self.record.download_version = self.version,
        }
        self.record.status = own_status;
        self.collect_into_record();

        match self.role {
            // The follower announces first and waits for the leader's
            // answer, bounded by the handshake timeout.
            Role::Follower => {
                self.write_own().await?;
                let deadline = Instant::now() + self.settings.handshake_timeout();
                loop {
                    let peer_status = self.read_peer().await.status;
                    if peer_status == Status::Offline {
                        return Err(SessionError::DeviceOffline(
                            self.peer_cache.nick_name.clone(),
                        ));
                    }
                    if peer_status == own_status.counterpart() {
                        break;
                    }
                    if Instant::now() >= deadline {
                        return Err(SessionError::HandshakeTimeout(
                            self.settings.handshake_timeout(),
                        ));
                    }
                    tokio::time::sleep(self.settings.poll_interval()).await;
                }
            }
            // The leader only answers an already waiting follower, so a
            // NotReady probe leaves no trace in the store.
            Role::Leader => {
                let peer_status = self.read_peer().await.status;
                if peer_status == Status::Offline {
                    return Err(SessionError::DeviceOffline(
                        self.peer_cache.nick_name.clone(),
                    ));
                }
                if peer_status != own_status.counterpart() {
                    debug!(peer = %peer_status, "peer not ready for {:?}", direction);
                    return Ok(TransferOutcome::NotReady);
                }
                self.write_own().await?;
            }
        }

        let pending = self.settings.async_transfer && self.role.is_leader();
        match direction {
            Direction::Upload => {
                let outgoing = self.chain.encrypt(mem::take(&mut self.payload))?;
                let bytes = bincode::serialize(&outgoing)?;
                if pending {
                    return Ok(TransferOutcome::Pending(self.spawn_transfer(
                        direction,
                        Some(bytes),
                    )?));
                }
                let transport = self.transport.as_mut().ok_or(SessionError::TransferInFlight)?;
                transport.send(bytes).await.map_err(SessionError::Transfer)?;
            }
            Direction::Download => {
                if pending {
                    return Ok(TransferOutcome::Pending(
                        self.spawn_transfer(direction, None)?,
                    ));
                }
                let transport = self.transport.as_mut().ok_or(SessionError::TransferInFlight)?;
                let bytes = transport.recv().await.map_err(SessionError::Transfer)?;
                self.commit_received(bytes)?;
            }
        }
        self.finish_round().await?;
        Ok(TransferOutcome::Complete)
    }

    fn spawn_transfer(
        &mut self,
        direction: Direction,
        outgoing: Option<Vec<u8>>,
    ) -> Result<PendingTransfer, SessionError> {
        let mut transport = self.transport.take().ok_or(SessionError::TransferInFlight)?;
        let handle = tokio::spawn(async move {
            match outgoing {
                Some(bytes) => {
                    transport.send(bytes).await?;
                    Ok((transport, None))
                }
                None => {
                    let bytes = transport.recv().await?;
                    Ok((transport, Some(bytes)))
                }
            }
        });
        Ok(PendingTransfer {
            direction,
            handle,
            started: Instant::now(),
            timeout: self.settings.handshake_timeout(),
        })
    }

    fn commit_received(&mut self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let incoming: Payload = bincode::deserialize(&bytes)?;
        self.payload = self.chain.decrypt(incoming)?;
        Ok(())
    }

    async fn finish_round(&mut self) -> Result<(), SessionError> {
        self.record.status = Status::Zombie;
        self.write_own().await
    }

    fn collect_into_record(&mut self) {
        for collector in &mut self.collectors {
            self.record
                .extra
                .insert(collector.name().to_string(), collector.collect());
        }
    }

    async fn write_own(&mut self) -> Result<(), SessionError> {
        self.record.timestamp = unix_now();
        let raw = serde_json::to_string(&self.record).map_err(|e| SessionError::Store(e.into()))?;
        self.store
            .set(&half_key(self.role), raw)
            .await
            .map_err(SessionError::Store)
    }

    /// Reads the peer's half of the store. Never fails: on any fault the
    /// cached record is kept with a degraded status. A follower that
    /// cannot see its leader treats it as gone for good; a leader that
    /// cannot see a follower treats it as merely idle.
    async fn read_peer(&mut self) -> &StatusRecord {
        match self.store.get(&half_key(self.role.peer())).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(record) => self.peer_cache = record,
                Err(e) => self.degrade_peer_cache(&e.to_string()),
            },
            Err(e) => self.degrade_peer_cache(&e.to_string()),
        }
        &self.peer_cache
    }

    fn degrade_peer_cache(&mut self, cause: &str) {
        let degraded = if self.role.is_follower() {
            Status::Offline
        } else {
            Status::Zombie
        };
        warn!(%cause, "peer record unreadable, degrading cached status to {}", degraded);
        self.peer_cache.status = degraded;
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::Parameter,
        store::InMemoryStore,
        task::INSTANCES,
        transport::ChannelTransport,
    };
    use ndarray::arr1;
    use serde_json::json;

    fn conn_pair() -> (PairConn, PairConn) {
        let (leader_end, follower_end) = ChannelTransport::pair();
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        (
            PairConn {
                transport: Box::new(leader_end),
                store: Arc::clone(&store),
            },
            PairConn {
                transport: Box::new(follower_end),
                store,
            },
        )
    }

    fn fast_settings() -> SessionSettings {
        SessionSettings {
            poll_interval_millis: 1,
            handshake_timeout_secs: 5,
            ..SessionSettings::default()
        }
    }

    async fn session_pair() -> (Session, Session) {
        let (l, f) = conn_pair();
        let leader = Session::new(l, Role::Leader, fast_settings()).await.unwrap();
        let follower = Session::new(f, Role::Follower, fast_settings())
            .await
            .unwrap();
        (leader, follower)
    }

    fn entry(values: &[f32]) -> PayloadEntry {
        let mut e = PayloadEntry::new();
        e.insert(PARAM_FIELD.to_string(), arr1(values).into_dyn());
        e
    }

    #[tokio::test]
    async fn test_offline_peer_fails_the_round_without_hanging() {
        let (mut leader, mut follower) = session_pair().await;
        follower.mark_offline().await.unwrap();
        let err = leader.download().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceOffline(_)));

        // the follower side fails just as fast
        let (mut leader, mut follower) = session_pair().await;
        leader.mark_offline().await.unwrap();
        let err = follower.upload().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceOffline(_)));
    }

    #[tokio::test]
    async fn test_leader_is_not_ready_while_peer_idles() {
        let (mut leader, _follower) = session_pair().await;
        let outcome = leader.download().await.unwrap();
        assert!(matches!(outcome, TransferOutcome::NotReady));
    }

    #[tokio::test]
    async fn test_follower_degrades_missing_leader_to_offline() {
        let (_leader_conn, follower_conn) = conn_pair();
        // the leader never announced itself in the store
        let mut follower = Session::new(follower_conn, Role::Follower, fast_settings())
            .await
            .unwrap();
        let err = follower.upload().await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceOffline(_)));
    }

    #[tokio::test]
    async fn test_follower_handshake_times_out_against_idle_leader() {
        let (l, f) = conn_pair();
        let _leader = Session::new(l, Role::Leader, fast_settings()).await.unwrap();
        let mut follower = Session::new(
            f,
            Role::Follower,
            SessionSettings {
                handshake_timeout_secs: 0,
                poll_interval_millis: 1,
                ..SessionSettings::default()
            },
        )
        .await
        .unwrap();
        let err = follower.upload().await.unwrap_err();
        assert!(matches!(err, SessionError::HandshakeTimeout(_)));
    }

    #[tokio::test]
    async fn test_sync_round_trip() {
        let (mut leader, mut follower) = session_pair().await;

        let mut arena = ParamArena::new();
        arena
            .insert(Parameter::new("w", arr1(&[1.0f32, 2.0]).into_dyn(), true))
            .unwrap();
        follower.set_state_dict(&arena, &["w"]).unwrap();
        follower.set_task_info(TaskInfo::new().set(INSTANCES, 8));
        follower.pack_state(&arena);

        let (up, down) = tokio::join!(follower.upload(), leader.download());
        assert!(matches!(up.unwrap(), TransferOutcome::Complete));
        assert!(matches!(down.unwrap(), TransferOutcome::Complete));

        assert_eq!(
            leader.payload()["w"][PARAM_FIELD],
            arr1(&[1.0f32, 2.0]).into_dyn()
        );
        assert_eq!(leader.peer_task_info().get_f64(INSTANCES), Some(8.0));
        assert_eq!(leader.peer_upload_version(), 0);

        // received values flow back into a bound arena
        let mut target = ParamArena::new();
        target
            .insert(Parameter::new("w", arr1(&[0.0f32, 0.0]).into_dyn(), true))
            .unwrap();
        leader.set_state_dict(&target, &["w"]).unwrap();
        leader.load_received(&mut target);
        let id = target.id_of("w").unwrap();
        assert_eq!(target.get(id).data, arr1(&[1.0f32, 2.0]).into_dyn());
    }

    #[tokio::test]
    async fn test_pending_transfer_settles_exactly_once() {
        let (l, f) = conn_pair();
        let mut leader = Session::new(
            l,
            Role::Leader,
            SessionSettings {
                async_transfer: true,
                ..fast_settings()
            },
        )
        .await
        .unwrap();
        let mut follower = Session::new(f, Role::Follower, fast_settings())
            .await
            .unwrap();

        follower.pack("w", entry(&[5.0]));
        let follower_task = tokio::spawn(async move { follower.upload().await });

        let pending = loop {
            match leader.download().await.unwrap() {
                TransferOutcome::Pending(p) => break p,
                TransferOutcome::NotReady => {
                    tokio::time::sleep(Duration::from_millis(1)).await
                }
                TransferOutcome::Complete => unreachable!("leader transfers are pending"),
            }
        };

        // the transport is gone until the pending transfer settles
        let err = leader.upload().await.unwrap_err();
        assert!(matches!(err, SessionError::TransferInFlight));

        pending.finish(&mut leader).await.unwrap();
        assert_eq!(leader.payload()["w"][PARAM_FIELD][0], 5.0);

        assert!(matches!(
            follower_task.await.unwrap().unwrap(),
            TransferOutcome::Complete
        ));

        // and the session is usable again
        let outcome = leader.download().await.unwrap();
        assert!(matches!(outcome, TransferOutcome::NotReady));
    }

    #[tokio::test]
    async fn test_collectors_reach_the_peer_record() {
        struct Fixed;
        impl Collector for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn collect(&mut self) -> Value {
                json!(42)
            }
        }

        let (mut leader, mut follower) = session_pair().await;
        follower.register_collector(Box::new(Fixed)).unwrap();
        follower.pack("w", entry(&[0.0]));

        let (up, down) = tokio::join!(follower.upload(), leader.download());
        up.unwrap();
        down.unwrap();
        assert_eq!(leader.peer_extra().get("fixed"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_collector_names_are_checked() {
        struct Named(&'static str);
        impl Collector for Named {
            fn name(&self) -> &str {
                self.0
            }
            fn collect(&mut self) -> Value {
                Value::Null
            }
        }

        let (mut leader, _f) = session_pair().await;
        assert!(matches!(
            leader.register_collector(Box::new(Named("status"))).unwrap_err(),
            SessionError::ReservedCollector(_)
        ));
        leader.register_collector(Box::new(Named("x"))).unwrap();
        assert!(matches!(
            leader.register_collector(Box::new(Named("x"))).unwrap_err(),
            SessionError::DuplicateCollector(_)
        ));
    }

    #[tokio::test]
    async fn test_pack_merges_and_unpack_omits_missing() {
        let (mut leader, _f) = session_pair().await;
        leader.pack("w", entry(&[1.0]));
        let mut extra = PayloadEntry::new();
        extra.insert("importance".to_string(), arr1(&[0.5f32]).into_dyn());
        leader.pack("w", extra);
        assert_eq!(leader.payload()["w"].len(), 2);

        let subset = leader.unpack("w", &[PARAM_FIELD, "absent"]);
        assert_eq!(subset.len(), 1);
        assert!(subset.contains_key(PARAM_FIELD));
        assert!(leader.unpack("missing", &[PARAM_FIELD]).is_empty());
    }

    #[tokio::test]
    async fn test_state_dict_bindings_are_unique() {
        let (mut leader, _f) = session_pair().await;
        let mut arena = ParamArena::new();
        arena
            .insert(Parameter::new("w", arr1(&[0.0f32]).into_dyn(), true))
            .unwrap();

        leader.set_state_dict(&arena, &["w"]).unwrap();
        assert!(matches!(
            leader.set_state_dict(&arena, &["w"]).unwrap_err(),
            SessionError::DuplicateKey(_)
        ));
        assert!(matches!(
            leader.set_state_dict(&arena, &["absent"]).unwrap_err(),
            SessionError::UnknownParameter(_)
        ));

        // rebinding from scratch is allowed
        leader.reset_state_dict(&arena, &["w"]).unwrap();
    }
}
