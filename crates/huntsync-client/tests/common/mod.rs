//! In-memory fakes for the upstream stream and the write API.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use huntsync_client::api::{ApiError, HuntApi, WriteRequest, WriteResponse};
use huntsync_client::connection::Failure;
use huntsync_client::upstream::{Upstream, UpstreamError, UpstreamFrame, UpstreamLink, UpstreamRequest};
use huntsync_client::{AgentConfig, AgentHandle, LockManager, PuzzleView, TabEvent, spawn_agent};
use huntsync_types::{
    Change, ChangeId, Entity, LiveMessage, Puzzle, PuzzleId, Round, RoundId, Snapshot, Status,
    SyncEvent,
};
use tokio::sync::{Semaphore, broadcast, mpsc, watch};

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

pub fn puzzle(id: i64, round: i64, name: &str) -> Puzzle {
    Puzzle {
        id: PuzzleId(id),
        name: name.to_string(),
        answer: String::new(),
        round: RoundId(round),
        status: Status::NotStarted,
        note: String::new(),
        location: String::new(),
        puzzle_url: format!("https://hunt.example.com/puzzle/{id}"),
        spreadsheet_id: String::new(),
        discord_channel: String::new(),
        meta: false,
        voice_room: String::new(),
        reminder: None,
    }
}

pub fn round(id: i64, name: &str) -> Round {
    Round { id: RoundId(id), name: name.to_string(), emoji: "🌊".into(), hue: 180, special: false, sort: id }
}

/// Watermark 10: round 1 "Ocean" with puzzles 1 "Fish" and 2 "Crab".
pub fn ocean_snapshot() -> Snapshot {
    Snapshot {
        change_id: ChangeId(10),
        puzzles: vec![puzzle(1, 1, "Fish"), puzzle(2, 1, "Crab")],
        rounds: vec![round(1, "Ocean")],
        ..Default::default()
    }
}

pub fn upsert(change_id: u64, p: Puzzle) -> LiveMessage {
    LiveMessage::Sync(SyncEvent { change_id: ChangeId(change_id), change: Change::UpsertPuzzle(p) })
}

pub fn fast_agent_config() -> AgentConfig {
    AgentConfig {
        stream_url: "ws://fake/rx".into(),
        backoff_floor_ms: 10,
        backoff_ceiling_ms: 40,
        connect_timeout_ms: 1000,
        activity_flush_ms: 20,
        ..Default::default()
    }
}

// ============================================================================
// FakeUpstream
// ============================================================================

struct FakeLink {
    frames: mpsc::UnboundedSender<UpstreamFrame>,
    requests: mpsc::UnboundedReceiver<UpstreamRequest>,
}

/// Upstream where every connect succeeds and the test drives the newest link.
#[derive(Default)]
pub struct FakeUpstream {
    connects: Mutex<Vec<Option<ChangeId>>>,
    links: Mutex<Vec<FakeLink>>,
}

#[async_trait]
impl Upstream for FakeUpstream {
    async fn connect(&self, after: Option<ChangeId>) -> Result<UpstreamLink, UpstreamError> {
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let (requests, requests_rx) = mpsc::unbounded_channel();
        self.connects.lock().unwrap().push(after);
        self.links.lock().unwrap().push(FakeLink { frames: frames_tx, requests: requests_rx });
        Ok(UpstreamLink { frames, requests })
    }
}

impl FakeUpstream {
    pub fn connects(&self) -> Vec<Option<ChangeId>> {
        self.connects.lock().unwrap().clone()
    }

    /// Deliver a message on the newest link.
    pub fn push(&self, msg: LiveMessage) {
        let links = self.links.lock().unwrap();
        links.last().expect("no link yet").frames.send(UpstreamFrame::Message(msg)).unwrap();
    }

    /// Close the newest link with a close frame.
    pub fn close(&self, code: u16) {
        let links = self.links.lock().unwrap();
        let failure = Failure::Closed { code, reason: format!("closed with {code}") };
        links.last().expect("no link yet").frames.send(UpstreamFrame::Closed(failure)).unwrap();
    }

    /// Activity requests received on any link so far.
    pub fn requests(&self) -> Vec<UpstreamRequest> {
        let mut links = self.links.lock().unwrap();
        let mut out = Vec::new();
        for link in links.iter_mut() {
            while let Ok(req) = link.requests.try_recv() {
                out.push(req);
            }
        }
        out
    }
}

// ============================================================================
// FakeApi
// ============================================================================

/// Write API that hands out sequential change ids.
pub struct FakeApi {
    snapshot: Mutex<Snapshot>,
    next_change: AtomicU64,
    next_entity: AtomicU64,
    gate: Option<Semaphore>,
    fail_with: Mutex<Option<u16>>,
    writes: Mutex<Vec<WriteRequest>>,
}

impl FakeApi {
    pub fn new(snapshot: Snapshot) -> Self {
        let next = snapshot.change_id.get() + 1;
        Self {
            snapshot: Mutex::new(snapshot),
            next_change: AtomicU64::new(next),
            next_entity: AtomicU64::new(100),
            gate: None,
            fail_with: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Writes block until [`release`](Self::release) is called.
    pub fn gated(snapshot: Snapshot) -> Self {
        Self { gate: Some(Semaphore::new(0)), ..Self::new(snapshot) }
    }

    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    pub fn set_snapshot(&self, snapshot: Snapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn set_next_change(&self, id: u64) {
        self.next_change.store(id, Ordering::SeqCst);
    }

    pub fn fail_with(&self, status: Option<u16>) {
        *self.fail_with.lock().unwrap() = status;
    }

    pub fn writes(&self) -> Vec<WriteRequest> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl HuntApi for FakeApi {
    async fn home(&self) -> Result<Snapshot, ApiError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn write(&self, request: WriteRequest) -> Result<WriteResponse, ApiError> {
        self.writes.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        let failure = *self.fail_with.lock().unwrap();
        match failure {
            Some(401) => return Err(ApiError::Unauthorized),
            Some(status) => return Err(ApiError::Status { status, body: "nope".into() }),
            None => {}
        }

        let change_id = ChangeId(self.next_change.fetch_add(1, Ordering::SeqCst));
        let entity = match &request {
            WriteRequest::CreatePuzzle(new) => {
                let id = self.next_entity.fetch_add(1, Ordering::SeqCst) as i64;
                let mut p = puzzle(id, new.round.get(), &new.name);
                p.puzzle_url = new.puzzle_url.clone();
                Some(Entity::Puzzle(p))
            }
            WriteRequest::CreateRound(new) => {
                let id = self.next_entity.fetch_add(1, Ordering::SeqCst) as i64;
                Some(Entity::Round(Round {
                    id: RoundId(id),
                    name: new.name.clone(),
                    emoji: new.emoji.clone(),
                    hue: new.hue,
                    special: new.special,
                    sort: new.sort,
                }))
            }
            _ => None,
        };
        Ok(WriteResponse { change_id, entity })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub upstream: Arc<FakeUpstream>,
    pub api: Arc<FakeApi>,
    pub locks: LockManager,
    pub agent: AgentHandle,
}

impl Harness {
    pub fn new(api: FakeApi) -> Self {
        let upstream = Arc::new(FakeUpstream::default());
        let locks = LockManager::new();
        let agent = spawn_agent(fast_agent_config(), upstream.clone(), locks.clone());
        Self { upstream, api: Arc::new(api), locks, agent }
    }

    pub async fn open_tab(&self) -> (huntsync_client::TabHandle, broadcast::Receiver<TabEvent>) {
        huntsync_client::TabHandle::open(&self.agent, self.api.clone(), &self.locks, None)
            .await
            .expect("tab open")
    }

    pub async fn wait_connected(&self) {
        eventually(|| async {
            self.agent.status().await.ok() == Some(huntsync_types::ConnectionState::Connected)
        })
        .await;
    }
}

/// Wait until the view satisfies `pred`, returning that view.
pub async fn wait_view(
    view: &mut watch::Receiver<Arc<PuzzleView>>,
    pred: impl Fn(&PuzzleView) -> bool,
) -> Arc<PuzzleView> {
    tokio::time::timeout(WAIT, async {
        loop {
            let current = view.borrow_and_update().clone();
            if pred(&current) {
                return current;
            }
            view.changed().await.expect("tab stopped");
        }
    })
    .await
    .expect("view never matched")
}

/// Poll `check` until it holds.
pub async fn eventually<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Everything currently queued on a tab's event receiver.
pub fn drain(rx: &mut broadcast::Receiver<TabEvent>) -> Vec<TabEvent> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}
