use std::collections::HashMap;
use std::fmt;
use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// 커넥션 식별자. accept 시점에 프로세스 내에서 유일하게 부여됩니다.
pub type ConnectionId = u64;

const QUEUE_CAPACITY: usize = 1024;

/// 커넥션 생명주기 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    New,
    Active,
    Idle,
    Closed,
    Hijacked,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Active => "active",
            ConnectionState::Idle => "idle",
            ConnectionState::Closed => "closed",
            ConnectionState::Hijacked => "hijacked",
        }
    }

    /// 테이블에서 제거되어야 하는 상태
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Hijacked)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 완료된 요청 하나의 소요 시간 (초)
#[derive(Debug, Clone, Copy)]
pub struct RequestStat {
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestTotals {
    pub total: u64,
    pub total_time: f64,
}

enum RequestEvent {
    Completed(RequestStat),
    Reset,
    Snapshot(oneshot::Sender<RequestTotals>),
}

enum ConnectionEvent {
    Transition(ConnectionId, ConnectionState),
    Snapshot(oneshot::Sender<HashMap<String, usize>>),
}

/// 요청/커넥션 이벤트를 각각 하나의 태스크로 직렬화해 집계합니다.
///
/// 스냅샷 요청도 이벤트와 같은 큐를 지나가므로, 먼저 보낸 이벤트는
/// 항상 스냅샷에 반영됩니다.
#[derive(Clone)]
pub struct StatsAggregator {
    requests: mpsc::Sender<RequestEvent>,
    connections: mpsc::Sender<ConnectionEvent>,
}

impl StatsAggregator {
    /// 집계 태스크를 시작합니다. tokio 런타임 안에서 호출해야 합니다.
    pub fn spawn() -> Self {
        let (request_tx, request_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (connection_tx, connection_rx) = mpsc::channel(QUEUE_CAPACITY);

        tokio::spawn(fold_requests(request_rx));
        tokio::spawn(fold_connections(connection_rx));

        Self {
            requests: request_tx,
            connections: connection_tx,
        }
    }

    pub async fn record(&self, stat: RequestStat) {
        if self.requests.send(RequestEvent::Completed(stat)).await.is_err() {
            warn!("요청 통계 집계 태스크가 종료됨");
        }
    }

    /// 새 측정 구간을 시작합니다.
    pub async fn reset(&self) {
        if self.requests.send(RequestEvent::Reset).await.is_err() {
            warn!("요청 통계 집계 태스크가 종료됨");
        }
    }

    pub async fn connection_event(&self, id: ConnectionId, state: ConnectionState) {
        if self.connections.send(ConnectionEvent::Transition(id, state)).await.is_err() {
            warn!(connection = id, "커넥션 상태 집계 태스크가 종료됨");
        }
    }

    pub async fn request_totals(&self) -> RequestTotals {
        let (tx, rx) = oneshot::channel();
        if self.requests.send(RequestEvent::Snapshot(tx)).await.is_err() {
            return RequestTotals::default();
        }
        rx.await.unwrap_or_default()
    }

    /// 상태 이름별 커넥션 수
    pub async fn connection_states(&self) -> HashMap<String, usize> {
        let (tx, rx) = oneshot::channel();
        if self.connections.send(ConnectionEvent::Snapshot(tx)).await.is_err() {
            return HashMap::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn snapshot(&self, into: &mut Map<String, Value>) {
        let totals = self.request_totals().await;
        let states = self.connection_states().await;

        into.insert("Requests".to_string(), json!(totals.total));
        into.insert("TotalTime".to_string(), json!(totals.total_time));
        into.insert("States".to_string(), json!(states));
    }
}

async fn fold_requests(mut rx: mpsc::Receiver<RequestEvent>) {
    let mut totals = RequestTotals::default();

    while let Some(event) = rx.recv().await {
        match event {
            RequestEvent::Completed(stat) => {
                totals.total += 1;
                totals.total_time += stat.duration;
            }
            RequestEvent::Reset => {
                debug!(total = totals.total, "요청 통계 초기화");
                totals = RequestTotals::default();
            }
            RequestEvent::Snapshot(reply) => {
                let _ = reply.send(totals);
            }
        }
    }
}

async fn fold_connections(mut rx: mpsc::Receiver<ConnectionEvent>) {
    let mut table: HashMap<ConnectionId, ConnectionState> = HashMap::new();

    while let Some(event) = rx.recv().await {
        match event {
            ConnectionEvent::Transition(id, state) if state.is_terminal() => {
                table.remove(&id);
            }
            ConnectionEvent::Transition(id, state) => {
                table.insert(id, state);
            }
            ConnectionEvent::Snapshot(reply) => {
                let mut histogram = HashMap::new();
                for state in table.values() {
                    *histogram.entry(state.as_str().to_string()).or_insert(0) += 1;
                }
                let _ = reply.send(histogram);
            }
        }
    }
}
