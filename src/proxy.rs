use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use hyper::{header, HeaderMap, Request, Response, StatusCode, Uri};
use hyper::header::{HeaderName, HeaderValue};
use hyper::body::{Bytes, Incoming};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Map, Value};
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;
use crate::logging::{RequestLog, log_request};
use crate::stats::{ConnectionId, ConnectionState, RequestStat, StatsAggregator};

pub type ProxyBody = Full<Bytes>;

pub const DEFAULT_MAINTENANCE_PAGE: &str = "Page down, we're working on it.";

// RFC 7230 6.1 hop-by-hop 헤더
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
];

/// 현재 트래픽을 받는 백엔드의 host:port
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    host: String,
    port: u16,
}

impl BackendTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for BackendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for BackendTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for BackendTarget {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ProxyError::InvalidTarget {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("포트가 없습니다"))?;
        if host.is_empty() {
            return Err(invalid("호스트가 비어있습니다"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("포트 파싱 실패"))?;

        Ok(Self::new(host, port))
    }
}

#[derive(Debug)]
pub enum ProxyError {
    InvalidTarget {
        value: String,
        reason: String,
    },
    /// 백엔드로 보낼 요청 생성 실패
    Request(hyper::http::Error),
    /// 백엔드 연결/전송 실패
    Transport(legacy::Error),
    /// 백엔드 응답 본문 수신 실패
    Body(hyper::Error),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::InvalidTarget { value, reason } =>
                write!(f, "잘못된 백엔드 주소 {}: {}", value, reason),
            ProxyError::Request(e) => write!(f, "Failed to build request: {}", e),
            ProxyError::Transport(e) => write!(f, "Backend request failed: {}", e),
            ProxyError::Body(e) => write!(f, "Failed to collect response body: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Request(e) => Some(e),
            ProxyError::Transport(e) => Some(e),
            ProxyError::Body(e) => Some(e),
            ProxyError::InvalidTarget { .. } => None,
        }
    }
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Request(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// 단일 백엔드로 모든 요청을 전달하는 리버스 프록시.
///
/// 타깃 잠금은 현재 값을 복제하는 동안에만 잡고, 전달 중에는 잡지 않습니다.
/// 따라서 전환 직전에 시작된 요청은 이전 타깃에서 끝나고, 전환 이후의
/// 요청만 새 타깃으로 갑니다.
pub struct Proxy {
    target: RwLock<Option<BackendTarget>>,
    maintenance: AtomicBool,
    maintenance_page: Bytes,
    client: legacy::Client<HttpConnector, Incoming>,
    stats: StatsAggregator,
}

impl Proxy {
    pub fn new(stats: StatsAggregator) -> Self {
        Self::with_maintenance_page(stats, Bytes::from_static(DEFAULT_MAINTENANCE_PAGE.as_bytes()))
    }

    pub fn with_maintenance_page(stats: StatsAggregator, maintenance_page: Bytes) -> Self {
        let connector = HttpConnector::new();
        let client = legacy::Client::builder(TokioExecutor::new())
            .build::<_, Incoming>(connector);

        Self {
            target: RwLock::new(None),
            maintenance: AtomicBool::new(false),
            maintenance_page,
            client,
            stats,
        }
    }

    /// 타깃을 교체하고 요청 통계를 새로 시작합니다.
    pub async fn set_target(&self, target: BackendTarget) {
        let mut current = self.target.write().await;
        let previous = current.replace(target.clone());
        // 잠금을 쥔 채로 보내야 새 타깃의 첫 요청보다 초기화가 먼저 큐에 들어감
        self.stats.reset().await;
        info!(
            previous = ?previous.map(|t| t.to_string()),
            target = %target,
            "백엔드 타깃 변경"
        );
    }

    pub async fn target(&self) -> Option<BackendTarget> {
        self.target.read().await.clone()
    }

    pub fn maintenance_up(&self) {
        self.maintenance.store(true, Ordering::SeqCst);
        info!("점검 모드 시작");
    }

    pub fn maintenance_down(&self) {
        self.maintenance.store(false, Ordering::SeqCst);
        info!("점검 모드 종료");
    }

    pub fn is_maintenance(&self) -> bool {
        self.maintenance.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub async fn connection_event(&self, id: ConnectionId, state: ConnectionState) {
        self.stats.connection_event(id, state).await;
    }

    #[instrument(skip(self, req), fields(request_id = tracing::field::Empty))]
    pub async fn serve(
        &self,
        req: Request<Incoming>,
        client_addr: Option<SocketAddr>,
    ) -> Response<ProxyBody> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("request_id", request_id.as_str());

        let mut log = RequestLog::new(request_id);
        log.with_request(&req);
        if let Some(addr) = client_addr {
            log.with_client(addr);
        }

        let response = if self.is_maintenance() {
            self.maintenance_response()
        } else {
            // 잠금은 값 복제 동안만 유지
            let target = self.target.read().await.clone();
            match target {
                None => plain_response(StatusCode::NOT_FOUND, "404 page not found"),
                Some(target) => {
                    log.with_backend(&target);
                    match self.forward(&target, req, client_addr).await {
                        Ok(response) => response,
                        Err(e) => {
                            log.with_error(&e);
                            plain_response(e.status(), e.to_string())
                        }
                    }
                }
            }
        };

        let duration = started.elapsed().as_secs_f64();
        log.with_response(response.status());
        log.duration = duration;
        log_request(&log);
        self.stats.record(RequestStat { duration }).await;

        response
    }

    async fn forward(
        &self,
        target: &BackendTarget,
        req: Request<Incoming>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let proxied_req = build_proxied_request(target, req, client_addr)?;

        let res = self.client
            .request(proxied_req)
            .await
            .map_err(ProxyError::Transport)?;

        let (mut parts, body) = res.into_parts();
        let bytes = body.collect().await.map_err(ProxyError::Body)?.to_bytes();

        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Full::new(bytes)))
    }

    fn maintenance_response(&self) -> Response<ProxyBody> {
        let mut response = Response::new(Full::new(self.maintenance_page.clone()));
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        response
    }

    /// 상태 문서에 프록시 지표를 기록합니다.
    pub async fn snapshot(&self, into: &mut Map<String, Value>) {
        self.stats.snapshot(into).await;
        into.insert("MaintenanceMode".to_string(), json!(self.is_maintenance()));
        let target = self.target().await.map(|t| t.to_string());
        into.insert("Target".to_string(), json!(target));
    }
}

fn build_proxied_request(
    target: &BackendTarget,
    req: Request<Incoming>,
    client_addr: Option<SocketAddr>,
) -> Result<Request<Incoming>, ProxyError> {
    let path_and_query = req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let uri: Uri = format!("http://{}{}", target, path_and_query)
        .parse()
        .map_err(|e: hyper::http::uri::InvalidUri| ProxyError::Request(e.into()))?;

    let (mut parts, body) = req.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    if let Some(addr) = client_addr {
        let forwarded = match parts.headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, addr.ip()),
            None => addr.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts.headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    parts.uri = uri;
    Ok(Request::from_parts(parts, body))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Connection 헤더에 나열된 헤더도 hop-by-hop
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP_HEADERS) {
        headers.remove(name);
    }
}

pub(crate) fn plain_response(status: StatusCode, message: impl Into<Bytes>) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(message.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
