use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::{Method, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::proxy::BackendTarget;
use crate::settings::{ProbeKind, ReadinessSettings};
use super::retry::{with_retry, RetryPolicy, RetryableOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    pub timestamp: SystemTime,
}

impl HealthCheckResult {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl fmt::Display for HealthCheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// 새 백엔드가 트래픽을 받을 준비가 되었는지 확인하는 probe
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// 헬스 체크 수행. `path`는 HTTP probe에서만 사용합니다.
    async fn check(&self, target: &BackendTarget, path: &str) -> HealthCheckResult;
}

/// HTTP 헬스 체커. 2xx 응답이면 정상입니다.
pub struct HttpHealthChecker {
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl HttpHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .build::<_, Empty<Bytes>>(HttpConnector::new());
        Self { client, timeout }
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(&self, target: &BackendTarget, path: &str) -> HealthCheckResult {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        let url = format!("http://{}{}", target, path);
        debug!("HTTP 헬스 체크 시작: {}", url);

        // SSL 강제 애플리케이션도 통과하도록 X-Forwarded-Proto 지정
        let request = match Request::builder()
            .method(Method::GET)
            .uri(&url)
            .header("x-forwarded-proto", "https")
            .body(Empty::<Bytes>::new())
        {
            Ok(request) => request,
            Err(e) => return HealthCheckResult::unhealthy(format!("요청 생성 실패: {}", e)),
        };

        match timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status().is_success() => {
                HealthCheckResult::healthy(format!("HTTP {} 응답 성공", response.status()))
            }
            Ok(Ok(response)) => {
                HealthCheckResult::unhealthy(format!("예상하지 않은 상태 코드: {}", response.status()))
            }
            Ok(Err(e)) => HealthCheckResult::unhealthy(format!("요청 실패: {}", e)),
            Err(_) => HealthCheckResult::unhealthy(format!("타임아웃 ({:?})", self.timeout)),
        }
    }
}

/// TCP 헬스 체커. 연결만 성공하면 정상입니다.
pub struct TcpHealthChecker {
    timeout: Duration,
}

impl TcpHealthChecker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthChecker for TcpHealthChecker {
    async fn check(&self, target: &BackendTarget, _path: &str) -> HealthCheckResult {
        let addr = target.to_string();
        debug!("TCP 헬스 체크 시작: {}", addr);

        match timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => HealthCheckResult::healthy(format!("TCP 연결 성공: {}", addr)),
            Ok(Err(e)) => HealthCheckResult::unhealthy(format!("TCP 연결 실패: {}", e)),
            Err(_) => HealthCheckResult::unhealthy(format!("타임아웃 ({:?})", self.timeout)),
        }
    }
}

/// 헬스 체커 팩토리
pub fn create_health_checker(settings: &ReadinessSettings) -> Arc<dyn HealthChecker> {
    let timeout = Duration::from_secs(settings.timeout);
    match settings.probe {
        ProbeKind::Http => Arc::new(HttpHealthChecker::new(timeout)),
        ProbeKind::Tcp => Arc::new(TcpHealthChecker::new(timeout)),
    }
}

struct ReadinessCheck<'a> {
    checker: &'a dyn HealthChecker,
    target: &'a BackendTarget,
    path: &'a str,
}

#[async_trait]
impl RetryableOperation for ReadinessCheck<'_> {
    type Output = HealthCheckResult;
    type Error = HealthCheckResult;

    async fn execute(&self) -> Result<Self::Output, Self::Error> {
        let result = self.checker.check(self.target, self.path).await;
        if result.is_healthy() {
            Ok(result)
        } else {
            Err(result)
        }
    }
}

/// 정상 응답이 올 때까지 정책에 따라 probe를 반복합니다.
/// 시도 횟수를 모두 쓰면 마지막 실패 결과를 돌려줍니다.
pub async fn wait_until_ready(
    checker: &dyn HealthChecker,
    target: &BackendTarget,
    path: &str,
    policy: &RetryPolicy,
) -> Result<HealthCheckResult, HealthCheckResult> {
    let check = ReadinessCheck { checker, target, path };
    with_retry(&check, policy).await
}
