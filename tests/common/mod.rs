#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use deploy_proxy::deploy::{Orchestrator, OrchestratorOptions};
use deploy_proxy::docker::{ContainerRuntime, DockerError, HealthCheckResult, HealthChecker, RetryPolicy};
use deploy_proxy::proxy::{BackendTarget, Proxy};
use deploy_proxy::server::ConnectionHandler;
use deploy_proxy::stats::StatsAggregator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create { image: String, env: Vec<String> },
    Start(String),
    Stop(String),
    Remove(String),
}

#[derive(Default)]
struct RuntimeState {
    next_id: u32,
    ports: VecDeque<u16>,
    calls: Vec<Call>,
    live: HashSet<String>,
    fail_create: bool,
    fail_start: bool,
    fail_remove: HashSet<String>,
}

/// 호출을 기록하는 컨테이너 런타임. 컨테이너 ID는 c1, c2, ... 순서입니다.
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<RuntimeState>,
}

fn runtime_error(container_id: Option<&str>, message: &str) -> DockerError {
    DockerError::Runtime {
        container_id: container_id.map(str::to_string),
        message: message.to_string(),
    }
}

impl MockRuntime {
    /// 시작되는 컨테이너에 순서대로 부여할 포트
    pub fn with_ports(ports: &[u16]) -> Self {
        let runtime = Self::default();
        runtime.state.lock().unwrap().ports = ports.iter().copied().collect();
        runtime
    }

    pub fn push_port(&self, port: u16) {
        self.state.lock().unwrap().ports.push_back(port);
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn fail_remove(&self, container_id: &str) {
        self.state.lock().unwrap().fail_remove.insert(container_id.to_string());
    }

    pub fn allow_remove(&self, container_id: &str) {
        self.state.lock().unwrap().fail_remove.remove(container_id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn live(&self) -> HashSet<String> {
        self.state.lock().unwrap().live.clone()
    }

    pub fn removed(&self, container_id: &str) -> bool {
        self.calls().contains(&Call::Remove(container_id.to_string()))
    }

    pub fn stopped(&self, container_id: &str) -> bool {
        self.calls().contains(&Call::Stop(container_id.to_string()))
    }

    pub fn created(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Create { .. })).count()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn create(&self, image: &str, env: &[String]) -> Result<String, DockerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Create { image: image.to_string(), env: env.to_vec() });
        if state.fail_create {
            return Err(runtime_error(None, "create failed"));
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.live.insert(id.clone());
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> Result<u16, DockerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Start(container_id.to_string()));
        if state.fail_start {
            return Err(runtime_error(Some(container_id), "start failed"));
        }
        let fallback = 9000 + state.next_id as u16;
        Ok(state.ports.pop_front().unwrap_or(fallback))
    }

    async fn stop(&self, container_id: &str) -> Result<(), DockerError> {
        self.state.lock().unwrap().calls.push(Call::Stop(container_id.to_string()));
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), DockerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Remove(container_id.to_string()));
        if state.fail_remove.contains(container_id) {
            return Err(runtime_error(Some(container_id), "remove failed"));
        }
        state.live.remove(container_id);
        Ok(())
    }
}

/// 포트별로 결과를 정할 수 있는 probe
#[derive(Default)]
pub struct MockChecker {
    unhealthy: Mutex<HashSet<u16>>,
    delay: Mutex<Option<Duration>>,
    checks: AtomicUsize,
}

impl MockChecker {
    pub fn set_unhealthy(&self, port: u16) {
        self.unhealthy.lock().unwrap().insert(port);
    }

    pub fn set_healthy(&self, port: u16) {
        self.unhealthy.lock().unwrap().remove(&port);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthChecker for MockChecker {
    async fn check(&self, target: &BackendTarget, _path: &str) -> HealthCheckResult {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.unhealthy.lock().unwrap().contains(&target.port()) {
            HealthCheckResult::unhealthy(format!("{} not ready", target))
        } else {
            HealthCheckResult::healthy(format!("{} ready", target))
        }
    }
}

pub fn fast_options(retire_grace: Duration) -> OrchestratorOptions {
    OrchestratorOptions {
        readiness: RetryPolicy::new(3, Duration::from_millis(10)),
        retire_grace,
        ..OrchestratorOptions::default()
    }
}

pub struct Harness {
    pub runtime: Arc<MockRuntime>,
    pub checker: Arc<MockChecker>,
    pub proxy: Arc<Proxy>,
    pub orchestrator: Arc<Orchestrator>,
}

pub fn harness(runtime: MockRuntime, options: OrchestratorOptions) -> Harness {
    let runtime = Arc::new(runtime);
    let checker = Arc::new(MockChecker::default());
    let proxy = Arc::new(Proxy::new(StatsAggregator::spawn()));
    let orchestrator = Arc::new(Orchestrator::new(
        runtime.clone(),
        checker.clone(),
        proxy.clone(),
        options,
    ));

    Harness { runtime, checker, proxy, orchestrator }
}

/// 이름을 본문으로 돌려주는 테스트 백엔드. 받은 요청 수를 셉니다.
pub struct Backend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl Backend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> BackendTarget {
        BackendTarget::from(self.addr)
    }
}

pub async fn spawn_backend(name: &'static str) -> Backend {
    spawn_backend_with_delay(name, Duration::ZERO).await
}

pub async fn spawn_backend_with_delay(name: &'static str, delay: Duration) -> Backend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let counter = counter.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        let body = format!("{} {}", name, req.uri());
                        let response = Response::builder()
                            .header("x-backend", name)
                            .header("connection", "keep-alive")
                            .body(Full::new(Bytes::from(body)))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    Backend { addr, hits }
}

/// 프록시 리스너를 임시 포트에 띄웁니다.
pub async fn spawn_proxy(proxy: Arc<Proxy>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(ConnectionHandler::new(proxy));

    tokio::spawn(async move {
        loop {
            let Ok((stream, client)) = listener.accept().await else { break };
            let handler = handler.clone();
            tokio::spawn(async move {
                let _ = handler.handle_connection(TokioIo::new(stream), Some(client)).await;
            });
        }
    });

    addr
}

/// 사용하지 않는 로컬 포트 (바인딩 후 바로 해제)
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
