use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::{header, Method, Request, Response, StatusCode};
use hyper::body::Body;
use hyper::header::HeaderValue;
use serde_json::Map;
use tracing::{error, info, warn};

use crate::deploy::{config::short, ContainerHandle, DeployError, Orchestrator};
use crate::proxy::{plain_response, ProxyBody};
use super::auth::BasicAuth;

/// 배포 설정 본문 최대 크기
const MAX_BODY_SIZE: usize = 1024 * 1024;

const ROUTES: [&str; 5] = ["/status", "/launch", "/switch", "/maintenance/up", "/maintenance/down"];

#[derive(Debug, Clone, Copy)]
enum DeployAction {
    Launch,
    Switch,
}

/// 운영자용 HTTP 컨트롤 API
pub struct ControlApi {
    orchestrator: Arc<Orchestrator>,
    timeout: Duration,
    auth: Option<BasicAuth>,
}

impl ControlApi {
    pub fn new(orchestrator: Arc<Orchestrator>, timeout: Duration) -> Self {
        Self {
            orchestrator,
            timeout,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if let Some(auth) = &self.auth {
            if !auth.authorize(req.headers()) {
                warn!(method = %method, path = %path, "컨트롤 API 인증 실패");
                return auth.unauthorized_response();
            }
        }

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/status") => self.status().await,
            (&Method::POST, "/launch") => self.deploy(req, DeployAction::Launch).await,
            (&Method::POST, "/switch") => self.deploy(req, DeployAction::Switch).await,
            (&Method::POST, "/maintenance/up") => {
                self.orchestrator.proxy().maintenance_up();
                empty_response()
            }
            (&Method::POST, "/maintenance/down") => {
                self.orchestrator.proxy().maintenance_down();
                empty_response()
            }
            (_, route) if ROUTES.contains(&route) => method_not_allowed(route),
            _ => plain_response(StatusCode::NOT_FOUND, "404 page not found"),
        };

        info!(method = %method, path = %path, status = response.status().as_u16(), "컨트롤 요청");
        response
    }

    async fn status(&self) -> Response<ProxyBody> {
        let mut status = Map::new();
        self.orchestrator.proxy().snapshot(&mut status).await;
        self.orchestrator.stats(&mut status);

        match serde_json::to_vec(&status) {
            Ok(body) => {
                let mut response = Response::new(Full::new(Bytes::from(body)));
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response
            }
            Err(e) => {
                error!(error = %e, "상태 직렬화 실패");
                plain_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }

    async fn deploy<B>(&self, req: Request<B>, action: DeployAction) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return plain_response(StatusCode::BAD_REQUEST, format!("본문 읽기 실패: {}", e));
            }
        };

        // 응답 시간 초과 후에도 배포는 백그라운드에서 끝까지 진행
        let orchestrator = self.orchestrator.clone();
        let task = tokio::spawn(async move {
            let config = orchestrator.resolve(&body).await?;
            match action {
                DeployAction::Launch => orchestrator.start_container(config).await,
                DeployAction::Switch => orchestrator.switch_container(config).await,
            }
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(handle))) => plain_response(StatusCode::OK, success_message(action, &handle)),
            Ok(Ok(Err(e))) => deploy_error_response(&e),
            Ok(Err(join_error)) => deploy_error_response(&DeployError::Aborted {
                message: join_error.to_string(),
            }),
            Err(_) => {
                warn!(action = ?action, timeout = ?self.timeout, "배포 요청 시간 초과, 백그라운드에서 계속 진행");
                plain_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("deploy still in progress after {:?}", self.timeout),
                )
            }
        }
    }
}

fn success_message(action: DeployAction, handle: &ContainerHandle) -> String {
    match action {
        DeployAction::Launch => format!(
            "started container {} with revision {} listening on port {}",
            handle.short_id(),
            short(&handle.fingerprint()),
            handle.port
        ),
        DeployAction::Switch => format!(
            "switched proxy to port {} of container {}",
            handle.port,
            handle.short_id()
        ),
    }
}

fn deploy_error_response(e: &DeployError) -> Response<ProxyBody> {
    let status = if e.is_config_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    error!(error = %e, status = status.as_u16(), "배포 실패");
    plain_response(status, e.to_string())
}

fn empty_response() -> Response<ProxyBody> {
    Response::new(Full::new(Bytes::new()))
}

fn method_not_allowed(route: &str) -> Response<ProxyBody> {
    let allow = if route == "/status" { "GET" } else { "POST" };
    let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "405 method not allowed");
    response.headers_mut().insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}
