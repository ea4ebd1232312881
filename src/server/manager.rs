use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tracing::{error, info};
use crate::deploy::{ConfigSource, Orchestrator, OrchestratorOptions};
use crate::docker::{create_health_checker, ContainerRuntime, DockerRuntime, HealthChecker};
use crate::proxy::Proxy;
use crate::settings::Settings;
use crate::stats::StatsAggregator;
use super::auth::{BasicAuth, HtpasswdAuthenticator};
use super::control::ControlApi;
use super::error::Error;
use super::handler::ConnectionHandler;
use super::listener::ServerListener;
use super::Result;

pub struct ServerManager {
    pub settings: Settings,
    proxy: Arc<Proxy>,
    orchestrator: Arc<Orchestrator>,
    control: Arc<ControlApi>,
}

impl ServerManager {
    /// 로컬 Docker 데몬을 런타임으로 사용합니다.
    pub async fn with_defaults(settings: Settings) -> Result<Self> {
        let runtime = DockerRuntime::connect(&settings.docker)
            .map_err(|e| {
                error!(error = %e, "Docker 클라이언트 초기화 실패");
                e
            })?;
        let checker = create_health_checker(&settings.docker.readiness);

        Self::with_runtime(settings, Arc::new(runtime), checker).await
    }

    pub async fn with_runtime(
        settings: Settings,
        runtime: Arc<dyn ContainerRuntime>,
        checker: Arc<dyn HealthChecker>,
    ) -> Result<Self> {
        let stats = StatsAggregator::spawn();

        let proxy = match &settings.deploy.maintenance_page {
            Some(path) => {
                let page = tokio::fs::read(path).await.map_err(|e| {
                    Error::ConfigError(format!("점검 페이지 {} 읽기 실패: {}", path, e))
                })?;
                Proxy::with_maintenance_page(stats, Bytes::from(page))
            }
            None => Proxy::new(stats),
        };
        let proxy = Arc::new(proxy);

        let options = OrchestratorOptions::from_settings(&settings.docker, &settings.deploy)?;
        let mut orchestrator = Orchestrator::new(runtime, checker, proxy.clone(), options);
        if let Some(source) = ConfigSource::from_settings(&settings.deploy)? {
            orchestrator = orchestrator.with_source(source);
        }
        let orchestrator = Arc::new(orchestrator);

        let mut control = ControlApi::new(
            orchestrator.clone(),
            Duration::from_secs(settings.server.control_timeout),
        );
        if let Some(path) = &settings.server.control_htpasswd {
            let authenticator = HtpasswdAuthenticator::from_file(path)?;
            info!(users = authenticator.len(), "컨트롤 API 인증 활성화");
            control = control.with_auth(BasicAuth::new(
                settings.server.control_realm.clone(),
                Box::new(authenticator),
            ));
        }

        Ok(Self {
            settings,
            proxy,
            orchestrator,
            control: Arc::new(control),
        })
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// 설정된 주소에 바인딩하고 서버를 실행합니다.
    pub async fn run(self) -> Result<()> {
        let listener = ServerListener::bind(&self.settings.server).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: ServerListener) -> Result<()> {
        if self.settings.deploy.run_current_on_start {
            let orchestrator = self.orchestrator.clone();
            tokio::spawn(async move {
                match orchestrator.run_current().await {
                    Ok(Some(handle)) => {
                        info!(container_id = %handle.short_id(), port = handle.port, "현재 배포 실행 완료");
                    }
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "현재 배포 실행 실패"),
                }
            });
        }

        let handler = Arc::new(ConnectionHandler::new(self.proxy));
        listener.run(handler, self.control).await
    }
}
