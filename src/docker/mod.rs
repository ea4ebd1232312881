mod error_types;
pub mod health;
mod retry;

pub use error_types::DockerError;
pub use health::{create_health_checker, wait_until_ready, HealthCheckResult, HealthChecker, HealthStatus, HttpHealthChecker, TcpHealthChecker};
pub use retry::{with_retry, RetryPolicy, RetryableOperation};

use std::collections::HashMap;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};
use crate::settings::DockerSettings;

/// 컨테이너 런타임 경계. 모든 호출은 실패할 수 있고 멱등이라고 가정하지 않습니다.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// 이미지와 환경 변수로 컨테이너를 생성하고 ID를 돌려줍니다.
    async fn create(&self, image: &str, env: &[String]) -> Result<String, DockerError>;

    /// 컨테이너를 시작하고 게시된 호스트 포트를 돌려줍니다.
    async fn start(&self, container_id: &str) -> Result<u16, DockerError>;

    async fn stop(&self, container_id: &str) -> Result<(), DockerError>;

    async fn remove(&self, container_id: &str) -> Result<(), DockerError>;
}

/// bollard 기반 Docker 런타임
pub struct DockerRuntime {
    docker: Docker,
    container_port: u16,
    stop_timeout: i64,
}

impl DockerRuntime {
    /// Docker 클라이언트를 초기화합니다.
    pub fn connect(settings: &DockerSettings) -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| DockerError::ConnectionError {
            source: e,
            context: "로컬 Docker 소켓".to_string(),
        })?;

        Ok(Self::with_client(docker, settings))
    }

    pub fn with_client(docker: Docker, settings: &DockerSettings) -> Self {
        Self {
            docker,
            container_port: settings.container_port,
            stop_timeout: settings.stop_timeout as i64,
        }
    }

    fn port_key(&self) -> String {
        format!("{}/tcp", self.container_port)
    }

    /// 이미지를 받아옵니다. 실패해도 로컬 이미지로 생성을 시도할 수 있도록 경고만 남깁니다.
    async fn pull_image(&self, image: &str) {
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        });

        let mut progress = Box::pin(self.docker.create_image(options, None, None));
        while let Some(item) = progress.next().await {
            match item {
                Ok(info) => debug!(image = %image, status = ?info.status, "이미지 pull 진행"),
                Err(e) => {
                    warn!(image = %image, error = %e, "이미지 pull 실패, 로컬 이미지 사용");
                    return;
                }
            }
        }
        info!(image = %image, "이미지 pull 완료");
    }

    fn published_port(&self, container_id: &str, inspect: &ContainerInspectResponse) -> Result<u16, DockerError> {
        let key = self.port_key();
        let not_published = || DockerError::PortNotPublished {
            container_id: container_id.to_string(),
            port: key.clone(),
        };

        let bindings = inspect.network_settings.as_ref()
            .and_then(|settings| settings.ports.as_ref())
            .and_then(|ports| ports.get(&key))
            .and_then(|bindings| bindings.as_ref())
            .ok_or_else(not_published)?;

        // IPv4/IPv6 바인딩이 같은 포트로 두 번 나올 수 있음
        bindings.iter()
            .filter_map(|binding| binding.host_port.as_deref())
            .find_map(|port| port.parse::<u16>().ok())
            .ok_or_else(not_published)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, image: &str, env: &[String]) -> Result<String, DockerError> {
        self.pull_image(image).await;

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(self.port_key(), HashMap::new());

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env.to_vec()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self.docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| DockerError::CreateError {
                image: image.to_string(),
                source: e,
            })?;

        for warning in &response.warnings {
            warn!(container_id = %response.id, warning = %warning, "컨테이너 생성 경고");
        }
        info!(container_id = %response.id, image = %image, "컨테이너 생성");
        Ok(response.id)
    }

    async fn start(&self, container_id: &str) -> Result<u16, DockerError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DockerError::StartError {
                container_id: container_id.to_string(),
                source: e,
            })?;

        let inspect = self.docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| DockerError::StartError {
                container_id: container_id.to_string(),
                source: e,
            })?;

        let port = self.published_port(container_id, &inspect)?;
        info!(container_id = %container_id, port = port, "컨테이너 시작");
        Ok(port)
    }

    async fn stop(&self, container_id: &str) -> Result<(), DockerError> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: self.stop_timeout }))
            .await
            .map_err(|e| DockerError::StopError {
                container_id: container_id.to_string(),
                source: e,
            })?;
        info!(container_id = %container_id, "컨테이너 중지");
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> Result<(), DockerError> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| DockerError::RemoveError {
                container_id: container_id.to_string(),
                source: e,
            })?;
        info!(container_id = %container_id, "컨테이너 삭제");
        Ok(())
    }
}
