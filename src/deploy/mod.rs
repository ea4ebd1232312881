//! 컨테이너 교체 오케스트레이터
//!
//! 새 리비전 컨테이너를 띄우고, 준비되면 프록시 타깃을 옮기고, 이전
//! 컨테이너를 정리합니다. 시작, 전환, 예약된 정리는 하나의 배포 슬롯을
//! 공유하므로 동시에 들어온 요청은 순서대로 처리됩니다.
//!
//! 살아 있는 컨테이너는 활성/이전 두 개를 넘지 않습니다. 이전 컨테이너가
//! 남아 있으면 유예 시간이 끝나기를 기다려 정리한 뒤에 새 컨테이너를 만듭니다.

pub mod config;
mod error;
mod handle;
pub mod source;
pub mod store;

pub use config::DeploymentConfig;
pub use error::DeployError;
pub use handle::ContainerHandle;
pub use source::ConfigSource;
pub use store::{FsObjectStore, HttpObjectStore, ObjectStore, StoreError};

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::docker::{wait_until_ready, ContainerRuntime, HealthChecker, RetryPolicy};
use crate::proxy::Proxy;
use crate::settings::{DeploySettings, DockerSettings};
use self::config::{load_env_file, resolve_image, short};

pub type Result<T> = std::result::Result<T, DeployError>;

/// 배포 시도의 진행 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    Idle,
    Starting,
    Verifying,
    Staged,
    Switched,
    Retiring,
}

impl DeployPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployPhase::Idle => "idle",
            DeployPhase::Starting => "starting",
            DeployPhase::Verifying => "verifying",
            DeployPhase::Staged => "staged",
            DeployPhase::Switched => "switched",
            DeployPhase::Retiring => "retiring",
        }
    }
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// 컨테이너 게시 포트에 접근할 호스트
    pub backend_host: String,
    pub registry: Option<String>,
    /// 모든 컨테이너에 추가되는 환경 변수
    pub extra_env: Vec<String>,
    pub readiness: RetryPolicy,
    pub health_check_path: String,
    pub retire_grace: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            backend_host: "127.0.0.1".to_string(),
            registry: None,
            extra_env: Vec::new(),
            readiness: RetryPolicy::new(24, Duration::from_secs(5)),
            health_check_path: "/".to_string(),
            retire_grace: Duration::from_secs(5),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_settings(docker: &DockerSettings, deploy: &DeploySettings) -> Result<Self> {
        let extra_env = match &docker.env_file {
            Some(path) => load_env_file(path)?,
            None => Vec::new(),
        };

        Ok(Self {
            backend_host: docker.backend_host.clone(),
            registry: docker.registry.clone(),
            extra_env,
            readiness: RetryPolicy::from(&docker.readiness),
            health_check_path: docker.readiness.path.clone(),
            retire_grace: Duration::from_secs(deploy.retire_grace),
        })
    }
}

#[derive(Debug)]
struct Retiring {
    handle: ContainerHandle,
    /// 유예 시간이 끝나는 시각
    due: Instant,
    failed: bool,
}

#[derive(Debug)]
struct Slots {
    active: Option<ContainerHandle>,
    staged: Option<ContainerHandle>,
    previous: Option<Retiring>,
    phase: DeployPhase,
}

impl Default for Slots {
    fn default() -> Self {
        Self {
            active: None,
            staged: None,
            previous: None,
            phase: DeployPhase::Idle,
        }
    }
}

// 슬롯 잠금은 await 너머로 들고 가지 않음
fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|e| e.into_inner())
}

fn transition(slots: &mut Slots, phase: DeployPhase) {
    if slots.phase != phase {
        info!(from = %slots.phase, to = %phase, "배포 단계 변경");
        slots.phase = phase;
    }
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    checker: Arc<dyn HealthChecker>,
    proxy: Arc<Proxy>,
    source: Option<ConfigSource>,
    options: OrchestratorOptions,
    deploy_slot: Arc<AsyncMutex<()>>,
    slots: Arc<Mutex<Slots>>,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        checker: Arc<dyn HealthChecker>,
        proxy: Arc<Proxy>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            runtime,
            checker,
            proxy,
            source: None,
            options,
            deploy_slot: Arc::new(AsyncMutex::new(())),
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn proxy(&self) -> &Arc<Proxy> {
        &self.proxy
    }

    pub fn phase(&self) -> DeployPhase {
        lock_slots(&self.slots).phase
    }

    pub fn active(&self) -> Option<ContainerHandle> {
        lock_slots(&self.slots).active.clone()
    }

    pub fn staged(&self) -> Option<ContainerHandle> {
        lock_slots(&self.slots).staged.clone()
    }

    pub fn previous(&self) -> Option<ContainerHandle> {
        lock_slots(&self.slots).previous.as_ref().map(|r| r.handle.clone())
    }

    fn set_phase(&self, phase: DeployPhase) {
        transition(&mut lock_slots(&self.slots), phase);
    }

    /// 새 컨테이너를 시작하고 준비될 때까지 기다립니다. 프록시 타깃은 바꾸지 않습니다.
    pub async fn start_container(&self, config: DeploymentConfig) -> Result<ContainerHandle> {
        let _slot = self.deploy_slot.lock().await;

        let handle = self.launch(config).await?;

        let mut slots = lock_slots(&self.slots);
        slots.staged = Some(handle.clone());
        transition(&mut slots, DeployPhase::Staged);
        info!(
            container_id = %handle.short_id(),
            port = handle.port,
            revision = %short(&handle.fingerprint()),
            "컨테이너 대기 상태"
        );
        Ok(handle)
    }

    /// 설정에 맞는 컨테이너로 프록시를 전환합니다.
    ///
    /// 같은 설정으로 대기 중인 컨테이너가 있으면 한 번 더 확인하고 재사용합니다.
    /// 유예 중인 이전 컨테이너는 새 컨테이너를 만들기 전에 정리됩니다.
    /// 실패하면 프록시 타깃과 활성 컨테이너는 그대로입니다.
    pub async fn switch_container(&self, config: DeploymentConfig) -> Result<ContainerHandle> {
        let _slot = self.deploy_slot.lock().await;

        config.validate()?;

        let fingerprint = config.fingerprint();
        let reusable = {
            let mut slots = lock_slots(&self.slots);
            let matches = slots.staged.as_ref()
                .map(|staged| staged.fingerprint() == fingerprint)
                .unwrap_or(false);
            if matches { slots.staged.take() } else { None }
        };

        let handle = match reusable {
            Some(staged) => self.reuse_staged(staged).await?,
            None => self.launch(config).await?,
        };

        self.proxy.set_target(handle.target(&self.options.backend_host)).await;

        let demoted = {
            let mut slots = lock_slots(&self.slots);
            let demoted = slots.active.replace(handle.clone());
            if let Some(old) = &demoted {
                slots.previous = Some(Retiring {
                    handle: old.clone(),
                    due: Instant::now() + self.options.retire_grace,
                    failed: false,
                });
            }
            transition(&mut slots, DeployPhase::Switched);
            demoted
        };

        info!(
            container_id = %handle.short_id(),
            port = handle.port,
            previous = ?demoted.as_ref().map(|h| h.short_id().to_string()),
            "프록시 전환 완료"
        );

        if let Some(old) = demoted {
            if self.options.retire_grace.is_zero() {
                // 실패하면 retire_failed로 남아 다음 배포에서 다시 시도됨
                let _ = retire_previous(self.runtime.as_ref(), &self.slots).await;
            } else {
                self.schedule_retirement(old);
            }
        }

        Ok(handle)
    }

    /// 상태 문서에 컨테이너 슬롯을 기록합니다.
    pub fn stats(&self, into: &mut Map<String, Value>) {
        let slots = lock_slots(&self.slots);

        let active = slots.active.as_ref().map(|h| h.to_status("active"));
        let staged = slots.staged.as_ref().map(|h| h.to_status("staged"));
        let previous = slots.previous.as_ref().map(|r| {
            r.handle.to_status(if r.failed { "retire_failed" } else { "retiring" })
        });

        into.insert("ActiveContainer".to_string(), active.unwrap_or(Value::Null));
        into.insert("StagedContainer".to_string(), staged.unwrap_or(Value::Null));
        into.insert("PreviousContainer".to_string(), previous.unwrap_or(Value::Null));
        into.insert("Phase".to_string(), json!(slots.phase.as_str()));
    }

    /// 컨트롤 API 본문을 배포 설정으로 해석합니다.
    ///
    /// `{`로 시작하면 JSON 문서, 아니면 설정 소스에서 찾을 리비전입니다.
    pub async fn resolve(&self, body: &[u8]) -> Result<DeploymentConfig> {
        let text = std::str::from_utf8(body)
            .map_err(|_| DeployError::config("본문이 UTF-8이 아닙니다"))?
            .trim();

        if text.starts_with('{') {
            return DeploymentConfig::from_slice(text.as_bytes());
        }

        if text.is_empty() {
            return Err(DeployError::config("빈 본문"));
        }

        let source = self.source.as_ref().ok_or_else(|| {
            DeployError::config("리비전으로 배포하려면 설정 소스가 필요합니다")
        })?;
        source.load_revision(text).await
    }

    /// 설정 소스의 current.json으로 전환합니다. 문서가 없으면 아무것도 하지 않습니다.
    pub async fn run_current(&self) -> Result<Option<ContainerHandle>> {
        let Some(source) = &self.source else {
            return Ok(None);
        };

        match source.load_current().await? {
            Some(config) => {
                info!(image = %config.image, "현재 배포 설정으로 시작");
                self.switch_container(config).await.map(Some)
            }
            None => {
                info!("현재 배포 설정 없음");
                Ok(None)
            }
        }
    }

    async fn launch(&self, config: DeploymentConfig) -> Result<ContainerHandle> {
        config.validate()?;
        self.retire_staged().await?;
        self.make_room().await?;

        self.set_phase(DeployPhase::Starting);
        let image = resolve_image(&config.image, self.options.registry.as_deref());
        let mut env = config.env.clone();
        env.extend(self.options.extra_env.iter().cloned());

        let id = match self.runtime.create(&image, &env).await {
            Ok(id) => id,
            Err(e) => {
                self.set_phase(DeployPhase::Idle);
                return Err(e.into());
            }
        };

        let port = match self.runtime.start(&id).await {
            Ok(port) => port,
            Err(e) => {
                self.discard(&id).await;
                self.set_phase(DeployPhase::Idle);
                return Err(e.into());
            }
        };

        let handle = ContainerHandle::new(id, port, config);
        self.set_phase(DeployPhase::Verifying);
        if let Err(e) = self.verify(&handle, &self.options.readiness).await {
            self.discard(&handle.id).await;
            self.set_phase(DeployPhase::Idle);
            return Err(e);
        }

        Ok(handle)
    }

    async fn verify(&self, handle: &ContainerHandle, policy: &RetryPolicy) -> Result<()> {
        let target = handle.target(&self.options.backend_host);
        let path = handle.config.health_check_path.as_deref()
            .unwrap_or(&self.options.health_check_path);

        match wait_until_ready(self.checker.as_ref(), &target, path, policy).await {
            Ok(result) => {
                info!(container_id = %handle.short_id(), target = %target, "{}", result);
                Ok(())
            }
            Err(result) => {
                warn!(container_id = %handle.short_id(), target = %target, "준비 실패: {}", result);
                Err(DeployError::Readiness {
                    container_id: handle.id.clone(),
                    attempts: policy.max_attempts,
                    message: result.message,
                })
            }
        }
    }

    /// 실패한 새 컨테이너 정리. 오류는 기록만 합니다.
    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.runtime.stop(container_id).await {
            warn!(container_id = %container_id, error = %e, "실패한 컨테이너 중지 실패");
        }
        if let Err(e) = self.runtime.remove(container_id).await {
            warn!(container_id = %container_id, error = %e, "실패한 컨테이너 삭제 실패");
        }
    }

    /// 같은 설정으로 대기 중인 컨테이너를 한 번 더 확인하고 돌려줍니다.
    /// 실패하면 컨테이너는 대기 슬롯에 돌아갔다가 정리됩니다.
    async fn reuse_staged(&self, staged: ContainerHandle) -> Result<ContainerHandle> {
        info!(container_id = %staged.short_id(), "대기 중인 컨테이너 재사용");
        if let Err(e) = self.make_room().await {
            lock_slots(&self.slots).staged = Some(staged);
            return Err(e);
        }

        self.set_phase(DeployPhase::Verifying);
        let once = RetryPolicy::new(1, Duration::ZERO);
        if let Err(e) = self.verify(&staged, &once).await {
            lock_slots(&self.slots).staged = Some(staged);
            if let Err(retire_err) = self.retire_staged().await {
                error!(error = %retire_err, "대기 컨테이너 정리 실패, 다음 배포에서 재시도");
            }
            self.set_phase(DeployPhase::Idle);
            return Err(e);
        }
        Ok(staged)
    }

    /// 새 컨테이너를 만들기 전에 이전 컨테이너를 정리합니다.
    ///
    /// 유예 중이면 남은 시간만큼 기다립니다. 정리에 실패하면 이전 컨테이너는
    /// `retire_failed`로 남고 배포는 실패합니다.
    async fn make_room(&self) -> Result<()> {
        let pending = lock_slots(&self.slots).previous.as_ref()
            .map(|r| (r.handle.short_id().to_string(), r.due, r.failed));
        let Some((container_id, due, failed)) = pending else {
            return Ok(());
        };

        if !failed && Instant::now() < due {
            info!(
                container_id = %container_id,
                remaining = ?due.saturating_duration_since(Instant::now()),
                "이전 컨테이너 유예 시간 대기"
            );
            tokio::time::sleep_until(due).await;
        }

        retire_previous(self.runtime.as_ref(), &self.slots).await
    }

    async fn retire_staged(&self) -> Result<()> {
        let staged = lock_slots(&self.slots).staged.take();
        let Some(staged) = staged else {
            return Ok(());
        };

        self.set_phase(DeployPhase::Retiring);
        match retire(self.runtime.as_ref(), &staged).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // 다음 배포에서 다시 시도
                lock_slots(&self.slots).staged = Some(staged);
                Err(e)
            }
        }
    }

    /// 유예 시간이 지나면 배포 슬롯을 잡고 이전 컨테이너를 정리합니다.
    fn schedule_retirement(&self, old: ContainerHandle) {
        let grace = self.options.retire_grace;
        info!(container_id = %old.short_id(), grace = ?grace, "이전 컨테이너 정리 예약");

        let runtime = self.runtime.clone();
        let slots = self.slots.clone();
        let deploy_slot = self.deploy_slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _slot = deploy_slot.lock().await;

            // 그 사이 다음 배포가 정리했을 수 있음
            let still_pending = lock_slots(&slots).previous.as_ref()
                .map(|r| r.handle.id == old.id && !r.failed)
                .unwrap_or(false);
            if still_pending {
                let _ = retire_previous(runtime.as_ref(), &slots).await;
            }
        });
    }
}

/// 중지 후 삭제. 중지 오류는 기록만 하고 강제 삭제로 넘어갑니다.
async fn retire(runtime: &dyn ContainerRuntime, handle: &ContainerHandle) -> Result<()> {
    info!(container_id = %handle.short_id(), port = handle.port, "컨테이너 정리");
    if let Err(e) = runtime.stop(&handle.id).await {
        warn!(container_id = %handle.short_id(), error = %e, "컨테이너 중지 실패, 강제 삭제 시도");
    }
    runtime.remove(&handle.id).await.map_err(|e| {
        error!(container_id = %handle.short_id(), error = %e, "컨테이너 삭제 실패");
        DeployError::from(e)
    })
}

/// `previous` 슬롯의 컨테이너를 정리합니다. 호출자는 배포 슬롯을 쥐고 있어야 합니다.
///
/// 성공하면 슬롯을 비우고, 실패하면 핸들을 남긴 채 `retire_failed`로 표시합니다.
async fn retire_previous(runtime: &dyn ContainerRuntime, slots: &Mutex<Slots>) -> Result<()> {
    let handle = {
        let mut guard = lock_slots(slots);
        let Some(previous) = guard.previous.as_ref() else {
            return Ok(());
        };
        let handle = previous.handle.clone();
        transition(&mut guard, DeployPhase::Retiring);
        handle
    };

    let result = retire(runtime, &handle).await;

    let mut guard = lock_slots(slots);
    match &result {
        Ok(()) => guard.previous = None,
        Err(e) => {
            error!(container_id = %handle.id, error = %e, "이전 컨테이너 정리 실패, 다음 배포에서 재시도");
            if let Some(previous) = guard.previous.as_mut() {
                previous.failed = true;
            }
        }
    }
    transition(&mut guard, DeployPhase::Idle);
    result
}
