use serde::Deserialize;
use super::{SettingsError, parse_env_var};
use super::server::optional_env_var;
pub type Result<T> = std::result::Result<T, SettingsError>;

/// 준비 상태 확인 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    #[default]
    Http,
    Tcp,
}

impl std::str::FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(ProbeKind::Http),
            "tcp" => Ok(ProbeKind::Tcp),
            _ => Err(format!("지원하지 않는 probe 방식: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default)]
    pub probe: ProbeKind,

    /// HTTP probe 경로. 배포 설정의 HealthCheckPath가 우선합니다.
    #[serde(default = "default_probe_path")]
    pub path: String,

    /// 최대 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// 시도 간격 (초)
    #[serde(default = "default_probe_interval")]
    pub interval: u64,

    /// 시도당 타임아웃 (초)
    #[serde(default = "default_probe_timeout")]
    pub timeout: u64,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            probe: ProbeKind::default(),
            path: default_probe_path(),
            max_attempts: default_max_attempts(),
            interval: default_probe_interval(),
            timeout: default_probe_timeout(),
        }
    }
}

fn default_probe_path() -> String {
    "/".to_string()
}

fn default_max_attempts() -> u32 {
    24
}

fn default_probe_interval() -> u64 {
    5 // 5초
}

fn default_probe_timeout() -> u64 {
    5 // 5초
}

impl ReadinessSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            probe: parse_env_var("PROXY_READINESS_PROBE", ProbeKind::default)?,
            path: parse_env_var("PROXY_READINESS_PATH", default_probe_path)?,
            max_attempts: parse_env_var("PROXY_READINESS_ATTEMPTS", default_max_attempts)?,
            interval: parse_env_var("PROXY_READINESS_INTERVAL", default_probe_interval)?,
            timeout: parse_env_var("PROXY_READINESS_TIMEOUT", default_probe_timeout)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_READINESS_ATTEMPTS".to_string(),
                value: self.max_attempts.to_string(),
                reason: "최소 1회 이상 시도해야 합니다".to_string(),
            });
        }

        if self.timeout == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_READINESS_TIMEOUT".to_string(),
                value: self.timeout.to_string(),
                reason: "타임아웃은 0이 될 수 없습니다".to_string(),
            });
        }

        if !self.path.starts_with('/') {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_READINESS_PATH".to_string(),
                value: self.path.clone(),
                reason: "경로는 '/'로 시작해야 합니다".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DockerSettings {
    /// 컨테이너 내부에서 애플리케이션이 리슨하는 포트
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// 레지스트리 호스트가 없는 이미지에 붙일 레지스트리 (예: localhost:8080)
    #[serde(default)]
    pub registry: Option<String>,

    /// 게시된 포트에 접근할 호스트
    #[serde(default = "default_backend_host")]
    pub backend_host: String,

    /// 모든 컨테이너에 추가할 KEY=VALUE 환경 변수 파일
    #[serde(default)]
    pub env_file: Option<String>,

    /// 컨테이너 중지 대기 시간 (초)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,

    #[serde(default)]
    pub readiness: ReadinessSettings,
}

impl DockerSettings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            container_port: parse_env_var("PROXY_CONTAINER_PORT", default_container_port)?,
            registry: optional_env_var("PROXY_REGISTRY"),
            backend_host: parse_env_var("PROXY_BACKEND_HOST", default_backend_host)?,
            env_file: optional_env_var("PROXY_CONTAINER_ENV_FILE"),
            stop_timeout: parse_env_var("PROXY_STOP_TIMEOUT", default_stop_timeout)?,
            readiness: ReadinessSettings::from_env()?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.container_port == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_CONTAINER_PORT".to_string(),
                value: self.container_port.to_string(),
                reason: "포트는 0이 될 수 없습니다".to_string(),
            });
        }

        if self.backend_host.trim().is_empty() {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_BACKEND_HOST".to_string(),
                value: self.backend_host.clone(),
                reason: "백엔드 호스트는 비어있을 수 없습니다".to_string(),
            });
        }

        // 레지스트리는 host[:port] 형태만 허용
        if let Some(registry) = &self.registry {
            if registry.is_empty() || registry.contains('/') || registry.contains(char::is_whitespace) {
                return Err(SettingsError::EnvVarInvalid {
                    var_name: "PROXY_REGISTRY".to_string(),
                    value: registry.clone(),
                    reason: "레지스트리는 host[:port] 형식이어야 합니다".to_string(),
                });
            }
        }

        self.readiness.validate()
    }
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            container_port: default_container_port(),
            registry: None,
            backend_host: default_backend_host(),
            env_file: None,
            stop_timeout: default_stop_timeout(),
            readiness: ReadinessSettings::default(),
        }
    }
}

fn default_container_port() -> u16 {
    9292
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}
