use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use super::SettingsError;

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSettings {
    /// 프록시 리스너 주소 (기본값: 0.0.0.0:80)
    #[serde(default = "default_proxy_addr")]
    pub proxy_addr: SocketAddr,

    /// 컨트롤 API 리스너 주소 (기본값: 0.0.0.0:8001)
    #[serde(default = "default_control_addr")]
    pub control_addr: SocketAddr,

    /// 컨트롤 API 요청 타임아웃 (초)
    #[serde(default = "default_control_timeout")]
    pub control_timeout: u64,

    /// 컨트롤 API Basic 인증용 htpasswd 파일 경로
    #[serde(default)]
    pub control_htpasswd: Option<String>,

    /// 인증 영역 (realm)
    #[serde(default = "default_realm")]
    pub control_realm: String,
}

fn default_proxy_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_control_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8001))
}

fn default_control_timeout() -> u64 { 300 }

fn default_realm() -> String {
    "deploy-proxy".to_string()
}

pub fn parse_env_var<T: std::str::FromStr, F: FnOnce() -> T>(name: &str, default: F) -> Result<T, SettingsError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: val,
            reason: e.to_string(),
        }),
        Err(env::VarError::NotPresent) => Ok(default()),
        Err(e) => Err(SettingsError::EnvVarInvalid {
            var_name: name.to_string(),
            value: "".to_string(),
            reason: e.to_string(),
        }),
    }
}

/// 값이 없으면 `None`을 돌려주는 선택적 환경 변수
pub fn optional_env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let settings = Self {
            proxy_addr: parse_env_var("PROXY_LISTEN_ADDR", default_proxy_addr)?,
            control_addr: parse_env_var("PROXY_CONTROL_ADDR", default_control_addr)?,
            control_timeout: parse_env_var("PROXY_CONTROL_TIMEOUT", default_control_timeout)?,
            control_htpasswd: optional_env_var("PROXY_CONTROL_HTPASSWD"),
            control_realm: parse_env_var("PROXY_CONTROL_REALM", default_realm)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        // 프록시와 컨트롤 API는 같은 포트를 쓸 수 없음
        if self.proxy_addr == self.control_addr {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_LISTEN_ADDR/PROXY_CONTROL_ADDR".to_string(),
                value: format!("{}/{}", self.proxy_addr, self.control_addr),
                reason: "프록시와 컨트롤 API 주소는 달라야 합니다".to_string(),
            });
        }

        if self.control_timeout == 0 {
            return Err(SettingsError::EnvVarInvalid {
                var_name: "PROXY_CONTROL_TIMEOUT".to_string(),
                value: self.control_timeout.to_string(),
                reason: "타임아웃은 0이 될 수 없습니다".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            proxy_addr: default_proxy_addr(),
            control_addr: default_control_addr(),
            control_timeout: default_control_timeout(),
            control_htpasswd: None,
            control_realm: default_realm(),
        }
    }
}
