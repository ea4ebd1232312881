use serde::Deserialize;
use url::Url;
use super::{SettingsError, parse_env_var};
use super::server::optional_env_var;
pub type Result<T> = std::result::Result<T, SettingsError>;

/// 배포 설정 문서를 가져올 오브젝트 스토어 종류
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    None,
    Http,
    Fs,
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "" => Ok(StoreKind::None),
            "http" => Ok(StoreKind::Http),
            "fs" => Ok(StoreKind::Fs),
            _ => Err(format!("지원하지 않는 스토어 종류: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploySettings {
    /// 이전 컨테이너를 정리하기 전 대기 시간 (초). 0이면 즉시 정리합니다.
    #[serde(default = "default_retire_grace")]
    pub retire_grace: u64,

    /// 점검 모드에서 응답할 HTML 파일
    #[serde(default)]
    pub maintenance_page: Option<String>,

    #[serde(default)]
    pub store: StoreKind,

    /// http 스토어는 엔드포인트 URL, fs 스토어는 루트 디렉터리
    #[serde(default)]
    pub store_endpoint: Option<String>,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub prefix: String,

    /// 시작 시 current.json 배포 설정으로 전환할지 여부
    #[serde(default = "default_run_current")]
    pub run_current_on_start: bool,
}

impl DeploySettings {
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            retire_grace: parse_env_var("PROXY_RETIRE_GRACE", default_retire_grace)?,
            maintenance_page: optional_env_var("PROXY_MAINTENANCE_PAGE"),
            store: parse_env_var("PROXY_STORE", StoreKind::default)?,
            store_endpoint: optional_env_var("PROXY_STORE_ENDPOINT"),
            bucket: optional_env_var("PROXY_BUCKET"),
            prefix: parse_env_var("PROXY_PREFIX", String::new)?,
            run_current_on_start: parse_env_var("PROXY_RUN_CURRENT", default_run_current)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store == StoreKind::None {
            return Ok(());
        }

        let endpoint = self.store_endpoint.as_ref().ok_or_else(|| SettingsError::EnvVarMissing {
            var_name: "PROXY_STORE_ENDPOINT".to_string(),
        })?;

        if self.bucket.as_deref().map_or(true, str::is_empty) {
            return Err(SettingsError::EnvVarMissing {
                var_name: "PROXY_BUCKET".to_string(),
            });
        }

        if self.store == StoreKind::Http {
            let url = Url::parse(endpoint).map_err(|e| SettingsError::EnvVarInvalid {
                var_name: "PROXY_STORE_ENDPOINT".to_string(),
                value: endpoint.clone(),
                reason: e.to_string(),
            })?;

            // TLS 종료는 다루지 않으므로 http만 허용
            if url.scheme() != "http" {
                return Err(SettingsError::EnvVarInvalid {
                    var_name: "PROXY_STORE_ENDPOINT".to_string(),
                    value: endpoint.clone(),
                    reason: "http 스킴만 지원합니다".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            retire_grace: default_retire_grace(),
            maintenance_page: None,
            store: StoreKind::default(),
            store_endpoint: None,
            bucket: None,
            prefix: String::new(),
            run_current_on_start: default_run_current(),
        }
    }
}

fn default_retire_grace() -> u64 {
    5
}

fn default_run_current() -> bool {
    true
}
