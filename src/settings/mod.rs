use std::{env, fs, path::Path};
use serde::Deserialize;
use tracing::debug;

mod server;
pub mod logging;
mod error;
pub mod docker;
pub mod deploy;

pub use server::ServerSettings;
pub use logging::{LogFormat, LogOutput, LogSettings};
pub use docker::{DockerSettings, ProbeKind, ReadinessSettings};
pub use deploy::{DeploySettings, StoreKind};
pub use error::SettingsError;

pub type Result<T> = std::result::Result<T, SettingsError>;
pub use server::{optional_env_var, parse_env_var};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    // 리스너 및 컨트롤 API 설정
    #[serde(default)]
    pub server: ServerSettings,

    // 로깅 설정
    #[serde(default)]
    pub logging: LogSettings,

    // 컨테이너 런타임 설정
    #[serde(default)]
    pub docker: DockerSettings,

    // 배포/전환 설정
    #[serde(default)]
    pub deploy: DeploySettings,
}

impl Settings {
    /// `PROXY_CONFIG_FILE`이 있으면 TOML 파일을, 없으면 환경 변수를 읽습니다.
    pub fn load() -> Result<Self> {
        if let Ok(config_path) = env::var("PROXY_CONFIG_FILE") {
            Self::from_toml_file(&config_path)
        } else {
            Self::from_env()
        }
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "TOML 설정 파일 로드");
        let content = fs::read_to_string(&path).map_err(|e| SettingsError::FileError {
            path: path.as_ref().to_string_lossy().to_string(),
            error: e,
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)
            .map_err(|e| SettingsError::ParseError { source: e })?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_env() -> Result<Self> {
        let settings = Self {
            server: ServerSettings::from_env()?,
            logging: LogSettings::from_env()?,
            docker: DockerSettings::from_env()?,
            deploy: DeploySettings::from_env()?,
        };

        // 설정 생성 시점에 바로 검증
        settings.validate()?;
        Ok(settings)
    }

    /// 설정 유효성 검증
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.docker.validate()?;
        self.deploy.validate()?;
        Ok(())
    }
}
