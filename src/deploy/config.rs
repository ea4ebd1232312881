use std::path::Path;
use std::sync::OnceLock;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use super::DeployError;

fn env_entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("valid env pattern"))
}

/// 실행할 컨테이너를 설명하는 불변 문서.
///
/// JSON 필드는 `{"Image": ..., "Env": ["KEY=VALUE", ...]}` 형태입니다.
/// 원본 바이트에서 읽은 경우 그 바이트의 SHA-256이, 코드에서 만든 경우
/// 정규 JSON 인코딩의 SHA-256이 리비전 식별자(fingerprint)가 됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeploymentConfig {
    pub image: String,

    #[serde(default)]
    pub env: Vec<String>,

    /// 기본 probe 경로 대신 사용할 헬스 체크 경로
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,

    /// 운영자용 리비전 라벨
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    #[serde(skip)]
    digest: Option<String>,
}

impl PartialEq for DeploymentConfig {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
            && self.env == other.env
            && self.health_check_path == other.health_check_path
            && self.revision == other.revision
    }
}

impl Eq for DeploymentConfig {}

impl DeploymentConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: Vec::new(),
            health_check_path: None,
            revision: None,
            digest: None,
        }
    }

    pub fn with_env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = Some(path.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// 원본 문서 바이트를 파싱하고 검증합니다.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, DeployError> {
        let mut config: Self = serde_json::from_slice(bytes)
            .map_err(|e| DeployError::config(format!("JSON 파싱 실패: {}", e)))?;
        config.validate()?;
        config.digest = Some(content_digest(bytes));
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DeployError> {
        if self.image.trim().is_empty() {
            return Err(DeployError::config("Image가 비어있습니다"));
        }

        if self.image.contains(char::is_whitespace) {
            return Err(DeployError::config(format!("Image에 공백이 있습니다: {:?}", self.image)));
        }

        if let Some(entry) = self.env.iter().find(|entry| !env_entry_pattern().is_match(entry)) {
            return Err(DeployError::config(format!("Env 항목은 KEY=VALUE 형식이어야 합니다: {:?}", entry)));
        }

        Ok(())
    }

    /// 리비전 식별자 (소문자 hex SHA-256)
    pub fn fingerprint(&self) -> String {
        if let Some(digest) = &self.digest {
            return digest.clone();
        }

        match serde_json::to_vec(self) {
            Ok(bytes) => content_digest(&bytes),
            Err(_) => content_digest(self.image.as_bytes()),
        }
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 로그/응답용 8자 축약
pub fn short(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}

/// 레지스트리 호스트가 없는 이미지 이름에 레지스트리를 붙입니다.
///
/// 첫 경로 구성 요소에 `.` 또는 `:`가 있거나 `localhost`이면 이미
/// 레지스트리가 지정된 것으로 봅니다.
pub fn resolve_image(image: &str, registry: Option<&str>) -> String {
    let Some(registry) = registry else {
        return image.to_string();
    };

    let has_registry = image
        .split_once('/')
        .map(|(first, _)| first.contains('.') || first.contains(':') || first == "localhost")
        .unwrap_or(false);

    if has_registry {
        image.to_string()
    } else {
        format!("{}/{}", registry, image)
    }
}

/// 컨테이너 공통 환경 변수 파일을 읽습니다.
///
/// 한 줄에 `KEY=VALUE` 하나, 빈 줄과 `#` 주석은 무시합니다.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<Vec<String>, DeployError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        DeployError::config(format!("컨테이너 환경 변수 파일 {} 읽기 실패: {}", path.display(), e))
    })?;

    parse_env_lines(&content)
}

pub fn parse_env_lines(content: &str) -> Result<Vec<String>, DeployError> {
    let mut entries = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            DeployError::config(format!("syntax error: expected lines of key=value format, got {:?}", line))
        })?;

        let entry = format!("{}={}", key.trim(), value.trim());
        if !env_entry_pattern().is_match(&entry) {
            return Err(DeployError::config(format!("잘못된 환경 변수 이름: {:?}", key.trim())));
        }
        entries.push(entry);
    }

    Ok(entries)
}
