use std::collections::HashMap;
use std::fs;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hyper::{header, HeaderMap, Response, StatusCode};
use hyper::header::HeaderValue;
use crate::proxy::{plain_response, ProxyBody};
use super::error::Error;

/// 컨트롤 API 자격증명 검증기
///
/// # 지원하는 해시 알고리즘
/// - bcrypt ($2a$, $2b$, $2y$ 접두사)
pub trait Authenticator: Send + Sync {
    fn verify_credentials(&self, username: &str, password: &str) -> bool;
}

/// .htpasswd 파일 기반 인증기
///
/// ```text
/// deployer:$2y$05$c4WoMPo3SXsafkva.HHa6uXQZWr7oboPiC2bT/r7q1BB8I2s0BRqC
/// ```
pub struct HtpasswdAuthenticator {
    users: HashMap<String, String>,
}

impl HtpasswdAuthenticator {
    pub fn from_file(path: &str) -> Result<Self, Error> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("htpasswd 파일 {} 읽기 실패: {}", path, e)))?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let users = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(username, hash)| (username.to_string(), hash.to_string()))
            .collect();

        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Authenticator for HtpasswdAuthenticator {
    fn verify_credentials(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|hash| verify_password(password, hash))
            .unwrap_or(false)
    }
}

fn verify_password(password: &str, hash: &str) -> bool {
    if hash.starts_with("$2") {
        bcrypt::verify(password, hash).unwrap_or(false)
    } else {
        // bcrypt가 아닌 해시는 지원하지 않음
        false
    }
}

/// Authorization 헤더에서 (사용자, 비밀번호)를 꺼냅니다.
pub fn extract_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?.trim();
    let decoded = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// 컨트롤 API용 Basic 인증
pub struct BasicAuth {
    realm: String,
    authenticator: Box<dyn Authenticator>,
}

impl BasicAuth {
    pub fn new(realm: impl Into<String>, authenticator: Box<dyn Authenticator>) -> Self {
        Self {
            realm: realm.into(),
            authenticator,
        }
    }

    pub fn authorize(&self, headers: &HeaderMap) -> bool {
        extract_credentials(headers)
            .map(|(username, password)| self.authenticator.verify_credentials(&username, &password))
            .unwrap_or(false)
    }

    pub fn unauthorized_response(&self) -> Response<ProxyBody> {
        let mut response = plain_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{}\"", self.realm)) {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}
