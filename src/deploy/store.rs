use std::fmt;
use std::path::{Component, Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tracing::debug;
use url::Url;

#[derive(Debug)]
pub enum StoreError {
    NotFound {
        bucket: String,
        key: String,
    },
    InvalidKey {
        key: String,
    },
    Io {
        path: PathBuf,
        error: std::io::Error,
    },
    Http {
        url: String,
        message: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { bucket, key } =>
                write!(f, "오브젝트를 찾을 수 없음: {}/{}", bucket, key),
            StoreError::InvalidKey { key } =>
                write!(f, "잘못된 오브젝트 키: {}", key),
            StoreError::Io { path, error } =>
                write!(f, "파일 {} 읽기 실패: {}", path.display(), error),
            StoreError::Http { url, message } =>
                write!(f, "{} 요청 실패: {}", url, message),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// 배포 설정 문서를 담고 있는 오브젝트 스토어
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError>;
}

fn check_key(key: &str) -> Result<(), StoreError> {
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));

    if key.is_empty() || escapes {
        return Err(StoreError::InvalidKey { key: key.to_string() });
    }
    Ok(())
}

/// `GET <endpoint>/<bucket>/<key>` 로 오브젝트를 읽는 HTTP 스토어
pub struct HttpObjectStore {
    endpoint: Url,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl HttpObjectStore {
    pub fn new(endpoint: Url) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .build::<_, Empty<Bytes>>(HttpConnector::new());
        Self { endpoint, client }
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Http {
                url: self.endpoint.to_string(),
                message: "경로를 붙일 수 없는 엔드포인트".to_string(),
            })?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        Ok(url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        check_key(key)?;
        let url = self.object_url(bucket, key)?;
        let http_err = |message: String| StoreError::Http { url: url.to_string(), message };

        let uri: Uri = url.as_str().parse().map_err(|e| http_err(format!("{}", e)))?;
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Empty::<Bytes>::new())
            .map_err(|e| http_err(e.to_string()))?;

        debug!(url = %url, "오브젝트 요청");
        let response = self.client.request(request).await.map_err(|e| http_err(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            status if status.is_success() => {
                let body = response.into_body()
                    .collect()
                    .await
                    .map_err(|e| http_err(e.to_string()))?;
                Ok(body.to_bytes())
            }
            status => Err(http_err(format!("상태 코드 {}", status))),
        }
    }
}

/// `<root>/<bucket>/<key>` 파일을 읽는 로컬 스토어
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, StoreError> {
        check_key(bucket)?;
        check_key(key)?;
        let path = self.root.join(bucket).join(key);

        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(error) => Err(StoreError::Io { path, error }),
        }
    }
}
