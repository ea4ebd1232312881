use std::sync::Arc;
use url::Url;
use crate::settings::{DeploySettings, SettingsError, StoreKind};
use super::config::{content_digest, DeploymentConfig};
use super::store::{FsObjectStore, HttpObjectStore, ObjectStore};
use super::DeployError;

const CURRENT_KEY: &str = "current.json";

/// 오브젝트 스토어에서 배포 설정 문서를 찾는 로더.
///
/// 현재 배포는 `<prefix>/current.json`, 특정 리비전은
/// `<prefix>/container.<revision>.json` 에 있습니다.
pub struct ConfigSource {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    prefix: String,
}

impl ConfigSource {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// 설정에 스토어가 없으면 `None`
    pub fn from_settings(settings: &DeploySettings) -> Result<Option<Self>, SettingsError> {
        let (Some(endpoint), Some(bucket)) = (&settings.store_endpoint, &settings.bucket) else {
            return Ok(None);
        };

        let store: Arc<dyn ObjectStore> = match settings.store {
            StoreKind::None => return Ok(None),
            StoreKind::Http => {
                let url = Url::parse(endpoint).map_err(|e| SettingsError::EnvVarInvalid {
                    var_name: "PROXY_STORE_ENDPOINT".to_string(),
                    value: endpoint.clone(),
                    reason: e.to_string(),
                })?;
                Arc::new(HttpObjectStore::new(url))
            }
            StoreKind::Fs => Arc::new(FsObjectStore::new(endpoint)),
        };

        Ok(Some(Self::new(store, bucket.clone(), settings.prefix.clone())))
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// 현재 배포 설정. 문서가 없으면 `None`
    pub async fn load_current(&self) -> Result<Option<DeploymentConfig>, DeployError> {
        match self.store.get(&self.bucket, &self.key(CURRENT_KEY)).await {
            Ok(bytes) => DeploymentConfig::from_slice(&bytes).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 리비전 문서를 읽고 내용 해시가 리비전과 같은지 확인합니다.
    pub async fn load_revision(&self, revision: &str) -> Result<DeploymentConfig, DeployError> {
        let revision = revision.trim();
        if revision.is_empty() || !revision.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DeployError::config(format!("잘못된 리비전: {:?}", revision)));
        }

        let key = self.key(&format!("container.{}.json", revision));
        let bytes = self.store.get(&self.bucket, &key).await?;

        let actual = content_digest(&bytes);
        if actual != revision.to_ascii_lowercase() {
            return Err(DeployError::RevisionMismatch {
                requested: revision.to_string(),
                actual,
            });
        }

        DeploymentConfig::from_slice(&bytes)
    }
}
