use serde_json::{json, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use crate::proxy::BackendTarget;
use super::config::{short, DeploymentConfig};

/// 오케스트레이터가 시작한 컨테이너 하나
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub id: String,
    pub port: u16,
    pub config: DeploymentConfig,
    pub started_at: OffsetDateTime,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, port: u16, config: DeploymentConfig) -> Self {
        Self {
            id: id.into(),
            port,
            config,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn fingerprint(&self) -> String {
        self.config.fingerprint()
    }

    pub fn short_id(&self) -> &str {
        short(&self.id)
    }

    pub fn target(&self, host: &str) -> BackendTarget {
        BackendTarget::new(host, self.port)
    }

    /// 상태 문서용 표현
    pub fn to_status(&self, state: &str) -> Value {
        let started_at = self.started_at
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.started_at.unix_timestamp().to_string());

        json!({
            "Id": self.id,
            "Port": self.port,
            "Image": self.config.image,
            "Revision": self.config.revision,
            "Fingerprint": self.fingerprint(),
            "StartedAt": started_at,
            "State": state,
        })
    }
}
