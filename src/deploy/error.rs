use std::fmt;
use crate::docker::DockerError;
use super::store::StoreError;

#[derive(Debug)]
pub enum DeployError {
    /// 배포 설정 문서 오류. 컨테이너를 시작하기 전에 거부됩니다.
    Config {
        reason: String,
    },
    /// 컨테이너 런타임 호출 실패
    Runtime(DockerError),
    /// 새 컨테이너가 제한 시간 안에 준비되지 않음
    Readiness {
        container_id: String,
        attempts: u32,
        message: String,
    },
    /// 설정 소스(오브젝트 스토어) 오류
    Source(StoreError),
    /// 요청한 리비전과 문서 해시가 다름
    RevisionMismatch {
        requested: String,
        actual: String,
    },
    /// 배포 태스크가 비정상 종료됨
    Aborted {
        message: String,
    },
}

impl DeployError {
    pub fn config(reason: impl Into<String>) -> Self {
        DeployError::Config { reason: reason.into() }
    }

    /// 호출자의 입력 때문에 거부된 오류인지
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DeployError::Config { .. }
                | DeployError::RevisionMismatch { .. }
                | DeployError::Source(StoreError::NotFound { .. })
        )
    }
}

impl fmt::Display for DeployError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployError::Config { reason } =>
                write!(f, "잘못된 배포 설정: {}", reason),
            DeployError::Runtime(e) =>
                write!(f, "컨테이너 준비 실패: {}", e),
            DeployError::Readiness { container_id, attempts, message } =>
                write!(f, "컨테이너 {}가 {}회 시도 후에도 준비되지 않음: {}", container_id, attempts, message),
            DeployError::Source(e) =>
                write!(f, "배포 설정 로드 실패: {}", e),
            DeployError::RevisionMismatch { requested, actual } =>
                write!(f, "given hash {:?} doesn't match actual hash {:?}", requested, actual),
            DeployError::Aborted { message } =>
                write!(f, "배포 작업 중단: {}", message),
        }
    }
}

impl std::error::Error for DeployError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeployError::Runtime(e) => Some(e),
            DeployError::Source(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DockerError> for DeployError {
    fn from(err: DockerError) -> Self {
        DeployError::Runtime(err)
    }
}

impl From<StoreError> for DeployError {
    fn from(err: StoreError) -> Self {
        DeployError::Source(err)
    }
}
