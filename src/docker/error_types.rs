use std::fmt;

#[derive(Debug)]
pub enum DockerError {
    /// Docker 데몬 연결 실패
    ConnectionError {
        source: bollard::errors::Error,
        context: String,
    },
    /// 컨테이너 생성 실패
    CreateError {
        image: String,
        source: bollard::errors::Error,
    },
    /// 컨테이너 시작 실패
    StartError {
        container_id: String,
        source: bollard::errors::Error,
    },
    /// 게시된 포트를 찾지 못함
    PortNotPublished {
        container_id: String,
        port: String,
    },
    /// 컨테이너 중지 실패
    StopError {
        container_id: String,
        source: bollard::errors::Error,
    },
    /// 컨테이너 삭제 실패
    RemoveError {
        container_id: String,
        source: bollard::errors::Error,
    },
    /// 런타임 구현체가 보고한 기타 오류
    Runtime {
        container_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::ConnectionError { source, context } =>
                write!(f, "Docker 데몬 연결 실패 ({}): {}", context, source),
            DockerError::CreateError { image, source } =>
                write!(f, "이미지 {} 컨테이너 생성 실패: {}", image, source),
            DockerError::StartError { container_id, source } =>
                write!(f, "컨테이너 {} 시작 실패: {}", container_id, source),
            DockerError::PortNotPublished { container_id, port } =>
                write!(f, "컨테이너 {}의 포트 {}가 게시되지 않음", container_id, port),
            DockerError::StopError { container_id, source } =>
                write!(f, "컨테이너 {} 중지 실패: {}", container_id, source),
            DockerError::RemoveError { container_id, source } =>
                write!(f, "컨테이너 {} 삭제 실패: {}", container_id, source),
            DockerError::Runtime { container_id: Some(id), message } =>
                write!(f, "컨테이너 {} 런타임 오류: {}", id, message),
            DockerError::Runtime { container_id: None, message } =>
                write!(f, "런타임 오류: {}", message),
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ConnectionError { source, .. }
            | DockerError::CreateError { source, .. }
            | DockerError::StartError { source, .. }
            | DockerError::StopError { source, .. }
            | DockerError::RemoveError { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<bollard::errors::Error> for DockerError {
    fn from(err: bollard::errors::Error) -> Self {
        DockerError::ConnectionError {
            source: err,
            context: "Docker 데몬 연결 실패".to_string(),
        }
    }
}
