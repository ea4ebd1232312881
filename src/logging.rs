use std::path::Path;
use tracing::{info, warn, error, debug, Level, span};
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use crate::settings::{LogFormat, LogOutput, LogSettings, SettingsError};

/// 로깅을 초기화합니다. 반환된 guard가 drop되면 버퍼된 로그가 flush됩니다.
pub fn init_logging(settings: &LogSettings) -> Result<WorkerGuard, SettingsError> {
    // 외부 크레이트는 WARN, 이 크레이트는 설정된 레벨
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy()
        .add_directive(
            format!("deploy_proxy={}", settings.level.as_str().to_lowercase())
                .parse()
                .map_err(|e| SettingsError::InvalidConfig(format!("로그 필터 오류: {}", e)))?,
        );

    let (writer, guard) = match &settings.output {
        LogOutput::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogOutput::File(path) => {
            let path = Path::new(path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| SettingsError::EnvVarInvalid {
                var_name: "PROXY_LOG_OUTPUT".to_string(),
                value: path.display().to_string(),
                reason: "파일 이름이 없습니다".to_string(),
            })?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name))
        }
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true);

    let result = match settings.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| SettingsError::InvalidConfig(format!("로깅 초기화 실패: {}", e)))?;

    Ok(guard)
}

/// 초 단위 시간을 읽기 좋은 문자열로 바꿉니다. 1ms 미만은 ms로 표기합니다.
pub fn format_duration(seconds: f64) -> String {
    if seconds < 1e-3 {
        format!("{:.6}ms", seconds * 1000.0)
    } else {
        format!("{:.6}s", seconds)
    }
}

#[derive(Debug)]
pub struct RequestLog {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub client: Option<String>,
    pub status_code: u16,
    pub duration: f64,
    pub backend_address: Option<String>,
    pub error: Option<String>,
}

impl RequestLog {
    pub fn new(request_id: String) -> Self {
        debug!(request_id = %request_id, "Creating new request log");
        Self {
            request_id,
            method: String::new(),
            path: String::new(),
            client: None,
            status_code: 0,
            duration: 0.0,
            backend_address: None,
            error: None,
        }
    }

    pub fn with_request<B>(&mut self, req: &hyper::Request<B>) {
        self.method = req.method().to_string();
        self.path = req.uri().path().to_string();
    }

    pub fn with_client(&mut self, addr: std::net::SocketAddr) {
        self.client = Some(addr.to_string());
    }

    pub fn with_response(&mut self, status: hyper::StatusCode) {
        self.status_code = status.as_u16();
    }

    pub fn with_backend(&mut self, addr: impl std::fmt::Display) {
        self.backend_address = Some(addr.to_string());
    }

    pub fn with_error(&mut self, error: impl std::fmt::Display) {
        let error_msg = error.to_string();
        error!(
            request_id = %self.request_id,
            error = %error_msg,
            "Request error occurred"
        );
        self.error = Some(error_msg);
    }
}

pub fn log_request(log: &RequestLog) {
    let level = if log.error.is_some() {
        Level::ERROR
    } else if log.status_code >= 500 {
        Level::WARN
    } else {
        Level::INFO
    };

    let span = span!(
        Level::INFO,
        "request",
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        status = %log.status_code,
        total_time = %format_duration(log.duration)
    );
    let _enter = span.enter();

    match level {
        Level::ERROR => error!(
            backend = ?log.backend_address,
            client = ?log.client,
            error = ?log.error,
            "Request failed"
        ),
        Level::WARN => warn!(
            backend = ?log.backend_address,
            client = ?log.client,
            "Request completed with server error"
        ),
        _ => info!(
            backend = ?log.backend_address,
            client = ?log.client,
            "Request completed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        let cases = [
            (1.0, "1.000000s"),
            (0.1, "0.100000s"),
            (0.01, "0.010000s"),
            (0.001, "0.001000s"),
            (0.0001, "0.100000ms"),
            (0.0002, "0.200000ms"),
            (0.00099, "0.990000ms"),
            (0.00001, "0.010000ms"),
        ];

        for (seconds, expected) in cases {
            assert_eq!(format_duration(seconds), expected, "seconds = {}", seconds);
        }
    }

    #[test]
    fn test_request_log_collects_fields() {
        let req = hyper::Request::builder()
            .method("POST")
            .uri("http://localhost/deploy?x=1")
            .body(())
            .unwrap();

        let mut log = RequestLog::new("req-1".to_string());
        log.with_request(&req);
        log.with_response(hyper::StatusCode::BAD_GATEWAY);
        log.with_backend("127.0.0.1:9001");

        assert_eq!(log.method, "POST");
        assert_eq!(log.path, "/deploy");
        assert_eq!(log.status_code, 502);
        assert_eq!(log.backend_address.as_deref(), Some("127.0.0.1:9001"));
        assert!(log.error.is_none());
    }
}
