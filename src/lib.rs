//! Deploy Proxy는 무중단 배포를 위한 단일 백엔드 리버스 프록시입니다.
//!
//! # 주요 기능
//!
//! - 현재 활성 컨테이너 하나로 모든 요청 전달
//! - 새 리비전 컨테이너 시작, 준비 확인 후 원자적 전환
//! - 이전 컨테이너 정리 (유예 시간 설정 가능)
//! - 점검 모드, 요청/커넥션 통계
//! - 운영자용 HTTP 컨트롤 API
//!
//! # 예제
//!
//! ```
//! use deploy_proxy::proxy::BackendTarget;
//!
//! let target: BackendTarget = "127.0.0.1:9001".parse().unwrap();
//! assert_eq!(target.port(), 9001);
//! ```
//!
//! ```
//! use deploy_proxy::deploy::DeploymentConfig;
//!
//! let config = DeploymentConfig::from_slice(br#"{"Image": "app:v1", "Env": ["RACK_ENV=production"]}"#).unwrap();
//! assert_eq!(config.image, "app:v1");
//! assert_eq!(config.fingerprint().len(), 64);
//! ```

pub mod logging;
pub mod settings;
pub mod stats;
pub mod proxy;
pub mod docker;
pub mod deploy;
pub mod server;
