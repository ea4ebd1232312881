mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{fast_options, harness, spawn_backend, spawn_proxy, Call, Harness, MockRuntime};
use deploy_proxy::deploy::{
    ConfigSource, DeployError, DeployPhase, DeploymentConfig, FsObjectStore, Orchestrator,
    OrchestratorOptions,
};
use deploy_proxy::proxy::BackendTarget;
use serde_json::{json, Map};
use tokio::task::JoinHandle;

fn config(image: &str) -> DeploymentConfig {
    DeploymentConfig::new(image).with_env("RACK_ENV=production")
}

async fn target_of(orchestrator: &Orchestrator) -> Option<BackendTarget> {
    orchestrator.proxy().target().await
}

#[tokio::test]
async fn test_switch_promotes_and_retires_previous() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::ZERO));

    let first = h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    assert_eq!(first.id, "c1");
    assert_eq!(first.port, 9001);
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9001)));
    assert_eq!(h.orchestrator.phase(), DeployPhase::Switched);

    let second = h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    assert_eq!(second.id, "c2");
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9002)));

    // 유예 시간 0이면 전환이 끝나기 전에 정리됨
    assert!(h.runtime.stopped("c1"));
    assert!(h.runtime.removed("c1"));
    assert!(!h.runtime.removed("c2"));
    assert_eq!(h.orchestrator.active().unwrap().id, "c2");
    assert!(h.orchestrator.previous().is_none());

    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["ActiveContainer"]["Id"], json!("c2"));
    assert_eq!(status["ActiveContainer"]["Port"], json!(9002));
    assert_eq!(status["ActiveContainer"]["Image"], json!("app:v2"));
    assert_eq!(status["ActiveContainer"]["Fingerprint"], json!(config("app:v2").fingerprint()));
    assert_eq!(status["PreviousContainer"], json!(null));
}

#[tokio::test]
async fn test_failed_readiness_leaves_state_untouched() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002, 9003]), fast_options(Duration::ZERO));

    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    let target_before = target_of(&h.orchestrator).await;
    let active_before = h.orchestrator.active().unwrap().id;
    assert!(h.orchestrator.previous().is_none());

    h.checker.set_unhealthy(9003);
    let err = h.orchestrator.switch_container(config("app:v3")).await.unwrap_err();
    assert!(matches!(err, DeployError::Readiness { attempts: 3, .. }));
    assert!(!err.is_config_error());

    assert_eq!(target_of(&h.orchestrator).await, target_before);
    assert_eq!(h.orchestrator.active().unwrap().id, active_before);
    assert!(h.orchestrator.previous().is_none());

    // 실패한 새 컨테이너는 정리됨
    assert!(h.runtime.stopped("c3"));
    assert!(h.runtime.removed("c3"));
    assert!(!h.runtime.removed("c2"));
    assert_eq!(h.orchestrator.phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_failed_readiness_after_drain_keeps_target() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002, 9003]), fast_options(Duration::from_millis(100)));

    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    assert_eq!(h.orchestrator.previous().unwrap().id, "c1");

    h.checker.set_unhealthy(9003);
    let err = h.orchestrator.switch_container(config("app:v3")).await.unwrap_err();
    assert!(matches!(err, DeployError::Readiness { .. }));

    // c1은 유예 시간이 끝난 뒤 c3보다 먼저 정리됨
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9002)));
    assert_eq!(h.orchestrator.active().unwrap().id, "c2");
    assert!(h.orchestrator.previous().is_none());
    assert_eq!(h.runtime.live(), HashSet::from(["c2".to_string()]));
}

#[tokio::test]
async fn test_start_failure_removes_container() {
    let h = harness(MockRuntime::default(), fast_options(Duration::ZERO));
    h.runtime.fail_start(true);

    let err = h.orchestrator.start_container(config("app:v1")).await.unwrap_err();
    assert!(matches!(err, DeployError::Runtime(_)));
    assert!(h.runtime.removed("c1"));
    assert!(h.orchestrator.staged().is_none());
    assert_eq!(target_of(&h.orchestrator).await, None);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_runtime() {
    let h = harness(MockRuntime::default(), fast_options(Duration::ZERO));

    let err = h.orchestrator.start_container(DeploymentConfig::new("")).await.unwrap_err();
    assert!(err.is_config_error());
    let err = h.orchestrator
        .switch_container(DeploymentConfig::new("app:v1").with_env("no-equals"))
        .await
        .unwrap_err();
    assert!(err.is_config_error());

    assert!(h.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_start_stages_without_touching_target() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::ZERO));
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();

    let staged = h.orchestrator.start_container(config("app:v2")).await.unwrap();
    assert_eq!(staged.port, 9002);
    assert_eq!(h.orchestrator.phase(), DeployPhase::Staged);
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9001)));

    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["ActiveContainer"]["Id"], json!("c1"));
    assert_eq!(status["StagedContainer"]["Id"], json!("c2"));
    assert_eq!(status["StagedContainer"]["State"], json!("staged"));
    assert_eq!(status["Phase"], json!("staged"));
}

#[tokio::test]
async fn test_switch_reuses_staged_container() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::ZERO));
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.start_container(config("app:v2")).await.unwrap();
    let checks_before = h.checker.checks();

    let switched = h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    assert_eq!(switched.id, "c2");
    assert_eq!(h.runtime.created(), 2);
    assert_eq!(h.checker.checks(), checks_before + 1);
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9002)));
    assert!(h.orchestrator.staged().is_none());
    assert!(h.runtime.removed("c1"));
}

#[tokio::test]
async fn test_new_launch_retires_prior_staged() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::ZERO));
    h.orchestrator.start_container(config("app:v1")).await.unwrap();
    h.orchestrator.start_container(config("app:v2")).await.unwrap();

    assert!(h.runtime.removed("c1"));
    assert_eq!(h.orchestrator.staged().unwrap().id, "c2");
    assert_eq!(h.runtime.live().len(), 1);
}

#[tokio::test]
async fn test_deferred_retirement_after_grace() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::from_millis(200)));
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();

    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["PreviousContainer"]["Id"], json!("c1"));
    assert_eq!(status["PreviousContainer"]["State"], json!("retiring"));
    assert!(!h.runtime.removed("c1"));

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(h.runtime.stopped("c1"));
    assert!(h.runtime.removed("c1"));
    assert!(h.orchestrator.previous().is_none());
    assert_eq!(h.orchestrator.phase(), DeployPhase::Idle);
}

#[tokio::test]
async fn test_pending_previous_retired_once_by_next_switch() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002, 9003]), fast_options(Duration::from_millis(200)));
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    h.orchestrator.switch_container(config("app:v3")).await.unwrap();

    // c1은 세 번째 전환이 정리하고, 유예 타이머는 아무것도 하지 않음
    assert!(h.runtime.removed("c1"));
    assert_eq!(h.orchestrator.previous().unwrap().id, "c2");
    assert_eq!(h.runtime.live().len(), 2);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let removals = h.runtime.calls().iter().filter(|c| **c == Call::Remove("c1".to_string())).count();
    assert_eq!(removals, 1);
    assert!(h.runtime.removed("c2"));
}

/// 배포가 진행되는 동안 살아 있는 컨테이너 수의 최댓값
async fn peak_live_while<T>(h: &Harness, task: JoinHandle<T>) -> (usize, T) {
    let mut peak = h.runtime.live().len();
    while !task.is_finished() {
        peak = peak.max(h.runtime.live().len());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    peak = peak.max(h.runtime.live().len());
    (peak, task.await.unwrap())
}

fn call_index(h: &Harness, call: &Call) -> usize {
    h.runtime.calls().iter().position(|c| c == call).unwrap()
}

#[tokio::test]
async fn test_never_more_than_two_live_containers() {
    let h = harness(MockRuntime::default(), fast_options(Duration::from_millis(300)));
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    assert_eq!(h.runtime.live().len(), 2);
    h.checker.set_delay(Duration::from_millis(100));

    // 유예 중인 c1이 있는 상태에서 대기 컨테이너 시작
    let orchestrator = h.orchestrator.clone();
    let staging = tokio::spawn(async move { orchestrator.start_container(config("app:v3")).await });
    let (peak, staged) = peak_live_while(&h, staging).await;
    assert_eq!(staged.unwrap().id, "c3");
    assert!(peak <= 2, "live containers peaked at {}", peak);
    assert!(call_index(&h, &Call::Remove("c1".to_string())) < call_index(&h, &Call::Start("c3".to_string())));
    assert_eq!(h.runtime.live(), HashSet::from(["c2".to_string(), "c3".to_string()]));

    // 다른 설정으로 전환: 대기 중인 c3를 먼저 정리
    let orchestrator = h.orchestrator.clone();
    let switching = tokio::spawn(async move { orchestrator.switch_container(config("app:v4")).await });
    let (peak, switched) = peak_live_while(&h, switching).await;
    assert_eq!(switched.unwrap().id, "c4");
    assert!(peak <= 2, "live containers peaked at {}", peak);
    assert_eq!(h.orchestrator.previous().unwrap().id, "c2");

    // 유예 중인 c2가 있는 상태에서 바로 다음 전환
    let orchestrator = h.orchestrator.clone();
    let switching = tokio::spawn(async move { orchestrator.switch_container(config("app:v5")).await });
    let (peak, switched) = peak_live_while(&h, switching).await;
    assert_eq!(switched.unwrap().id, "c5");
    assert!(peak <= 2, "live containers peaked at {}", peak);
    assert!(call_index(&h, &Call::Remove("c2".to_string())) < call_index(&h, &Call::Start("c5".to_string())));
    assert_eq!(h.runtime.live(), HashSet::from(["c4".to_string(), "c5".to_string()]));
}

#[tokio::test]
async fn test_failed_retirement_is_reported_and_retried() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002, 9003]), fast_options(Duration::from_millis(50)));
    h.runtime.fail_remove("c1");
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["PreviousContainer"]["Id"], json!("c1"));
    assert_eq!(status["PreviousContainer"]["State"], json!("retire_failed"));

    // 다시 실패하면 세 번째 컨테이너를 만들지 않고 c1을 계속 추적함
    let err = h.orchestrator.switch_container(config("app:v3")).await.unwrap_err();
    assert!(matches!(err, DeployError::Runtime(_)));
    assert_eq!(h.runtime.created(), 2);
    assert_eq!(target_of(&h.orchestrator).await, Some(BackendTarget::new("127.0.0.1", 9002)));

    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["ActiveContainer"]["Id"], json!("c2"));
    assert_eq!(status["PreviousContainer"]["Id"], json!("c1"));
    assert_eq!(status["PreviousContainer"]["State"], json!("retire_failed"));

    h.runtime.allow_remove("c1");
    h.orchestrator.switch_container(config("app:v3")).await.unwrap();
    assert!(!h.runtime.live().contains("c1"));
    assert_eq!(h.orchestrator.previous().unwrap().id, "c2");
}

#[tokio::test]
async fn test_failed_inline_retirement_stays_tracked() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002, 9003]), fast_options(Duration::ZERO));
    h.runtime.fail_remove("c1");
    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    assert!(h.orchestrator.switch_container(config("app:v3")).await.is_err());

    let mut status = Map::new();
    h.orchestrator.stats(&mut status);
    assert_eq!(status["PreviousContainer"]["Id"], json!("c1"));
    assert_eq!(status["PreviousContainer"]["State"], json!("retire_failed"));
    assert!(h.runtime.live().len() <= 2);
}

#[tokio::test]
async fn test_concurrent_switches_are_serialized() {
    let h = harness(MockRuntime::with_ports(&[9001, 9002]), fast_options(Duration::ZERO));
    h.checker.set_delay(Duration::from_millis(100));

    let first = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.switch_container(config("app:v1")).await })
    };
    let second = {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move { orchestrator.switch_container(config("app:v2")).await })
    };

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_ne!(first.id, second.id);

    // 두 번째 create는 첫 번째 배포가 끝난 뒤에만 일어남
    let calls = h.runtime.calls();
    let creates: Vec<usize> = calls.iter().enumerate()
        .filter(|(_, c)| matches!(c, Call::Create { .. }))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(creates.len(), 2);
    assert!(matches!(calls[creates[0] + 1], Call::Start(_)));
    assert!(!matches!(calls[creates[1] - 1], Call::Create { .. }));

    let active = h.orchestrator.active().unwrap();
    let target = target_of(&h.orchestrator).await.unwrap();
    assert_eq!(target.port(), active.port);
    assert_eq!(h.runtime.live().len(), 1);
}

#[tokio::test]
async fn test_registry_and_extra_env_applied() {
    let options = OrchestratorOptions {
        registry: Some("localhost:8080".to_string()),
        extra_env: vec!["DATABASE_URL=postgres://db/app".to_string()],
        ..fast_options(Duration::ZERO)
    };
    let h = harness(MockRuntime::default(), options);
    h.orchestrator.start_container(config("app:v1")).await.unwrap();

    assert_eq!(
        h.runtime.calls()[0],
        Call::Create {
            image: "localhost:8080/app:v1".to_string(),
            env: vec![
                "RACK_ENV=production".to_string(),
                "DATABASE_URL=postgres://db/app".to_string(),
            ],
        }
    );
}

#[tokio::test]
async fn test_switch_routes_real_traffic() {
    let a = spawn_backend("v1").await;
    let b = spawn_backend("v2").await;
    let h = harness(
        MockRuntime::with_ports(&[a.addr.port(), b.addr.port()]),
        fast_options(Duration::ZERO),
    );
    let addr = spawn_proxy(h.proxy.clone()).await;

    h.orchestrator.switch_container(config("app:v1")).await.unwrap();
    let body = reqwest::get(format!("http://{}/", addr)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "v1 /");

    h.orchestrator.switch_container(config("app:v2")).await.unwrap();
    let body = reqwest::get(format!("http://{}/", addr)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "v2 /");
    assert_eq!(a.hits(), 1);
}

#[tokio::test]
async fn test_resolve_json_and_revision() {
    let dir = tempfile::tempdir().unwrap();
    let app_dir = dir.path().join("deploys/app");
    std::fs::create_dir_all(&app_dir).unwrap();

    let doc = br#"{"Image": "app:v7", "Env": ["A=1"]}"#;
    let revision = deploy_proxy::deploy::config::content_digest(doc);
    std::fs::write(app_dir.join(format!("container.{}.json", revision)), doc).unwrap();
    std::fs::write(app_dir.join("current.json"), doc).unwrap();

    let h = harness(MockRuntime::default(), fast_options(Duration::ZERO));
    let source = ConfigSource::new(Arc::new(FsObjectStore::new(dir.path())), "deploys", "app");
    let orchestrator = Orchestrator::new(h.runtime.clone(), h.checker.clone(), h.proxy.clone(), fast_options(Duration::ZERO))
        .with_source(source);

    let from_json = orchestrator.resolve(br#" {"Image": "app:v8"}"#).await.unwrap();
    assert_eq!(from_json.image, "app:v8");

    let from_revision = orchestrator.resolve(revision.as_bytes()).await.unwrap();
    assert_eq!(from_revision.image, "app:v7");
    assert_eq!(from_revision.fingerprint(), revision);

    let err = orchestrator.resolve(b"deadbeef").await.unwrap_err();
    assert!(err.is_config_error());

    let handle = orchestrator.run_current().await.unwrap().unwrap();
    assert_eq!(handle.config.image, "app:v7");
    assert_eq!(orchestrator.active().unwrap().id, handle.id);
}

#[tokio::test]
async fn test_resolve_revision_without_source_is_config_error() {
    let h = harness(MockRuntime::default(), fast_options(Duration::ZERO));
    let err = h.orchestrator.resolve(b"abc123").await.unwrap_err();
    assert!(err.is_config_error());
    assert!(h.orchestrator.run_current().await.unwrap().is_none());
}
