use deploy_proxy::logging::init_logging;
use deploy_proxy::server::ServerManager;
use deploy_proxy::settings::Settings;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;

    // 가드를 main 끝까지 유지해야 버퍼된 로그가 기록됨
    let _guard = init_logging(&settings.logging)?;

    info!(
        proxy_addr = %settings.server.proxy_addr,
        control_addr = %settings.server.control_addr,
        "Deploy Proxy 시작"
    );

    let manager = ServerManager::with_defaults(settings).await.map_err(|e| {
        error!(error = %e, "서버 초기화 실패");
        e
    })?;

    if let Err(e) = manager.run().await {
        error!(error = %e, "서버 실행 실패");
        return Err(e.into());
    }

    Ok(())
}
