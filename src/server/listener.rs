use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};
use crate::settings::ServerSettings;
use super::control::ControlApi;
use super::handler::ConnectionHandler;
use super::Result;

/// 프록시 트래픽과 컨트롤 API 리스너
pub struct ServerListener {
    proxy_listener: TcpListener,
    control_listener: TcpListener,
}

impl ServerListener {
    pub async fn bind(settings: &ServerSettings) -> Result<Self> {
        let proxy_listener = TcpListener::bind(settings.proxy_addr)
            .await
            .map_err(|e| {
                error!(error = %e, addr = %settings.proxy_addr, "프록시 포트 바인딩 실패");
                e
            })?;

        let control_listener = TcpListener::bind(settings.control_addr)
            .await
            .map_err(|e| {
                error!(error = %e, addr = %settings.control_addr, "컨트롤 포트 바인딩 실패");
                e
            })?;

        Ok(Self::from_listeners(proxy_listener, control_listener))
    }

    pub fn from_listeners(proxy_listener: TcpListener, control_listener: TcpListener) -> Self {
        Self {
            proxy_listener,
            control_listener,
        }
    }

    pub fn proxy_addr(&self) -> Result<SocketAddr> {
        Ok(self.proxy_listener.local_addr()?)
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control_listener.local_addr()?)
    }

    pub async fn run(
        self,
        handler: Arc<ConnectionHandler>,
        control: Arc<ControlApi>,
    ) -> Result<()> {
        info!(addr = ?self.proxy_listener.local_addr().ok(), "프록시 리스너 시작");
        info!(addr = ?self.control_listener.local_addr().ok(), "컨트롤 리스너 시작");

        loop {
            tokio::select! {
                result = self.proxy_listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                if let Err(err) = handler.handle_connection(io, Some(addr)).await {
                                    error!(error = %err, "프록시 연결 처리 실패");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "프록시 연결 수락 실패");
                        }
                    }
                }

                result = self.control_listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let control = control.clone();
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let control = control.clone();
                                    async move { Ok::<_, Infallible>(control.handle(req).await) }
                                });
                                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                                    error!(error = %err, "컨트롤 연결 처리 실패");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "컨트롤 연결 수락 실패");
                        }
                    }
                }
            }
        }
    }
}
