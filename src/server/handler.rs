use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use tracing::debug;
use crate::proxy::Proxy;
use crate::stats::{ConnectionId, ConnectionState};

/// 프록시 리스너의 커넥션 처리기.
///
/// 커넥션마다 식별자를 부여하고 상태 변화를 통계로 보냅니다.
pub struct ConnectionHandler {
    proxy: Arc<Proxy>,
    next_id: AtomicU64,
}

impl ConnectionHandler {
    pub fn new(proxy: Arc<Proxy>) -> Self {
        Self {
            proxy,
            next_id: AtomicU64::new(1),
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn handle_connection<I>(
        &self,
        io: I,
        client_addr: Option<SocketAddr>,
    ) -> std::result::Result<(), hyper::Error>
    where
        I: hyper::rt::Read + hyper::rt::Write + Send + Unpin + 'static,
    {
        let id = self.next_connection_id();
        self.proxy.connection_event(id, ConnectionState::New).await;
        debug!(connection_id = id, client = ?client_addr, "커넥션 수락");

        let proxy = self.proxy.clone();
        let service = service_fn(move |req| {
            let proxy = proxy.clone();
            async move {
                proxy.connection_event(id, ConnectionState::Active).await;
                let response = proxy.serve(req, client_addr).await;
                proxy.connection_event(id, ConnectionState::Idle).await;
                Ok::<_, Infallible>(response)
            }
        });

        let result = http1::Builder::new()
            .serve_connection(io, service)
            .await;

        self.proxy.connection_event(id, ConnectionState::Closed).await;
        debug!(connection_id = id, "커넥션 종료");
        result
    }
}
