mod handlers;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use engineioxide::{EngineIo, EngineIoConfig, EngineIoService};
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use socketioxide::SocketIoServer;
use tower::Service;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let server = SocketIoServer::new();
    handlers::binding().bind(&server.of("/"));

    let engine = Arc::new(EngineIo::new(EngineIoConfig::default(), server));
    engine.handler().bind(Arc::downgrade(&engine));

    let svc = EngineIoService::new(engine);
    let make_svc = make_service_fn(move |_conn| {
        let svc = svc.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let mut svc = svc.clone();
                async move { svc.call(req).await }
            }))
        }
    });

    let addr: SocketAddr = ([127, 0, 0, 1], 3000).into();
    tracing::info!("chat demo listening on {addr}");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}
