use axum::http::StatusCode;
use llm_relay::error::AppError;
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,llm_relay=debug")),
        )
        .json()
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {}", err.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let state = llm_relay::app::load_state().await?;
    let lifecycle = state.lifecycle.clone();
    let drain_timeout = state.runtime.drain_timeout;
    let app = llm_relay::app::build_app(state.clone());
    let addr: SocketAddr =
        state
            .runtime
            .listen
            .parse()
            .map_err(|err: std::net::AddrParseError| {
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "listen_invalid",
                    err.to_string(),
                )
            })?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|err| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "listen_failed",
            err.to_string(),
        )
    })?;
    tracing::info!("listening on {}", addr);

    let accept_lifecycle = lifecycle.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { accept_lifecycle.draining().await })
        .await
    });

    tokio::select! {
        res = &mut server => {
            return serve_result(res);
        }
        _ = shutdown_signal() => {}
    }

    lifecycle.set_draining();
    lifecycle.drain(drain_timeout).await?;
    serve_result(server.await)
}

fn serve_result(
    res: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), AppError> {
    match res {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "serve_failed",
            err.to_string(),
        )),
        Err(err) => Err(AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "serve_failed",
            err.to_string(),
        )),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
