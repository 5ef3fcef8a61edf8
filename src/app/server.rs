use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use log::{debug, error, info, warn};
use socket2::SockRef;
use tokio::net::{TcpListener, TcpSocket};
use tokio::runtime::Builder;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_native_tls::TlsAcceptor;

use super::args::Args;
use super::tls::init_tls;
use crate::backend::ScidbConnector;
use crate::config::{parse_ports, set_config, Config, ListenPort};
use crate::daemon;
use crate::http::{build_router, AppState};
use crate::session::SessionManager;

pub fn run_server(args: Args, mut config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if !args.foreground {
        let pid_file = config.general.daemon_pid_file.clone();
        if let Err(err) = daemon::daemonize(&pid_file) {
            eprintln!("Error daemonizing: {err}");
            std::process::exit(exitcode::OSERR);
        }
    }

    let tls_state = init_tls(&mut config)?;
    // init_tls may have rewritten the ports option; republish.
    set_config(config.clone());
    let ports = parse_ports(&config.general.ports)?;

    let runtime = Builder::new_multi_thread()
        .worker_threads(config.general.worker_threads)
        .enable_all()
        .thread_name("worker-shim")
        .build()?;

    runtime.block_on(async move {
        let connector = Arc::new(ScidbConnector::new(Duration::from_millis(
            config.general.connect_timeout,
        )));
        let manager = Arc::new(SessionManager::new(config.general.max_sessions, connector));
        let app = build_router(AppState {
            manager: manager.clone(),
        });

        info!(
            "Proxying SciDB at {}:{} with {} session slots",
            config.general.scidb_host, config.general.scidb_port, config.general.max_sessions
        );

        for listen_port in &ports {
            let listener = bind_listener(&config.general.bind_host, listen_port.port)?;
            spawn_listener(*listen_port, listener, tls_state.acceptor.clone(), app.clone());
        }

        let mut term_signal = unix_signal(SignalKind::terminate())?;
        let mut interrupt_signal = unix_signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = term_signal.recv() => info!("Got SIGTERM, shutting down"),
            _ = interrupt_signal.recv() => info!("Got SIGINT, shutting down"),
        }

        // Best-effort: unlink every session's buffers without waiting on
        // slot locks, which may be pinned under a hung backend call.
        manager.cleanup_all_files();
        Ok(())
    })
}

fn bind_listener(host: &str, port: u16) -> Result<TcpListener, Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{host}:{port}")
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("can't resolve listen address {host}:{port}"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.set_nodelay(true)?;
    {
        let sock_ref = SockRef::from(&socket);
        sock_ref.set_linger(Some(Duration::from_secs(0)))?;
    }
    socket.bind(addr)?;
    let listener = socket.listen(1024)?;
    info!("Listening on {addr}");
    Ok(listener)
}

fn spawn_listener(
    listen_port: ListenPort,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    app: Router,
) {
    match (listen_port.tls, acceptor) {
        (true, Some(acceptor)) => {
            tokio::spawn(serve_tls(listener, acceptor, app));
        }
        (true, None) => {
            // init_tls rewrites the ports option when the cert is missing,
            // so a TLS port without an acceptor means a config edit race;
            // serve it plain rather than not at all.
            warn!(
                "No TLS acceptor for port {}; serving plain HTTP",
                listen_port.port
            );
            tokio::spawn(serve_plain(listener, app));
        }
        (false, _) => {
            tokio::spawn(serve_plain(listener, app));
        }
    }
}

async fn serve_plain(listener: TcpListener, app: Router) {
    if let Err(err) = axum::serve(listener, app).await {
        error!("HTTP listener failed: {err}");
    }
}

/// TLS accept loop: handshake each connection, then hand the stream to the
/// same tower service the plain listeners use.
async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("TLS listener accept failed: {err}");
                continue;
            }
        };
        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(tls_stream) => tls_stream,
                Err(err) => {
                    warn!("TLS handshake with {peer} failed: {err}");
                    return;
                }
            };
            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls_stream), service)
                .await
            {
                debug!("TLS connection from {peer} ended: {err}");
            }
        });
    }
}
