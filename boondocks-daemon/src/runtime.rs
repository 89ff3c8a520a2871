use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};

use boondocks_core::{DaemonConfig, Inbound, LogFormat, LoggingConfig};

use crate::endpoint::Endpoint;
use crate::error::{io_err, DaemonError};
use crate::executor::ProcessorExecutor;
use crate::processor::ProcessorRegistry;
use crate::reactor::Reactor;
use crate::transport::{spawn_writer, EventSource, LineSource};

/// Why the event loop ended without a loop-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The host sent `stop`.
    Stopped(i32),
    /// The host closed its end of the connection.
    HostDisconnected,
    /// The shutdown signal fired (ctrl-c).
    Interrupted,
}

impl Shutdown {
    pub fn exit_code(self) -> i32 {
        match self {
            Shutdown::Stopped(status) => status,
            Shutdown::HostDisconnected => 0,
            Shutdown::Interrupted => 130,
        }
    }
}

/// Reads one event at a time and dispatches it to completion before reading
/// the next.
pub struct EventLoop<S> {
    source: S,
    reactor: Reactor,
    executor: ProcessorExecutor,
}

impl<S: EventSource> EventLoop<S> {
    pub fn new(source: S, reactor: Reactor, executor: ProcessorExecutor) -> Self {
        Self {
            source,
            reactor,
            executor,
        }
    }

    /// Run until `stop`, host EOF, `shutdown` resolving, or a loop-level
    /// failure. A failure is reported to the host as `hardfailure` before it
    /// is returned.
    pub async fn run<F>(self, shutdown: F) -> Result<Shutdown, DaemonError>
    where
        F: Future<Output = ()>,
    {
        let EventLoop {
            mut source,
            reactor,
            mut executor,
        } = self;
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received; leaving event loop");
                    return Ok(Shutdown::Interrupted);
                }
                next = source.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    tracing::info!("host closed the connection");
                    return Ok(Shutdown::HostDisconnected);
                }
                Err(err) => return Err(hard_failure(&reactor, err)),
            };

            let inbound = match Inbound::decode(event) {
                Ok(inbound) => inbound,
                Err(err) => return Err(hard_failure(&reactor, err.into())),
            };
            tracing::debug!(event = inbound.kind(), "dispatching event");

            match inbound {
                Inbound::Ready => reactor.ok(),
                Inbound::Stop(request) => {
                    tracing::info!(
                        status = request.status,
                        cached = executor.len(),
                        "stop requested",
                    );
                    return Ok(Shutdown::Stopped(request.status));
                }
                Inbound::Unknown(kind) => {
                    tracing::warn!(event = %kind, "ignoring unknown event type");
                }
                work => {
                    executor = match dispatch_blocking(executor, work).await {
                        Ok(executor) => executor,
                        Err(err) => return Err(hard_failure(&reactor, err)),
                    };
                }
            }
        }
    }
}

/// Run executor work on the blocking pool and hand the executor back.
async fn dispatch_blocking(
    mut executor: ProcessorExecutor,
    work: Inbound,
) -> Result<ProcessorExecutor, DaemonError> {
    tokio::task::spawn_blocking(move || {
        match work {
            Inbound::Execute(request) => {
                executor.execute_processor(&request.processor, request.assets);
            }
            Inbound::Generate(request) => {
                executor.execute_generator(&request.processor, &request.settings);
            }
            Inbound::Preprocess(request) => {
                executor.execute_preprocess(&request.processor, &request.assets);
            }
            Inbound::Teardown(request) => {
                executor.teardown_processor(&request.processor);
            }
            other => {
                tracing::debug!(event = other.kind(), "not executor work");
            }
        }
        executor
    })
    .await
    .map_err(|err| DaemonError::Protocol(format!("dispatch task join failure: {err}")))
}

fn hard_failure(reactor: &Reactor, err: DaemonError) -> DaemonError {
    tracing::error!(error = %err, "event loop failed");
    reactor.hardfailure(err.to_string());
    err
}

/// Serve one host connection over `stream` until the loop ends.
pub async fn serve_connection<T, F>(
    stream: T,
    label: &str,
    config: &DaemonConfig,
    registry: Arc<ProcessorRegistry>,
    shutdown: F,
) -> Result<Shutdown, DaemonError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    F: Future<Output = ()>,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (reactor, rx) = Reactor::channel();
    let writer = spawn_writer(write_half, rx);

    let executor = ProcessorExecutor::new(reactor.clone(), registry)
        .with_policy(config.cache_key_policy)
        .with_batch_size(config.batch_size);
    let source = LineSource::new(read_half, label);
    let outcome = EventLoop::new(source, reactor, executor).run(shutdown).await;

    match writer.await {
        Ok(Ok(written)) => tracing::debug!(events = written, "outbound stream closed"),
        Ok(Err(err)) => tracing::warn!(error = %err, "outbound stream failed"),
        Err(err) => tracing::warn!(error = %err, "outbound writer task join failure"),
    }
    outcome
}

/// Listen on the configured endpoint, accept one host connection and serve it.
pub async fn serve<F>(
    config: &DaemonConfig,
    registry: Arc<ProcessorRegistry>,
    shutdown: F,
) -> Result<Shutdown, DaemonError>
where
    F: Future<Output = ()>,
{
    let endpoint: Endpoint = config.endpoint.parse()?;
    tokio::pin!(shutdown);

    match &endpoint {
        Endpoint::Tcp(addr) => {
            let listener = TcpListener::bind(addr.as_str())
                .await
                .map_err(|e| io_err(addr, e))?;
            let local = listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| addr.clone());
            tracing::info!(endpoint = %endpoint, local = %local, "waiting for host");

            let stream = tokio::select! {
                _ = &mut shutdown => return Ok(Shutdown::Interrupted),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.map_err(|e| io_err(addr, e))?;
                    tracing::info!(peer = %peer, "host connected");
                    stream
                }
            };
            drop(listener);
            serve_connection(stream, addr, config, registry, &mut shutdown).await
        }
        Endpoint::Unix(path) => {
            prepare_socket_for_bind(path)?;
            let listener = UnixListener::bind(path).map_err(|e| io_err(path, e))?;
            set_socket_permissions(path)?;
            tracing::info!(endpoint = %endpoint, "waiting for host");

            let accepted = tokio::select! {
                _ = &mut shutdown => None,
                accepted = listener.accept() => Some(accepted),
            };
            drop(listener);

            let outcome = match accepted {
                None => Ok(Shutdown::Interrupted),
                Some(Ok((stream, _))) => {
                    tracing::info!("host connected");
                    let label = path.display().to_string();
                    serve_connection(stream, &label, config, registry, &mut shutdown).await
                }
                Some(Err(err)) => Err(io_err(path, err)),
            };

            if let Err(err) = fs::remove_file(path) {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(socket = %path.display(), error = %err, "could not remove socket");
                }
            }
            outcome
        }
    }
}

/// Start the daemon and block the current thread until the loop ends.
pub fn start_blocking(
    config: &DaemonConfig,
    registry: ProcessorRegistry,
) -> Result<Shutdown, DaemonError> {
    init_tracing(&config.logging);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    tracing::info!(
        endpoint = %config.endpoint,
        processors = registry.len(),
        policy = %config.cache_key_policy,
        "starting boondocks daemon",
    );
    runtime.block_on(serve(config, Arc::new(registry), ctrl_c()))
}

/// Resolves on ctrl-c. Never resolves if the handler cannot be installed.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_tracing(logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        if let Some(dir) = socket.parent() {
            fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boondocks_core::Event;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
    };
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::builtin::NOOP;

    struct Host {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
        daemon: JoinHandle<Result<Shutdown, DaemonError>>,
    }

    impl Host {
        fn start() -> Self {
            let (host, daemon) = tokio::io::duplex(64 * 1024);
            let daemon = tokio::spawn(async move {
                serve_connection(
                    daemon,
                    "duplex",
                    &DaemonConfig::default(),
                    Arc::new(ProcessorRegistry::with_builtin()),
                    std::future::pending::<()>(),
                )
                .await
            });
            let (reader, writer) = tokio::io::split(host);
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
                daemon,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(line.as_bytes()).await.unwrap();
            self.writer.write_all(b"\n").await.unwrap();
            self.writer.flush().await.unwrap();
        }

        async fn recv(&mut self) -> Option<Event> {
            self.lines
                .next_line()
                .await
                .unwrap()
                .map(|line| Event::from_json(&line).unwrap())
        }
    }

    fn execute_line(ids: &[&str]) -> String {
        let assets: Vec<Value> = ids.iter().map(|id| json!({"id": id})).collect();
        json!({"type": "execute", "payload": {"ref": {"className": NOOP}, "assets": assets}})
            .to_string()
    }

    #[tokio::test]
    async fn ready_gets_exactly_one_ok() {
        let mut host = Host::start();
        host.send(r#"{"type":"ready","payload":{}}"#).await;
        host.send(r#"{"type":"stop","payload":{}}"#).await;

        assert_eq!(host.recv().await.map(|e| e.kind).as_deref(), Some("ok"));
        assert!(host.recv().await.is_none());
        assert_eq!(host.daemon.await.unwrap().unwrap(), Shutdown::Stopped(0));
    }

    #[tokio::test]
    async fn unknown_event_is_ignored() {
        let mut host = Host::start();
        host.send(r#"{"type":"reload","payload":{"x":1}}"#).await;
        host.send(r#"{"type":"ready"}"#).await;
        host.send(r#"{"type":"stop","payload":{"status":4}}"#).await;

        assert_eq!(host.recv().await.map(|e| e.kind).as_deref(), Some("ok"));
        assert!(host.recv().await.is_none());
        assert_eq!(host.daemon.await.unwrap().unwrap().exit_code(), 4);
    }

    #[tokio::test]
    async fn execute_streams_assets_then_finished() {
        let mut host = Host::start();
        host.send(&execute_line(&["a", "b"])).await;

        let mut kinds = Vec::new();
        while let Some(event) = host.recv().await {
            let done = event.kind == "finished";
            kinds.push(event.kind);
            if done {
                break;
            }
        }
        assert_eq!(kinds, vec!["asset", "asset", "finished"]);

        let teardown = json!({"type": "teardown", "payload": {"ref": {"className": NOOP}}});
        host.send(&teardown.to_string()).await;
        let stats = host.recv().await.expect("stats");
        assert_eq!(stats.kind, "stats");
        assert_eq!(stats.payload["process_count"], 2);
    }

    #[tokio::test]
    async fn preprocess_replies_with_terminator_and_null_status_stops_cleanly() {
        let mut host = Host::start();
        let preprocess = json!({
            "type": "preprocess",
            "payload": {"ref": {"className": NOOP}, "assets": [{"id": "a"}]}
        });
        host.send(&preprocess.to_string()).await;
        assert_eq!(host.recv().await.map(|e| e.kind).as_deref(), Some("preprocess"));

        host.send(r#"{"type":"stop","payload":{"status":null}}"#).await;
        assert!(host.recv().await.is_none());
        assert_eq!(host.daemon.await.unwrap().unwrap(), Shutdown::Stopped(0));
    }

    #[tokio::test]
    async fn malformed_line_is_a_hard_failure() {
        let mut host = Host::start();
        host.send("{this is not json").await;

        let event = host.recv().await.expect("hardfailure");
        assert_eq!(event.kind, "hardfailure");
        assert!(event.payload["message"].as_str().is_some());
        assert!(host.daemon.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn bad_payload_for_known_type_is_a_hard_failure() {
        let mut host = Host::start();
        host.send(r#"{"type":"execute","payload":{"assets":[]}}"#).await;

        assert_eq!(host.recv().await.map(|e| e.kind).as_deref(), Some("hardfailure"));
        assert!(host.daemon.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn host_eof_stops_cleanly() {
        let host = Host::start();
        let Host {
            mut writer, daemon, ..
        } = host;
        writer.shutdown().await.unwrap();
        let outcome = daemon.await.unwrap().unwrap();
        assert_eq!(outcome, Shutdown::HostDisconnected);
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn shutdown_signal_interrupts_idle_loop() {
        let (_tx, rx) = mpsc::unbounded_channel::<Event>();
        let (reactor, _out) = Reactor::channel();
        let executor = ProcessorExecutor::new(
            reactor.clone(),
            Arc::new(ProcessorRegistry::with_builtin()),
        );
        let outcome = EventLoop::new(rx, reactor, executor)
            .run(async {})
            .await
            .unwrap();
        assert_eq!(outcome, Shutdown::Interrupted);
        assert_eq!(outcome.exit_code(), 130);
    }

    #[tokio::test]
    async fn channel_source_drives_the_loop() {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let (reactor, mut out) = Reactor::channel();
        let executor = ProcessorExecutor::new(
            reactor.clone(),
            Arc::new(ProcessorRegistry::with_builtin()),
        );
        tx.send(Event::new("ready", json!({}))).unwrap();
        tx.send(Event::new("teardown", json!({"ref": {"className": NOOP}})))
            .unwrap();
        tx.send(Event::new("stop", json!({"status": 9}))).unwrap();

        let outcome = EventLoop::new(rx, reactor, executor)
            .run(std::future::pending::<()>())
            .await
            .unwrap();
        assert_eq!(outcome, Shutdown::Stopped(9));

        let mut kinds = Vec::new();
        while let Ok(event) = out.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["ok", "warning"]);
    }

    #[test]
    fn stale_socket_is_replaced_and_live_socket_refused() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("run").join("boondocks.sock");

        prepare_socket_for_bind(&socket).unwrap();
        assert!(socket.parent().unwrap().is_dir());

        let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();
        let err = prepare_socket_for_bind(&socket).unwrap_err();
        assert!(err.to_string().contains("already in use"));

        drop(listener);
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }
}
