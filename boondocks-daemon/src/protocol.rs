//! Blocking host-side client for talking to a running daemon.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::thread::sleep;
use std::time::Duration;

use boondocks_core::Event;

use crate::endpoint::Endpoint;
use crate::error::{io_err, DaemonError};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// One connection to the daemon, as the host side sees it.
pub struct HostConnection {
    endpoint: Endpoint,
    reader: BufReader<Box<dyn Read + Send>>,
    writer: Box<dyn Write + Send>,
}

impl HostConnection {
    /// Connect, retrying briefly while the daemon is still coming up.
    pub fn connect(endpoint: &Endpoint) -> Result<Self, DaemonError> {
        let mut last_not_running: Option<DaemonError> = None;
        for attempt in 0..CONNECT_ATTEMPTS {
            match Self::connect_once(endpoint) {
                Ok(connection) => return Ok(connection),
                Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                    last_not_running = Some(err);
                    if attempt + 1 < CONNECT_ATTEMPTS {
                        sleep(CONNECT_RETRY_DELAY);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_not_running.unwrap_or_else(|| DaemonError::DaemonNotRunning {
            endpoint: endpoint.to_string(),
        }))
    }

    fn connect_once(endpoint: &Endpoint) -> Result<Self, DaemonError> {
        let not_running = |err: std::io::Error| {
            if matches!(
                err.kind(),
                ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
            ) {
                DaemonError::DaemonNotRunning {
                    endpoint: endpoint.to_string(),
                }
            } else {
                io_err(endpoint.to_string(), err)
            }
        };

        let (reader, writer): (Box<dyn Read + Send>, Box<dyn Write + Send>) = match endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr.as_str()).map_err(not_running)?;
                let reader = stream.try_clone().map_err(|e| io_err(addr, e))?;
                (Box::new(reader), Box::new(stream))
            }
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(not_running)?;
                let reader = stream.try_clone().map_err(|e| io_err(path, e))?;
                (Box::new(reader), Box::new(stream))
            }
        };

        Ok(Self {
            endpoint: endpoint.clone(),
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn send(&mut self, event: &Event) -> Result<(), DaemonError> {
        let line = event.to_json()?;
        let target = self.endpoint.to_string();
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| io_err(&target, e))?;
        self.writer.write_all(b"\n").map_err(|e| io_err(&target, e))?;
        self.writer.flush().map_err(|e| io_err(&target, e))?;
        Ok(())
    }

    /// Next event from the daemon, or `None` once it closed the connection.
    pub fn read_event(&mut self) -> Result<Option<Event>, DaemonError> {
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| io_err(self.endpoint.to_string(), e))?;
            if read == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(Event::from_json(line.trim_end())?));
        }
    }

    /// Send `event` and collect replies up to and including its terminal
    /// event. `stop` reads until the daemon closes the connection; event
    /// types the daemon ignores return no replies.
    pub fn request(&mut self, event: &Event) -> Result<Vec<Event>, DaemonError> {
        self.send(event)?;
        let mut replies = Vec::new();
        if !expects_reply(&event.kind) {
            return Ok(replies);
        }
        while let Some(reply) = self.read_event()? {
            let done = is_terminal(&event.kind, &reply.kind);
            replies.push(reply);
            if done {
                return Ok(replies);
            }
        }
        if event.kind == "stop" {
            Ok(replies)
        } else {
            Err(DaemonError::Protocol(format!(
                "daemon closed connection before answering '{}'",
                event.kind
            )))
        }
    }
}

fn expects_reply(request: &str) -> bool {
    matches!(
        request,
        "ready" | "execute" | "generate" | "preprocess" | "teardown" | "stop"
    )
}

/// Whether `response` ends the reply stream for `request`.
pub fn is_terminal(request: &str, response: &str) -> bool {
    match (request, response) {
        (_, "hardfailure") => true,
        ("ready", "ok") => true,
        ("execute" | "generate", "finished") => true,
        ("preprocess", "preprocess") => true,
        ("teardown", "stats" | "warning") => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("ready", "ok", true)]
    #[case("execute", "asset", false)]
    #[case("execute", "error", false)]
    #[case("execute", "finished", true)]
    #[case("generate", "expand", false)]
    #[case("generate", "finished", true)]
    #[case("preprocess", "error", false)]
    #[case("preprocess", "preprocess", true)]
    #[case("execute", "preprocess", false)]
    #[case("teardown", "stats", true)]
    #[case("teardown", "warning", true)]
    #[case("teardown", "error", false)]
    #[case("stop", "ok", false)]
    #[case("execute", "hardfailure", true)]
    fn terminal_events(#[case] request: &str, #[case] response: &str, #[case] terminal: bool) {
        assert_eq!(is_terminal(request, response), terminal);
    }

    #[test]
    fn connect_to_missing_socket_reports_not_running() {
        let dir = TempDir::new().unwrap();
        let endpoint = Endpoint::unix(dir.path().join("absent.sock"));
        let err = HostConnection::connect(&endpoint).err().expect("no daemon");
        assert!(matches!(err, DaemonError::DaemonNotRunning { .. }), "got: {err}");
        assert!(err.to_string().contains("absent.sock"));
    }
}
