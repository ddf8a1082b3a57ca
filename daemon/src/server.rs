//! Wyoming event listener.
//!
//! Accepts one client at a time on TCP or a Unix socket, decodes its events
//! and forwards the ones we care about to the effect controller.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wyoming_leds::event::{EventKind, EventReader};

use crate::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenUri {
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for ListenUri {
    type Err = ConfigError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = uri.strip_prefix("tcp://")
            && addr.rsplit_once(':').is_some_and(|(host, port)| {
                !host.is_empty() && port.parse::<u16>().is_ok()
            })
        {
            return Ok(ListenUri::Tcp(addr.to_string()));
        }
        if let Some(path) = uri.strip_prefix("unix://")
            && !path.is_empty()
        {
            return Ok(ListenUri::Unix(PathBuf::from(path)));
        }
        Err(ConfigError::Uri(uri.to_string()))
    }
}

impl fmt::Display for ListenUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenUri::Tcp(addr) => write!(f, "tcp://{addr}"),
            ListenUri::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

type ClientStream = Box<dyn AsyncRead + Send + Unpin>;

pub enum EventListener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl EventListener {
    pub async fn bind(uri: &ListenUri) -> io::Result<Self> {
        let listener = match uri {
            ListenUri::Tcp(addr) => EventListener::Tcp(TcpListener::bind(addr).await?),
            ListenUri::Unix(path) => {
                // a socket left behind by an unclean exit blocks bind
                if path.exists() {
                    tokio::fs::remove_file(path).await?;
                }
                EventListener::Unix {
                    listener: UnixListener::bind(path)?,
                    path: path.clone(),
                }
            }
        };
        info!("listening for Wyoming events on {uri}");
        Ok(listener)
    }

    /// The bound address, with the actual port for `tcp://host:0`.
    pub fn local_uri(&self) -> io::Result<ListenUri> {
        Ok(match self {
            EventListener::Tcp(listener) => ListenUri::Tcp(listener.local_addr()?.to_string()),
            EventListener::Unix { path, .. } => ListenUri::Unix(path.clone()),
        })
    }

    async fn accept(&self) -> io::Result<(ClientStream, String)> {
        match self {
            EventListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                let stream: ClientStream = Box::new(stream);
                Ok((stream, addr.to_string()))
            }
            EventListener::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                let stream: ClientStream = Box::new(stream);
                Ok((stream, path.display().to_string()))
            }
        }
    }

    /// Serve clients one after another until `shutdown_token` is cancelled
    /// or the controller goes away.
    pub async fn serve(self, events: mpsc::Sender<EventKind>, shutdown_token: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown_token.cancelled() => break,
                accepted = self.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(client) => client,
                Err(e) => {
                    warn!("failed to accept connection: {e}");
                    continue;
                }
            };
            if !handle_client(stream, &peer, &events, &shutdown_token).await {
                break;
            }
        }

        if let EventListener::Unix { path, .. } = &self
            && let Err(e) = tokio::fs::remove_file(path).await
        {
            debug!("failed to remove {}: {e}", path.display());
        }
        info!("event listener stopped");
    }
}

/// Forward events from one client until it disconnects. Returns false if the
/// controller has stopped taking events.
async fn handle_client<S>(
    stream: S,
    peer: &str,
    events: &mpsc::Sender<EventKind>,
    shutdown_token: &CancellationToken,
) -> bool
where
    S: AsyncRead + Unpin,
{
    info!("client connected: {peer}");
    let mut reader = EventReader::new(BufReader::new(stream));
    loop {
        let next = tokio::select! {
            _ = shutdown_token.cancelled() => return true,
            next = reader.next_event() => next,
        };
        match next {
            Ok(Some(kind)) => {
                debug!("{peer}: {}", kind.as_type());
                if events.send(kind).await.is_err() {
                    error!("effect controller is gone, closing listener");
                    return false;
                }
            }
            Ok(None) => {
                info!("client disconnected: {peer}");
                return true;
            }
            Err(e) => {
                warn!("dropping client {peer}: {e}");
                return true;
            }
        }
    }
}

pub fn run_event_server(
    task_tracker: &TaskTracker,
    listener: EventListener,
    events: mpsc::Sender<EventKind>,
    shutdown_token: CancellationToken,
) {
    task_tracker.spawn(listener.serve(events, shutdown_token));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpStream, UnixStream};

    #[test]
    fn test_parse_listen_uri() {
        assert_eq!(
            "tcp://0.0.0.0:10500".parse::<ListenUri>().unwrap(),
            ListenUri::Tcp("0.0.0.0:10500".to_string())
        );
        assert_eq!(
            "unix:///run/leds.sock".parse::<ListenUri>().unwrap(),
            ListenUri::Unix(PathBuf::from("/run/leds.sock"))
        );
        for bad in ["tcp://nohost", "tcp://:10500", "tcp://host:port", "unix://", "stdio://"] {
            assert!(bad.parse::<ListenUri>().is_err(), "{bad}");
        }
        let uri = ListenUri::Tcp("127.0.0.1:1".to_string());
        assert_eq!(uri.to_string().parse::<ListenUri>().unwrap(), uri);
    }

    #[tokio::test]
    async fn test_unix_clients_served_in_turn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leds.sock");
        // stale socket file from a previous run
        std::fs::write(&path, "").unwrap();

        let listener = EventListener::bind(&ListenUri::Unix(path.clone()))
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        run_event_server(&tracker, listener, tx, token.clone());

        let mut first = UnixStream::connect(&path).await.unwrap();
        first
            .write_all(b"{\"type\": \"detection\"}\n{\"type\": \"ping\"}\n")
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::Detection));
        drop(first);

        let mut second = UnixStream::connect(&path).await.unwrap();
        second
            .write_all(b"{\"type\": \"transcript\", \"data_length\": 2}\n{}")
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::Transcript));

        token.cancel();
        tracker.close();
        tracker.wait().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_tcp_listener() {
        let listener = EventListener::bind(&ListenUri::Tcp("127.0.0.1:0".to_string()))
            .await
            .unwrap();
        let ListenUri::Tcp(addr) = listener.local_uri().unwrap() else {
            panic!("expected a TCP address");
        };
        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();
        run_event_server(&tracker, listener, tx, token.clone());

        let mut client = TcpStream::connect(&addr).await.unwrap();
        client
            .write_all(b"{\"type\": \"satellite-connected\"}\n")
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(EventKind::SatelliteConnected));

        token.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_listener_stops_when_controller_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leds.sock");
        let listener = EventListener::bind(&ListenUri::Unix(path.clone()))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let tracker = TaskTracker::new();
        run_event_server(&tracker, listener, tx, CancellationToken::new());

        let mut client = UnixStream::connect(&path).await.unwrap();
        client
            .write_all(b"{\"type\": \"voice-started\"}\n")
            .await
            .unwrap();
        tracker.close();
        tracker.wait().await;
    }
}
