//! Transfer executable supervision.
//!
//! One `run` is one attempt: bind a loopback listener, spawn the executable
//! with `-M <port>`, accept its management connection, decode frames until
//! the stream closes, reap the process and turn the last status into a
//! result. Retrying is left to the caller.

use async_trait::async_trait;
use regex::Regex;
use std::net::Ipv4Addr;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::agent::listener::{ListenerSet, ProgressEvent};
use crate::error::{FaspError, Result, SYNTHETIC_CODE};
use crate::protocol::{ChannelState, EventType, Frame, FrameParser};
use crate::spec::compiler::TOKEN_ENV;
use crate::spec::Invocation;
use crate::transfer::installation::Installation;
use crate::transfer::registry::SessionHandle;

/// Read buffer for the management socket
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Status description text meaning the authorization token expired
const BEARER_TOKEN_PATTERN: &str = r"(?i)bearer token";

/// Produces a fresh authorization token after the executable rejected one.
#[async_trait]
pub trait TokenRegenerator: Send + Sync {
    async fn regenerate(&self, invocation: &Invocation) -> Result<String>;
}

#[derive(Clone)]
pub struct Supervisor {
    installation: Arc<Installation>,
    listeners: ListenerSet,
    regenerator: Option<Arc<dyn TokenRegenerator>>,
    accept_timeout: Duration,
    idle_timeout: Option<Duration>,
}

enum Accept {
    Connected(TcpStream),
    Exited(ExitStatus),
    Failed(std::io::Error),
    TimedOut,
}

impl Supervisor {
    pub fn new(installation: Arc<Installation>, listeners: ListenerSet) -> Self {
        Self {
            installation,
            listeners,
            regenerator: None,
            accept_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }

    pub fn with_regenerator(mut self, regenerator: Option<Arc<dyn TokenRegenerator>>) -> Self {
        self.regenerator = regenerator;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Run one attempt of `invocation` for `session`.
    ///
    /// A regenerated token is written back into `invocation.env`.
    pub async fn run(&self, invocation: &mut Invocation, session: &SessionHandle) -> Result<()> {
        let id = session.id();
        let executable = self.installation.executable(invocation.variant)?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let port = listener.local_addr()?.port();

        let mut args = Vec::with_capacity(invocation.args.len() + 2);
        args.push("-M".to_string());
        args.push(port.to_string());
        args.extend(invocation.args.iter().cloned());

        info!(session = %id, executable = %executable.display(), port, "starting transfer executable");
        debug!(
            session = %id,
            args = ?args,
            env = ?invocation.env_names().collect::<Vec<_>>(),
            "executable command line"
        );

        let mut child = Command::new(&executable)
            .args(&args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FaspError::synthetic(format!("failed to start {}: {e}", executable.display()))
            })?;

        // A connection already queued wins over an exit seen in the same poll.
        let accept = tokio::select! {
            biased;
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => Accept::Connected(stream),
                Err(e) => Accept::Failed(e),
            },
            status = child.wait() => match status {
                Ok(status) => Accept::Exited(status),
                Err(e) => Accept::Failed(e),
            },
            _ = tokio::time::sleep(self.accept_timeout) => Accept::TimedOut,
        };
        drop(listener);

        let stream = match accept {
            Accept::Connected(stream) => stream,
            Accept::Exited(status) => {
                return Err(FaspError::synthetic(format!(
                    "transfer executable exited before connecting ({status})"
                ))
                .into());
            }
            Accept::Failed(e) => {
                kill_and_reap(&mut child).await;
                return Err(e.into());
            }
            Accept::TimedOut => {
                kill_and_reap(&mut child).await;
                return Err(FaspError::synthetic(format!(
                    "no management connection within {:?}",
                    self.accept_timeout
                ))
                .into());
            }
        };
        debug!(session = %id, "management channel connected");

        let (mut reader, writer) = stream.into_split();
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        session.attach_channel(Arc::new(tokio::sync::Mutex::new(writer)));

        let mut channel = ChannelState::Initial.connected();
        let mut parser = FrameParser::new();
        let mut last_status: Option<Frame> = None;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let streamed: Result<()> = loop {
            let read = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, reader.read(&mut buf)).await {
                    Ok(read) => read,
                    Err(_) => {
                        break Err(FaspError::synthetic(format!(
                            "management channel idle for {limit:?}"
                        ))
                        .into())
                    }
                },
                None => reader.read(&mut buf).await,
            };
            let n = match read {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => {
                    debug!(session = %id, "management channel read failed: {e}");
                    break Ok(());
                }
            };
            let mut frames = Vec::new();
            let fed = parser.feed_into(&buf[..n], &mut frames);
            for frame in frames {
                channel = self.handle_frame(session, frame, channel, &mut last_status);
            }
            if let Err(e) = fed {
                break Err(e);
            }
        };

        session.detach_channel();
        if streamed.is_err() {
            kill_and_reap(&mut child).await;
        }
        let status = child.wait().await?;
        streamed?;

        if parser.has_pending() {
            debug!(session = %id, "management channel closed inside a frame");
        }
        let channel = channel.close();
        debug!(session = %id, ?channel, %status, "transfer executable exited");

        self.conclude(invocation, channel, last_status, status).await
    }

    fn handle_frame(
        &self,
        session: &SessionHandle,
        frame: Frame,
        channel: ChannelState,
        last_status: &mut Option<Frame>,
    ) -> ChannelState {
        let id = session.id();
        let event = frame.event_type();
        debug!(session = %id, event = event.as_str(), fields = frame.len(), "management event");

        match event {
            EventType::Init => session.mark_started(frame.get("SessionId").map(str::to_string)),
            EventType::Done | EventType::Error if last_status.is_none() => {
                session.set_last_status(frame.clone());
                *last_status = Some(frame.clone());
            }
            _ => {}
        }

        self.listeners.management(id, &frame);
        if let Some(progress) = ProgressEvent::from_frame(&frame) {
            self.listeners.progress(id, progress);
        }
        channel.apply(&event)
    }

    async fn conclude(
        &self,
        invocation: &mut Invocation,
        channel: ChannelState,
        last_status: Option<Frame>,
        status: ExitStatus,
    ) -> Result<()> {
        let last_status_was_done = last_status
            .as_ref()
            .is_some_and(|f| f.event_type() == EventType::Done);
        if channel == ChannelState::Succeeded {
            if !status.success() {
                warn!(%status, "transfer executable reported DONE but exited with failure");
            }
            return Ok(());
        }

        let Some(frame) = last_status.filter(|f| f.event_type() == EventType::Error) else {
            if last_status_was_done {
                return Err(FaspError::synthetic("DONE received before INIT").into());
            }
            if !status.success() {
                return Err(FaspError::synthetic(format!("transfer executable failed ({status})")).into());
            }
            return Err(FaspError::synthetic("no status received").into());
        };

        let code = frame
            .get("Code")
            .and_then(|c| c.trim().parse().ok())
            .unwrap_or(SYNTHETIC_CODE);
        let description = frame.get("Description").unwrap_or("transfer failed");
        let mut err = FaspError::new(code, description);

        if let Some(regenerator) = self.regenerator.as_ref().filter(|_| bearer_token_expired(&err.message)) {
            match regenerator.regenerate(invocation).await {
                Ok(token) => {
                    info!("authorization token regenerated");
                    invocation.env.insert(TOKEN_ENV.to_string(), token);
                    err = err.with_retryable(true);
                }
                Err(e) => warn!("token regeneration failed: {e}"),
            }
        }
        Err(err.into())
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("installation", &self.installation)
            .field("accept_timeout", &self.accept_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("regenerator", &self.regenerator.is_some())
            .finish()
    }
}

fn bearer_token_expired(description: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(BEARER_TOKEN_PATTERN).expect("constant pattern"))
        .is_match(description)
}

async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!("failed to kill transfer executable: {e}");
    }
}
