use crate::config::{AuthMethod, HostKeyCallback, SshClientConfig};
use crate::error::FleetsshError;
use crate::job::PreparedJob;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::agent::client::AgentClient;
use russh_keys::key;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) const SSH_AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";

const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// One intermediate endpoint in a bastion route. The first hop is dialed
/// directly; every later hop is dialed through the client established for
/// the hop before it.
#[derive(Debug, Clone)]
pub struct Hop {
    pub host: String,
    pub port: u16,
    /// Transport of the first leg. Only `"tcp"` is supported.
    pub network: String,
    pub config: SshClientConfig,
}

impl Hop {
    pub fn new(host: impl Into<String>, port: u16, config: SshClientConfig) -> Self {
        Hop {
            host: host.into(),
            port,
            network: String::from("tcp"),
            config,
        }
    }
}

/// russh client handler; defers host-key acceptance to the configured
/// callback.
pub(crate) struct ClientHandler {
    host: String,
    host_key_callback: HostKeyCallback,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = FleetsshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok((self.host_key_callback)(&self.host, server_public_key))
    }
}

/// An authenticated SSH client, plus the chain of hop clients that must stay
/// alive while any session on it is in use. Hops are released in reverse
/// order by [`SshClient::close`].
pub(crate) struct SshClient {
    host: String,
    handle: Handle<ClientHandler>,
    hops: Vec<Handle<ClientHandler>>,
}

/// Single direct connect.
pub(crate) async fn dial(
    host: &str,
    port: u16,
    config: &SshClientConfig,
) -> Result<SshClient, FleetsshError> {
    let handle = connect_direct(host, port, config).await?;
    Ok(SshClient {
        host: host.to_string(),
        handle,
        hops: Vec::new(),
    })
}

/// Dial `host` through an ordered chain of hops. An empty route is a direct
/// dial. Any hop failure names the hop ordinal and host, and releases every
/// client established so far.
pub(crate) async fn dial_through_chain(
    route: &[Hop],
    host: &str,
    port: u16,
    config: &SshClientConfig,
) -> Result<SshClient, FleetsshError> {
    if route.is_empty() {
        return dial(host, port, config).await;
    }

    let mut hops: Vec<Handle<ClientHandler>> = Vec::with_capacity(route.len());
    for (index, hop) in route.iter().enumerate() {
        if hop.network != "tcp" {
            release_all(&mut hops).await;
            return Err(FleetsshError::UnsupportedNetwork(hop.network.clone()));
        }

        let attempt = match hops.last() {
            None => connect_direct(&hop.host, hop.port, &hop.config).await,
            Some(previous) => connect_through(previous, &hop.host, hop.port, &hop.config).await,
        };

        match attempt {
            Ok(handle) => {
                debug!(target: "transport::dial_through_chain", "Established hop {} via {}", index, hop.host);
                hops.push(handle);
            }
            Err(err) => {
                release_all(&mut hops).await;
                return Err(FleetsshError::hop(index, &hop.host, err));
            }
        }
    }

    let target = match hops.last() {
        Some(last) => connect_through(last, host, port, config).await,
        None => return dial(host, port, config).await,
    };

    match target {
        Ok(handle) => Ok(SshClient {
            host: host.to_string(),
            handle,
            hops,
        }),
        Err(err) => {
            release_all(&mut hops).await;
            Err(err)
        }
    }
}

impl SshClient {
    pub(crate) async fn open_session(&self) -> Result<RemoteSession, FleetsshError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|err| FleetsshError::session(&self.host, err))?;

        Ok(RemoteSession {
            host: self.host.clone(),
            channel,
            eof_seen: false,
            exit_status: None,
        })
    }

    /// Disconnects the target client only; hop clients stay up. Used by the
    /// stop path, where the owning task still runs its normal teardown.
    pub(crate) async fn disconnect(&self) {
        let _ = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;
    }

    /// Releases the target client and every hop client, last hop first.
    pub(crate) async fn close(&self) {
        self.disconnect().await;
        for hop in self.hops.iter().rev() {
            let _ = hop.disconnect(Disconnect::ByApplication, "", "en").await;
        }
    }
}

/// What one remote session emits, demultiplexed from the channel message
/// stream. `Closed` is terminal: it is reported once the remote has sent
/// both EOF and its exit status, or the channel went away.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SessionEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Closed,
}

/// One remote shell execution context on one client.
pub(crate) struct RemoteSession {
    host: String,
    channel: russh::Channel<client::Msg>,
    eof_seen: bool,
    exit_status: Option<u32>,
}

impl RemoteSession {
    /// Starts `job` without waiting for it to finish. Feeds the job's stdin
    /// bytes, if any, and closes the remote stdin so `cat`-style consumers
    /// terminate.
    pub(crate) async fn start(&mut self, job: &PreparedJob) -> Result<(), FleetsshError> {
        debug!(target: "RemoteSession::start", "Executing on {}: {}", self.host, job.command);

        self.channel
            .exec(true, job.command.as_str())
            .await
            .map_err(|err| FleetsshError::start(&self.host, err))?;

        if let Some(stdin) = &job.stdin {
            self.channel
                .data(&stdin[..])
                .await
                .map_err(|err| FleetsshError::start(&self.host, err))?;
            self.channel
                .eof()
                .await
                .map_err(|err| FleetsshError::start(&self.host, err))?;
        }

        Ok(())
    }

    /// Runs `job` to completion and returns the collected stdout bytes.
    /// A non-zero or missing exit status is an error, and no output is
    /// returned for it.
    pub(crate) async fn run(&mut self, job: &PreparedJob) -> Result<Vec<u8>, FleetsshError> {
        self.start(job).await?;

        let mut output = Vec::new();
        loop {
            match self.next_event().await {
                SessionEvent::Stdout(bytes) => output.extend_from_slice(&bytes),
                SessionEvent::Stderr(_) => {}
                SessionEvent::Closed => break,
            }
        }

        match self.exit_status {
            Some(0) => Ok(output),
            Some(status) => Err(FleetsshError::CommandFailed {
                host: self.host.clone(),
                status,
            }),
            None => Err(FleetsshError::start(
                &self.host,
                "session closed without reporting an exit status",
            )),
        }
    }

    /// Next output delta or the terminal `Closed` event. Exit status and EOF
    /// bookkeeping happens here; the status is readable afterwards through
    /// [`RemoteSession::exit_status`].
    pub(crate) async fn next_event(&mut self) -> SessionEvent {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => return SessionEvent::Stdout(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, ext })
                    if ext == SSH_EXTENDED_DATA_STDERR =>
                {
                    return SessionEvent::Stderr(data.to_vec())
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_status = Some(exit_status);
                    if self.eof_seen {
                        return SessionEvent::Closed;
                    }
                }
                Some(ChannelMsg::Eof) => {
                    self.eof_seen = true;
                    if self.exit_status.is_some() {
                        return SessionEvent::Closed;
                    }
                }
                Some(ChannelMsg::Close) | None => return SessionEvent::Closed,
                Some(_) => {}
            }
        }
    }

    pub(crate) fn exit_status(&self) -> Option<u32> {
        self.exit_status
    }
}

fn client_config() -> Arc<client::Config> {
    Arc::new(client::Config::default())
}

async fn connect_direct(
    host: &str,
    port: u16,
    config: &SshClientConfig,
) -> Result<Handle<ClientHandler>, FleetsshError> {
    debug!(target: "transport::connect_direct", "Dialing {}:{}", host, port);

    let handler = ClientHandler {
        host: host.to_string(),
        host_key_callback: config.host_key_callback.clone(),
    };

    let mut handle = tokio::time::timeout(
        config.timeout,
        client::connect(client_config(), (host, port), handler),
    )
    .await
    .map_err(|_| FleetsshError::connect(host, format!("dial timed out after {:?}", config.timeout)))?
    .map_err(|err| FleetsshError::connect(host, err))?;

    authenticate(&mut handle, host, config).await?;
    Ok(handle)
}

/// Dial-through-client: tunnels one leg from an established client to the
/// next endpoint and handshakes over the tunnel.
async fn connect_through(
    via: &Handle<ClientHandler>,
    host: &str,
    port: u16,
    config: &SshClientConfig,
) -> Result<Handle<ClientHandler>, FleetsshError> {
    debug!(target: "transport::connect_through", "Tunneling to {}:{}", host, port);

    let tunnel = via
        .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
        .await
        .map_err(|err| FleetsshError::connect(host, format!("could not open tunnel: {err}")))?;

    let handler = ClientHandler {
        host: host.to_string(),
        host_key_callback: config.host_key_callback.clone(),
    };

    let mut handle = tokio::time::timeout(
        config.timeout,
        client::connect_stream(client_config(), tunnel.into_stream(), handler),
    )
    .await
    .map_err(|_| FleetsshError::connect(host, format!("handshake timed out after {:?}", config.timeout)))?
    .map_err(|err| FleetsshError::connect(host, err))?;

    authenticate(&mut handle, host, config).await?;
    Ok(handle)
}

/// Tries the configured auth methods in order; the first accepted method
/// wins. Exhaustion is a connect failure naming the host.
async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    host: &str,
    config: &SshClientConfig,
) -> Result<(), FleetsshError> {
    if config.auth.is_empty() {
        return Err(FleetsshError::connect(host, "no auth methods configured"));
    }

    let mut last_failure = String::from("all auth methods rejected");
    for method in &config.auth {
        let attempt = match method {
            AuthMethod::PrivateKey(key_pair) => handle
                .authenticate_publickey(config.user.clone(), Arc::clone(key_pair))
                .await
                .map_err(|err| err.to_string()),
            AuthMethod::Password(password) => handle
                .authenticate_password(config.user.clone(), password.clone())
                .await
                .map_err(|err| err.to_string()),
            AuthMethod::Agent => authenticate_with_agent(handle, &config.user).await,
        };

        match attempt {
            Ok(true) => {
                debug!(target: "transport::authenticate", "Authenticated {}@{}", config.user, host);
                return Ok(());
            }
            Ok(false) => {
                debug!(target: "transport::authenticate", "Auth method rejected for {}@{}", config.user, host);
            }
            Err(reason) => {
                warn!(target: "transport::authenticate", "Auth method failed for {}@{}: {}", config.user, host, reason);
                last_failure = reason;
            }
        }
    }

    Err(FleetsshError::connect(
        host,
        format!(
            "authentication failed for user {}: {}",
            config.user, last_failure
        ),
    ))
}

/// Offers every identity the SSH agent holds, one at a time.
async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool, String> {
    let sock = std::env::var(SSH_AUTH_SOCK_ENV)
        .map_err(|_| format!("{SSH_AUTH_SOCK_ENV} is not set"))?;

    let mut agent = AgentClient::connect_uds(&sock)
        .await
        .map_err(|err| format!("could not reach SSH agent at {sock}: {err}"))?;

    let identities = agent
        .request_identities()
        .await
        .map_err(|err| format!("could not list agent identities: {err}"))?;

    for identity in identities {
        let (returned, auth) = handle
            .authenticate_future(user, identity, agent)
            .await;
        agent = returned;

        match auth {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => return Err(format!("agent signing failed: {err}")),
        }
    }

    Ok(false)
}

async fn release_all(hops: &mut Vec<Handle<ClientHandler>>) {
    while let Some(handle) = hops.pop() {
        let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
    }
}
