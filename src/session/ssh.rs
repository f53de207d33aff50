//! SSH transport: the `netconf` subsystem on a fresh session channel.

use super::*;
use russh::ChannelStream;
use russh::client::Msg;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A `netconf` subsystem channel and the SSH connection carrying it.
///
/// Dropping the transport disconnects the SSH connection.
pub struct SshTransport {
    client: Client,
    stream: Pin<Box<ChannelStream<Msg>>>,
}

impl SshTransport {
    /// Whether the underlying SSH connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

impl AsyncRead for SshTransport {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for SshTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}

fn auth_method(config: &ClientConfig) -> AuthMethod {
    match config.key_file.as_deref().filter(|path| !path.trim().is_empty()) {
        Some(path) => AuthMethod::with_key_file(path, config.key_passphrase.as_deref()),
        None => AuthMethod::with_password(&config.password),
    }
}

/// Validates `config`, dials the device and requests the `netconf` subsystem.
///
/// Connection setup is bounded by the config timeout.
pub(super) async fn connect(
    config: ClientConfig,
    security: &ConnectionSecurityOptions,
) -> Result<SshTransport, NetconfError> {
    let config = config.validate()?;
    let device_addr = config.device_addr();
    let timeout = config.timeout();

    let ssh_config = Config {
        preferred: security.preferred(),
        inactivity_timeout: security.inactivity_timeout,
        keepalive_interval: security.keepalive_interval,
        ..Default::default()
    };

    let dial = async {
        let client = Client::connect_with_config(
            (config.host.clone(), config.port),
            &config.user,
            auth_method(&config),
            security.server_check.clone(),
            ssh_config,
        )
        .await?;
        debug!("{device_addr} ssh connection established");

        let channel = client.get_channel().await?;
        channel
            .request_subsystem(true, crate::config::NETCONF_SUBSYSTEM)
            .await?;
        debug!("{device_addr} netconf subsystem started");
        Ok::<_, NetconfError>(SshTransport {
            client,
            stream: Box::pin(channel.into_stream()),
        })
    };

    tokio::time::timeout(timeout, dial)
        .await
        .map_err(|_| NetconfError::ConnectTimeout(timeout))?
}
