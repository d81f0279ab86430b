use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::auth::AuthPlugin;
use crate::error::{ReplicationError, Result};
use crate::protocol::buf::WireReader;
use crate::protocol::framing::{MAX_FRAME_PAYLOAD, PacketTransport};
use crate::protocol::messages::{EOF_HEADER, ERR_HEADER, OK_HEADER, parse_err_packet};

pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

/// utf8mb4_general_ci
const CHARSET_UTF8MB4: u8 = 45;

const AUTH_MORE_DATA: u8 = 0x01;
const FAST_AUTH_SUCCESS: u8 = 0x03;
const PERFORM_FULL_AUTH: u8 = 0x04;

/// Initial handshake packet (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub character_set: u8,
    pub status_flags: u16,
    /// Scramble salt (part 1 + part 2, without the trailing NUL).
    pub auth_data: Vec<u8>,
    pub auth_plugin_name: String,
}

impl Greeting {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.first() == Some(&ERR_HEADER) {
            return Err(parse_err_packet(payload)?.into_error());
        }
        let mut r = WireReader::new(payload);
        let protocol_version = r.u8()?;
        if protocol_version != 10 {
            return Err(ReplicationError::protocol(format!(
                "unsupported handshake protocol version {protocol_version}"
            )));
        }
        let server_version = String::from_utf8_lossy(r.cstr()?).into_owned();
        let connection_id = r.u32_le()?;
        let mut auth_data = r.bytes(8)?.to_vec();
        r.terminator("auth-plugin-data-part-1")?;
        let cap_lower = r.u16_le()? as u32;

        // Pre-4.1 servers stop here.
        if r.is_empty() {
            return Ok(Self {
                protocol_version,
                server_version,
                connection_id,
                capabilities: cap_lower,
                character_set: 0,
                status_flags: 0,
                auth_data,
                auth_plugin_name: String::new(),
            });
        }

        let character_set = r.u8()?;
        let status_flags = r.u16_le()?;
        let cap_upper = r.u16_le()? as u32;
        let capabilities = (cap_upper << 16) | cap_lower;
        let auth_data_len = r.u8()? as usize;
        r.skip(10)?;

        if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            let part2_len = auth_data_len.saturating_sub(8).max(13);
            let part2 = r.bytes(part2_len.min(r.remaining()))?;
            let part2 = match part2.iter().position(|&b| b == 0) {
                Some(pos) => &part2[..pos],
                None => part2,
            };
            auth_data.extend_from_slice(part2);
        }

        let auth_plugin_name = if capabilities & CLIENT_PLUGIN_AUTH != 0 && !r.is_empty() {
            let rest = r.rest();
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            String::from_utf8_lossy(&rest[..end]).into_owned()
        } else {
            String::new()
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities,
            character_set,
            status_flags,
            auth_data,
            auth_plugin_name,
        })
    }

    /// Server version as `(major, minor, patch)`, ignoring any suffix.
    pub fn version_triple(&self) -> (u32, u32, u32) {
        parse_version_triple(&self.server_version)
    }
}

pub(crate) fn parse_version_triple(version: &str) -> (u32, u32, u32) {
    let mut parts = version.split(|c: char| !c.is_ascii_digit()).filter(|s| !s.is_empty());
    let mut next = || parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (next(), next(), next())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Greeted,
    ResponseSent,
    Authenticated,
    Failed,
}

/// Drives connection-phase authentication.
///
/// `Greeted -> ResponseSent -> Authenticated | Failed`. Both final states are
/// terminal; a failed authenticator cannot be retried.
#[derive(Debug)]
pub struct HandshakeAuthenticator {
    greeting: Greeting,
    state: HandshakeState,
    plugin: AuthPlugin,
}

impl HandshakeAuthenticator {
    /// Read the server greeting. The transport must be freshly connected.
    pub async fn read_greeting<S>(transport: &mut PacketTransport<S>) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let payload = transport.read().await?;
        let greeting = Greeting::parse(&payload)?;
        let plugin = match AuthPlugin::from_name(&greeting.auth_plugin_name) {
            Ok(p) => p,
            Err(_) => {
                tracing::debug!(
                    plugin = %greeting.auth_plugin_name,
                    "unsupported default auth plugin; answering with mysql_native_password"
                );
                AuthPlugin::NativePassword
            }
        };
        tracing::info!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "connected to source"
        );
        Ok(Self {
            greeting,
            state: HandshakeState::Greeted,
            plugin,
        })
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    pub fn into_greeting(self) -> Greeting {
        self.greeting
    }

    /// Capabilities this client asks for, restricted to what the server offers.
    pub fn client_capabilities(&self) -> u32 {
        let wanted = CLIENT_LONG_PASSWORD
            | CLIENT_LONG_FLAG
            | CLIENT_PROTOCOL_41
            | CLIENT_TRANSACTIONS
            | CLIENT_SECURE_CONNECTION
            | CLIENT_PLUGIN_AUTH;
        wanted & self.greeting.capabilities
    }

    fn handshake_response(&self, user: &str, password: &str) -> BytesMut {
        let caps = self.client_capabilities();
        let scramble = self.plugin.scramble(password, &self.greeting.auth_data);

        let mut b = BytesMut::with_capacity(64 + user.len() + scramble.len());
        b.put_u32_le(caps);
        b.put_u32_le(MAX_FRAME_PAYLOAD as u32);
        b.put_u8(CHARSET_UTF8MB4);
        b.put_slice(&[0u8; 23]);
        b.put_slice(user.as_bytes());
        b.put_u8(0);
        if caps & CLIENT_SECURE_CONNECTION != 0 {
            b.put_u8(scramble.len() as u8);
            b.put_slice(&scramble);
        } else {
            b.put_slice(&scramble);
            b.put_u8(0);
        }
        if caps & CLIENT_PLUGIN_AUTH != 0 {
            b.put_slice(self.plugin.name().as_bytes());
            b.put_u8(0);
        }
        b
    }

    /// Send the credential response and wait for the acknowledgment.
    pub async fn authenticate<S>(
        &mut self,
        transport: &mut PacketTransport<S>,
        user: &str,
        password: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state != HandshakeState::Greeted {
            return Err(ReplicationError::Internal(format!(
                "authenticate called in state {:?}",
                self.state
            )));
        }
        let result = self.exchange(transport, user, password).await;
        self.state = match result {
            Ok(()) => HandshakeState::Authenticated,
            Err(_) => HandshakeState::Failed,
        };
        result
    }

    async fn exchange<S>(
        &mut self,
        transport: &mut PacketTransport<S>,
        user: &str,
        password: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let response = self.handshake_response(user, password);
        transport.write(&response).await?;
        self.state = HandshakeState::ResponseSent;

        let mut switched = false;
        loop {
            let ack = transport.read().await?;
            match ack.first().copied() {
                Some(OK_HEADER) => {
                    tracing::debug!(plugin = self.plugin.name(), "authentication succeeded");
                    return Ok(());
                }
                Some(ERR_HEADER) => {
                    let err = parse_err_packet(&ack)?;
                    return Err(ReplicationError::Auth(format!(
                        "{} (code {})",
                        err.message, err.code
                    )));
                }
                Some(EOF_HEADER) => {
                    if switched {
                        return Err(ReplicationError::Auth(
                            "server requested a second auth switch".into(),
                        ));
                    }
                    switched = true;
                    let mut r = WireReader::new(&ack[1..]);
                    let name = String::from_utf8_lossy(r.cstr()?).into_owned();
                    let data = r.rest();
                    let salt = match data.last() {
                        Some(0) => &data[..data.len() - 1],
                        _ => data,
                    };
                    self.plugin = AuthPlugin::from_name(&name)?;
                    tracing::debug!(plugin = %name, "auth switch requested");
                    let scramble = self.plugin.scramble(password, salt);
                    transport.write(&scramble).await?;
                }
                Some(AUTH_MORE_DATA) if self.plugin == AuthPlugin::CachingSha2Password => {
                    match ack.get(1).copied() {
                        // OK packet follows.
                        Some(FAST_AUTH_SUCCESS) => continue,
                        Some(PERFORM_FULL_AUTH) => {
                            return Err(ReplicationError::Auth(
                                "caching_sha2_password full authentication requires a secure \
                                 connection; warm the server's auth cache or use \
                                 mysql_native_password"
                                    .into(),
                            ));
                        }
                        other => {
                            return Err(ReplicationError::Auth(format!(
                                "unexpected caching_sha2_password status {other:?}"
                            )));
                        }
                    }
                }
                Some(other) => {
                    return Err(ReplicationError::Auth(format!(
                        "unexpected authentication response 0x{other:02x}"
                    )));
                }
                None => {
                    return Err(ReplicationError::Auth("empty authentication response".into()));
                }
            }
        }
    }
}
