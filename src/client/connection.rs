use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::binlog::ChecksumAlgorithm;
use crate::config::ReplicationConfig;
use crate::error::{ReplicationError, Result};
use crate::position::LogPosition;
use crate::protocol::command::{encode_binlog_dump, encode_query, encode_register_replica};
use crate::protocol::framing::PacketTransport;
use crate::protocol::handshake::{Greeting, HandshakeAuthenticator};
use crate::protocol::messages::{OkPacket, expect_ok};
use crate::protocol::resultset::{ResultSet, read_text_result_set};

/// Every binlog file starts with a 4-byte magic; events begin after it.
const BINLOG_FIRST_EVENT: u64 = 4;

/// MySQL's ER_PARSE_ERROR, returned by 8.4+ for `SHOW MASTER STATUS`.
const ER_PARSE_ERROR: u16 = 1064;

/// An authenticated client connection to the source.
pub struct SourceConnection<S = TcpStream> {
    transport: PacketTransport<S>,
    greeting: Greeting,
}

impl SourceConnection<TcpStream> {
    pub async fn connect(config: &ReplicationConfig) -> Result<Self> {
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        tcp.set_nodelay(true)?;
        Self::handshake(tcp, &config.user, &config.password).await
    }
}

impl<S> SourceConnection<S> {
    pub(crate) fn from_parts(transport: PacketTransport<S>, greeting: Greeting) -> Self {
        Self {
            transport,
            greeting,
        }
    }

    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> SourceConnection<S> {
    /// Authenticate over an already-connected stream.
    pub async fn handshake(stream: S, user: &str, password: &str) -> Result<Self> {
        let mut transport = PacketTransport::new(stream);
        let mut auth = HandshakeAuthenticator::read_greeting(&mut transport).await?;
        auth.authenticate(&mut transport, user, password).await?;
        debug!(user, "authenticated");
        Ok(Self::from_parts(transport, auth.into_greeting()))
    }

    pub async fn query(&mut self, sql: &str) -> Result<ResultSet> {
        self.transport.write_command(&encode_query(sql)).await?;
        let first = self.transport.read().await?;
        read_text_result_set(&mut self.transport, first).await
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&mut self, sql: &str) -> Result<OkPacket> {
        self.transport.write_command(&encode_query(sql)).await?;
        let response = self.transport.read().await?;
        expect_ok(&response, sql)
    }

    /// Current end of the source's binary log.
    pub async fn master_status(&mut self) -> Result<LogPosition> {
        let rs = match self.query("SHOW MASTER STATUS").await {
            Err(ReplicationError::Server {
                code: ER_PARSE_ERROR,
                ..
            }) => self.query("SHOW BINARY LOG STATUS").await?,
            other => other?,
        };
        let file = rs.first_value("File").ok_or_else(|| {
            ReplicationError::Config("binary logging is disabled on the source".into())
        })?;
        let offset = rs
            .first_value("Position")
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(|| ReplicationError::protocol("missing or invalid binlog Position"))?;
        Ok(LogPosition::new(file, offset))
    }

    /// Find out whether the source checksums its binlog and, if it does, tell
    /// it this replica understands the checksums.
    pub async fn negotiate_checksum(&mut self) -> Result<ChecksumAlgorithm> {
        let rs = self
            .query("SHOW GLOBAL VARIABLES LIKE 'BINLOG_CHECKSUM'")
            .await?;
        let value = match rs.first_value("Value") {
            Some(v) if !v.is_empty() => v.to_string(),
            _ => {
                debug!("source predates binlog checksums");
                return Ok(ChecksumAlgorithm::Off);
            }
        };
        self.execute("SET @master_binlog_checksum = @@global.binlog_checksum")
            .await?;
        let algorithm = ChecksumAlgorithm::from_variable(&value);
        debug!(?algorithm, "binlog checksum negotiated");
        Ok(algorithm)
    }

    /// Ask the source to send a heartbeat after `period` without events.
    pub async fn request_heartbeat(&mut self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Ok(());
        }
        let nanos = period.as_nanos();
        self.execute(&format!("SET @master_heartbeat_period = {nanos}"))
            .await?;
        Ok(())
    }

    pub async fn register_replica(&mut self, server_id: u32) -> Result<()> {
        self.transport
            .write_command(&encode_register_replica(server_id))
            .await?;
        let response = self.transport.read().await?;
        expect_ok(&response, "COM_REGISTER_SLAVE")?;
        Ok(())
    }

    /// Send `COM_BINLOG_DUMP` and hand back the transport the events arrive on.
    pub async fn start_dump(
        mut self,
        server_id: u32,
        position: &LogPosition,
    ) -> Result<PacketTransport<S>> {
        let offset = position.offset.max(BINLOG_FIRST_EVENT);
        self.transport
            .write_command(&encode_binlog_dump(server_id, &position.file, offset, 0))
            .await?;
        info!(file = %position.file, offset, server_id, "binlog dump started");
        Ok(self.transport)
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::protocol::handshake::test_support::greeting_payload;
    use crate::protocol::resultset::test_support::{EOF, column_def, text_row};

    const OK: [u8; 7] = [0, 0, 0, 2, 0, 0, 0];

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = (payload.len() as u32).to_le_bytes()[..3].to_vec();
        v.push(seq);
        v.extend_from_slice(payload);
        v
    }

    async fn read_packet(s: &mut DuplexStream) -> Vec<u8> {
        let mut hdr = [0u8; 4];
        s.read_exact(&mut hdr).await.unwrap();
        let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], 0]) as usize;
        let mut p = vec![0u8; len];
        s.read_exact(&mut p).await.unwrap();
        p
    }

    async fn write_result(s: &mut DuplexStream, columns: &[&str], rows: &[&[Option<&str>]]) {
        let mut packets = vec![vec![columns.len() as u8]];
        packets.extend(columns.iter().map(|c| column_def(c)));
        packets.push(EOF.to_vec());
        packets.extend(rows.iter().map(|r| text_row(r)));
        packets.push(EOF.to_vec());
        let mut wire = Vec::new();
        for (i, p) in packets.iter().enumerate() {
            wire.extend(frame(i as u8 + 1, p));
        }
        s.write_all(&wire).await.unwrap();
    }

    async fn connected() -> (SourceConnection<DuplexStream>, DuplexStream) {
        let (client, mut server) = tokio::io::duplex(16 * 1024);
        server
            .write_all(&frame(0, &greeting_payload("mysql_native_password")))
            .await
            .unwrap();
        let srv = tokio::spawn(async move {
            read_packet(&mut server).await;
            server.write_all(&frame(2, &OK)).await.unwrap();
            server
        });
        let conn = SourceConnection::handshake(client, "repl", "secret")
            .await
            .unwrap();
        (conn, srv.await.unwrap())
    }

    #[tokio::test]
    async fn bootstrap_sequence() {
        let (mut conn, mut server) = connected().await;
        assert_eq!(conn.greeting().server_version, "8.0.36");

        let srv = tokio::spawn(async move {
            let mut seen = Vec::new();

            seen.push(read_packet(&mut server).await);
            write_result(
                &mut server,
                &["Variable_name", "Value"],
                &[&[Some("binlog_checksum"), Some("CRC32")]],
            )
            .await;

            seen.push(read_packet(&mut server).await);
            server.write_all(&frame(1, &OK)).await.unwrap();

            seen.push(read_packet(&mut server).await);
            server.write_all(&frame(1, &OK)).await.unwrap();

            seen.push(read_packet(&mut server).await);
            server.write_all(&frame(1, &OK)).await.unwrap();

            seen.push(read_packet(&mut server).await);
            write_result(
                &mut server,
                &["File", "Position", "Binlog_Do_DB"],
                &[&[Some("mysql-bin.000004"), Some("1570"), Some("")]],
            )
            .await;

            seen.push(read_packet(&mut server).await);
            seen
        });

        assert_eq!(
            conn.negotiate_checksum().await.unwrap(),
            ChecksumAlgorithm::Crc32
        );
        conn.request_heartbeat(Duration::from_secs(5)).await.unwrap();
        conn.register_replica(4242).await.unwrap();
        let pos = conn.master_status().await.unwrap();
        assert_eq!(pos, LogPosition::new("mysql-bin.000004", 1570));
        let _transport = conn.start_dump(4242, &pos).await.unwrap();

        let seen = srv.await.unwrap();
        let text = |p: &Vec<u8>| String::from_utf8_lossy(&p[1..]).into_owned();
        assert_eq!(text(&seen[0]), "SHOW GLOBAL VARIABLES LIKE 'BINLOG_CHECKSUM'");
        assert_eq!(
            text(&seen[1]),
            "SET @master_binlog_checksum = @@global.binlog_checksum"
        );
        assert_eq!(text(&seen[2]), "SET @master_heartbeat_period = 5000000000");
        assert_eq!(seen[3][0], 0x15);
        assert_eq!(&seen[3][1..5], &4242u32.to_le_bytes());
        assert_eq!(text(&seen[4]), "SHOW MASTER STATUS");
        assert_eq!(seen[5][0], 0x12);
        assert_eq!(&seen[5][1..5], &1570u32.to_le_bytes());
        assert_eq!(&seen[5][11..], b"mysql-bin.000004");
    }

    #[tokio::test]
    async fn no_checksum_variable_means_off() {
        let (mut conn, mut server) = connected().await;
        let srv = tokio::spawn(async move {
            read_packet(&mut server).await;
            write_result(&mut server, &["Variable_name", "Value"], &[]).await;
        });
        assert_eq!(
            conn.negotiate_checksum().await.unwrap(),
            ChecksumAlgorithm::Off
        );
        srv.await.unwrap();
    }

    #[tokio::test]
    async fn empty_master_status_is_config_error() {
        let (mut conn, mut server) = connected().await;
        let srv = tokio::spawn(async move {
            read_packet(&mut server).await;
            write_result(&mut server, &["File", "Position"], &[]).await;
        });
        assert!(conn.master_status().await.unwrap_err().is_config());
        srv.await.unwrap();
    }

    #[tokio::test]
    async fn start_dump_skips_file_magic() {
        let (conn, mut server) = connected().await;
        let _t = conn
            .start_dump(7, &LogPosition::new("mysql-bin.000001", 0))
            .await
            .unwrap();
        let dump = read_packet(&mut server).await;
        assert_eq!(&dump[1..5], &4u32.to_le_bytes());
    }
}
