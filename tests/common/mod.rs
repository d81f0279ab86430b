//! A scripted MySQL source speaking just enough of the protocol to bootstrap a
//! replica and stream binlog events to it.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

pub const QUERY_EVENT: u8 = 2;
pub const ROTATE_EVENT: u8 = 4;
pub const XID_EVENT: u8 = 16;
pub const TABLE_MAP_EVENT: u8 = 19;
pub const WRITE_ROWS_V2: u8 = 30;
pub const UPDATE_ROWS_V2: u8 = 31;

const OK: [u8; 7] = [0, 0, 0, 2, 0, 0, 0];
const EOF: [u8; 5] = [0xFE, 0, 0, 2, 0];
const ARTIFICIAL: u16 = 0x20;

pub fn init_tracing() {
    // RUST_LOG=info,mysqlwire_replication=debug cargo test ...
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

fn lenenc_str(out: &mut Vec<u8>, s: &str) {
    out.push(s.len() as u8);
    out.extend_from_slice(s.as_bytes());
}

/// Protocol 10 greeting advertising `mysql_native_password`.
fn greeting() -> Vec<u8> {
    let caps: u32 = 0x0000_0001 | 0x0000_0004 | 0x0000_0200 | 0x0000_2000 | 0x0000_8000 | 0x0008_0000;
    let salt = b"0123456789abcdefghij";
    let mut b = vec![10];
    b.extend_from_slice(b"8.0.36\0");
    b.extend_from_slice(&7u32.to_le_bytes());
    b.extend_from_slice(&salt[..8]);
    b.push(0);
    b.extend_from_slice(&(caps as u16).to_le_bytes());
    b.push(255);
    b.extend_from_slice(&2u16.to_le_bytes());
    b.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
    b.push(21);
    b.extend_from_slice(&[0u8; 10]);
    b.extend_from_slice(&salt[8..]);
    b.push(0);
    b.extend_from_slice(b"mysql_native_password\0");
    b
}

fn column_def(name: &str) -> Vec<u8> {
    let mut b = Vec::new();
    for part in ["def", "", "", "", name, name] {
        lenenc_str(&mut b, part);
    }
    b.push(0x0C);
    b.extend_from_slice(&33u16.to_le_bytes());
    b.extend_from_slice(&255u32.to_le_bytes());
    b.push(0xFD);
    b.extend_from_slice(&[0, 0, 0, 0, 0]);
    b
}

/// Server side of a duplex stream. Tracks the packet sequence per command.
pub struct FakeSource {
    stream: DuplexStream,
    seq: u8,
}

impl FakeSource {
    pub fn new(stream: DuplexStream) -> Self {
        Self { stream, seq: 0 }
    }

    async fn send(&mut self, payload: &[u8]) {
        let mut frame = (payload.len() as u32).to_le_bytes()[..3].to_vec();
        frame.push(self.seq);
        frame.extend_from_slice(payload);
        self.seq = self.seq.wrapping_add(1);
        self.stream.write_all(&frame).await.unwrap();
    }

    /// Read one client packet and continue the sequence after it.
    pub async fn recv(&mut self) -> Vec<u8> {
        let mut hdr = [0u8; 4];
        self.stream.read_exact(&mut hdr).await.unwrap();
        let len = u32::from_le_bytes([hdr[0], hdr[1], hdr[2], 0]) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        self.seq = hdr[3].wrapping_add(1);
        payload
    }

    /// Read a `COM_QUERY` and return its text.
    pub async fn recv_query(&mut self) -> String {
        let p = self.recv().await;
        assert_eq!(p[0], 0x03, "expected COM_QUERY");
        String::from_utf8_lossy(&p[1..]).into_owned()
    }

    pub async fn accept_login(&mut self) {
        self.send(&greeting()).await;
        self.recv().await;
        self.send(&OK).await;
    }

    pub async fn ok(&mut self) {
        self.send(&OK).await;
    }

    pub async fn result_set(&mut self, columns: &[&str], rows: &[&[&str]]) {
        self.send(&[columns.len() as u8]).await;
        for c in columns {
            self.send(&column_def(c)).await;
        }
        self.send(&EOF).await;
        for row in rows {
            let mut b = Vec::new();
            for v in *row {
                lenenc_str(&mut b, v);
            }
            self.send(&b).await;
        }
        self.send(&EOF).await;
    }

    /// Answer the bootstrap a replica with a fixed start position performs:
    /// checksum query (no checksums), heartbeat period, registration.
    /// Returns the `COM_BINLOG_DUMP` payload.
    pub async fn bootstrap(&mut self) -> Vec<u8> {
        self.accept_login().await;
        let q = self.recv_query().await;
        assert_eq!(q, "SHOW GLOBAL VARIABLES LIKE 'BINLOG_CHECKSUM'");
        self.result_set(&["Variable_name", "Value"], &[]).await;
        let q = self.recv_query().await;
        assert!(q.starts_with("SET @master_heartbeat_period"), "{q}");
        self.ok().await;
        let register = self.recv().await;
        assert_eq!(register[0], 0x15, "expected COM_REGISTER_SLAVE");
        self.ok().await;
        let dump = self.recv().await;
        assert_eq!(dump[0], 0x12, "expected COM_BINLOG_DUMP");
        dump
    }

    pub async fn event(&mut self, event: &[u8]) {
        self.send(event).await;
    }

    /// Keep the connection open until the client goes away.
    pub async fn hold(mut self) {
        let mut sink = [0u8; 64];
        loop {
            match tokio::time::timeout(Duration::from_secs(30), self.stream.read(&mut sink)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return,
                Ok(Ok(_)) => {}
            }
        }
    }
}

/// Builds event packets with realistic, advancing log offsets.
pub struct Binlog {
    pub file: String,
    pub offset: u32,
}

impl Binlog {
    pub fn new(file: &str, offset: u32) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    fn raw(type_code: u8, next_position: u32, flags: u16, body: &[u8]) -> Vec<u8> {
        let size = (19 + body.len()) as u32;
        let mut b = vec![0u8];
        b.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        b.push(type_code);
        b.extend_from_slice(&1u32.to_le_bytes());
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&next_position.to_le_bytes());
        b.extend_from_slice(&flags.to_le_bytes());
        b.extend_from_slice(body);
        b
    }

    /// The artificial rotate the dump thread sends first.
    pub fn artificial_rotate(&self) -> Vec<u8> {
        let mut body = u64::from(self.offset).to_le_bytes().to_vec();
        body.extend_from_slice(self.file.as_bytes());
        Self::raw(ROTATE_EVENT, 0, ARTIFICIAL, &body)
    }

    /// Append an event; returns `(start, end, packet)`.
    pub fn append(&mut self, type_code: u8, body: &[u8]) -> (u32, u32, Vec<u8>) {
        let start = self.offset;
        let end = start + 19 + body.len() as u32;
        self.offset = end;
        (start, end, Self::raw(type_code, end, 0, body))
    }
}

pub fn table_map_body(table_id: u64, schema: &str, table: &str) -> Vec<u8> {
    // (id INT, name VARCHAR(40))
    let types = [3u8, 15];
    let meta = [40u8, 0];
    let mut b = table_id.to_le_bytes()[..6].to_vec();
    b.extend_from_slice(&1u16.to_le_bytes());
    b.push(schema.len() as u8);
    b.extend_from_slice(schema.as_bytes());
    b.push(0);
    b.push(table.len() as u8);
    b.extend_from_slice(table.as_bytes());
    b.push(0);
    b.push(types.len() as u8);
    b.extend_from_slice(&types);
    b.push(meta.len() as u8);
    b.extend_from_slice(&meta);
    b.push(0xFF);
    b
}

/// WRITE_ROWS v2 body with one `(id, name)` row per entry.
pub fn insert_body(table_id: u64, rows: &[(i32, &str)]) -> Vec<u8> {
    let mut b = table_id.to_le_bytes()[..6].to_vec();
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&2u16.to_le_bytes());
    b.push(2);
    b.push(0xFF);
    for (id, name) in rows {
        b.push(0);
        b.extend_from_slice(&id.to_le_bytes());
        b.push(name.len() as u8);
        b.extend_from_slice(name.as_bytes());
    }
    b
}

pub fn xid_body(xid: u64) -> Vec<u8> {
    xid.to_le_bytes().to_vec()
}

pub fn query_body(schema: &str, sql: &str) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&9u32.to_le_bytes());
    b.extend_from_slice(&0u32.to_le_bytes());
    b.push(schema.len() as u8);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(schema.as_bytes());
    b.push(0);
    b.extend_from_slice(sql.as_bytes());
    b
}
