use bytes::{BufMut, Bytes, BytesMut};

pub const COM_QUERY: u8 = 0x03;
pub const COM_BINLOG_DUMP: u8 = 0x12;
pub const COM_REGISTER_SLAVE: u8 = 0x15;

/// Don't block waiting for more events once the end of the log is reached.
pub const BINLOG_DUMP_NON_BLOCK: u16 = 0x01;

pub fn encode_query(sql: &str) -> Bytes {
    let mut b = BytesMut::with_capacity(1 + sql.len());
    b.put_u8(COM_QUERY);
    b.put_slice(sql.as_bytes());
    b.freeze()
}

/// COM_REGISTER_SLAVE announcing `server_id`. Hostname, user, password and
/// port are left empty: the source fills them from the connection.
pub fn encode_register_replica(server_id: u32) -> Bytes {
    let mut b = BytesMut::with_capacity(18);
    b.put_u8(COM_REGISTER_SLAVE);
    b.put_u32_le(server_id);
    b.put_u8(0); // hostname
    b.put_u8(0); // user
    b.put_u8(0); // password
    b.put_u16_le(0); // port
    b.put_u32_le(0); // replication rank
    b.put_u32_le(0); // master id
    b.freeze()
}

/// COM_BINLOG_DUMP starting at `file:offset`.
///
/// The wire field is 4 bytes; offsets past `u32::MAX` are a server-side
/// impossibility for this command and are clamped.
pub fn encode_binlog_dump(server_id: u32, file: &str, offset: u64, flags: u16) -> Bytes {
    let mut b = BytesMut::with_capacity(11 + file.len());
    b.put_u8(COM_BINLOG_DUMP);
    b.put_u32_le(u32::try_from(offset).unwrap_or(u32::MAX));
    b.put_u16_le(flags);
    b.put_u32_le(server_id);
    b.put_slice(file.as_bytes());
    b.freeze()
}
