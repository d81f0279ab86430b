use crate::error::{ReplicationError, Result};
use crate::protocol::buf::WireReader;

pub const OK_HEADER: u8 = 0x00;
pub const EOF_HEADER: u8 = 0xFE;
pub const ERR_HEADER: u8 = 0xFF;

/// Decoded ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: Option<String>,
    pub message: String,
}

impl ErrPacket {
    pub fn into_error(self) -> ReplicationError {
        let message = match self.sql_state {
            Some(state) => format!("{} (SQLSTATE {state})", self.message),
            None => self.message,
        };
        ReplicationError::Server {
            code: self.code,
            message,
        }
    }
}

/// Decoded OK packet. Only the fields this crate ever looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

pub fn is_ok(payload: &[u8]) -> bool {
    payload.first() == Some(&OK_HEADER)
}

pub fn is_err(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// EOF packets start with 0xFE and are shorter than 9 bytes; longer 0xFE
/// packets are length-encoded integers or auth-switch requests.
pub fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

pub fn parse_err_packet(payload: &[u8]) -> Result<ErrPacket> {
    let mut r = WireReader::new(payload);
    let header = r.u8()?;
    if header != ERR_HEADER {
        return Err(ReplicationError::protocol(format!(
            "expected ERR packet, got header 0x{header:02x}"
        )));
    }
    let code = r.u16_le()?;
    let sql_state = if r.remaining() >= 6 && payload[3] == b'#' {
        r.skip(1)?;
        Some(String::from_utf8_lossy(r.bytes(5)?).into_owned())
    } else {
        None
    };
    let message = String::from_utf8_lossy(r.rest()).into_owned();
    Ok(ErrPacket {
        code,
        sql_state,
        message,
    })
}

pub fn parse_ok_packet(payload: &[u8]) -> Result<OkPacket> {
    let mut r = WireReader::new(payload);
    let header = r.u8()?;
    if header != OK_HEADER && header != EOF_HEADER {
        return Err(ReplicationError::protocol(format!(
            "expected OK packet, got header 0x{header:02x}"
        )));
    }
    let affected_rows = r.lenenc_int()?.unwrap_or(0);
    let last_insert_id = r.lenenc_int()?.unwrap_or(0);
    let (status_flags, warnings) = if r.remaining() >= 4 {
        (r.u16_le()?, r.u16_le()?)
    } else {
        (0, 0)
    };
    Ok(OkPacket {
        affected_rows,
        last_insert_id,
        status_flags,
        warnings,
    })
}

/// Turn an OK/ERR response into a result. Anything else is a protocol error.
pub fn expect_ok(payload: &[u8], context: &str) -> Result<OkPacket> {
    match payload.first() {
        Some(&OK_HEADER) => parse_ok_packet(payload),
        Some(&ERR_HEADER) => Err(parse_err_packet(payload)?.into_error()),
        Some(other) => Err(ReplicationError::protocol(format!(
            "unexpected response 0x{other:02x} to {context}"
        ))),
        None => Err(ReplicationError::protocol(format!(
            "empty response to {context}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_packet_with_sql_state() {
        let mut payload = vec![0xFF, 0x15, 0x04, b'#'];
        payload.extend_from_slice(b"28000");
        payload.extend_from_slice(b"Access denied");
        let err = parse_err_packet(&payload).unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.sql_state.as_deref(), Some("28000"));
        assert_eq!(err.message, "Access denied");

        let e = err.into_error();
        assert_eq!(e.to_string(), "server error 1045: Access denied (SQLSTATE 28000)");
    }

    #[test]
    fn err_packet_without_sql_state() {
        let payload = [0xFF, 0x01, 0x00, b'o', b'o', b'p', b's'];
        let err = parse_err_packet(&payload).unwrap();
        assert_eq!(err.code, 1);
        assert!(err.sql_state.is_none());
        assert_eq!(err.message, "oops");
    }

    #[test]
    fn ok_packet_fields() {
        let payload = [0x00, 0x02, 0x00, 0x02, 0x00, 0x01, 0x00];
        let ok = parse_ok_packet(&payload).unwrap();
        assert_eq!(ok.affected_rows, 2);
        assert_eq!(ok.status_flags, 2);
        assert_eq!(ok.warnings, 1);
    }

    #[test]
    fn expect_ok_maps_err_to_server_error() {
        let payload = [0xFF, 0x01, 0x00, b'x'];
        let e = expect_ok(&payload, "COM_QUERY").unwrap_err();
        assert!(matches!(e, ReplicationError::Server { code: 1, .. }));

        let e = expect_ok(&[0x42], "COM_QUERY").unwrap_err();
        assert!(e.is_protocol());
    }

    #[test]
    fn eof_detection() {
        assert!(is_eof(&[0xFE, 0, 0, 2, 0]));
        assert!(!is_eof(&[0xFE, 1, 2, 3, 4, 5, 6, 7, 8]));
        assert!(is_ok(&[0x00]));
        assert!(is_err(&[0xFF]));
    }
}
