use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ReplicationError, Result};
use crate::protocol::buf::WireReader;
use crate::protocol::framing::PacketTransport;
use crate::protocol::messages::{is_eof, is_err, is_ok, parse_err_packet};

/// A text-protocol result set: column names and rows of nullable strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Value of `column` in the first row.
    pub fn first_value(&self, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.first()?.get(idx)?.as_deref()
    }
}

/// Column name from a ColumnDefinition41 packet.
fn parse_column_name(payload: &[u8]) -> Result<String> {
    let mut r = WireReader::new(payload);
    // catalog, schema, table, org_table
    for _ in 0..4 {
        r.lenenc_bytes()?;
    }
    let name = r
        .lenenc_bytes()?
        .ok_or_else(|| ReplicationError::protocol("NULL column name in column definition"))?;
    Ok(String::from_utf8_lossy(name).into_owned())
}

fn parse_text_row(payload: &[u8], columns: usize) -> Result<Vec<Option<String>>> {
    let mut r = WireReader::new(payload);
    (0..columns)
        .map(|_| {
            Ok(r
                .lenenc_bytes()?
                .map(|v| String::from_utf8_lossy(v).into_owned()))
        })
        .collect()
}

/// Read the rest of a COM_QUERY response whose first packet is `first`.
///
/// OK packets yield an empty result set; ERR packets become server errors.
pub async fn read_text_result_set<S>(
    transport: &mut PacketTransport<S>,
    first: Bytes,
) -> Result<ResultSet>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if is_ok(&first) {
        return Ok(ResultSet::default());
    }
    if is_err(&first) {
        return Err(parse_err_packet(&first)?.into_error());
    }

    let column_count = WireReader::new(&first)
        .lenenc_int()?
        .ok_or_else(|| ReplicationError::protocol("NULL column count in result set"))?;
    let column_count = usize::try_from(column_count)
        .map_err(|_| ReplicationError::protocol("column count too large"))?;

    let mut set = ResultSet {
        columns: Vec::with_capacity(column_count),
        rows: Vec::new(),
    };
    for _ in 0..column_count {
        let packet = transport.read().await?;
        set.columns.push(parse_column_name(&packet)?);
    }

    let mut packet = transport.read().await?;
    if is_eof(&packet) {
        packet = transport.read().await?;
    }
    loop {
        if is_eof(&packet) {
            return Ok(set);
        }
        if is_err(&packet) {
            return Err(parse_err_packet(&packet)?.into_error());
        }
        set.rows.push(parse_text_row(&packet, column_count)?);
        packet = transport.read().await?;
    }
}
