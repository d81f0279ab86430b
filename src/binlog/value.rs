//! Column types and row value decoding.

use std::fmt;

use crate::error::{ReplicationError, Result};
use crate::protocol::buf::WireReader;

/// Column type tag as found in a TableMap event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float,
    Double,
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    Varchar,
    Bit,
    Timestamp2,
    DateTime2,
    Time2,
    Json,
    NewDecimal,
    Enum,
    Set,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob,
    VarString,
    String,
    Geometry,
    Unknown(u8),
}

impl ColumnType {
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => ColumnType::Unknown(other),
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            ColumnType::Decimal => 0,
            ColumnType::Tiny => 1,
            ColumnType::Short => 2,
            ColumnType::Long => 3,
            ColumnType::Float => 4,
            ColumnType::Double => 5,
            ColumnType::Null => 6,
            ColumnType::Timestamp => 7,
            ColumnType::LongLong => 8,
            ColumnType::Int24 => 9,
            ColumnType::Date => 10,
            ColumnType::Time => 11,
            ColumnType::DateTime => 12,
            ColumnType::Year => 13,
            ColumnType::NewDate => 14,
            ColumnType::Varchar => 15,
            ColumnType::Bit => 16,
            ColumnType::Timestamp2 => 17,
            ColumnType::DateTime2 => 18,
            ColumnType::Time2 => 19,
            ColumnType::Json => 245,
            ColumnType::NewDecimal => 246,
            ColumnType::Enum => 247,
            ColumnType::Set => 248,
            ColumnType::TinyBlob => 249,
            ColumnType::MediumBlob => 250,
            ColumnType::LongBlob => 251,
            ColumnType::Blob => 252,
            ColumnType::VarString => 253,
            ColumnType::String => 254,
            ColumnType::Geometry => 255,
            ColumnType::Unknown(t) => t,
        }
    }

    /// Number of metadata bytes this type occupies in a TableMap event.
    pub fn metadata_len(self) -> usize {
        match self {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::Blob
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Json
            | ColumnType::Geometry
            | ColumnType::Time2
            | ColumnType::DateTime2
            | ColumnType::Timestamp2 => 1,
            ColumnType::Varchar
            | ColumnType::VarString
            | ColumnType::Bit
            | ColumnType::NewDecimal
            | ColumnType::String
            | ColumnType::Enum
            | ColumnType::Set => 2,
            _ => 0,
        }
    }

    /// Read this type's metadata from a TableMap metadata block.
    ///
    /// Two-byte metadata is normalised so that [`decode_value`] never has to
    /// care about per-type byte order: VARCHAR and BIT are little-endian on the
    /// wire, NEWDECIMAL and STRING/ENUM/SET are `(high, low)` byte pairs.
    pub fn read_metadata(self, r: &mut WireReader<'_>) -> Result<u16> {
        Ok(match self {
            ColumnType::Varchar | ColumnType::VarString | ColumnType::Bit => r.u16_le()?,
            ColumnType::NewDecimal | ColumnType::String | ColumnType::Enum | ColumnType::Set => {
                let hi = r.u8()? as u16;
                let lo = r.u8()? as u16;
                (hi << 8) | lo
            }
            t if t.metadata_len() == 1 => r.u8()? as u16,
            _ => 0,
        })
    }
}

/// A decoded column value.
///
/// Integers are kept as raw bits plus their storage width: the binlog does
/// not say whether a column is signed, so the consumer picks
/// [`ColumnValue::as_i64`] or [`ColumnValue::as_u64`] from its own schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Integer { bits: u64, width: u8 },
    Float(f32),
    Double(f64),
    /// Exact decimal rendered as text, e.g. `-12.50`.
    Decimal(String),
    /// Strings, blobs and geometry; the charset is not known at this layer.
    Bytes(Vec<u8>),
    /// MySQL binary JSON, undecoded.
    Json(Vec<u8>),
    /// 1-based enum ordinal; 0 is the empty/invalid value.
    Enum(u16),
    /// Set membership bitmask.
    Set(u64),
    Bit(u64),
    Year(u16),
    Date {
        year: u16,
        month: u8,
        day: u8,
    },
    Time {
        negative: bool,
        hours: u32,
        minutes: u8,
        seconds: u8,
        micros: u32,
    },
    DateTime {
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
        micros: u32,
    },
    /// Seconds since the Unix epoch (UTC).
    Timestamp { seconds: u32, micros: u32 },
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Integer value sign-extended from its storage width.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            ColumnValue::Integer { bits, width } => {
                let shift = 64 - u32::from(width) * 8;
                Some(((bits << shift) as i64) >> shift)
            }
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            ColumnValue::Integer { bits, .. } => Some(bits),
            ColumnValue::Set(v) | ColumnValue::Bit(v) => Some(v),
            ColumnValue::Enum(v) => Some(u64::from(v)),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ColumnValue::Bytes(b) | ColumnValue::Json(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    /// String value, if the bytes are valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ColumnValue::Bytes(b) => std::str::from_utf8(b).ok(),
            ColumnValue::Decimal(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("NULL"),
            ColumnValue::Integer { .. } => match self.as_i64() {
                Some(v) => write!(f, "{v}"),
                None => Ok(()),
            },
            ColumnValue::Float(v) => write!(f, "{v}"),
            ColumnValue::Double(v) => write!(f, "{v}"),
            ColumnValue::Decimal(s) => f.write_str(s),
            ColumnValue::Bytes(b) | ColumnValue::Json(b) => {
                f.write_str(&String::from_utf8_lossy(b))
            }
            ColumnValue::Enum(v) => write!(f, "{v}"),
            ColumnValue::Set(v) | ColumnValue::Bit(v) => write!(f, "b'{v:b}'"),
            ColumnValue::Year(y) => write!(f, "{y:04}"),
            ColumnValue::Date { year, month, day } => write!(f, "{year:04}-{month:02}-{day:02}"),
            ColumnValue::Time {
                negative,
                hours,
                minutes,
                seconds,
                micros,
            } => {
                let sign = if *negative { "-" } else { "" };
                write!(f, "{sign}{hours:02}:{minutes:02}:{seconds:02}")?;
                if *micros > 0 {
                    write!(f, ".{micros:06}")?;
                }
                Ok(())
            }
            ColumnValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                micros,
            } => {
                write!(
                    f,
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                )?;
                if *micros > 0 {
                    write!(f, ".{micros:06}")?;
                }
                Ok(())
            }
            ColumnValue::Timestamp { seconds, micros } => {
                write!(f, "{seconds}")?;
                if *micros > 0 {
                    write!(f, ".{micros:06}")?;
                }
                Ok(())
            }
        }
    }
}

fn integer(r: &mut WireReader<'_>, width: u8) -> Result<ColumnValue> {
    Ok(ColumnValue::Integer {
        bits: r.uint_le(width as usize)?,
        width,
    })
}

/// Length prefix of `width` bytes followed by that many bytes.
fn prefixed<'a>(r: &mut WireReader<'a>, width: usize) -> Result<&'a [u8]> {
    if !(1..=4).contains(&width) {
        return Err(ReplicationError::protocol(format!(
            "invalid length-prefix width {width}"
        )));
    }
    let len = r.uint_le(width)? as usize;
    r.bytes(len)
}

/// Fractional seconds stored big-endian in `(fsp + 1) / 2` bytes, as micros.
fn fractional_micros(r: &mut WireReader<'_>, fsp: u16) -> Result<u32> {
    let v = match fsp {
        0 => 0,
        1 | 2 => r.uint_be(1)? * 10_000,
        3 | 4 => r.uint_be(2)? * 100,
        5 | 6 => r.uint_be(3)?,
        other => {
            return Err(ReplicationError::protocol(format!(
                "invalid fractional seconds precision {other}"
            )));
        }
    };
    Ok(v as u32)
}

const DIG_PER_WORD: usize = 9;
const DIG_TO_BYTES: [usize; 10] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

/// Packed DECIMAL: groups of nine digits in 4 big-endian bytes, leftover
/// digits in fewer bytes, sign in the inverted top bit, negatives stored
/// one's-complemented.
pub(crate) fn decode_decimal(r: &mut WireReader<'_>, precision: usize, scale: usize) -> Result<String> {
    if scale > precision {
        return Err(ReplicationError::protocol(format!(
            "decimal scale {scale} exceeds precision {precision}"
        )));
    }
    let int_digits = precision - scale;
    let int_words = int_digits / DIG_PER_WORD;
    let int_left = int_digits % DIG_PER_WORD;
    let frac_words = scale / DIG_PER_WORD;
    let frac_left = scale % DIG_PER_WORD;

    let size = DIG_TO_BYTES[int_left] + int_words * 4 + frac_words * 4 + DIG_TO_BYTES[frac_left];
    if size == 0 {
        return Ok("0".into());
    }
    let mut raw = r.bytes(size)?.to_vec();
    let negative = raw[0] & 0x80 == 0;
    raw[0] ^= 0x80;
    if negative {
        for b in raw.iter_mut() {
            *b = !*b;
        }
    }

    let mut d = WireReader::new(&raw);
    let mut int_part = String::new();
    if int_left > 0 {
        let v = d.uint_be(DIG_TO_BYTES[int_left])?;
        int_part.push_str(&v.to_string());
    }
    for _ in 0..int_words {
        let v = d.uint_be(4)?;
        int_part.push_str(&format!("{v:09}"));
    }
    let int_part = int_part.trim_start_matches('0');

    let mut out = String::with_capacity(precision + 2);
    if negative {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if scale > 0 {
        out.push('.');
        for _ in 0..frac_words {
            let v = d.uint_be(4)?;
            out.push_str(&format!("{v:09}"));
        }
        if frac_left > 0 {
            let v = d.uint_be(DIG_TO_BYTES[frac_left])?;
            out.push_str(&format!("{v:0width$}", width = frac_left));
        }
    }
    Ok(out)
}

fn decode_time2(r: &mut WireReader<'_>, fsp: u16) -> Result<ColumnValue> {
    const TIMEF_INT_OFS: i64 = 0x80_0000;
    const TIMEF_OFS: i64 = 0x8000_0000_0000;

    let packed: i64 = match fsp {
        0 => (r.uint_be(3)? as i64 - TIMEF_INT_OFS) << 24,
        1 | 2 => {
            let mut int_part = r.uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = r.uint_be(1)? as i64;
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x100;
            }
            (int_part << 24) + frac * 10_000
        }
        3 | 4 => {
            let mut int_part = r.uint_be(3)? as i64 - TIMEF_INT_OFS;
            let mut frac = r.uint_be(2)? as i64;
            if int_part < 0 && frac != 0 {
                int_part += 1;
                frac -= 0x1_0000;
            }
            (int_part << 24) + frac * 100
        }
        5 | 6 => r.uint_be(6)? as i64 - TIMEF_OFS,
        other => {
            return Err(ReplicationError::protocol(format!(
                "invalid TIME2 precision {other}"
            )));
        }
    };

    let negative = packed < 0;
    let abs = packed.unsigned_abs();
    let hms = abs >> 24;
    Ok(ColumnValue::Time {
        negative,
        hours: ((hms >> 12) & 0x3FF) as u32,
        minutes: ((hms >> 6) & 0x3F) as u8,
        seconds: (hms & 0x3F) as u8,
        micros: (abs & 0xFF_FFFF) as u32,
    })
}

fn decode_datetime2(r: &mut WireReader<'_>, fsp: u16) -> Result<ColumnValue> {
    const DATETIMEF_INT_OFS: u64 = 0x80_0000_0000;

    let int_part = r.uint_be(5)?.wrapping_sub(DATETIMEF_INT_OFS);
    let micros = fractional_micros(r, fsp)?;

    let ymd = int_part >> 17;
    let hms = int_part & 0x1_FFFF;
    let year_month = ymd >> 5;
    Ok(ColumnValue::DateTime {
        year: (year_month / 13) as u16,
        month: (year_month % 13) as u8,
        day: (ymd & 0x1F) as u8,
        hour: (hms >> 12) as u8,
        minute: ((hms >> 6) & 0x3F) as u8,
        second: (hms & 0x3F) as u8,
        micros,
    })
}

/// Decode one non-NULL value of `ty` with TableMap metadata `meta`.
pub fn decode_value(r: &mut WireReader<'_>, ty: ColumnType, meta: u16) -> Result<ColumnValue> {
    match ty {
        ColumnType::Tiny => integer(r, 1),
        ColumnType::Short => integer(r, 2),
        ColumnType::Int24 => integer(r, 3),
        ColumnType::Long => integer(r, 4),
        ColumnType::LongLong => integer(r, 8),
        ColumnType::Float => Ok(ColumnValue::Float(r.f32_le()?)),
        ColumnType::Double => Ok(ColumnValue::Double(r.f64_le()?)),
        ColumnType::NewDecimal => {
            let precision = (meta >> 8) as usize;
            let scale = (meta & 0xFF) as usize;
            Ok(ColumnValue::Decimal(decode_decimal(r, precision, scale)?))
        }
        ColumnType::Year => {
            let y = r.u8()? as u16;
            Ok(ColumnValue::Year(if y == 0 { 0 } else { y + 1900 }))
        }
        ColumnType::Date | ColumnType::NewDate => {
            let packed = r.u24_le()?;
            Ok(ColumnValue::Date {
                year: ((packed >> 9) & 0x7FFF) as u16,
                month: ((packed >> 5) & 0x0F) as u8,
                day: (packed & 0x1F) as u8,
            })
        }
        ColumnType::Time => {
            // HHMMSS as a signed 24-bit integer.
            let raw = r.u24_le()?;
            let signed = ((raw << 8) as i32) >> 8;
            let v = signed.unsigned_abs();
            Ok(ColumnValue::Time {
                negative: signed < 0,
                hours: v / 10_000,
                minutes: ((v / 100) % 100) as u8,
                seconds: (v % 100) as u8,
                micros: 0,
            })
        }
        ColumnType::DateTime => {
            // YYYYMMDDhhmmss as a decimal number.
            let v = r.u64_le()?;
            let date = v / 1_000_000;
            let time = v % 1_000_000;
            Ok(ColumnValue::DateTime {
                year: (date / 10_000) as u16,
                month: ((date / 100) % 100) as u8,
                day: (date % 100) as u8,
                hour: (time / 10_000) as u8,
                minute: ((time / 100) % 100) as u8,
                second: (time % 100) as u8,
                micros: 0,
            })
        }
        ColumnType::Timestamp => Ok(ColumnValue::Timestamp {
            seconds: r.u32_le()?,
            micros: 0,
        }),
        ColumnType::Timestamp2 => {
            let seconds = r.uint_be(4)? as u32;
            let micros = fractional_micros(r, meta)?;
            Ok(ColumnValue::Timestamp { seconds, micros })
        }
        ColumnType::DateTime2 => decode_datetime2(r, meta),
        ColumnType::Time2 => decode_time2(r, meta),
        ColumnType::Varchar | ColumnType::VarString => {
            let width = if meta < 256 { 1 } else { 2 };
            Ok(ColumnValue::Bytes(prefixed(r, width)?.to_vec()))
        }
        ColumnType::String | ColumnType::Enum | ColumnType::Set => {
            let (real, max_len) = string_real_type(ty, meta);
            match real {
                ColumnType::Enum => {
                    let width = (max_len as usize).clamp(1, 2);
                    Ok(ColumnValue::Enum(r.uint_le(width)? as u16))
                }
                ColumnType::Set => {
                    let width = (max_len as usize).clamp(1, 8);
                    Ok(ColumnValue::Set(r.uint_le(width)?))
                }
                _ => {
                    let width = if max_len < 256 { 1 } else { 2 };
                    Ok(ColumnValue::Bytes(prefixed(r, width)?.to_vec()))
                }
            }
        }
        ColumnType::Bit => {
            let nbits = (meta >> 8) as usize * 8 + (meta & 0xFF) as usize;
            let len = nbits.div_ceil(8);
            if len > 8 {
                return Err(ReplicationError::protocol(format!("BIT column of {nbits} bits")));
            }
            Ok(ColumnValue::Bit(if len == 0 { 0 } else { r.uint_be(len)? }))
        }
        ColumnType::Blob
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry => Ok(ColumnValue::Bytes(prefixed(r, meta as usize)?.to_vec())),
        ColumnType::Json => Ok(ColumnValue::Json(prefixed(r, meta as usize)?.to_vec())),
        ColumnType::Null => Ok(ColumnValue::Null),
        ColumnType::Decimal | ColumnType::Unknown(_) => Err(ReplicationError::protocol(format!(
            "cannot decode values of column type {}",
            ty.tag()
        ))),
    }
}

/// STRING columns carry their real type (ENUM, SET or STRING) in the high
/// metadata byte. Lengths above 255 borrow two bits of it.
fn string_real_type(ty: ColumnType, meta: u16) -> (ColumnType, u16) {
    let hi = (meta >> 8) as u8;
    let lo = meta & 0xFF;
    if ty != ColumnType::String || hi == 0 {
        return (ty, lo);
    }
    if hi & 0x30 != 0x30 {
        let max_len = ((((hi & 0x30) ^ 0x30) as u16) << 4) | lo;
        (ColumnType::from_u8(hi | 0x30), max_len)
    } else {
        (ColumnType::from_u8(hi), lo)
    }
}
