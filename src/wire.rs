//! Decoding of PostgreSQL binary-format column values.
//!
//! Rows are fetched in the binary protocol format. Every column is turned
//! into a [`Value`] straight from its wire bytes, which keeps values that
//! have no faithful Rust counterpart intact: numerics of any precision and
//! `NaN`, `infinity` timestamps and dates, and arrays of any dimension.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use ordered_float::OrderedFloat;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::PgInterval;
use uuid::Uuid;

use crate::types::ColumnKind;
use crate::value::Value;

type DecodeResult<T> = std::result::Result<T, BoxDynError>;

// Microseconds between the Unix epoch and 2000-01-01, the PostgreSQL epoch.
const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// Decode one non-null binary value of the given kind.
pub fn decode(kind: ColumnKind, bytes: &[u8]) -> DecodeResult<Value> {
    let mut buf = Reader::new(bytes);

    let value = match kind {
        ColumnKind::Bool => Value::Bool(buf.u8()? != 0),
        ColumnKind::Int2 => Value::Int(buf.i16()?.into()),
        ColumnKind::Int4 => Value::Int(buf.i32()?.into()),
        ColumnKind::Int8 => Value::Int(buf.i64()?),
        ColumnKind::Oid => Value::Int(buf.u32()?.into()),
        ColumnKind::Float4 => Value::Float(OrderedFloat::from(f64::from(f32::from_bits(buf.u32()?)))),
        ColumnKind::Float8 => Value::Float(OrderedFloat::from(f64::from_bits(buf.u64()?))),
        ColumnKind::Numeric => Value::Numeric(numeric(&mut buf)?),
        ColumnKind::Money => Value::Numeric(money(buf.i64()?)),
        ColumnKind::Text => Value::Text(utf8(buf.rest())?.to_owned()),
        ColumnKind::Bytea => Value::Bytes(buf.rest().to_vec()),
        ColumnKind::Uuid => Value::Uuid(Uuid::from_slice(buf.take(16)?)?),
        ColumnKind::Json => Value::Json(serde_json::from_slice(buf.rest())?),
        ColumnKind::Jsonb => {
            let version = buf.u8()?;
            if version != 1 {
                return Err(format!("unsupported jsonb version {}", version).into());
            }
            Value::Json(serde_json::from_slice(buf.rest())?)
        }
        ColumnKind::Timestamp => match buf.i64()? {
            i64::MAX => Value::Text("infinity".into()),
            i64::MIN => Value::Text("-infinity".into()),
            micros => Value::LocalTimestamp(timestamp(micros)?.naive_utc()),
        },
        ColumnKind::Timestamptz => match buf.i64()? {
            i64::MAX => Value::Text("infinity".into()),
            i64::MIN => Value::Text("-infinity".into()),
            micros => Value::Timestamp(timestamp(micros)?),
        },
        ColumnKind::Date => match buf.i32()? {
            i32::MAX => Value::Text("infinity".into()),
            i32::MIN => Value::Text("-infinity".into()),
            days => Value::Date(date(days)?),
        },
        ColumnKind::Time => {
            let micros = buf.i64()?;
            match time(micros) {
                Some(t) => Value::Time(t),
                None => Value::Text(time_text(micros)),
            }
        }
        ColumnKind::Timetz => {
            let micros = buf.i64()?;
            // Stored as seconds west of UTC
            let offset = buf.i32()?.wrapping_neg();
            Value::Text(format!("{}{}", time_text(micros), utc_offset(offset)))
        }
        ColumnKind::Interval => {
            let interval = PgInterval {
                microseconds: buf.i64()?,
                days: buf.i32()?,
                months: buf.i32()?,
            };
            Value::Text(format_interval(&interval))
        }
        ColumnKind::Inet => Value::Text(inet(&mut buf)?),
        ColumnKind::Macaddr => {
            let octets: Vec<String> = buf.take(6)?.iter().map(|b| format!("{:02x}", b)).collect();
            Value::Text(octets.join(":"))
        }
        ColumnKind::Array => array(&mut buf)?,
        ColumnKind::Other => other(bytes),
    };

    Ok(value)
}

/// Types without a dedicated kind: enums, `xml`, `citext` and similar send
/// their text; anything else is passed on as raw bytes.
fn other(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(text) if is_printable(text) => Value::Text(text.to_owned()),
        _ => Value::Bytes(bytes.to_vec()),
    }
}

fn is_printable(text: &str) -> bool {
    !text.chars().any(|c| c.is_control() && !c.is_whitespace())
}

fn utf8(bytes: &[u8]) -> DecodeResult<&str> {
    Ok(std::str::from_utf8(bytes)?)
}

/// Render a binary `numeric` exactly, in PostgreSQL's own text form.
///
/// The value is `ndigits` base-10000 digits, the first of which is scaled by
/// `10000^weight`, printed with `dscale` fractional decimal digits.
fn numeric(buf: &mut Reader<'_>) -> DecodeResult<String> {
    let ndigits = usize::try_from(buf.i16()?).map_err(|_| "negative numeric digit count")?;
    let weight = i32::from(buf.i16()?);
    let sign = buf.u16()?;
    let dscale = usize::from(buf.u16()?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".into()),
        NUMERIC_PINF => return Ok("Infinity".into()),
        NUMERIC_NINF => return Ok("-Infinity".into()),
        0 | NUMERIC_NEG => {}
        other => return Err(format!("invalid numeric sign 0x{:04x}", other).into()),
    }

    let mut digits = Vec::with_capacity(ndigits);
    for _ in 0..ndigits {
        let digit = buf.i16()?;
        if !(0..10_000).contains(&digit) {
            return Err(format!("invalid numeric digit {}", digit).into());
        }
        digits.push(digit);
    }
    let digit_at = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit_at(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit_at(i)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

/// `money` is a count of cents; the server's default locale uses two
/// fractional digits.
fn money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

fn timestamp(micros: i64) -> DecodeResult<DateTime<chrono::Utc>> {
    micros
        .checked_add(PG_EPOCH_MICROS)
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| format!("timestamp out of range: {}", micros).into())
}

fn date(days: i32) -> DecodeResult<NaiveDate> {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|epoch| epoch.checked_add_signed(TimeDelta::days(days.into())))
        .ok_or_else(|| format!("date out of range: {}", days).into())
}

fn time(micros: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(micros.div_euclid(1_000_000)).ok()?;
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

/// `HH:MM:SS[.ffffff]`, allowing the `24:00:00` that `time` accepts.
fn time_text(micros: i64) -> String {
    let secs = micros / 1_000_000;
    let frac = micros % 1_000_000;
    let base = format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60);
    if frac == 0 {
        base
    } else {
        let s = format!("{}.{:06}", base, frac);
        s.trim_end_matches('0').to_string()
    }
}

fn utc_offset(seconds: i32) -> String {
    let sign = if seconds < 0 { '-' } else { '+' };
    let seconds = seconds.unsigned_abs();
    let (h, m, s) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    match (m, s) {
        (0, 0) => format!("{}{:02}", sign, h),
        (_, 0) => format!("{}{:02}:{:02}", sign, h, m),
        _ => format!("{}{:02}:{:02}:{:02}", sign, h, m, s),
    }
}

/// Render an interval as an ISO-8601 duration, e.g. `P1M2DT3.5S`.
fn format_interval(interval: &PgInterval) -> String {
    let whole = interval.microseconds / 1_000_000;
    let frac = (interval.microseconds % 1_000_000).unsigned_abs();
    let sign = if interval.microseconds < 0 && whole == 0 { "-" } else { "" };

    let seconds = if frac == 0 {
        format!("{}{}", sign, whole)
    } else {
        let s = format!("{}{}.{:06}", sign, whole, frac);
        s.trim_end_matches('0').to_string()
    };

    format!("P{}M{}DT{}S", interval.months, interval.days, seconds)
}

/// `inet` and `cidr` share a layout: family, prefix bits, cidr flag and the
/// address bytes. `inet` omits a full-length prefix the way `psql` does.
fn inet(buf: &mut Reader<'_>) -> DecodeResult<String> {
    let family = buf.u8()?;
    let bits = buf.u8()?;
    let is_cidr = buf.u8()? != 0;
    let len = usize::from(buf.u8()?);
    let addr = buf.take(len)?;

    let (ip, max_bits) = match family {
        PGSQL_AF_INET => {
            let octets: [u8; 4] = addr.try_into().map_err(|_| "bad inet address length")?;
            (IpAddr::V4(Ipv4Addr::from(octets)), 32)
        }
        PGSQL_AF_INET6 => {
            let octets: [u8; 16] = addr.try_into().map_err(|_| "bad inet6 address length")?;
            (IpAddr::V6(Ipv6Addr::from(octets)), 128)
        }
        other => return Err(format!("unknown inet family {}", other).into()),
    };

    if is_cidr || bits != max_bits {
        Ok(format!("{}/{}", ip, bits))
    } else {
        Ok(ip.to_string())
    }
}

/// Decode an array of any dimension into nested [`Value::Array`]s.
///
/// Element kinds are resolved from the element type OID in the array header.
fn array(buf: &mut Reader<'_>) -> DecodeResult<Value> {
    let ndim = usize::try_from(buf.i32()?).map_err(|_| "negative array dimension count")?;
    let _has_nulls = buf.i32()?;
    let element = ColumnKind::from_oid(buf.u32()?);

    let mut dims = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        let len = usize::try_from(buf.i32()?).map_err(|_| "negative array length")?;
        let _lower_bound = buf.i32()?;
        dims.push(len);
    }

    if dims.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    array_dim(buf, element, &dims)
}

fn array_dim(buf: &mut Reader<'_>, element: ColumnKind, dims: &[usize]) -> DecodeResult<Value> {
    let (len, inner) = match dims.split_first() {
        Some(split) => split,
        None => return Ok(Value::Null),
    };

    let mut items = Vec::with_capacity(*len);
    for _ in 0..*len {
        let item = if inner.is_empty() {
            match buf.i32()? {
                -1 => Value::Null,
                n => {
                    let n = usize::try_from(n).map_err(|_| "invalid array element length")?;
                    decode(element, buf.take(n)?)?
                }
            }
        } else {
            array_dim(buf, element, inner)?
        };
        items.push(item);
    }
    Ok(Value::Array(items))
}

/// Big-endian cursor over a value's bytes.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> DecodeResult<&'a [u8]> {
        if self.buf.len() < n {
            return Err(format!("expected {} more bytes, found {}", n, self.buf.len()).into());
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> DecodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn u8(&mut self) -> DecodeResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn i16(&mut self) -> DecodeResult<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    fn u16(&mut self) -> DecodeResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    fn i32(&mut self) -> DecodeResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    fn u32(&mut self) -> DecodeResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn i64(&mut self) -> DecodeResult<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    fn u64(&mut self) -> DecodeResult<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }
}
