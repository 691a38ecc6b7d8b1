//! Database-agnostic type mappings.
//!
//! This module renders raw column values as text for the untyped row view.
//!
//! # Architecture
//!
//! Rendering uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific renderers handle the actual value extraction
//!
//! SQLite is the exception: its values carry a runtime storage class that
//! may differ from the declared column type, so it is rendered by that class.

use crate::models::DatabaseType;
use sqlx::mysql::{MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{ColumnIndex, Decode, Row, Type, TypeInfo};
use std::fmt::Display;
use tracing::warn;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();
    let base = lower.trim_end_matches(" unsigned");

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if base.contains("decimal") || base.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && base == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if matches!(
        base,
        "int" | "integer" | "int2" | "int4" | "int8" | "tinyint" | "smallint" | "mediumint"
            | "bigint" | "serial" | "bigserial" | "smallserial" | "year"
    ) {
        return TypeCategory::Integer;
    }

    if base == "bool" || base == "boolean" {
        return TypeCategory::Boolean;
    }

    if base.contains("float") || base.contains("double") || base == "real" {
        return TypeCategory::Float;
    }

    if base == "json" || base == "jsonb" {
        return TypeCategory::Json;
    }

    if base == "uuid" {
        return TypeCategory::Uuid;
    }

    if matches!(
        base,
        "date" | "time" | "timetz" | "datetime" | "timestamp" | "timestamptz"
    ) {
        return TypeCategory::Temporal;
    }

    if base.contains("blob") || base.contains("binary") || base == "bytea" || base == "bit" {
        return TypeCategory::Binary;
    }

    if base.contains("char") || base.contains("text") || base == "name" || base == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Display for RawDecimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("numeric")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

const PG_NUMERIC_NEG: u16 = 0x4000;
const PG_NUMERIC_NAN: u16 = 0xC000;
const PG_NUMERIC_PINF: u16 = 0xD000;
const PG_NUMERIC_NINF: u16 = 0xF000;

/// Render the binary wire form of a PostgreSQL NUMERIC.
///
/// Layout: `ndigits`, `weight`, `sign`, `dscale` (all 16 bit, big endian)
/// followed by `ndigits` base-10000 digits, most significant first. The
/// first digit is scaled by `10000^weight`.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let word = |i: usize| -> Result<u16, sqlx::error::BoxDynError> {
        buf.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = word(0)? as usize;
    let weight = word(1)? as i16 as i64;
    let sign = word(2)?;
    let dscale = word(3)? as usize;

    match sign {
        PG_NUMERIC_NAN => return Ok("NaN".to_string()),
        PG_NUMERIC_PINF => return Ok("Infinity".to_string()),
        PG_NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<u16>, _>>()?;
    let digit_at = |exp: i64| -> u16 {
        // digits[j] carries exponent `weight - j`
        usize::try_from(weight - exp)
            .ok()
            .and_then(|j| digits.get(j).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == PG_NUMERIC_NEG && digits.iter().any(|d| *d != 0) {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for exp in (0..=weight).rev() {
            if exp == weight {
                out.push_str(&digit_at(exp).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(exp)));
            }
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut exp = -1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit_at(exp)));
            exp -= 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

// =============================================================================
// Text Rendering
// =============================================================================

/// Render bytes as text, replacing invalid UTF-8 sequences with U+FFFD.
pub fn bytes_to_text(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Decode a column as `T` and format it, or `None` if `T` does not fit.
fn render<'r, R, T>(row: &'r R, idx: usize) -> Option<String>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database> + Display,
{
    row.try_get::<T, _>(idx).ok().map(|v| v.to_string())
}

fn render_bytes<'r, R>(row: &'r R, idx: usize) -> Option<String>
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Vec<u8>, _>(idx).ok().map(bytes_to_text)
}

fn unrenderable(idx: usize, type_name: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: idx.to_string(),
        source: format!("cannot render value of type {} as text", type_name).into(),
    }
}

// =============================================================================
// Database-Specific Renderers
// =============================================================================

pub(crate) mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use sqlx::mysql::MySqlRow;
    use sqlx::mysql::types::MySqlTime;
    use sqlx::{Column, ValueRef};

    /// Render one column as text; `None` for SQL NULL.
    pub fn column_text(row: &MySqlRow, idx: usize) -> Result<Option<String>, sqlx::Error> {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(None);
        }
        let type_name = row.column(idx).type_info().name();
        let rendered = match categorize_type(type_name, DatabaseType::MySQL) {
            TypeCategory::Decimal => render::<_, RawDecimal>(row, idx),
            TypeCategory::Integer => {
                render::<_, i64>(row, idx).or_else(|| render::<_, u64>(row, idx))
            }
            // TINYINT(1) reports as BOOLEAN but holds any TINYINT value
            TypeCategory::Boolean => {
                render::<_, i8>(row, idx).or_else(|| render::<_, u8>(row, idx))
            }
            TypeCategory::Float => {
                render::<_, f64>(row, idx).or_else(|| render::<_, f32>(row, idx))
            }
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| v.to_string()),
            TypeCategory::Temporal => render::<_, NaiveDateTime>(row, idx)
                .or_else(|| render::<_, DateTime<Utc>>(row, idx))
                .or_else(|| render::<_, NaiveDate>(row, idx))
                .or_else(|| render::<_, MySqlTime>(row, idx)),
            _ => None,
        };

        // BIT, zero dates and anything else unmapped come back as raw bytes
        rendered
            .or_else(|| render::<_, String>(row, idx))
            .or_else(|| render_bytes(row, idx))
            .or_else(|| {
                row.try_get_unchecked::<Vec<u8>, _>(idx)
                    .ok()
                    .map(bytes_to_text)
            })
            .map(Some)
            .ok_or_else(|| unrenderable(idx, type_name))
    }
}

pub(crate) mod postgres {
    use super::*;
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::postgres::types::{Oid, PgHasArrayType, PgInterval, PgMoney, PgTimeTz};
    use sqlx::postgres::{PgRow, Postgres};
    use sqlx::{Column, ValueRef};
    use std::net::{Ipv4Addr, Ipv6Addr};

    /// Render one column as text; `None` for SQL NULL.
    ///
    /// Values the server sent in text format (simple query protocol) are
    /// passed through verbatim. Binary values, which arrive whenever
    /// parameters are bound, are formatted the way the server's own output
    /// functions would print them.
    pub fn column_text(row: &PgRow, idx: usize) -> Result<Option<String>, sqlx::Error> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(None);
        }
        let type_name = row.column(idx).type_info().name();
        let category = categorize_type(type_name, DatabaseType::PostgreSQL);

        if category == TypeCategory::Binary {
            if let Some(text) = render_bytes(row, idx) {
                return Ok(Some(text));
            }
        }
        if raw.format() == PgValueFormat::Text {
            if let Ok(bytes) = raw.as_bytes() {
                return Ok(Some(bytes_to_text(bytes.to_vec())));
            }
        }

        let rendered = match category {
            TypeCategory::Decimal => render::<_, RawDecimal>(row, idx),
            TypeCategory::Integer => render::<_, i64>(row, idx)
                .or_else(|| render::<_, i32>(row, idx))
                .or_else(|| render::<_, i16>(row, idx)),
            TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(bool_text),
            TypeCategory::Float => row
                .try_get::<f64, _>(idx)
                .ok()
                .map(float8_text)
                .or_else(|| row.try_get::<f32, _>(idx).ok().map(float4_text)),
            TypeCategory::Json => row
                .try_get::<serde_json::Value, _>(idx)
                .ok()
                .map(|v| v.to_string()),
            TypeCategory::Uuid => render::<_, uuid::Uuid>(row, idx),
            TypeCategory::Temporal => row
                .try_get::<DateTime<Utc>, _>(idx)
                .ok()
                .map(timestamptz_text)
                .or_else(|| render::<_, NaiveDateTime>(row, idx))
                .or_else(|| render::<_, NaiveDate>(row, idx))
                .or_else(|| render::<_, NaiveTime>(row, idx))
                .or_else(|| {
                    row.try_get::<PgTimeTz<NaiveTime, FixedOffset>, _>(idx)
                        .ok()
                        .map(|t| format!("{}{}", t.time, utc_offset_text(t.offset)))
                }),
            _ => render_special(row, idx, type_name),
        };

        Ok(Some(
            rendered
                .or_else(|| render::<_, String>(row, idx))
                .unwrap_or_else(|| {
                    warn!(
                        column = idx,
                        type_name,
                        "No text form for binary value, passing raw bytes"
                    );
                    bytes_to_text(raw.as_bytes().unwrap_or_default().to_vec())
                }),
        ))
    }

    /// Types outside the common categories that still have a decoder.
    fn render_special(row: &PgRow, idx: usize, type_name: &str) -> Option<String> {
        match type_name {
            "INTERVAL" => row.try_get::<PgInterval, _>(idx).ok().map(|v| interval_text(&v)),
            "MONEY" => row.try_get::<PgMoney, _>(idx).ok().map(|v| money_text(v.0)),
            "OID" => row.try_get::<Oid, _>(idx).ok().map(|v| v.0.to_string()),
            "INET" | "CIDR" => row
                .try_get_raw(idx)
                .ok()
                .and_then(|raw| raw.as_bytes().ok())
                .and_then(inet_text),
            name if name.ends_with("[]") => render_array(row, idx),
            _ => None,
        }
    }

    fn render_array(row: &PgRow, idx: usize) -> Option<String> {
        array_of::<i64>(row, idx, |v| v.to_string())
            .or_else(|| array_of::<i32>(row, idx, |v| v.to_string()))
            .or_else(|| array_of::<i16>(row, idx, |v| v.to_string()))
            .or_else(|| array_of::<f64>(row, idx, |v| float8_text(*v)))
            .or_else(|| array_of::<f32>(row, idx, |v| float4_text(*v)))
            .or_else(|| array_of::<bool>(row, idx, |v| bool_text(*v)))
            .or_else(|| array_of::<String>(row, idx, |v| v.clone()))
            .or_else(|| array_of::<uuid::Uuid>(row, idx, |v| v.to_string()))
            .or_else(|| array_of::<NaiveDate>(row, idx, |v| v.to_string()))
    }

    fn array_of<T>(row: &PgRow, idx: usize, fmt: fn(&T) -> String) -> Option<String>
    where
        T: for<'a> Decode<'a, Postgres> + Type<Postgres> + PgHasArrayType,
    {
        let items = row.try_get::<Vec<Option<T>>, _>(idx).ok()?;
        Some(array_text(items.iter().map(|item| item.as_ref().map(fmt))))
    }

    /// Format one-dimensional array elements as an array literal.
    pub(super) fn array_text(items: impl Iterator<Item = Option<String>>) -> String {
        let elements: Vec<String> = items
            .map(|item| match item {
                None => "NULL".to_string(),
                Some(text) if needs_quotes(&text) => {
                    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
                }
                Some(text) => text,
            })
            .collect();
        format!("{{{}}}", elements.join(","))
    }

    fn needs_quotes(text: &str) -> bool {
        text.is_empty()
            || text.eq_ignore_ascii_case("null")
            || text
                .chars()
                .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace())
    }

    pub(super) fn bool_text(v: bool) -> String {
        if v { "t" } else { "f" }.to_string()
    }

    pub(super) fn float8_text(v: f64) -> String {
        if v.is_nan() {
            return "NaN".to_string();
        }
        if v.is_infinite() {
            return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
        }
        float_text(v.to_string(), format!("{:e}", v), 15)
    }

    pub(super) fn float4_text(v: f32) -> String {
        if v.is_nan() {
            return "NaN".to_string();
        }
        if v.is_infinite() {
            return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
        }
        float_text(v.to_string(), format!("{:e}", v), 6)
    }

    /// Shortest round-trip digits, switching to exponent notation when the
    /// decimal exponent is below -4 or at least `max_exp`.
    fn float_text(plain: String, sci: String, max_exp: i32) -> String {
        let Some((mantissa, exp)) = sci.split_once('e') else {
            return plain;
        };
        let Ok(exp) = exp.parse::<i32>() else {
            return plain;
        };
        if mantissa.trim_start_matches('-') == "0" || (-4..max_exp).contains(&exp) {
            return plain;
        }
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    }

    /// Binary timestamptz values are UTC instants; print them with a `+00` offset.
    pub(super) fn timestamptz_text(v: DateTime<Utc>) -> String {
        v.format("%Y-%m-%d %H:%M:%S%.f+00").to_string()
    }

    fn utc_offset_text(offset: FixedOffset) -> String {
        let secs = offset.local_minus_utc();
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.unsigned_abs();
        let (hours, minutes) = (secs / 3600, secs / 60 % 60);
        if minutes == 0 {
            format!("{}{:02}", sign, hours)
        } else {
            format!("{}{:02}:{:02}", sign, hours, minutes)
        }
    }

    pub(super) fn interval_text(v: &PgInterval) -> String {
        let unit = |n: i64, name: &str| {
            let plural = if n == 1 { "" } else { "s" };
            format!("{} {}{}", n, name, plural)
        };

        let mut parts = Vec::new();
        let (years, months) = (v.months / 12, v.months % 12);
        if years != 0 {
            parts.push(unit(years.into(), "year"));
        }
        if months != 0 {
            parts.push(unit(months.into(), "mon"));
        }
        if v.days != 0 {
            parts.push(unit(v.days.into(), "day"));
        }
        if v.microseconds != 0 || parts.is_empty() {
            let sign = if v.microseconds < 0 { "-" } else { "" };
            let micros = v.microseconds.unsigned_abs();
            let mut time = format!(
                "{}{:02}:{:02}:{:02}",
                sign,
                micros / 3_600_000_000,
                micros / 60_000_000 % 60,
                micros / 1_000_000 % 60
            );
            let frac = micros % 1_000_000;
            if frac != 0 {
                time.push_str(format!(".{:06}", frac).trim_end_matches('0'));
            }
            parts.push(time);
        }
        parts.join(" ")
    }

    /// Money is printed in the minor unit's two decimal places, without a
    /// locale currency symbol.
    pub(super) fn money_text(cents: i64) -> String {
        let sign = if cents < 0 { "-" } else { "" };
        let cents = cents.unsigned_abs();
        format!("{}{}.{:02}", sign, cents / 100, cents % 100)
    }

    /// Binary inet/cidr: family, prefix bits, cidr flag, address length, address.
    pub(super) fn inet_text(buf: &[u8]) -> Option<String> {
        let (&family, rest) = buf.split_first()?;
        let (&bits, rest) = rest.split_first()?;
        let (&is_cidr, rest) = rest.split_first()?;
        let (&len, addr) = rest.split_first()?;
        let addr = addr.get(..usize::from(len))?;

        let (text, max_bits) = match family {
            2 => (Ipv4Addr::from(<[u8; 4]>::try_from(addr).ok()?).to_string(), 32),
            3 => (Ipv6Addr::from(<[u8; 16]>::try_from(addr).ok()?).to_string(), 128),
            _ => return None,
        };
        if is_cidr != 0 || bits != max_bits {
            Some(format!("{}/{}", text, bits))
        } else {
            Some(text)
        }
    }
}

pub(crate) mod sqlite {
    use super::*;
    use sqlx::sqlite::SqliteRow;
    use sqlx::ValueRef;

    /// Render one column as text by its runtime storage class; `None` for SQL NULL.
    pub fn column_text(row: &SqliteRow, idx: usize) -> Result<Option<String>, sqlx::Error> {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(None);
        }
        let storage_class = raw.type_info().name().to_string();

        let rendered = match storage_class.as_str() {
            "INTEGER" => row.try_get_unchecked::<i64, _>(idx)?.to_string(),
            "REAL" => row.try_get_unchecked::<f64, _>(idx)?.to_string(),
            "BLOB" => bytes_to_text(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
            "TEXT" => row.try_get_unchecked::<String, _>(idx)?,
            other => return Err(unrenderable(idx, other)),
        };
        Ok(Some(rendered))
    }
}
