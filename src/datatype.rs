// used for persistence
use rusqlite::types::{Value as SqlValue, ValueRef};

// used for time-valued attributes
use chrono::{NaiveDate, NaiveDateTime, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;

// used when parsing strings into values
use std::str::FromStr;
// used to print out readable forms of a value
use std::fmt;
// used to overload common operations for datatypes
use std::ops;

use crate::error::{BedrockError, Result};
use crate::record::RecordKey;

// ------------- AttributeKind -------------
/// The schema-declared type of a record attribute. Every kind carries a
/// stable numeric tag so heterogeneous values can be stored in one column
/// and restored without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    String,
    Integer,
    Decimal,
    Boolean,
    Time,
    Bytes,
    Reference,
}

impl AttributeKind {
    pub const fn tag(&self) -> u8 {
        match self {
            AttributeKind::String => 1,
            AttributeKind::Integer => 2,
            AttributeKind::Decimal => 3,
            AttributeKind::Boolean => 4,
            AttributeKind::Time => 5,
            AttributeKind::Bytes => 6,
            AttributeKind::Reference => 7,
        }
    }
    pub fn from_tag(tag: u8) -> Option<AttributeKind> {
        match tag {
            1 => Some(AttributeKind::String),
            2 => Some(AttributeKind::Integer),
            3 => Some(AttributeKind::Decimal),
            4 => Some(AttributeKind::Boolean),
            5 => Some(AttributeKind::Time),
            6 => Some(AttributeKind::Bytes),
            7 => Some(AttributeKind::Reference),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            AttributeKind::String => "string",
            AttributeKind::Integer => "integer",
            AttributeKind::Decimal => "decimal",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Time => "time",
            AttributeKind::Bytes => "bytes",
            AttributeKind::Reference => "reference",
        };
        write!(f, "{}", name)
    }
}

// ------------- AttributeValue -------------
/// A value held by a record attribute: either a scalar or a reference to
/// another record by its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Time(Time),
    Bytes(Vec<u8>),
    Reference(RecordKey),
}

impl AttributeValue {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeValue::String(_) => AttributeKind::String,
            AttributeValue::Integer(_) => AttributeKind::Integer,
            AttributeValue::Decimal(_) => AttributeKind::Decimal,
            AttributeValue::Boolean(_) => AttributeKind::Boolean,
            AttributeValue::Time(_) => AttributeKind::Time,
            AttributeValue::Bytes(_) => AttributeKind::Bytes,
            AttributeValue::Reference(_) => AttributeKind::Reference,
        }
    }
    pub(crate) fn to_sql_value(&self) -> SqlValue {
        match self {
            AttributeValue::String(s) => SqlValue::Text(s.clone()),
            AttributeValue::Integer(i) => SqlValue::Integer(*i),
            AttributeValue::Decimal(d) => SqlValue::Text(d.to_string()),
            AttributeValue::Boolean(b) => SqlValue::Integer(i64::from(*b)),
            AttributeValue::Time(t) => SqlValue::Text(t.to_string()),
            AttributeValue::Bytes(b) => SqlValue::Blob(b.clone()),
            AttributeValue::Reference(key) => SqlValue::Text(key.to_string()),
        }
    }
    pub(crate) fn from_sql(tag: u8, value: &ValueRef) -> Result<AttributeValue> {
        let corrupt = |message: String| BedrockError::DataCorruption { message };
        let kind = AttributeKind::from_tag(tag)
            .ok_or_else(|| corrupt(format!("unknown value type tag {}", tag)))?;
        let text = |value: &ValueRef| -> Result<String> {
            value
                .as_str()
                .map(String::from)
                .map_err(|e| corrupt(format!("expected text for {} value: {}", kind, e)))
        };
        match kind {
            AttributeKind::String => Ok(AttributeValue::String(text(value)?)),
            AttributeKind::Integer => value
                .as_i64()
                .map(AttributeValue::Integer)
                .map_err(|e| corrupt(format!("expected integer value: {}", e))),
            AttributeKind::Decimal => {
                let stored = text(value)?;
                Decimal::from_str(&stored)
                    .map(AttributeValue::Decimal)
                    .ok_or_else(|| corrupt(format!("undecodable decimal '{}'", stored)))
            }
            AttributeKind::Boolean => value
                .as_i64()
                .map(|i| AttributeValue::Boolean(i != 0))
                .map_err(|e| corrupt(format!("expected boolean value: {}", e))),
            AttributeKind::Time => {
                let stored = text(value)?;
                Time::from_str(&stored)
                    .map(AttributeValue::Time)
                    .ok_or_else(|| corrupt(format!("undecodable time '{}'", stored)))
            }
            AttributeKind::Bytes => value
                .as_blob()
                .map(|b| AttributeValue::Bytes(b.to_vec()))
                .map_err(|e| corrupt(format!("expected blob value: {}", e))),
            AttributeKind::Reference => {
                let stored = text(value)?;
                RecordKey::parse(&stored)
                    .map(AttributeValue::Reference)
                    .ok_or_else(|| corrupt(format!("undecodable record key '{}'", stored)))
            }
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Decimal(d) => write!(f, "{}", d),
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Time(t) => write!(f, "{}", t),
            AttributeValue::Bytes(b) => write!(f, "{}", to_hex(b)),
            AttributeValue::Reference(key) => write!(f, "{}", key),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_owned())
    }
}
impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}
impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}
impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}
impl From<Decimal> for AttributeValue {
    fn from(d: Decimal) -> Self {
        AttributeValue::Decimal(d)
    }
}
impl From<Time> for AttributeValue {
    fn from(t: Time) -> Self {
        AttributeValue::Time(t)
    }
}
impl From<Vec<u8>> for AttributeValue {
    fn from(b: Vec<u8>) -> Self {
        AttributeValue::Bytes(b)
    }
}
impl From<RecordKey> for AttributeValue {
    fn from(key: RecordKey) -> Self {
        AttributeValue::Reference(key)
    }
}

// ------------- Decimal -------------
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug)]
pub struct Decimal(BigDecimal);

impl Decimal {
    pub fn from_str(s: &str) -> Option<Decimal> {
        match BigDecimal::from_str(s) {
            Ok(decimal) => Some(Decimal(decimal)),
            _ => None,
        }
    }
}
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl ops::Deref for Decimal {
    type Target = BigDecimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<i64> for Decimal {
    fn from(i: i64) -> Self {
        Decimal(BigDecimal::from(i))
    }
}

// ------------- Time -------------
#[derive(Eq, PartialEq, PartialOrd, Ord, Debug, Hash, Clone)]
enum Moment {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// A point in time at date or datetime resolution. Values parse from and
/// print to the ISO-8601 forms the persistence layer stores.
#[derive(Eq, PartialEq, PartialOrd, Ord, Debug, Hash, Clone)]
pub struct Time {
    moment: Moment,
}

impl Time {
    pub fn now() -> Time {
        Time {
            moment: Moment::DateTime(Utc::now().naive_utc()),
        }
    }
    pub fn from_date(date: NaiveDate) -> Time {
        Time {
            moment: Moment::Date(date),
        }
    }
    pub fn from_datetime(datetime: NaiveDateTime) -> Time {
        Time {
            moment: Moment::DateTime(datetime),
        }
    }
    pub fn from_str(s: &str) -> Option<Time> {
        if let Ok(datetime) = NaiveDateTime::from_str(s) {
            return Some(Time::from_datetime(datetime));
        }
        if let Ok(datetime) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return Some(Time::from_datetime(datetime));
        }
        if let Ok(date) = NaiveDate::from_str(s) {
            return Some(Time::from_date(date));
        }
        None
    }
}
impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.moment {
            Moment::Date(d) => write!(f, "{}", d),
            Moment::DateTime(d) => write!(f, "{}", d),
        }
    }
}

// ------------- Hex codec -------------
// Binary attribute values travel through JSON as lowercase hex strings.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

pub(crate) fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(s.len() / 2);
    let mut index = 0;
    while index < s.len() {
        bytes.push(u8::from_str_radix(s.get(index..index + 2)?, 16).ok()?);
        index += 2;
    }
    Some(bytes)
}
