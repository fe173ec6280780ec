//! Column encoding helpers shared by the CRUD modules.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;

use cloak_shared::{AvatarDescriptor, Pseudonym};

/// Fixed-width RFC-3339 so that string order equals time order.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_opt_ts(idx: usize, s: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, &s)).transpose()
}

pub(crate) fn parse_pseudonym(idx: usize, s: &str) -> rusqlite::Result<Pseudonym> {
    Pseudonym::parse(s).map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_opt_pseudonym(idx: usize, s: Option<String>) -> rusqlite::Result<Option<Pseudonym>> {
    s.map(|s| parse_pseudonym(idx, &s)).transpose()
}

pub(crate) fn parse_enum<T>(idx: usize, s: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    s.parse::<T>().map_err(|e| conversion(idx, e))
}

pub(crate) fn parse_avatar(idx: usize, s: Option<String>) -> rusqlite::Result<Option<AvatarDescriptor>> {
    s.map(|s| serde_json::from_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}
