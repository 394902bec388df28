//! Typed field values.
//!
//! Every form field holds exactly one [`FieldValue`]. Blank is a value of its
//! own: empty text, whitespace and `N/A` input all collapse into
//! [`FieldValue::Blank`], so formulas and rules only ever check one thing.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

const MINUTES_PER_DAY: i32 = 24 * 60;

const CLOCK_FORMATS_24H: &[&str] = &["%H:%M", "%H:%M:%S"];
const CLOCK_FORMATS_12H: &[&str] = &["%I:%M %p", "%I:%M%p", "%I:%M:%S %p"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y"];

/// Path of a field, or of a member inside a structured field.
///
/// Top-level fields use their plain id (`opening_km`). Members are addressed
/// as `billing_address.pincode` and list entries as `additional_contacts[1]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    /// Create a field id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw path.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of a named member of this field.
    pub fn member(&self, key: &str) -> Self {
        Self(format!("{}.{}", self.0, key))
    }

    /// Path of a list entry of this field.
    pub fn entry(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    /// True if this path is `root` itself or lies inside it.
    pub fn is_within(&self, root: &FieldId) -> bool {
        match self.0.strip_prefix(root.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with('.') || rest.starts_with('['),
            None => false,
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FieldId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&FieldId> for FieldId {
    fn from(id: &FieldId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for FieldId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// The declared type of a field. Fixed for the lifetime of the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Time,
    Flag,
    File,
    /// Structured sub-object such as an address
    Group,
    /// Repeated sub-records such as additional contacts
    List,
}

impl FieldKind {
    /// Parse raw UI input into a value of this kind.
    ///
    /// Blank input and `N/A` always parse to [`FieldValue::Blank`].
    pub fn parse(self, raw: &str) -> Result<FieldValue, ParseError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("n/a") {
            return Ok(FieldValue::Blank);
        }

        match self {
            FieldKind::Text => Ok(FieldValue::Text(trimmed.to_string())),
            FieldKind::Number => trimmed
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(FieldValue::Number)
                .ok_or_else(|| ParseError::Number(trimmed.to_string())),
            FieldKind::Date => DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
                .map(FieldValue::Date)
                .ok_or_else(|| ParseError::Date(trimmed.to_string())),
            FieldKind::Time => ClockTime::parse(trimmed).map(FieldValue::Time),
            FieldKind::Flag => match trimmed.to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(FieldValue::Flag(true)),
                "no" | "n" | "false" | "0" => Ok(FieldValue::Flag(false)),
                _ => Err(ParseError::Flag(trimmed.to_string())),
            },
            FieldKind::File | FieldKind::Group | FieldKind::List => {
                Err(ParseError::NotTextual(self))
            }
        }
    }
}

/// Error turning raw input into a typed value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("'{0}' is not a valid number")]
    Number(String),

    #[error("'{0}' is not a valid date")]
    Date(String),

    #[error("'{0}' is not a valid time")]
    Time(String),

    #[error("'{0}' is not a yes/no value")]
    Flag(String),

    #[error("{0:?} fields cannot be entered as text")]
    NotTextual(FieldKind),
}

/// A time of day with minute precision.
///
/// Serialized as `HH:MM`. Parsing accepts 24-hour (`23:30`, `07:05:00`) and
/// 12-hour input with a meridiem (`11:30 PM`, `7:05am`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime {
    minutes: u16,
}

impl ClockTime {
    /// Build from hour and minute, `None` if out of range.
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then(|| Self {
            minutes: (hour * 60 + minute) as u16,
        })
    }

    /// Parse textual clock input.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let formats = if normalized.ends_with("AM") || normalized.ends_with("PM") {
            CLOCK_FORMATS_12H
        } else {
            CLOCK_FORMATS_24H
        };

        formats
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(&normalized, format).ok())
            .and_then(|time| Self::from_hm(time.hour(), time.minute()))
            .ok_or_else(|| ParseError::Time(raw.trim().to_string()))
    }

    /// Minutes since midnight.
    pub fn minutes(self) -> u16 {
        self.minutes
    }

    /// Hours elapsed from `self` until `end`.
    ///
    /// A negative raw difference is taken to cross midnight.
    pub fn hours_until(self, end: ClockTime) -> f64 {
        let mut diff = i32::from(end.minutes) - i32::from(self.minutes);
        if diff < 0 {
            diff += MINUTES_PER_DAY;
        }
        f64::from(diff) / 60.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl TryFrom<String> for ClockTime {
    type Error = ParseError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<ClockTime> for String {
    fn from(time: ClockTime) -> Self {
        time.to_string()
    }
}

/// A file chosen locally but not uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFile {
    /// Local path of the picked file
    pub path: PathBuf,
    /// Name to upload under
    pub file_name: String,
    /// MIME type, if known
    pub content_type: Option<String>,
}

/// A file already persisted by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Backend location of the file
    pub url: String,
    /// Original file name, if known
    pub file_name: Option<String>,
}

/// Value of a file field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Attachment {
    Pending(PendingFile),
    Stored(StoredFile),
}

impl Attachment {
    /// Display name of the file.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Attachment::Pending(file) => Some(&file.file_name),
            Attachment::Stored(file) => file.file_name.as_deref(),
        }
    }
}

/// Members of a structured value.
pub type Members = BTreeMap<String, FieldValue>;

/// The current value of a field.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// The single absent representation
    #[default]
    Blank,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Time(ClockTime),
    Flag(bool),
    File(Attachment),
    Group(Members),
    List(Vec<Members>),
}

impl FieldValue {
    /// Text value; blank text becomes [`FieldValue::Blank`].
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            FieldValue::Blank
        } else {
            FieldValue::Text(value)
        }
    }

    /// Numeric value.
    pub fn number(value: f64) -> Self {
        FieldValue::Number(value)
    }

    /// Clock time value, blank if out of range.
    pub fn time(hour: u32, minute: u32) -> Self {
        ClockTime::from_hm(hour, minute)
            .map(FieldValue::Time)
            .unwrap_or(FieldValue::Blank)
    }

    /// Date value, blank if the date does not exist.
    pub fn date(year: i32, month: u32, day: u32) -> Self {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Blank)
    }

    /// Group value from `(key, value)` pairs.
    pub fn group<K: Into<String>>(members: impl IntoIterator<Item = (K, FieldValue)>) -> Self {
        FieldValue::Group(members.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The kind of this value, `None` for blank.
    pub fn kind(&self) -> Option<FieldKind> {
        match self {
            FieldValue::Blank => None,
            FieldValue::Text(_) => Some(FieldKind::Text),
            FieldValue::Number(_) => Some(FieldKind::Number),
            FieldValue::Date(_) => Some(FieldKind::Date),
            FieldValue::Time(_) => Some(FieldKind::Time),
            FieldValue::Flag(_) => Some(FieldKind::Flag),
            FieldValue::File(_) => Some(FieldKind::File),
            FieldValue::Group(_) => Some(FieldKind::Group),
            FieldValue::List(_) => Some(FieldKind::List),
        }
    }

    /// True if the value may be stored in a field of `kind`.
    pub fn fits(&self, kind: FieldKind) -> bool {
        self.kind().map_or(true, |own| own == kind)
    }

    /// True if the value carries no information.
    ///
    /// Groups are blank when every member is blank; lists when empty.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Blank => true,
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::Group(members) => members.values().all(FieldValue::is_blank),
            FieldValue::List(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(date) => Some(*date),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<ClockTime> {
        match self {
            FieldValue::Time(time) => Some(*time),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_attachment(&self) -> Option<&Attachment> {
        match self {
            FieldValue::File(attachment) => Some(attachment),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<&Members> {
        match self {
            FieldValue::Group(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Members]> {
        match self {
            FieldValue::List(entries) => Some(entries),
            _ => None,
        }
    }

    /// Flat text rendering of a scalar value, `None` for blank and
    /// structured values.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            FieldValue::Blank | FieldValue::Group(_) | FieldValue::List(_) => None,
            FieldValue::Text(text) => Some(text.trim().to_string()),
            FieldValue::Number(n) => Some(format_number(*n)),
            FieldValue::Date(date) => Some(date.format("%Y-%m-%d").to_string()),
            FieldValue::Time(time) => Some(time.to_string()),
            FieldValue::Flag(true) => Some("Yes".to_string()),
            FieldValue::Flag(false) => Some("No".to_string()),
            FieldValue::File(attachment) => attachment.file_name().map(str::to_string),
        }
    }
}

/// Render a number without a trailing `.0` and without negative zero.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_parsing_accepts_both_notations() {
        assert_eq!(ClockTime::parse("23:30").unwrap().minutes(), 23 * 60 + 30);
        assert_eq!(ClockTime::parse("7:05").unwrap().minutes(), 7 * 60 + 5);
        assert_eq!(ClockTime::parse("07:05:00").unwrap().minutes(), 7 * 60 + 5);
        assert_eq!(ClockTime::parse("11:30 PM").unwrap().minutes(), 23 * 60 + 30);
        assert_eq!(ClockTime::parse("11:30pm").unwrap().minutes(), 23 * 60 + 30);
        assert_eq!(ClockTime::parse("12:15 AM").unwrap().minutes(), 15);
        assert!(ClockTime::parse("25:00").is_err());
        assert!(ClockTime::parse("half past").is_err());
    }

    #[test]
    fn test_hours_until_crosses_midnight() {
        let late = ClockTime::from_hm(23, 30).unwrap();
        let early = ClockTime::from_hm(1, 0).unwrap();
        assert_eq!(late.hours_until(early), 1.5);
        assert_eq!(early.hours_until(late), 22.5);
        assert_eq!(late.hours_until(late), 0.0);
    }

    #[test]
    fn test_blank_inputs_collapse() {
        for raw in ["", "   ", "N/A", "n/a"] {
            assert_eq!(FieldKind::Number.parse(raw).unwrap(), FieldValue::Blank);
            assert_eq!(FieldKind::Text.parse(raw).unwrap(), FieldValue::Blank);
        }
        assert_eq!(FieldValue::text("  "), FieldValue::Blank);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            FieldKind::Number.parse("1,250.50").unwrap(),
            FieldValue::Number(1250.5)
        );
        assert!(FieldKind::Number.parse("12km").is_err());
        assert_eq!(
            FieldKind::Date.parse("05/03/2024").unwrap(),
            FieldValue::date(2024, 3, 5)
        );
        assert!(FieldKind::Date.parse("31/02/2024").is_err());
        assert_eq!(FieldKind::Flag.parse("Yes").unwrap(), FieldValue::Flag(true));
        assert!(FieldKind::File.parse("scan.pdf").is_err());
    }

    #[test]
    fn test_field_paths() {
        let contacts = FieldId::from("additional_contacts");
        let mobile = contacts.entry(1).member("mobile");
        assert_eq!(mobile.as_str(), "additional_contacts[1].mobile");
        assert!(mobile.is_within(&contacts));
        assert!(!FieldId::from("additional_contacts_count").is_within(&contacts));
    }

    #[test]
    fn test_value_json_shape() {
        let value = FieldValue::time(23, 30);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"type":"time","value":"23:30"}"#);
        let parsed: FieldValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(FieldValue::Number(100.0).scalar_text().unwrap(), "100");
        assert_eq!(FieldValue::Number(-0.0).scalar_text().unwrap(), "0");
        assert_eq!(FieldValue::Flag(false).scalar_text().unwrap(), "No");
        assert_eq!(FieldValue::Blank.scalar_text(), None);
    }
}
