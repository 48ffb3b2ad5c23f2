//! Object Name Templates
//!
//! Expands a user-supplied path template into the name of a new object.
//!
//! ## Syntax
//!
//! Placeholders are written `{{ name }}`. Whitespace inside the braces and a
//! leading `.` are ignored, so `{{tag}}`, `{{ tag }}` and `{{ .InputTag }}`
//! are equivalent.
//!
//! | Placeholder | Alias | Expands to |
//! |-------------|-------|------------|
//! | `tag` | `InputTag` | stream tag |
//! | `timestamp` | `Timestamp` | Unix seconds of the open time |
//! | `isoDateTime` | `IsoDateTime` | `YYYYMMDDThhmmssZ`, UTC |
//! | `year` | `Yyyy` | 4-digit year |
//! | `month` | `Mm` | 2-digit month |
//! | `day` | `Dd` | 2-digit day |
//! | `uuid` | `Uuid` | random v4 UUID, drawn once per object |
//! | `beginTime "<fmt>"` | `BeginTime.Format "<fmt>"` | open time with a chrono strftime format |
//!
//! Templates are compiled once when an output is configured. Unknown names,
//! unterminated braces and invalid time formats are rejected there so that a
//! bad template never reaches the write path.

use crate::output::compression::Compression;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, Utc};
use std::fmt::Write as _;
use uuid::Uuid;

/// Default template: tag and Unix timestamp
pub const DEFAULT_OBJECT_NAME_TEMPLATE: &str = "{{ tag }}-{{ timestamp }}";

/// Error type for template compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// `{{` without a matching `}}`
    Unterminated { offset: usize },
    /// `{{ }}` with nothing inside
    EmptyPlaceholder { offset: usize },
    /// Placeholder name outside the supported set
    UnknownPlaceholder(String),
    /// `beginTime` format string that chrono cannot parse
    InvalidTimeFormat(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::Unterminated { offset } => {
                write!(f, "unterminated placeholder starting at byte {}", offset)
            }
            TemplateError::EmptyPlaceholder { offset } => {
                write!(f, "empty placeholder at byte {}", offset)
            }
            TemplateError::UnknownPlaceholder(name) => {
                write!(f, "unknown placeholder '{}'", name)
            }
            TemplateError::InvalidTimeFormat(fmt) => {
                write!(f, "invalid time format '{}'", fmt)
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// Values a template can reference, captured when an object is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRenderContext {
    pub tag: String,
    pub opened_at: DateTime<Utc>,
    pub year: String,
    pub month: String,
    pub day: String,
    /// `YYYYMMDDThhmmssZ`
    pub iso_date_time: String,
    /// Unix seconds
    pub timestamp: i64,
    pub unique_id: Option<Uuid>,
}

impl NameRenderContext {
    pub fn new(tag: &str, opened_at: DateTime<Utc>, unique_id: Option<Uuid>) -> Self {
        NameRenderContext {
            tag: tag.to_string(),
            opened_at,
            year: format!("{:04}", opened_at.year()),
            month: format!("{:02}", opened_at.month()),
            day: format!("{:02}", opened_at.day()),
            iso_date_time: opened_at.format("%Y%m%dT%H%M%SZ").to_string(),
            timestamp: opened_at.timestamp(),
            unique_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Tag,
    Timestamp,
    IsoDateTime,
    Year,
    Month,
    Day,
    Uuid,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "tag" | "InputTag" => Some(Field::Tag),
            "timestamp" | "Timestamp" => Some(Field::Timestamp),
            "isoDateTime" | "IsoDateTime" => Some(Field::IsoDateTime),
            "year" | "Yyyy" => Some(Field::Year),
            "month" | "Mm" => Some(Field::Month),
            "day" | "Dd" => Some(Field::Day),
            "uuid" | "Uuid" => Some(Field::Uuid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(Field),
    /// Open time rendered with a validated strftime format
    BeginTime(String),
}

/// A compiled object name template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNameTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl ObjectNameTemplate {
    /// Compile a template, rejecting anything that could not render
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let open_offset = offset + start;
            let after_open = &rest[start + 2..];
            let end = after_open
                .find("}}")
                .ok_or(TemplateError::Unterminated {
                    offset: open_offset,
                })?;

            segments.push(parse_placeholder(&after_open[..end], open_offset)?);

            let consumed = start + 2 + end + 2;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(ObjectNameTemplate {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text as configured
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether a fresh UUID must be drawn for each opened object
    pub fn needs_unique_id(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field(Field::Uuid)))
    }

    /// Build the render context for an object opened at `opened_at`
    pub fn context_for(&self, tag: &str, opened_at: DateTime<Utc>) -> NameRenderContext {
        let unique_id = self.needs_unique_id().then(Uuid::new_v4);
        NameRenderContext::new(tag, opened_at, unique_id)
    }

    /// Expand the template; gzip output gains a `.gz` suffix
    pub fn render(&self, ctx: &NameRenderContext, compression: Compression) -> String {
        let mut out = String::with_capacity(self.source.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(Field::Tag) => out.push_str(&ctx.tag),
                Segment::Field(Field::Timestamp) => {
                    let _ = write!(out, "{}", ctx.timestamp);
                }
                Segment::Field(Field::IsoDateTime) => out.push_str(&ctx.iso_date_time),
                Segment::Field(Field::Year) => out.push_str(&ctx.year),
                Segment::Field(Field::Month) => out.push_str(&ctx.month),
                Segment::Field(Field::Day) => out.push_str(&ctx.day),
                Segment::Field(Field::Uuid) => {
                    debug_assert!(ctx.unique_id.is_some(), "context built without a uuid");
                    let id = ctx.unique_id.unwrap_or_else(Uuid::nil);
                    let _ = write!(out, "{}", id.hyphenated());
                }
                Segment::BeginTime(fmt) => {
                    let _ = write!(out, "{}", ctx.opened_at.format(fmt));
                }
            }
        }
        out.push_str(compression.extension_suffix());
        out
    }
}

impl std::fmt::Display for ObjectNameTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_placeholder(raw: &str, offset: usize) -> Result<Segment, TemplateError> {
    let inner = raw.trim();
    let inner = inner.strip_prefix('.').unwrap_or(inner).trim_start();
    if inner.is_empty() {
        return Err(TemplateError::EmptyPlaceholder { offset });
    }

    for prefix in ["beginTime", "BeginTime.Format", "BeginTime"] {
        if let Some(arg) = inner.strip_prefix(prefix) {
            if arg.starts_with(char::is_whitespace) || arg.starts_with('"') {
                return parse_begin_time(arg.trim());
            }
        }
    }

    Field::from_name(inner)
        .map(Segment::Field)
        .ok_or_else(|| TemplateError::UnknownPlaceholder(inner.to_string()))
}

fn parse_begin_time(arg: &str) -> Result<Segment, TemplateError> {
    let fmt = arg
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TemplateError::InvalidTimeFormat(arg.to_string()))?;

    if StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::InvalidTimeFormat(fmt.to_string()));
    }
    Ok(Segment::BeginTime(fmt.to_string()))
}
