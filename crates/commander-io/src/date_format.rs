//! Date wire formats.
//!
//! Date parameters use a compact mini-language of `%t` directives
//! (`%tY-%tm-%td %tH:%tM:%tS`). A [`DateFormat`] translates it once into a
//! chrono strftime pattern (for marshalling both ways) and into a regular
//! expression fragment (for response matching).

use std::fmt::Write as _;

use chrono::format::{parse, Parsed, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, TimeZone, Utc};

/// Default date format.
pub const DEFAULT_DATE_FORMAT: &str = "%tY-%tm-%td %tH:%tM:%tS";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DateFormatError {
    #[error("unknown date directive '%t{directive}' in \"{format}\"")]
    UnknownDirective { format: String, directive: char },

    #[error("unsupported conversion in date format \"{0}\"")]
    Unsupported(String),

    #[error("cannot format date with \"{0}\"")]
    Format(String),

    #[error("failed to parse \"{input}\" as a date, required input is in form \"{format}\"")]
    Parse { input: String, format: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    Year,
    YearShort,
    MonthName,
    MonthAbbrev,
    Month,
    Day,
    DayUnpadded,
    Hour,
    HourUnpadded,
    Hour12,
    Hour12Unpadded,
    Minute,
    Second,
    Millis,
    ZoneName,
    ZoneOffset,
    AmPm,
}

impl Directive {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'Y' => Self::Year,
            'y' => Self::YearShort,
            'B' => Self::MonthName,
            'b' => Self::MonthAbbrev,
            'm' => Self::Month,
            'd' => Self::Day,
            'e' => Self::DayUnpadded,
            'H' => Self::Hour,
            'k' => Self::HourUnpadded,
            'I' => Self::Hour12,
            'l' => Self::Hour12Unpadded,
            'M' => Self::Minute,
            'S' => Self::Second,
            'L' => Self::Millis,
            'Z' => Self::ZoneName,
            'z' => Self::ZoneOffset,
            'p' => Self::AmPm,
            _ => return None,
        })
    }

    fn strftime(self) -> &'static str {
        match self {
            Self::Year => "%Y",
            Self::YearShort => "%y",
            Self::MonthName => "%B",
            Self::MonthAbbrev => "%b",
            Self::Month => "%m",
            Self::Day => "%d",
            Self::DayUnpadded => "%-d",
            Self::Hour => "%H",
            Self::HourUnpadded => "%-H",
            Self::Hour12 => "%I",
            Self::Hour12Unpadded => "%-I",
            Self::Minute => "%M",
            Self::Second => "%S",
            Self::Millis => "%3f",
            Self::ZoneName => "%Z",
            Self::ZoneOffset => "%z",
            // lower case am/pm on the wire
            Self::AmPm => "%P",
        }
    }

    fn regex(self) -> &'static str {
        match self {
            Self::Year => r"\d{4}",
            Self::YearShort
            | Self::Month
            | Self::Day
            | Self::Hour
            | Self::Hour12
            | Self::Minute
            | Self::Second => r"\d{2}",
            Self::DayUnpadded | Self::HourUnpadded | Self::Hour12Unpadded => r"\d{1,2}",
            Self::Millis => r"\d{3}",
            Self::MonthName | Self::MonthAbbrev | Self::ZoneName | Self::ZoneOffset | Self::AmPm => {
                r"\S+"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Directive(Directive),
}

/// A parsed date format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFormat {
    source: String,
    segments: Vec<Segment>,
    strftime: String,
}

impl DateFormat {
    pub fn parse(source: &str) -> Result<Self, DateFormatError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => literal.push('%'),
                Some('t') | Some('T') => {
                    let d = chars
                        .next()
                        .ok_or_else(|| DateFormatError::Unsupported(source.to_string()))?;
                    let directive =
                        Directive::from_char(d).ok_or_else(|| DateFormatError::UnknownDirective {
                            format: source.to_string(),
                            directive: d,
                        })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Directive(directive));
                }
                _ => return Err(DateFormatError::Unsupported(source.to_string())),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        let strftime = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.replace('%', "%%"),
                Segment::Directive(d) => d.strftime().to_string(),
            })
            .collect();

        Ok(Self {
            source: source.to_string(),
            segments,
            strftime,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Equivalent chrono strftime pattern.
    pub fn strftime(&self) -> &str {
        &self.strftime
    }

    /// Regular expression fragment matching dates in this format.
    ///
    /// The fragment contains no capturing groups; callers wrap it in their
    /// own group.
    pub fn to_regex(&self) -> String {
        let body: String = self
            .segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => regex::escape(text),
                Segment::Directive(d) => d.regex().to_string(),
            })
            .collect();
        format!("(?:{})", body)
    }

    pub fn format(&self, value: &DateTime<FixedOffset>) -> Result<String, DateFormatError> {
        let mut out = String::new();
        write!(out, "{}", value.format(&self.strftime))
            .map_err(|_| DateFormatError::Format(self.source.clone()))?;
        Ok(out)
    }

    /// Parse a wire string. Missing time fields default to midnight and a
    /// missing offset defaults to UTC.
    pub fn parse_value(&self, input: &str) -> Result<DateTime<FixedOffset>, DateFormatError> {
        let err = || DateFormatError::Parse {
            input: input.to_string(),
            format: self.source.clone(),
        };

        let mut parsed = Parsed::new();
        parse(&mut parsed, input, StrftimeItems::new(&self.strftime)).map_err(|_| err())?;

        let date = parsed.to_naive_date().map_err(|_| err())?;
        let time = parsed.to_naive_time().unwrap_or_else(|_| NaiveTime::default());
        let offset = parsed.to_fixed_offset().unwrap_or_else(|_| Utc.fix());

        offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .ok_or_else(err)
    }
}

impl Default for DateFormat {
    fn default() -> Self {
        Self {
            source: DEFAULT_DATE_FORMAT.to_string(),
            segments: vec![
                Segment::Directive(Directive::Year),
                Segment::Literal("-".into()),
                Segment::Directive(Directive::Month),
                Segment::Literal("-".into()),
                Segment::Directive(Directive::Day),
                Segment::Literal(" ".into()),
                Segment::Directive(Directive::Hour),
                Segment::Literal(":".into()),
                Segment::Directive(Directive::Minute),
                Segment::Literal(":".into()),
                Segment::Directive(Directive::Second),
            ],
            strftime: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl std::fmt::Display for DateFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
