//! Printf-style wire formats.
//!
//! A wire format is a single-argument printf template such as `%d`,
//! `%+.3e` or `POS=%08.2f`. Every conversion in the template formats the
//! same value. Supported conversions are `d x X o` (integers),
//! `f e E g G` (floating point), `c` (char), `b B` (boolean) and `s S`
//! (any value), with the flags `- + 0 space #`, a width and a precision.
//! `%%` and `%n` produce a literal percent sign and a newline.

use crate::parameter::ParameterKind;
use crate::value::ParameterValue;

/// Errors raised while parsing or applying a wire format.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireFormatError {
    #[error("unterminated conversion in \"{0}\"")]
    Unterminated(String),

    #[error("unsupported conversion '%{conversion}' in \"{format}\"")]
    Unsupported { format: String, conversion: char },

    #[error("conversion '%{conversion}' cannot format a {value} value")]
    Incompatible {
        conversion: char,
        value: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alternate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    kind: char,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Conversion(Conversion),
}

/// A parsed printf-style template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireFormat {
    source: String,
    segments: Vec<Segment>,
}

impl WireFormat {
    /// Parse a template.
    pub fn parse(source: &str) -> Result<Self, WireFormatError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            let mut flags = Flags::default();
            let mut width: Option<usize> = None;
            let mut precision: Option<usize> = None;

            // Explicit argument index (`%1$d`) is accepted and ignored.
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            if chars.peek() == Some(&'$') {
                chars.next();
                digits.clear();
            } else if digits.starts_with('0') {
                flags.zero = true;
                digits = digits.trim_start_matches('0').to_string();
            }

            if digits.is_empty() {
                while let Some(f) = chars.peek().copied() {
                    match f {
                        '-' => flags.left = true,
                        '+' => flags.plus = true,
                        ' ' => flags.space = true,
                        '0' => flags.zero = true,
                        '#' => flags.alternate = true,
                        _ => break,
                    }
                    chars.next();
                }
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
            }
            if !digits.is_empty() {
                width = digits.parse().ok();
            }

            if chars.peek() == Some(&'.') {
                chars.next();
                let mut p = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    p.push(d);
                    chars.next();
                }
                precision = Some(p.parse().unwrap_or(0));
            }

            let kind = chars
                .next()
                .ok_or_else(|| WireFormatError::Unterminated(source.to_string()))?;
            match kind {
                '%' => literal.push('%'),
                'n' => literal.push('\n'),
                'd' | 'x' | 'X' | 'o' | 'f' | 'e' | 'E' | 'g' | 'G' | 's' | 'S' | 'c' | 'b'
                | 'B' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Conversion(Conversion {
                        flags,
                        width,
                        precision,
                        kind,
                    }));
                }
                other => {
                    return Err(WireFormatError::Unsupported {
                        format: source.to_string(),
                        conversion: other,
                    });
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The template text as written in the schema.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check that every conversion can format values of `kind`.
    pub fn check_kind(&self, kind: ParameterKind) -> Result<(), WireFormatError> {
        for segment in &self.segments {
            if let Segment::Conversion(conv) = segment {
                let ok = match conv.kind {
                    'd' | 'x' | 'X' | 'o' => kind.is_integer(),
                    'f' | 'e' | 'E' | 'g' | 'G' => kind.is_floating(),
                    'c' => kind == ParameterKind::Char,
                    'b' | 'B' => kind == ParameterKind::Boolean,
                    _ => true,
                };
                if !ok {
                    return Err(WireFormatError::Incompatible {
                        conversion: conv.kind,
                        value: kind.name(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Format `value` with this template.
    pub fn apply(&self, value: &ParameterValue) -> Result<String, WireFormatError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Conversion(conv) => out.push_str(&format_one(conv, value)?),
            }
        }
        Ok(out)
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn format_one(conv: &Conversion, value: &ParameterValue) -> Result<String, WireFormatError> {
    let incompatible = || WireFormatError::Incompatible {
        conversion: conv.kind,
        value: value.type_name(),
    };

    let (negative, body, prefix) = match conv.kind {
        'd' => {
            let v = value.as_i64().ok_or_else(incompatible)?;
            (v < 0, v.unsigned_abs().to_string(), "")
        }
        'x' | 'X' | 'o' => {
            let bits = match value {
                ParameterValue::Byte(v) => u64::from(*v as u8),
                ParameterValue::Int(v) => u64::from(*v as u32),
                ParameterValue::Long(v) => *v as u64,
                _ => return Err(incompatible()),
            };
            match conv.kind {
                'o' => (false, format!("{:o}", bits), if conv.flags.alternate { "0" } else { "" }),
                'X' => (false, format!("{:X}", bits), if conv.flags.alternate { "0X" } else { "" }),
                _ => (false, format!("{:x}", bits), if conv.flags.alternate { "0x" } else { "" }),
            }
        }
        'f' | 'e' | 'E' | 'g' | 'G' => {
            let v = match value {
                ParameterValue::Float(v) => f64::from(*v),
                ParameterValue::Double(v) => *v,
                _ => return Err(incompatible()),
            };
            let upper = conv.kind.is_ascii_uppercase();
            let body = if v.is_nan() {
                "NaN".to_string()
            } else if v.is_infinite() {
                "Infinity".to_string()
            } else {
                let precision = conv.precision.unwrap_or(6);
                match conv.kind.to_ascii_lowercase() {
                    'f' => format!("{:.*}", precision, v.abs()),
                    'e' => scientific(v.abs(), precision, upper),
                    _ => general(v.abs(), precision, upper),
                }
            };
            (v.is_sign_negative() && !v.is_nan() && v != 0.0, body, "")
        }
        'c' => {
            let c = value.as_char().ok_or_else(incompatible)?;
            return Ok(pad(conv, c.to_string()));
        }
        'b' | 'B' => {
            let b = value.as_bool().ok_or_else(incompatible)?;
            let text = if conv.kind == 'B' {
                b.to_string().to_uppercase()
            } else {
                b.to_string()
            };
            return Ok(pad(conv, truncate(text, conv.precision)));
        }
        _ => {
            let text = truncate(value.to_string(), conv.precision);
            let text = if conv.kind == 'S' {
                text.to_uppercase()
            } else {
                text
            };
            return Ok(pad(conv, text));
        }
    };

    let sign = if negative {
        "-"
    } else if conv.flags.plus {
        "+"
    } else if conv.flags.space {
        " "
    } else {
        ""
    };

    let len = sign.len() + prefix.len() + body.chars().count();
    let width = conv.width.unwrap_or(0);
    if width > len && conv.flags.zero && !conv.flags.left {
        let zeros = "0".repeat(width - len);
        return Ok(format!("{}{}{}{}", sign, prefix, zeros, body));
    }
    Ok(pad(conv, format!("{}{}{}", sign, prefix, body)))
}

fn truncate(text: String, precision: Option<usize>) -> String {
    match precision {
        Some(p) if text.chars().count() > p => text.chars().take(p).collect(),
        _ => text,
    }
}

fn pad(conv: &Conversion, text: String) -> String {
    let width = conv.width.unwrap_or(0);
    let len = text.chars().count();
    if width <= len {
        return text;
    }
    let fill = " ".repeat(width - len);
    if conv.flags.left {
        format!("{}{}", text, fill)
    } else {
        format!("{}{}", fill, text)
    }
}

/// `d.ddddde+xx` with at least two exponent digits.
fn scientific(v: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, v);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    let out = format!("{}e{}{:02}", mantissa, sign, exp.abs());
    if upper {
        out.to_uppercase()
    } else {
        out
    }
}

/// Fixed notation when the rounded value lies in `[1e-4, 10^precision)`,
/// scientific otherwise.
fn general(v: f64, precision: usize, upper: bool) -> String {
    let p = precision.max(1);
    if v == 0.0 {
        return format!("{:.*}", p - 1, v);
    }
    let rounded = format!("{:.*e}", p - 1, v);
    let exp: i32 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp >= -4 && exp < p as i32 {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        format!("{:.*}", decimals, v)
    } else {
        scientific(v, p - 1, upper)
    }
}
