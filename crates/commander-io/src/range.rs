//! Parameter ranges.
//!
//! Two notations are accepted:
//! - intervals `(lo,hi)`, `[lo,hi]`, `(lo,hi]`, `[lo,hi)`, checked numerically
//! - enumerations `a,b,c`, checked by exact string membership

/// A validated range.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRange {
    Interval {
        lower: f64,
        upper: f64,
        lower_inclusive: bool,
        upper_inclusive: bool,
    },
    Set(Vec<String>),
}

impl ValueRange {
    /// Parse range notation. Returns a description of the problem on failure.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let opens = text.starts_with('(') || text.starts_with('[');
        let closes = text.ends_with(')') || text.ends_with(']');

        if opens || closes || text.contains(['(', ')', '[', ']']) {
            if !(opens && closes) || text.len() < 2 {
                return Err(format!("malformed interval \"{}\"", text));
            }
            let inner = &text[1..text.len() - 1];
            let bounds: Vec<&str> = inner.split(',').collect();
            if bounds.len() != 2 {
                return Err(format!("interval \"{}\" must have exactly two bounds", text));
            }
            let lower: f64 = bounds[0]
                .trim()
                .parse()
                .map_err(|_| format!("lower bound of \"{}\" is not a number", text))?;
            let upper: f64 = bounds[1]
                .trim()
                .parse()
                .map_err(|_| format!("upper bound of \"{}\" is not a number", text))?;
            if lower > upper {
                return Err(format!("lower bound exceeds upper bound in \"{}\"", text));
            }
            return Ok(Self::Interval {
                lower,
                upper,
                lower_inclusive: text.starts_with('['),
                upper_inclusive: text.ends_with(']'),
            });
        }

        if text.contains(',') {
            let items: Vec<String> = text
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect();
            if items.is_empty() {
                return Err(format!("empty list range \"{}\"", text));
            }
            return Ok(Self::Set(items));
        }

        Err(format!(
            "range \"{}\" is neither interval nor list form",
            text
        ))
    }

    pub fn is_interval(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }

    /// Numeric membership test for intervals.
    pub fn contains_number(&self, value: f64) -> bool {
        match self {
            Self::Interval {
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => {
                let above = if *lower_inclusive {
                    value >= *lower
                } else {
                    value > *lower
                };
                let below = if *upper_inclusive {
                    value <= *upper
                } else {
                    value < *upper
                };
                above && below
            }
            Self::Set(items) => items.iter().any(|i| i.parse::<f64>().ok() == Some(value)),
        }
    }

    /// Textual membership test for enumerations.
    pub fn contains_text(&self, value: &str) -> bool {
        match self {
            Self::Set(items) => items.iter().any(|i| i == value),
            Self::Interval { .. } => value
                .trim()
                .parse::<f64>()
                .map(|v| self.contains_number(v))
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Display for ValueRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval {
                lower,
                upper,
                lower_inclusive,
                upper_inclusive,
            } => write!(
                f,
                "{}{},{}{}",
                if *lower_inclusive { '[' } else { '(' },
                lower,
                upper,
                if *upper_inclusive { ']' } else { ')' }
            ),
            Self::Set(items) => f.write_str(&items.join(",")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_endpoints() {
        let closed = ValueRange::parse("[0,10]").unwrap();
        assert!(closed.contains_number(0.0));
        assert!(closed.contains_number(10.0));
        assert!(!closed.contains_number(10.5));

        let open = ValueRange::parse("(0,10)").unwrap();
        assert!(!open.contains_number(0.0));
        assert!(!open.contains_number(10.0));
        assert!(open.contains_number(5.0));

        let half = ValueRange::parse("(0, 10]").unwrap();
        assert!(!half.contains_number(0.0));
        assert!(half.contains_number(10.0));

        let other_half = ValueRange::parse("[-5.5,0)").unwrap();
        assert!(other_half.contains_number(-5.5));
        assert!(!other_half.contains_number(0.0));
        assert!(!other_half.contains_number(-6.0));
    }

    #[test]
    fn test_list_membership() {
        let range = ValueRange::parse("on, off,standby").unwrap();
        assert_eq!(
            range,
            ValueRange::Set(vec!["on".into(), "off".into(), "standby".into()])
        );
        assert!(range.contains_text("off"));
        assert!(range.contains_text("standby"));
        assert!(!range.contains_text("OFF"));
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(ValueRange::parse("[10,0]").is_err());
        assert!(ValueRange::parse("[1,2,3]").is_err());
        assert!(ValueRange::parse("[a,b]").is_err());
        assert!(ValueRange::parse("[1,2").is_err());
        assert!(ValueRange::parse("single").is_err());
    }

    #[test]
    fn test_display_round_trips_notation() {
        assert_eq!(ValueRange::parse("(0,10]").unwrap().to_string(), "(0,10]");
        assert_eq!(ValueRange::parse("a, b").unwrap().to_string(), "a,b");
    }
}
