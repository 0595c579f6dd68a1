use crate::error::LoadError;

/// Parse an `after` key into a millisecond delay.
///
/// Accepts a bare integer (`"500"`, milliseconds) or a duration literal of
/// the form `NN(ms|s|m|h)` (`"30s"`, `"2m"`, `"1h"`).
pub fn parse_duration(raw: &str) -> Result<u64, LoadError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(LoadError::MalformedDuration(raw.to_string()));
    }

    if let Ok(ms) = raw.parse::<u64>() {
        return Ok(ms);
    }

    let (num_part, unit, multiplier) = if let Some(n) = raw.strip_suffix("ms") {
        (n, "ms", 1u64)
    } else if let Some(n) = raw.strip_suffix("h") {
        (n, "h", 3_600_000u64)
    } else if let Some(n) = raw.strip_suffix("m") {
        (n, "m", 60_000u64)
    } else if let Some(n) = raw.strip_suffix("s") {
        (n, "s", 1_000u64)
    } else {
        return Err(LoadError::MalformedDuration(raw.to_string()));
    };
    let _ = unit;

    let n: u64 = num_part
        .parse()
        .map_err(|_| LoadError::MalformedDuration(raw.to_string()))?;
    Ok(n * multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_integer_is_milliseconds() {
        assert_eq!(parse_duration("500").unwrap(), 500);
    }

    #[test]
    fn literal_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), 500);
        assert_eq!(parse_duration("30s").unwrap(), 30_000);
        assert_eq!(parse_duration("2m").unwrap(), 120_000);
        assert_eq!(parse_duration("1h").unwrap(), 3_600_000);
    }

    #[test]
    fn rejects_malformed() {
        assert!(parse_duration("thirty seconds").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("ms").is_err());
    }
}
