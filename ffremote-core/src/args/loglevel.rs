use tracing::level_filters::LevelFilter;

/// Log filter matching the transcoder's own `-v`/`-loglevel` value, if any.
///
/// The last occurrence wins and flag prefixes such as `repeat+level+` are
/// ignored.
pub fn log_level(args: &[String]) -> Option<LevelFilter> {
    let index = args.iter().rposition(|arg| arg == "-v" || arg == "-loglevel")?;
    let value = args.get(index + 1)?.as_str();
    let level = value.rsplit('+').next().unwrap_or(value);
    match level {
        "quiet" | "-8" => Some(LevelFilter::OFF),
        "panic" | "0" | "fatal" | "8" | "error" | "16" => Some(LevelFilter::ERROR),
        "warning" | "24" => Some(LevelFilter::WARN),
        "info" | "32" | "verbose" | "40" => Some(LevelFilter::INFO),
        "debug" | "48" => Some(LevelFilter::DEBUG),
        "trace" | "56" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn last_occurrence_wins() {
        assert_eq!(
            log_level(&args(&["-v", "quiet", "-loglevel", "debug"])),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(log_level(&args(&["-v", "repeat+level+24"])), Some(LevelFilter::WARN));
        assert_eq!(log_level(&args(&["-v", "loud"])), None);
        assert_eq!(log_level(&args(&["-i", "a.mp4"])), None);
    }

    #[test]
    fn trailing_flag_without_value_yields_nothing() {
        assert_eq!(log_level(&args(&["-v", "debug", "-v"])), None);
        assert_eq!(log_level(&args(&["-loglevel", "info", "-loglevel"])), None);
    }
}
