//! Error type shared by the codec, pool, sequencers and automation

/// Errors raised by Tempera Remote.
///
/// Everything except `Midi`, `PortNotFound`, `Config` and `Io` is a contract
/// violation by the caller and is reported synchronously.
#[derive(Debug, thiserror::Error)]
pub enum TemperaError {
    #[error("{what} must be in range {min}..={max}, got {value}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("cannot specify both bpm and step_duration")]
    ConflictingTiming,

    #[error("invalid timing: {0}")]
    InvalidTiming(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid command payload: {0}")]
    InvalidCommand(#[from] serde_json::Error),

    #[error("invalid control target: {0}")]
    InvalidTarget(String),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("MIDI output port '{0}' not found")]
    PortNotFound(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TemperaError>;

/// Check that `value` lies in `min..=max`.
pub(crate) fn check_range<T>(what: &'static str, value: T, min: T, max: T) -> Result<T>
where
    T: Copy + PartialOrd + Into<i64>,
{
    if value < min || value > max {
        return Err(TemperaError::OutOfRange {
            what,
            value: value.into(),
            min: min.into(),
            max: max.into(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range_bounds() {
        assert_eq!(check_range("emitter", 1u8, 1, 4).unwrap(), 1);
        assert_eq!(check_range("emitter", 4u8, 1, 4).unwrap(), 4);
        assert!(check_range("emitter", 0u8, 1, 4).is_err());
        assert!(check_range("emitter", 5u8, 1, 4).is_err());
    }

    #[test]
    fn test_out_of_range_message() {
        let err = check_range("column", 9u8, 1, 8).unwrap_err();
        assert_eq!(err.to_string(), "column must be in range 1..=8, got 9");
    }
}
