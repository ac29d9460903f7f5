use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Unified error type for the engine.
///
/// `Param` is caller-facing and recoverable, `Config` is a construction-time
/// wiring failure that poisons the handle, `Value` is an in-stream invariant
/// violation that poisons the current `calc()`.  Mutating already-consumed
/// data without a retroactor installed is not an `Error` at all: it indicates
/// a construction bug and panics.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid parameter value or malformed request data.
    #[error("invalid parameter: {0}")]
    Param(String),

    /// Operator graph could not be wired (missing stream, type clash, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// A validator or strict zip tripped over inconsistent stream data.
    #[error("value error: {0}")]
    Value(String),

    /// An error decorated with the operator it was raised in.
    #[error("{operator}: {source}")]
    In {
        operator: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn param(msg: impl Into<String>) -> Self {
        Error::Param(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn value(msg: impl Into<String>) -> Self {
        Error::Value(msg.into())
    }

    /// Wraps the error with the name of the operator it surfaced in.
    pub fn in_operator(self, operator: impl Into<String>) -> Self {
        Error::In {
            operator: operator.into(),
            source: Box::new(self),
        }
    }

    /// True if the root cause is a parameter error, looking through
    /// operator decorations.
    pub fn is_param(&self) -> bool {
        match self {
            Error::Param(_) => true,
            Error::In { source, .. } => source.is_param(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoration_preserves_root_cause() {
        let err = Error::param("bad lag")
            .in_operator("EmaOperator")
            .in_operator("MacdOperator");
        assert!(err.is_param());
        assert_eq!(
            err.to_string(),
            "MacdOperator: EmaOperator: invalid parameter: bad lag"
        );
    }

    #[test]
    fn value_errors_are_not_param() {
        assert!(!Error::value("out of sequence").is_param());
    }
}
