//! Domain error types.

/// Top-level error type for klinetrader.
#[derive(Debug, thiserror::Error)]
pub enum KlinetraderError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("no {timeframe} data for {instrument}")]
    NoData {
        instrument: String,
        timeframe: String,
    },

    #[error("invalid {timeframe} series for {instrument}: {reason}")]
    InvalidSeries {
        instrument: String,
        timeframe: String,
        reason: String,
    },

    #[error("insufficient balance: need {required:.4}, have {available:.4}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("position already open for {instrument}")]
    DuplicatePosition { instrument: String },

    #[error("position for {instrument} has already been added to")]
    AlreadyAdded { instrument: String },

    #[error("no open position for {instrument}")]
    PositionNotOpen { instrument: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KlinetraderError {
    /// Invariant violations abort a run; everything else is either a
    /// market condition or a startup failure.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            KlinetraderError::DuplicatePosition { .. }
                | KlinetraderError::AlreadyAdded { .. }
                | KlinetraderError::PositionNotOpen { .. }
        )
    }
}

impl From<&KlinetraderError> for std::process::ExitCode {
    fn from(err: &KlinetraderError) -> Self {
        let code: u8 = match err {
            KlinetraderError::Io(_) => 1,
            KlinetraderError::ConfigParse { .. }
            | KlinetraderError::ConfigMissing { .. }
            | KlinetraderError::ConfigInvalid { .. } => 2,
            KlinetraderError::Database { .. } | KlinetraderError::DatabaseQuery { .. } => 3,
            KlinetraderError::InsufficientBalance { .. }
            | KlinetraderError::DuplicatePosition { .. }
            | KlinetraderError::AlreadyAdded { .. }
            | KlinetraderError::PositionNotOpen { .. } => 4,
            KlinetraderError::NoData { .. } | KlinetraderError::InvalidSeries { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
