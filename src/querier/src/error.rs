use crate::interval::IntervalError;
use crate::query::promql::error::PromQLError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum QuerierError {
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] PromQLError),
    #[error("invalid interval: {0}")]
    Interval(#[from] IntervalError),
    #[error("invalid query request: {0}")]
    InvalidRequest(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response with status code {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("{error_type}: {message}")]
    Api { error_type: String, message: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("{}", join_errors(.0))]
    Combined(Vec<QuerierError>),
}

fn join_errors(errors: &[QuerierError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl QuerierError {
    /// Fold `other` into `self`, flattening nested combined errors.
    pub fn combine(self, other: QuerierError) -> QuerierError {
        let mut errors = match self {
            QuerierError::Combined(errors) => errors,
            err => vec![err],
        };
        match other {
            QuerierError::Combined(more) => errors.extend(more),
            err => errors.push(err),
        }
        QuerierError::Combined(errors)
    }
}

impl From<reqwest::Error> for QuerierError {
    fn from(err: reqwest::Error) -> Self {
        QuerierError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for QuerierError {
    fn from(err: serde_json::Error) -> Self {
        QuerierError::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_flattens() {
        let err = QuerierError::Transport("connection refused".to_string())
            .combine(QuerierError::Cancelled)
            .combine(QuerierError::Decode("eof".to_string()));

        match &err {
            QuerierError::Combined(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected combined error, got {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "transport error: connection refused; query cancelled; failed to decode response: eof"
        );
    }
}
