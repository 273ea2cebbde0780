// Error types for the search layer.
//
// Grammar problems pass through unchanged as `SearchError::Grammar`; I/O,
// JSON and image codec failures wrap their source errors. The only error the
// search algorithms raise themselves is a raster size mismatch between a
// rendered candidate and the target, which would make the metric meaningless.
//
// See also: `procbuild_grammar::error` for `GrammarError`.

use procbuild_grammar::GrammarError;
use thiserror::Error;

/// Search errors.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image size mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for search operations.
pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_errors_keep_their_message() {
        let inner = GrammarError::Eval("division by zero".into());
        let msg = inner.to_string();
        let err: SearchError = inner.into();
        assert_eq!(err.to_string(), msg);
    }

    #[test]
    fn dimension_mismatch_reports_both_sizes() {
        let err = SearchError::DimensionMismatch {
            expected_width: 256,
            expected_height: 256,
            width: 128,
            height: 64,
        };
        assert_eq!(
            err.to_string(),
            "Image size mismatch: expected 256x256, got 128x64"
        );
    }
}
