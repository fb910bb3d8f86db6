/// Errors surfaced by the cover command/query contract
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("{field} must be between 0 and 100, got {value}")]
    Validation { field: &'static str, value: f64 },

    #[error("cover not found: {0}")]
    NotFound(String),

    #[error("cover {0} is not running")]
    Unavailable(String),
}

impl CoverError {
    /// Check an optional axis argument against the 0..=100 range.
    ///
    /// NaN is rejected as well, since it is not contained in any range.
    pub fn check_range(field: &'static str, value: Option<f64>) -> Result<(), CoverError> {
        match value {
            Some(v) if !(0.0..=100.0).contains(&v) => Err(CoverError::Validation { field, value: v }),
            _ => Ok(()),
        }
    }
}
