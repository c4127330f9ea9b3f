//! Validation results for host inputs and structured configurations

/// Outcome of validating one host's inputs or structured config.
///
/// Validation errors fail the host (fatal under `--strict`); deprecation
/// warnings never fail a run.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// Hard validation failures
    pub validation_errors: Vec<String>,

    /// Deprecated-but-accepted input constructs
    pub deprecation_warnings: Vec<String>,
}

impl ValidationResult {
    /// Record a validation error.
    pub fn error(&mut self, message: impl Into<String>) {
        self.validation_errors.push(message.into());
    }

    /// Record a deprecation warning.
    pub fn deprecation(&mut self, message: impl Into<String>) {
        self.deprecation_warnings.push(message.into());
    }

    /// Whether validation failed.
    pub fn failed(&self) -> bool {
        !self.validation_errors.is_empty()
    }

    /// Log every error and warning against the host, the way the build log
    /// reports them.
    pub fn log(&self, hostname: &str) {
        for error in &self.validation_errors {
            tracing::error!("{hostname}: {error}");
        }
        for warning in &self.deprecation_warnings {
            tracing::warn!("{hostname}: {warning}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_passes() {
        let result = ValidationResult::default();
        assert!(!result.failed());
    }

    #[test]
    fn test_error_fails() {
        let mut result = ValidationResult::default();
        result.error("type must be one of spine, l3leaf, l2leaf");
        assert!(result.failed());
        assert_eq!(result.validation_errors.len(), 1);
    }

    #[test]
    fn test_deprecation_does_not_fail() {
        let mut result = ValidationResult::default();
        result.deprecation("evpn_rd is deprecated");
        assert!(!result.failed());
        assert_eq!(result.deprecation_warnings.len(), 1);
    }
}
