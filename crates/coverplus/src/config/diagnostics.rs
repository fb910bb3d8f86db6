use std::ops::Range;
use std::path::PathBuf;

/// Source information for where a diagnostic came from
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub file_path: PathBuf,
    pub content: String,
}

/// A diagnostic message that can be either a warning or an error
#[derive(Debug, Clone)]
pub enum Diagnostic {
    Warning(Warning),
    Error(Error),
}

/// Warning messages that don't prevent config loading
#[derive(Debug, Clone)]
pub enum Warning {
    EmptyConfig {
        file_path: PathBuf,
    },
    NoCovers,
    /// Several virtual covers drive the same real cover and will fight over it
    SharedRealEntity {
        real_entity_id: String,
        covers: Vec<String>,
    },
    /// A reload saw a change that only applies after a restart
    RestartRequired {
        section: &'static str,
    },
}

/// Error messages that indicate problems with the config
#[derive(Debug, Clone)]
pub enum Error {
    Validation(ValidationError),
}

/// Error type for validation failures
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field_path: String,
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source: Option<SourceInfo>,
}

/// Error type for config loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read '{}': {error}", .path.display())]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("Failed to parse '{}': {error}", .path.display())]
    Parse {
        path: PathBuf,
        error: toml::de::Error,
    },

    /// Validation failed; the payload is the rendered diagnostics
    #[error("{0}")]
    Invalid(String),
}

impl Diagnostic {
    /// Returns true if this diagnostic is an error
    pub fn is_error(&self) -> bool {
        matches!(self, Diagnostic::Error(_))
    }

    /// Returns true if this diagnostic is a warning
    pub fn is_warning(&self) -> bool {
        matches!(self, Diagnostic::Warning(_))
    }

    pub(super) fn validation(
        field_path: impl Into<String>,
        message: impl Into<String>,
        span: Option<Range<usize>>,
        source: &Option<SourceInfo>,
    ) -> Self {
        Diagnostic::Error(Error::Validation(ValidationError {
            field_path: field_path.into(),
            message: message.into(),
            span,
            source: source.clone(),
        }))
    }
}

/// Format all diagnostics for display using Ariadne
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    use ariadne::Color;
    use ariadne::Label;
    use ariadne::Report;
    use ariadne::ReportKind;
    use ariadne::Source;

    let mut output = Vec::new();

    for diagnostic in diagnostics {
        match diagnostic {
            Diagnostic::Warning(warning) => {
                let warning_msg = match warning {
                    Warning::EmptyConfig { file_path } => format!(
                        "Warning: Config file '{}' is empty and has no effect\n",
                        file_path.display()
                    ),
                    Warning::NoCovers => "Warning: No covers configured\n".to_string(),
                    Warning::SharedRealEntity {
                        real_entity_id,
                        covers,
                    } => format!(
                        "Warning: '{}' is driven by several covers ({}); they will interfere\n",
                        real_entity_id,
                        covers.join(", ")
                    ),
                    Warning::RestartRequired { section } => format!(
                        "Warning: '{}' changed; restart coverplus to apply it\n",
                        section
                    ),
                };
                output.extend_from_slice(warning_msg.as_bytes());
            }
            Diagnostic::Error(Error::Validation(validation_error)) => {
                match (&validation_error.span, &validation_error.source) {
                    (Some(span), Some(source)) => {
                        let file_id = source.file_path.to_string_lossy().to_string();
                        Report::build(ReportKind::Error, (file_id.clone(), span.clone()))
                            .with_config(ariadne::Config::default().with_color(false))
                            .with_message(format!(
                                "Validation error in '{}'",
                                validation_error.field_path
                            ))
                            .with_label(
                                Label::new((file_id.clone(), span.clone()))
                                    .with_message(&validation_error.message)
                                    .with_color(Color::Red),
                            )
                            .finish()
                            .write((file_id, Source::from(&source.content)), &mut output)
                            .ok();
                    }
                    _ => {
                        let error_msg = format!(
                            "Validation error in '{}': {}\n",
                            validation_error.field_path, validation_error.message
                        );
                        output.extend_from_slice(error_msg.as_bytes());
                    }
                }
            }
        }
    }

    String::from_utf8_lossy(&output).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_warnings() {
        let diagnostics = vec![
            Diagnostic::Warning(Warning::NoCovers),
            Diagnostic::Warning(Warning::SharedRealEntity {
                real_entity_id: "cover.patio".to_string(),
                covers: vec!["cover.left".to_string(), "cover.right".to_string()],
            }),
        ];

        insta::assert_snapshot!(format_diagnostics(&diagnostics), @r"
        Warning: No covers configured
        Warning: 'cover.patio' is driven by several covers (cover.left, cover.right); they will interfere
        ");
    }

    #[test]
    fn test_format_validation_without_source() {
        let diagnostics = vec![Diagnostic::validation(
            "covers[0].name",
            "name is required",
            None,
            &None,
        )];

        insta::assert_snapshot!(
            format_diagnostics(&diagnostics),
            @"Validation error in 'covers[0].name': name is required"
        );
    }

    #[test]
    fn test_format_validation_points_at_source() {
        let content = "[[covers]]\nopen_time_sec = 0\n".to_string();
        let start = content.find('0').unwrap();
        let source = Some(SourceInfo {
            file_path: PathBuf::from("coverplus.toml"),
            content,
        });
        let diagnostics = vec![Diagnostic::validation(
            "covers[0].open_time_sec",
            "must be between 1 and 3600",
            Some(start..start + 1),
            &source,
        )];

        let rendered = format_diagnostics(&diagnostics);
        assert!(rendered.contains("Validation error in 'covers[0].open_time_sec'"));
        assert!(rendered.contains("must be between 1 and 3600"));
        assert!(rendered.contains("coverplus.toml"));
        assert!(rendered.contains("open_time_sec = 0"));
    }

    #[test]
    fn test_diagnostic_kind() {
        assert!(Diagnostic::Warning(Warning::NoCovers).is_warning());
        assert!(Diagnostic::validation("x", "y", None, &None).is_error());
    }
}
