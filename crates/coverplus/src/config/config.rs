use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use super::diagnostics::format_diagnostics;
use super::diagnostics::ConfigError;
use super::diagnostics::Diagnostic;
use super::diagnostics::SourceInfo;
use super::diagnostics::Warning;
use super::partial::PartialApiConfig;
use super::partial::PartialBackendsConfig;
use super::partial::PartialConfig;
use super::partial::PartialCoverConfig;
use super::partial::PartialSchedulerConfig;
use crate::cover::slugify;
use crate::cover::Axis;
use crate::cover::CoverSettings;
use crate::cover::TiltPolicy;

const OPEN_TIME_SEC: (i64, i64) = (1, 3600);
const TILT_TIME_MS: (i64, i64) = (100, 60_000);
const TICK_INTERVAL_MS: (i64, i64) = (10, 1000);
const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
const DEFAULT_TOLERANCE: f64 = 0.5;
const MAX_TOLERANCE: f64 = 5.0;

#[derive(Debug)]
pub struct Config {
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub backends: BackendsConfig,
    pub covers: Vec<CoverConfig>,
}

// LogLevel needs Deserialize because it's used in PartialLoggingConfig with toml::Spanned
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: LogLevel,

    /// Per-target levels, e.g. `"coverplus::cover" = "debug"`
    pub overrides: BTreeMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build the subscriber filter for this configuration
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound between two ticks of a moving cover
    pub tick_interval: Duration,

    /// Distance to a phase target that counts as arrived
    pub tolerance: f64,

    /// Where last known positions are kept across restarts
    pub state_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            tolerance: DEFAULT_TOLERANCE,
            state_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiConfig {
    pub listen: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1".to_string(),
            port: 8566,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendsConfig {
    pub mqtt: Option<MqttBackendConfig>,
    pub log: Option<LogBackendConfig>,
}

/// Real covers reached through an MQTT bridge such as Zigbee2MQTT
#[derive(Debug, Clone, PartialEq)]
pub struct MqttBackendConfig {
    /// MQTT broker hostname or IP address
    pub broker: String,

    /// MQTT broker port
    pub port: u16,

    /// MQTT client ID
    pub client_id: String,

    /// Commands go to `<base_topic>/<object_id>/set` (default: "zigbee2mqtt")
    pub base_topic: String,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,
}

/// Dry-run backend that only logs the commands it would send
#[derive(Debug, Clone, PartialEq)]
pub struct LogBackendConfig {
    pub enabled: bool,
}

/// A validated virtual cover
#[derive(Debug, Clone, PartialEq)]
pub struct CoverConfig {
    /// `cover.<slug of name>`
    pub cover_id: String,
    pub name: String,
    pub real_entity_id: String,
    pub unique_id: String,
    pub open_time: Duration,
    pub tilt_time: Duration,
    pub trace_ticks: bool,
    pub tilt_policy: TiltPolicy,
}

impl CoverConfig {
    /// Object id of the real cover, the part after `cover.`
    pub fn real_object_id(&self) -> &str {
        self.real_entity_id
            .split_once('.')
            .map(|(_, object_id)| object_id)
            .unwrap_or(&self.real_entity_id)
    }

    /// Runtime settings for the orchestrator
    pub fn settings(&self, scheduler: &SchedulerConfig) -> CoverSettings {
        CoverSettings {
            cover_id: self.cover_id.clone(),
            name: self.name.clone(),
            real_entity_id: self.real_entity_id.clone(),
            unique_id: self.unique_id.clone(),
            position_axis: Axis::new(self.open_time),
            tilt_axis: Axis::new(self.tilt_time),
            tick_interval: scheduler.tick_interval,
            tolerance: scheduler.tolerance,
            tilt_policy: self.tilt_policy,
            trace_ticks: self.trace_ticks,
        }
    }
}

/// Settings read once at startup; a reload cannot change them
#[derive(Debug, Clone, PartialEq)]
pub struct StartupSettings {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub backends: BackendsConfig,
    pub state_file: Option<PathBuf>,
}

impl StartupSettings {
    /// Sections of `other` that differ from these settings
    pub fn changed_sections(&self, other: &StartupSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.logging != other.logging {
            changed.push("logging");
        }
        if self.api != other.api {
            changed.push("api");
        }
        if self.backends != other.backends {
            changed.push("backends");
        }
        if self.state_file != other.state_file {
            changed.push("scheduler.state_file");
        }
        changed
    }
}

impl Config {
    /// The part of this configuration that only takes effect on restart
    pub fn startup_settings(&self) -> StartupSettings {
        StartupSettings {
            logging: self.logging.clone(),
            api: self.api.clone(),
            backends: self.backends.clone(),
            state_file: self.scheduler.state_file.clone(),
        }
    }

    /// Load and validate a configuration file
    ///
    /// Returns Ok((Config, diagnostics)) where diagnostics contains warnings
    /// and any per-cover errors (those covers are left out). Errors outside
    /// `[[covers]]` fail the whole load.
    pub fn from_file(path: &Path) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let partial = PartialConfig::from_file(path)?;
        Self::from_partial(partial)
    }

    /// Convert a PartialConfig to a Config, validating all fields
    pub fn from_partial(partial: PartialConfig) -> Result<(Self, Vec<Diagnostic>), ConfigError> {
        let mut diagnostics = Vec::new();
        let source = partial.source.clone();
        let empty = partial.is_empty();

        if empty {
            let file_path = source
                .as_ref()
                .map(|s| s.file_path.clone())
                .unwrap_or_else(|| PathBuf::from("<unknown>"));
            diagnostics.push(Diagnostic::Warning(Warning::EmptyConfig { file_path }));
        }

        // Convert logging config
        let logging = if let Some(partial_logging) = partial.logging {
            LoggingConfig {
                level: partial_logging
                    .level
                    .map(|s| *s.get_ref())
                    .unwrap_or_default(),
                overrides: partial_logging
                    .overrides
                    .map(|hm| hm.into_iter().map(|(k, v)| (k, *v.get_ref())).collect())
                    .unwrap_or_default(),
            }
        } else {
            LoggingConfig::default()
        };

        let scheduler = Self::validate_scheduler(partial.scheduler, &source, &mut diagnostics);
        let api = Self::convert_api(partial.api);
        let backends = Self::validate_backends(partial.backends, &source, &mut diagnostics);

        if !partial.covers.is_empty() && backends.mqtt.is_none() && backends.log.is_none() {
            diagnostics.push(Diagnostic::validation(
                "backends",
                "no motor backend configured; add [backends.mqtt] or [backends.log]",
                None,
                &source,
            ));
        }

        // Global problems make every cover unusable
        if diagnostics.iter().any(|d| d.is_error()) {
            return Err(ConfigError::Invalid(format_diagnostics(&diagnostics)));
        }

        let covers = Self::validate_covers(partial.covers, &source, &mut diagnostics);

        if covers.is_empty() && !empty {
            diagnostics.push(Diagnostic::Warning(Warning::NoCovers));
        }

        Ok((
            Config {
                logging,
                scheduler,
                api,
                backends,
                covers,
            },
            diagnostics,
        ))
    }

    fn validate_scheduler(
        partial: Option<PartialSchedulerConfig>,
        source: &Option<SourceInfo>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> SchedulerConfig {
        let mut scheduler = SchedulerConfig::default();
        let Some(partial) = partial else {
            return scheduler;
        };

        if let Some(interval) = partial.tick_interval_ms {
            let (min, max) = TICK_INTERVAL_MS;
            let value = *interval.get_ref();
            if (min..=max).contains(&value) {
                scheduler.tick_interval = Duration::from_millis(value as u64);
            } else {
                diagnostics.push(Diagnostic::validation(
                    "scheduler.tick_interval_ms",
                    format!("must be between {} and {}, got {}", min, max, value),
                    Some(interval.span()),
                    source,
                ));
            }
        }

        if let Some(tolerance) = partial.tolerance {
            let value = *tolerance.get_ref();
            if value > 0.0 && value <= MAX_TOLERANCE {
                scheduler.tolerance = value;
            } else {
                diagnostics.push(Diagnostic::validation(
                    "scheduler.tolerance",
                    format!("must be greater than 0 and at most {}, got {}", MAX_TOLERANCE, value),
                    Some(tolerance.span()),
                    source,
                ));
            }
        }

        scheduler.state_file = partial.state_file;
        scheduler
    }

    fn convert_api(partial: Option<PartialApiConfig>) -> ApiConfig {
        let defaults = ApiConfig::default();
        match partial {
            Some(api) => ApiConfig {
                listen: api.listen.unwrap_or(defaults.listen),
                port: api.port.unwrap_or(defaults.port),
            },
            None => defaults,
        }
    }

    fn validate_backends(
        partial: Option<PartialBackendsConfig>,
        source: &Option<SourceInfo>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> BackendsConfig {
        let Some(partial) = partial else {
            return BackendsConfig::default();
        };

        let mqtt = partial.mqtt.and_then(|mqtt| {
            let Some(broker) = mqtt.broker else {
                diagnostics.push(Diagnostic::validation(
                    "backends.mqtt.broker",
                    "broker is required",
                    None,
                    source,
                ));
                return None;
            };
            if broker.get_ref().trim().is_empty() {
                diagnostics.push(Diagnostic::validation(
                    "backends.mqtt.broker",
                    "broker must not be empty",
                    Some(broker.span()),
                    source,
                ));
                return None;
            }
            Some(MqttBackendConfig {
                broker: broker.into_inner(),
                port: mqtt.port.unwrap_or(1883),
                client_id: mqtt.client_id.unwrap_or_else(|| "coverplus".to_string()),
                base_topic: mqtt
                    .base_topic
                    .map(|t| t.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| "zigbee2mqtt".to_string()),
                username: mqtt.username,
                password: mqtt.password,
            })
        });

        let log = partial
            .log
            .map(|log| LogBackendConfig {
                enabled: log.enabled.unwrap_or(true),
            })
            .filter(|log| log.enabled);

        if mqtt.is_some() && log.is_some() {
            diagnostics.push(Diagnostic::validation(
                "backends",
                "configure exactly one motor backend, found both mqtt and log",
                None,
                source,
            ));
        }

        BackendsConfig { mqtt, log }
    }

    fn validate_covers(
        partials: Vec<PartialCoverConfig>,
        source: &Option<SourceInfo>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Vec<CoverConfig> {
        let mut covers: Vec<CoverConfig> = Vec::new();
        let mut cover_ids = HashSet::new();
        let mut unique_ids = HashSet::new();

        for (index, partial) in partials.into_iter().enumerate() {
            let mut errors = Vec::new();
            let Some(cover) = Self::validate_cover(index, partial, source, &mut errors) else {
                diagnostics.extend(errors);
                continue;
            };

            if !cover_ids.insert(cover.cover_id.clone()) {
                diagnostics.push(Diagnostic::validation(
                    format!("covers[{}].name", index),
                    format!("'{}' resolves to {}, which is already taken", cover.name, cover.cover_id),
                    None,
                    source,
                ));
                continue;
            }
            if !unique_ids.insert(cover.unique_id.clone()) {
                diagnostics.push(Diagnostic::validation(
                    format!("covers[{}].unique_id", index),
                    format!("unique_id '{}' is already taken", cover.unique_id),
                    None,
                    source,
                ));
                continue;
            }

            covers.push(cover);
        }

        let mut by_real_entity: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for cover in &covers {
            by_real_entity
                .entry(cover.real_entity_id.as_str())
                .or_default()
                .push(cover.cover_id.clone());
        }
        for (real_entity_id, ids) in by_real_entity {
            if ids.len() > 1 {
                diagnostics.push(Diagnostic::Warning(Warning::SharedRealEntity {
                    real_entity_id: real_entity_id.to_string(),
                    covers: ids,
                }));
            }
        }

        covers
    }

    /// Validate one `[[covers]]` entry, collecting every problem it has
    fn validate_cover(
        index: usize,
        partial: PartialCoverConfig,
        source: &Option<SourceInfo>,
        errors: &mut Vec<Diagnostic>,
    ) -> Option<CoverConfig> {
        let field = |name: &str| format!("covers[{}].{}", index, name);

        let name = match partial.name {
            Some(name) if !slugify(name.get_ref()).is_empty() => Some(name.into_inner()),
            Some(name) => {
                errors.push(Diagnostic::validation(
                    field("name"),
                    "name must contain at least one letter or digit",
                    Some(name.span()),
                    source,
                ));
                None
            }
            None => {
                errors.push(Diagnostic::validation(field("name"), "name is required", None, source));
                None
            }
        };

        let real_entity_id = match partial.real_entity_id {
            Some(entity) if is_cover_entity_id(entity.get_ref()) => Some(entity.into_inner()),
            Some(entity) => {
                errors.push(Diagnostic::validation(
                    field("real_entity_id"),
                    format!(
                        "expected an entity id like 'cover.living_room', got '{}'",
                        entity.get_ref()
                    ),
                    Some(entity.span()),
                    source,
                ));
                None
            }
            None => {
                errors.push(Diagnostic::validation(
                    field("real_entity_id"),
                    "real_entity_id is required",
                    None,
                    source,
                ));
                None
            }
        };

        let open_time = ranged(
            partial.open_time_sec,
            OPEN_TIME_SEC,
            &field("open_time_sec"),
            source,
            errors,
        )
        .map(|secs| Duration::from_secs(secs as u64));

        let tilt_time = ranged(
            partial.tilt_time_ms,
            TILT_TIME_MS,
            &field("tilt_time_ms"),
            source,
            errors,
        )
        .map(|ms| Duration::from_millis(ms as u64));

        let unique_id = match partial.unique_id {
            Some(unique_id) if unique_id.get_ref().trim().is_empty() => {
                errors.push(Diagnostic::validation(
                    field("unique_id"),
                    "unique_id must not be empty",
                    Some(unique_id.span()),
                    source,
                ));
                return None;
            }
            Some(unique_id) => Some(unique_id.into_inner()),
            None => None,
        };

        let (name, real_entity_id, open_time, tilt_time) =
            (name?, real_entity_id?, open_time?, tilt_time?);

        Some(CoverConfig {
            cover_id: format!("cover.{}", slugify(&name)),
            unique_id: unique_id
                .unwrap_or_else(|| format!("coverplus:{}:{}", real_entity_id, name)),
            name,
            real_entity_id,
            open_time,
            tilt_time,
            trace_ticks: partial.trace_ticks.unwrap_or(false),
            tilt_policy: partial.tilt_policy.unwrap_or_default(),
        })
    }
}

/// `cover.<object_id>` where the object id is lowercase ASCII, digits and `_`
fn is_cover_entity_id(entity_id: &str) -> bool {
    match entity_id.split_once('.') {
        Some(("cover", object_id)) => {
            !object_id.is_empty()
                && object_id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

/// Required integer field within `min..=max`
fn ranged(
    value: Option<toml::Spanned<i64>>,
    (min, max): (i64, i64),
    field_path: &str,
    source: &Option<SourceInfo>,
    errors: &mut Vec<Diagnostic>,
) -> Option<i64> {
    let Some(value) = value else {
        let name = field_path.rsplit('.').next().unwrap_or(field_path);
        errors.push(Diagnostic::validation(
            field_path,
            format!("{} is required", name),
            None,
            source,
        ));
        return None;
    };
    let v = *value.get_ref();
    if (min..=max).contains(&v) {
        Some(v)
    } else {
        errors.push(Diagnostic::validation(
            field_path,
            format!("must be between {} and {}, got {}", min, max, v),
            Some(value.span()),
            source,
        ));
        None
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    const BASIC: &str = r#"
[logging]
level = "debug"

[logging.overrides]
"coverplus::api" = "warn"

[scheduler]
tick_interval_ms = 250
tolerance = 1.0

[backends.log]

[[covers]]
name = "Living Room"
real_entity_id = "cover.living_room_motor"
open_time_sec = 30
tilt_time_ms = 1200
trace_ticks = true

[[covers]]
name = "Office"
real_entity_id = "cover.office"
unique_id = "office-blinds"
open_time_sec = 20
tilt_time_ms = 750
tilt_policy = "follow_travel"
"#;

    #[test]
    fn test_load_basic_config() {
        let file = write_config(BASIC);
        let result = Config::from_file(file.path());
        assert!(result.is_ok(), "Config loading failed: {:?}", result.err());

        let (config, diagnostics) = result.unwrap();
        assert!(diagnostics.is_empty(), "{}", format_diagnostics(&diagnostics));

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides.get("coverplus::api"),
            Some(&LogLevel::Warn)
        );
        assert_eq!(config.scheduler.tick_interval, Duration::from_millis(250));
        assert_eq!(config.scheduler.tolerance, 1.0);
        assert!(config.backends.log.is_some());
        assert!(config.backends.mqtt.is_none());

        assert_eq!(config.covers.len(), 2);
        let living = &config.covers[0];
        assert_eq!(living.cover_id, "cover.living_room");
        assert_eq!(living.unique_id, "coverplus:cover.living_room_motor:Living Room");
        assert_eq!(living.open_time, Duration::from_secs(30));
        assert_eq!(living.tilt_time, Duration::from_millis(1200));
        assert!(living.trace_ticks);
        assert_eq!(living.tilt_policy, TiltPolicy::Explicit);
        assert_eq!(living.real_object_id(), "living_room_motor");

        let office = &config.covers[1];
        assert_eq!(office.unique_id, "office-blinds");
        assert_eq!(office.open_time, Duration::from_secs(20));
        assert_eq!(office.tilt_time, Duration::from_millis(750));
        assert_eq!(office.tilt_policy, TiltPolicy::FollowTravel);
    }

    #[test]
    fn test_cover_settings_inherit_scheduler() {
        let file = write_config(BASIC);
        let (config, _) = Config::from_file(file.path()).unwrap();
        let settings = config.covers[0].settings(&config.scheduler);
        assert_eq!(settings.tick_interval, Duration::from_millis(250));
        assert_eq!(settings.tolerance, 1.0);
        assert_eq!(settings.position_axis.full_travel(), Duration::from_secs(30));
        assert_eq!(settings.tilt_axis.full_travel(), Duration::from_millis(1200));
    }

    #[test]
    fn test_invalid_cover_is_skipped() {
        let file = write_config(
            r#"
[backends.log]

[[covers]]
name = "Too Slow"
real_entity_id = "cover.slow"
open_time_sec = 7200
tilt_time_ms = 750

[[covers]]
name = "Bad Entity"
real_entity_id = "light.kitchen"
open_time_sec = 20
tilt_time_ms = 50

[[covers]]
name = "Fine"
real_entity_id = "cover.fine"
open_time_sec = 20
tilt_time_ms = 750
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert_eq!(config.covers.len(), 1);
        assert_eq!(config.covers[0].cover_id, "cover.fine");

        let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 3);

        let rendered = format_diagnostics(&diagnostics);
        assert!(rendered.contains("covers[0].open_time_sec"));
        assert!(rendered.contains("must be between 1 and 3600, got 7200"));
        assert!(rendered.contains("covers[1].real_entity_id"));
        assert!(rendered.contains("covers[1].tilt_time_ms"));
    }

    #[test]
    fn test_missing_required_fields() {
        let file = write_config(
            r#"
[backends.log]

[[covers]]
open_time_sec = 10
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert!(config.covers.is_empty());
        let rendered = format_diagnostics(&diagnostics);
        assert!(rendered.contains("name is required"));
        assert!(rendered.contains("real_entity_id is required"));
        assert!(rendered.contains("tilt_time_ms is required"));
    }

    #[test]
    fn test_missing_travel_times_skip_cover() {
        let file = write_config(
            r#"
[backends.log]

[[covers]]
name = "Hall"
real_entity_id = "cover.hall"

[[covers]]
name = "Study"
real_entity_id = "cover.study"
open_time_sec = 25
tilt_time_ms = 900
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert_eq!(config.covers.len(), 1);
        assert_eq!(config.covers[0].cover_id, "cover.study");

        let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
        assert_eq!(errors.len(), 2);
        let rendered = format_diagnostics(&diagnostics);
        assert!(rendered.contains("covers[0].open_time_sec"));
        assert!(rendered.contains("open_time_sec is required"));
        assert!(rendered.contains("covers[0].tilt_time_ms"));
        assert!(rendered.contains("tilt_time_ms is required"));
    }

    #[test]
    fn test_duplicate_cover_id_rejected() {
        let file = write_config(
            r#"
[backends.log]

[[covers]]
name = "Patio"
real_entity_id = "cover.patio_left"
open_time_sec = 20
tilt_time_ms = 750

[[covers]]
name = "patio"
real_entity_id = "cover.patio_right"
open_time_sec = 20
tilt_time_ms = 750
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert_eq!(config.covers.len(), 1);
        assert_eq!(config.covers[0].real_entity_id, "cover.patio_left");
        assert!(format_diagnostics(&diagnostics).contains("already taken"));
    }

    #[test]
    fn test_shared_real_entity_warns() {
        let file = write_config(
            r#"
[backends.log]

[[covers]]
name = "Patio Left"
real_entity_id = "cover.patio"
open_time_sec = 20
tilt_time_ms = 750

[[covers]]
name = "Patio Right"
real_entity_id = "cover.patio"
open_time_sec = 20
tilt_time_ms = 750
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert_eq!(config.covers.len(), 2);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
        insta::assert_snapshot!(
            format_diagnostics(&diagnostics),
            @"Warning: 'cover.patio' is driven by several covers (cover.patio_left, cover.patio_right); they will interfere"
        );
    }

    #[test]
    fn test_scheduler_out_of_range_fails_load() {
        let file = write_config(
            r#"
[scheduler]
tick_interval_ms = 5
tolerance = 0.0
"#,
        );

        let err = Config::from_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("scheduler.tick_interval_ms"));
        assert!(err.contains("scheduler.tolerance"));
    }

    #[test]
    fn test_covers_without_backend_fail_load() {
        let file = write_config(
            r#"
[[covers]]
name = "Office"
real_entity_id = "cover.office"
"#,
        );

        let err = Config::from_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("no motor backend configured"));
    }

    #[test]
    fn test_two_backends_fail_load() {
        let file = write_config(
            r#"
[backends.log]

[backends.mqtt]
broker = "localhost"
"#,
        );

        let err = Config::from_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("exactly one motor backend"));
    }

    #[test]
    fn test_mqtt_backend_defaults() {
        let file = write_config(
            r#"
[backends.mqtt]
broker = "mqtt.local"
base_topic = "z2m/"
"#,
        );

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        let mqtt = config.backends.mqtt.unwrap();
        assert_eq!(mqtt.broker, "mqtt.local");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.client_id, "coverplus");
        assert_eq!(mqtt.base_topic, "z2m");
        assert!(mqtt.username.is_none());

        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].is_warning());
    }

    #[test]
    fn test_empty_config_file() {
        let file = write_config("");

        let (config, diagnostics) = Config::from_file(file.path()).unwrap();
        assert_eq!(diagnostics.len(), 1, "Expected 1 warning for empty config");
        assert!(diagnostics[0].is_warning());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.scheduler.tick_interval, Duration::from_millis(100));
        assert_eq!(config.api.port, 8566);
        assert!(config.covers.is_empty());
    }

    #[test]
    fn test_missing_file_error() {
        let missing_path = PathBuf::from("/nonexistent/coverplus.toml");

        let result = Config::from_file(&missing_path);
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Failed to read"));
        assert!(err_msg.contains("/nonexistent/coverplus.toml"));
    }

    #[test]
    fn test_syntax_error_fails_load() {
        let file = write_config("[[covers]\nname = ");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_logging_targets() {
        let logging = LoggingConfig {
            level: LogLevel::Warn,
            overrides: BTreeMap::from([("coverplus::cover".to_string(), LogLevel::Trace)]),
        };
        let targets = logging.targets();
        assert!(targets.would_enable("coverplus::cover::scheduler", &tracing::Level::TRACE));
        assert!(!targets.would_enable("coverplus::api", &tracing::Level::INFO));
        assert!(targets.would_enable("coverplus::api", &tracing::Level::WARN));
    }

    #[test]
    fn test_startup_settings_changes() {
        let file = write_config(BASIC);
        let (config, _) = Config::from_file(file.path()).unwrap();
        let running = config.startup_settings();
        assert!(running.changed_sections(&config.startup_settings()).is_empty());

        let mut edited = config.startup_settings();
        edited.backends.log = None;
        edited.backends.mqtt = Some(MqttBackendConfig {
            broker: "mqtt.local".to_string(),
            port: 1883,
            client_id: "coverplus".to_string(),
            base_topic: "zigbee2mqtt".to_string(),
            username: None,
            password: None,
        });
        edited.state_file = Some(PathBuf::from("/var/lib/coverplus/state.json"));
        assert_eq!(
            running.changed_sections(&edited),
            vec!["backends", "scheduler.state_file"]
        );
    }

    #[test]
    fn test_entity_id_shape() {
        assert!(is_cover_entity_id("cover.living_room_2"));
        assert!(!is_cover_entity_id("cover."));
        assert!(!is_cover_entity_id("light.kitchen"));
        assert!(!is_cover_entity_id("cover.Living Room"));
        assert!(!is_cover_entity_id("living_room"));
    }
}
