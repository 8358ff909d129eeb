use chrono_tz::Tz;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Timezone the static schedule is published in
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    pub schedule: ScheduleConfig,
    pub feeds: FeedConfig,
    /// Seconds between evaluation cycles (alerts + vehicle positions)
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,
    #[serde(default)]
    pub departures: DepartureConfig,
    #[serde(default)]
    pub termini: TerminusConfig,
    /// Both accepted shapes, flattened at load to one (terminus, route,
    /// description) tuple per pairing with duplicates removed
    #[serde(default, deserialize_with = "normalize_replacements")]
    pub rail_replacements: Vec<RailReplacement>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Directory holding the unpacked static schedule tables
    pub directory: PathBuf,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub alerts_url: String,
    pub trip_updates_url: String,
    pub vehicle_positions_url: String,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepartureConfig {
    #[serde(default = "default_departure_count")]
    pub default_count: usize,
    #[serde(default = "default_max_departure_count")]
    pub max_count: usize,
}

impl Default for DepartureConfig {
    fn default() -> Self {
        Self {
            default_count: default_departure_count(),
            max_count: default_max_departure_count(),
        }
    }
}

/// Settings for terminus topology and the closure relevance guard
#[derive(Debug, Clone, Deserialize)]
pub struct TerminusConfig {
    /// Lower-cased line keyword -> termini that keyword identifies
    #[serde(default)]
    pub line_keywords: HashMap<String, Vec<String>>,
    /// Phrases that make a closure apply to every terminus
    #[serde(default = "default_network_wide_phrases")]
    pub network_wide_phrases: Vec<String>,
    /// Non-rail routes reported alongside the rail termini
    #[serde(default)]
    pub forced: Vec<ForcedTerminus>,
}

impl Default for TerminusConfig {
    fn default() -> Self {
        Self {
            line_keywords: HashMap::new(),
            network_wide_phrases: default_network_wide_phrases(),
            forced: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ForcedTerminus {
    pub route_short_name: String,
    pub terminus: String,
}

/// A replacement service for a closed terminus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailReplacement {
    pub terminus: String,
    pub route_short_name: String,
    pub description: String,
}

/// Both shapes found in deployed config files. Route-keyed entries list the
/// termini a bus route covers; terminus-keyed entries list the routes that
/// cover a terminus.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RailReplacementEntry {
    RouteKeyed {
        route: String,
        termini: Vec<String>,
        #[serde(default)]
        description: String,
    },
    TerminusKeyed {
        terminus: String,
        routes: Vec<String>,
        #[serde(default)]
        description: String,
    },
}

impl RailReplacementEntry {
    fn normalize(&self, out: &mut Vec<RailReplacement>) {
        match self {
            RailReplacementEntry::RouteKeyed {
                route,
                termini,
                description,
            } => {
                for terminus in termini {
                    out.push(RailReplacement {
                        terminus: terminus.clone(),
                        route_short_name: route.clone(),
                        description: description.clone(),
                    });
                }
            }
            RailReplacementEntry::TerminusKeyed {
                terminus,
                routes,
                description,
            } => {
                for route in routes {
                    out.push(RailReplacement {
                        terminus: terminus.clone(),
                        route_short_name: route.clone(),
                        description: description.clone(),
                    });
                }
            }
        }
    }
}

fn normalize_replacements<'de, D>(deserializer: D) -> Result<Vec<RailReplacement>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Vec::<RailReplacementEntry>::deserialize(deserializer)?;
    let mut out = Vec::new();
    for entry in &entries {
        entry.normalize(&mut out);
    }
    let mut seen = std::collections::HashSet::new();
    out.retain(|r| seen.insert((r.terminus.clone(), r.route_short_name.clone())));
    Ok(out)
}

fn default_timezone() -> Tz {
    chrono_tz::Australia::Brisbane
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_evaluation_interval() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    24 * 60 * 60
}

fn default_feed_timeout() -> u64 {
    10
}

fn default_departure_count() -> usize {
    8
}

fn default_max_departure_count() -> usize {
    25
}

fn default_network_wide_phrases() -> Vec<String> {
    vec!["all lines".to_string(), "entire network".to_string()]
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
schedule:
  directory: SEQ_GTFS
feeds:
  alerts_url: http://localhost/alerts
  trip_updates_url: http://localhost/trips
  vehicle_positions_url: http://localhost/vehicles
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::parse(MINIMAL).unwrap();
        assert_eq!(config.timezone, chrono_tz::Australia::Brisbane);
        assert_eq!(config.evaluation_interval_secs, 60);
        assert_eq!(config.feeds.timeout_secs, 10);
        assert_eq!(config.departures.default_count, 8);
        assert_eq!(
            config.termini.network_wide_phrases,
            vec!["all lines".to_string(), "entire network".to_string()]
        );
        assert!(config.rail_replacements.is_empty());
    }

    #[test]
    fn test_replacement_shapes_normalized_at_load() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
timezone: Australia/Sydney
rail_replacements:
  - route: RBS1
    termini: [Varsity Lakes, Helensvale]
    description: Buses replace trains south of Beenleigh
  - terminus: Ferny Grove
    routes: [RBS2, RBS3]
  - terminus: Helensvale
    routes: [RBS1]
"#
        );
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.timezone, chrono_tz::Australia::Sydney);

        let replacements = &config.rail_replacements;
        assert_eq!(replacements.len(), 4);
        assert_eq!(
            replacements[0],
            RailReplacement {
                terminus: "Varsity Lakes".to_string(),
                route_short_name: "RBS1".to_string(),
                description: "Buses replace trains south of Beenleigh".to_string(),
            }
        );
        assert_eq!(replacements[2].terminus, "Ferny Grove");
        assert_eq!(replacements[3].route_short_name, "RBS3");
        assert_eq!(replacements[3].description, "");
    }

    #[test]
    fn test_terminus_guard_settings() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
termini:
  line_keywords:
    gold coast line: [Varsity Lakes]
  forced:
    - route_short_name: GLKN
      terminus: G:link
"#
        );
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(
            config.termini.line_keywords.get("gold coast line"),
            Some(&vec!["Varsity Lakes".to_string()])
        );
        assert_eq!(config.termini.forced[0].terminus, "G:link");
        assert_eq!(config.termini.network_wide_phrases.len(), 2);
    }

    #[test]
    fn test_missing_feeds_is_parse_error() {
        let result = Config::parse("schedule:\n  directory: x\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
