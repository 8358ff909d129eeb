//! Terminus topology and per-terminus status.
//!
//! Rail routes are registered under the endpoints named in their long name.
//! Several lines share inner-city route associations, so a closure alert is
//! only applied to a terminus when its text can be tied to that terminus.

use chrono::DateTime;
use chrono_tz::Tz;
use gtfs_realtime::Alert;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use utoipa::ToSchema;

use super::alerts::{classify, combined_text, reason, AlertClass};
use crate::config::{ForcedTerminus, RailReplacement, TerminusConfig};
use crate::schedule::ScheduleSnapshot;

lazy_static! {
    static ref TO_DELIMITER: Regex = Regex::new(r"(?i)\s+to\s+").unwrap();
    static ref VIA_DELIMITER: Regex = Regex::new(r"(?i)\s+via\s+").unwrap();
}

/// Endpoint names in a route long name. The first delimiter that matches
/// decides the split: " - ", " to ", "/", then " via ".
pub fn split_endpoints(long_name: &str) -> Vec<String> {
    let long_name = long_name.trim();
    if long_name.is_empty() {
        return Vec::new();
    }

    let tokens: Vec<&str> = if long_name.contains(" - ") {
        long_name.split(" - ").collect()
    } else if TO_DELIMITER.is_match(long_name) {
        TO_DELIMITER.split(long_name).collect()
    } else if long_name.contains('/') {
        long_name.split('/').collect()
    } else if VIA_DELIMITER.is_match(long_name) {
        VIA_DELIMITER.split(long_name).collect()
    } else {
        vec![long_name]
    };

    let tokens: Vec<&str> = tokens
        .into_iter()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect();

    match tokens.as_slice() {
        [] => Vec::new(),
        [only] => vec![only.to_string()],
        [first, .., last] => vec![first.to_string(), last.to_string()],
    }
}

/// Terminus name -> route ids registered under it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminusTopology {
    termini: BTreeMap<String, BTreeSet<String>>,
}

impl TerminusTopology {
    pub fn build(snapshot: &ScheduleSnapshot, forced: &[ForcedTerminus]) -> Self {
        let mut topology = TerminusTopology::default();

        for route in snapshot.routes().filter(|route| route.mode().is_rail()) {
            for endpoint in split_endpoints(route.long_name()) {
                topology.register(&endpoint, &route.route_id);
            }
        }

        for entry in forced {
            match snapshot.routes_by_short_name(&entry.route_short_name) {
                Some(route_ids) => {
                    for route_id in route_ids {
                        topology.register(&entry.terminus, route_id);
                    }
                }
                None => debug!(
                    route_short_name = %entry.route_short_name,
                    terminus = %entry.terminus,
                    "Forced terminus route not in schedule"
                ),
            }
        }

        topology
    }

    /// Registrations only ever add
    pub fn register(&mut self, terminus: &str, route_id: &str) {
        self.termini
            .entry(terminus.to_string())
            .or_default()
            .insert(route_id.to_string());
    }

    #[cfg(test)]
    pub fn routes_for(&self, terminus: &str) -> Option<&BTreeSet<String>> {
        self.termini.get(terminus)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.termini.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.termini.len()
    }
}

/// Decides whether a closure alert can be tied to a given terminus
#[derive(Debug, Clone, Default)]
pub struct RelevanceGuard {
    /// (keyword, termini), all lower-cased
    line_keywords: Vec<(String, Vec<String>)>,
    network_wide_phrases: Vec<String>,
}

impl RelevanceGuard {
    pub fn from_config(config: &TerminusConfig) -> Self {
        let mut line_keywords: Vec<(String, Vec<String>)> = config
            .line_keywords
            .iter()
            .map(|(keyword, termini)| {
                (
                    keyword.to_lowercase(),
                    termini.iter().map(|t| t.to_lowercase()).collect(),
                )
            })
            .collect();
        line_keywords.sort();

        Self {
            line_keywords,
            network_wide_phrases: config
                .network_wide_phrases
                .iter()
                .map(|phrase| phrase.to_lowercase())
                .collect(),
        }
    }

    /// `text_lower` must already be lower-cased
    pub fn accepts(&self, terminus: &str, text_lower: &str) -> bool {
        let terminus = terminus.to_lowercase();
        if text_lower.contains(&terminus) {
            return true;
        }
        let keyword_match = self.line_keywords.iter().any(|(keyword, termini)| {
            text_lower.contains(keyword.as_str()) && termini.iter().any(|t| *t == terminus)
        });
        keyword_match
            || self
                .network_wide_phrases
                .iter()
                .any(|phrase| text_lower.contains(phrase.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminusState {
    Closed,
    /// Active alert that is not a closure
    Incident,
    /// Only upcoming alerts
    Pending,
    Operational,
    /// Alert feed unavailable this cycle
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReplacementService {
    pub route_short_name: String,
    pub description: String,
    pub operating_today: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TerminusStatus {
    pub terminus: String,
    pub state: TerminusState,
    pub reasons: Vec<String>,
    pub route_ids: Vec<String>,
    pub replacements: Vec<ReplacementService>,
}

fn push_unique(reasons: &mut Vec<String>, reason: Option<String>) {
    if let Some(reason) = reason {
        if !reasons.contains(&reason) {
            reasons.push(reason);
        }
    }
}

fn status_for(
    terminus: &str,
    route_ids: &BTreeSet<String>,
    route_alerts: &HashMap<String, Vec<Alert>>,
    guard: &RelevanceGuard,
    now: DateTime<Tz>,
) -> TerminusStatus {
    // Reasons in the order the scan meets them
    let mut reasons = Vec::new();
    let (mut closed, mut active, mut upcoming) = (false, false, false);

    'routes: for route_id in route_ids {
        let Some(alerts) = route_alerts.get(route_id) else {
            continue;
        };
        for alert in alerts {
            match classify(alert, route_id, now) {
                AlertClass::Closure => {
                    let text = combined_text(alert).to_lowercase();
                    if guard.accepts(terminus, &text) {
                        push_unique(&mut reasons, reason(alert));
                        closed = true;
                        break 'routes;
                    }
                    debug!(terminus, route_id = %route_id, "Closure not tied to terminus, ignoring");
                }
                AlertClass::Active => {
                    active = true;
                    push_unique(&mut reasons, reason(alert));
                }
                AlertClass::Upcoming => {
                    upcoming = true;
                    push_unique(&mut reasons, reason(alert));
                }
                AlertClass::Unknown => {}
            }
        }
    }

    let state = if closed {
        TerminusState::Closed
    } else if active {
        TerminusState::Incident
    } else if upcoming {
        TerminusState::Pending
    } else {
        TerminusState::Operational
    };

    TerminusStatus {
        terminus: terminus.to_string(),
        state,
        reasons,
        route_ids: route_ids.iter().cloned().collect(),
        replacements: Vec::new(),
    }
}

/// One status per terminus, ordered by terminus name
pub fn compute_snapshot(
    topology: &TerminusTopology,
    route_alerts: &HashMap<String, Vec<Alert>>,
    guard: &RelevanceGuard,
    now: DateTime<Tz>,
) -> Vec<TerminusStatus> {
    topology
        .iter()
        .map(|(terminus, route_ids)| status_for(terminus, route_ids, route_alerts, guard, now))
        .collect()
}

/// Every terminus in state `Unknown`, for cycles where alerts could not be read
pub fn unknown_snapshot(topology: &TerminusTopology) -> Vec<TerminusStatus> {
    topology
        .iter()
        .map(|(terminus, route_ids)| TerminusStatus {
            terminus: terminus.clone(),
            state: TerminusState::Unknown,
            reasons: Vec::new(),
            route_ids: route_ids.iter().cloned().collect(),
            replacements: Vec::new(),
        })
        .collect()
}

/// Attach configured replacement services to closed termini
pub fn attach_replacements(
    statuses: &mut [TerminusStatus],
    replacements: &[RailReplacement],
    snapshot: &ScheduleSnapshot,
    operating_today: &BTreeSet<String>,
) {
    for status in statuses
        .iter_mut()
        .filter(|status| status.state == TerminusState::Closed)
    {
        status.replacements = replacements
            .iter()
            .filter(|r| r.terminus.eq_ignore_ascii_case(&status.terminus))
            .map(|r| ReplacementService {
                route_short_name: r.route_short_name.clone(),
                description: r.description.clone(),
                operating_today: snapshot
                    .routes_by_short_name(&r.route_short_name)
                    .is_some_and(|ids| ids.iter().any(|id| operating_today.contains(id))),
            })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::test_fixtures::{brisbane, date, snapshot, tables_with, STOP_TIMES, TRIPS};
    use crate::schedule::ScheduleSnapshot;
    use crate::services::alerts::test_alerts::alert;

    const HOUR: i64 = 3600;

    fn guard() -> RelevanceGuard {
        let mut config = TerminusConfig::default();
        config
            .line_keywords
            .insert("Gold Coast line".to_string(), vec!["Varsity Lakes".to_string()]);
        RelevanceGuard::from_config(&config)
    }

    #[test]
    fn test_split_endpoints() {
        assert_eq!(split_endpoints("Varsity Lakes - Airport"), vec!["Varsity Lakes", "Airport"]);
        assert_eq!(split_endpoints("Ferny Grove to Beenleigh"), vec!["Ferny Grove", "Beenleigh"]);
        assert_eq!(split_endpoints("Shorncliffe/Roma Street"), vec!["Shorncliffe", "Roma Street"]);
        assert_eq!(split_endpoints("Doomben via Bowen Hills"), vec!["Doomben", "Bowen Hills"]);
        assert_eq!(split_endpoints("Caboolture - Central - Ipswich"), vec!["Caboolture", "Ipswich"]);
        assert_eq!(split_endpoints("Exhibition"), vec!["Exhibition"]);
        // " to " must be a whole word
        assert_eq!(split_endpoints("Toowong/Tennyson"), vec!["Toowong", "Tennyson"]);
        // Higher priority delimiter wins even when a later one also matches
        assert_eq!(split_endpoints("Redcliffe - Brisbane via Petrie"), vec!["Redcliffe", "Brisbane via Petrie"]);
        assert!(split_endpoints("  ").is_empty());
    }

    #[test]
    fn test_topology_from_rail_routes() {
        let topology = TerminusTopology::build(&snapshot(), &[]);
        assert_eq!(
            topology.routes_for("Airport"),
            Some(&BTreeSet::from(["GCR".to_string()]))
        );
        assert_eq!(
            topology.routes_for("Varsity Lakes"),
            Some(&BTreeSet::from(["GCR".to_string()]))
        );
        assert!(topology.routes_for("Roma Street").is_some());
        // Bus and tram routes are not termini unless forced
        assert!(topology.routes_for("Broadbeach South").is_none());
        assert_eq!(topology.len(), 6);
    }

    #[test]
    fn test_registrations_are_additive() {
        let routes = format!(
            "{}{}",
            crate::schedule::test_fixtures::ROUTES,
            "BNR,BNR,Beenleigh - Roma Street,,2\n"
        );
        let snapshot = ScheduleSnapshot::build(tables_with(&routes, TRIPS, STOP_TIMES)).unwrap();
        let topology = TerminusTopology::build(&snapshot, &[]);
        assert_eq!(
            topology.routes_for("Beenleigh"),
            Some(&BTreeSet::from(["BNR", "FGR"].map(String::from)))
        );
        assert_eq!(
            topology.routes_for("Roma Street"),
            Some(&BTreeSet::from(["BNR", "SHR"].map(String::from)))
        );
    }

    #[test]
    fn test_forced_termini() {
        let forced = vec![
            ForcedTerminus {
                route_short_name: "GLKN".to_string(),
                terminus: "G:link".to_string(),
            },
            ForcedTerminus {
                route_short_name: "NOPE".to_string(),
                terminus: "Nowhere".to_string(),
            },
        ];
        let topology = TerminusTopology::build(&snapshot(), &forced);
        assert_eq!(
            topology.routes_for("G:link"),
            Some(&BTreeSet::from(["GLKN".to_string()]))
        );
        assert!(topology.routes_for("Nowhere").is_none());
    }

    #[test]
    fn test_closure_guard_keeps_shared_route_terminus_open() {
        let now = brisbane(2026, 3, 4, 12, 0);
        let ts = now.timestamp();
        let topology = TerminusTopology::build(&snapshot(), &[]);
        let route_alerts = HashMap::from([(
            "GCR".to_string(),
            vec![alert("Gold Coast line track closure", "", &["GCR"], Some((ts - HOUR, Some(ts + HOUR))))],
        )]);

        let statuses = compute_snapshot(&topology, &route_alerts, &guard(), now);
        let by_name: HashMap<&str, &TerminusStatus> =
            statuses.iter().map(|s| (s.terminus.as_str(), s)).collect();

        assert_eq!(by_name["Varsity Lakes"].state, TerminusState::Closed);
        assert_eq!(by_name["Varsity Lakes"].reasons, vec!["Gold Coast line track closure"]);
        assert_eq!(by_name["Airport"].state, TerminusState::Operational);
        assert!(by_name["Airport"].reasons.is_empty());
        assert_eq!(by_name["Ferny Grove"].state, TerminusState::Operational);
    }

    #[test]
    fn test_terminus_name_and_network_phrase_pass_guard() {
        let now = brisbane(2026, 3, 4, 12, 0);
        let ts = now.timestamp();
        let topology = TerminusTopology::build(&snapshot(), &[]);

        let named = HashMap::from([(
            "GCR".to_string(),
            vec![alert("No trains to Airport", "", &[], Some((ts - HOUR, None)))],
        )]);
        let statuses = compute_snapshot(&topology, &named, &guard(), now);
        let airport = statuses.iter().find(|s| s.terminus == "Airport").unwrap();
        assert_eq!(airport.state, TerminusState::Closed);
        let varsity = statuses.iter().find(|s| s.terminus == "Varsity Lakes").unwrap();
        assert_eq!(varsity.state, TerminusState::Operational);

        let network = HashMap::from([(
            "FGR".to_string(),
            vec![alert("Track closure on all lines", "", &[], Some((ts - HOUR, None)))],
        )]);
        let statuses = compute_snapshot(&topology, &network, &guard(), now);
        for terminus in ["Ferny Grove", "Beenleigh"] {
            let status = statuses.iter().find(|s| s.terminus == terminus).unwrap();
            assert_eq!(status.state, TerminusState::Closed);
        }
    }

    #[test]
    fn test_reasons_keep_scan_order() {
        let now = brisbane(2026, 3, 4, 12, 0);
        let ts = now.timestamp();
        let topology = TerminusTopology::build(&snapshot(), &[]);
        let route_alerts = HashMap::from([(
            "FGR".to_string(),
            vec![
                alert("Weekend works", "", &[], Some((ts + 24 * HOUR, None))),
                alert("Delays of up to 15 minutes", "", &[], Some((ts - HOUR, None))),
                alert("No trains to Ferny Grove", "", &[], Some((ts - HOUR, None))),
                alert("Lift outage", "", &[], Some((ts - HOUR, None))),
            ],
        )]);

        let statuses = compute_snapshot(&topology, &route_alerts, &guard(), now);
        let ferny = statuses.iter().find(|s| s.terminus == "Ferny Grove").unwrap();
        assert_eq!(ferny.state, TerminusState::Closed);
        assert_eq!(
            ferny.reasons,
            vec!["Weekend works", "Delays of up to 15 minutes", "No trains to Ferny Grove"]
        );
    }

    #[test]
    fn test_incident_and_pending_states() {
        let now = brisbane(2026, 3, 4, 12, 0);
        let ts = now.timestamp();
        let topology = TerminusTopology::build(&snapshot(), &[]);
        let route_alerts = HashMap::from([
            (
                "FGR".to_string(),
                vec![
                    alert("Delays of up to 15 minutes", "", &[], Some((ts - HOUR, None))),
                    alert("Delays of up to 15 minutes", "Repeated", &[], Some((ts - HOUR, None))),
                    alert("Weekend works", "", &[], Some((ts + 24 * HOUR, None))),
                ],
            ),
            (
                "SHR".to_string(),
                vec![alert("Weekend works", "", &[], Some((ts + 24 * HOUR, None)))],
            ),
        ]);

        let statuses = compute_snapshot(&topology, &route_alerts, &guard(), now);
        let ferny = statuses.iter().find(|s| s.terminus == "Ferny Grove").unwrap();
        assert_eq!(ferny.state, TerminusState::Incident);
        assert_eq!(ferny.reasons, vec!["Delays of up to 15 minutes", "Weekend works"]);

        let shorncliffe = statuses.iter().find(|s| s.terminus == "Shorncliffe").unwrap();
        assert_eq!(shorncliffe.state, TerminusState::Pending);

        let names: Vec<&str> = statuses.iter().map(|s| s.terminus.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_unknown_snapshot() {
        let topology = TerminusTopology::build(&snapshot(), &[]);
        let statuses = unknown_snapshot(&topology);
        assert_eq!(statuses.len(), topology.len());
        assert!(statuses.iter().all(|s| s.state == TerminusState::Unknown));
    }

    #[test]
    fn test_replacements_attach_to_closed_termini() {
        let snapshot = snapshot();
        let mut statuses = vec![
            TerminusStatus {
                terminus: "Varsity Lakes".to_string(),
                state: TerminusState::Closed,
                reasons: vec!["Track closure".to_string()],
                route_ids: vec!["GCR".to_string()],
                replacements: Vec::new(),
            },
            TerminusStatus {
                terminus: "Airport".to_string(),
                state: TerminusState::Operational,
                reasons: Vec::new(),
                route_ids: vec!["GCR".to_string()],
                replacements: Vec::new(),
            },
        ];
        let replacements = vec![
            RailReplacement {
                terminus: "varsity lakes".to_string(),
                route_short_name: "RBS1".to_string(),
                description: "Buses replace trains".to_string(),
            },
            RailReplacement {
                terminus: "Airport".to_string(),
                route_short_name: "RBS9".to_string(),
                description: String::new(),
            },
        ];

        // Easter Monday: holiday service runs RBS1
        let operating = snapshot.routes_operating_on(date(2026, 4, 6));
        attach_replacements(&mut statuses, &replacements, &snapshot, &operating);
        assert_eq!(
            statuses[0].replacements,
            vec![ReplacementService {
                route_short_name: "RBS1".to_string(),
                description: "Buses replace trains".to_string(),
                operating_today: true,
            }]
        );
        assert!(statuses[1].replacements.is_empty());

        let operating = snapshot.routes_operating_on(date(2026, 3, 4));
        attach_replacements(&mut statuses, &replacements, &snapshot, &operating);
        assert!(!statuses[0].replacements[0].operating_today);
    }
}
