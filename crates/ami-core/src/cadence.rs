//! Cadence predicates for optional per-cycle stages (monitor, persist).
//!
//! A [`Cadence`] is the serializable policy from config. A [`CadenceGate`]
//! is its runtime form, evaluated exactly once per orchestration cycle.
//! Gates can also wrap an arbitrary predicate so tests and embedders can
//! inject their own schedule.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Configured cadence policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Fire on every cycle.
    #[default]
    Always,
    /// Never fire.
    Never,
    /// Fire on cycle 0 and every N cycles after it.
    EveryCycles(u64),
    /// Fire on the first cycle, then once at least this long has elapsed
    /// since the last firing ("500ms", "5s", "2m").
    Interval(String),
}

impl Cadence {
    /// Check that the policy can be evaluated.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Cadence::EveryCycles(0) => Err("every_cycles must be at least 1".to_string()),
            Cadence::Interval(s) if parse_duration(s).is_none() => {
                Err(format!("invalid cadence interval: {s}"))
            }
            _ => Ok(()),
        }
    }
}

/// Custom cadence predicate, called with the zero-based cycle number.
pub type CadencePredicate = Box<dyn FnMut(u64) -> bool + Send>;

enum Rule {
    Policy {
        cadence: Cadence,
        interval: Option<Duration>,
        last_fired: Option<Instant>,
    },
    Predicate(CadencePredicate),
}

/// Runtime cadence evaluator.
pub struct CadenceGate {
    rule: Rule,
}

impl CadenceGate {
    pub fn from_policy(cadence: Cadence) -> Self {
        let interval = match &cadence {
            Cadence::Interval(s) => parse_duration(s),
            _ => None,
        };
        Self {
            rule: Rule::Policy {
                cadence,
                interval,
                last_fired: None,
            },
        }
    }

    pub fn from_predicate(predicate: impl FnMut(u64) -> bool + Send + 'static) -> Self {
        Self {
            rule: Rule::Predicate(Box::new(predicate)),
        }
    }

    /// Decide whether the optional stage runs on this cycle.
    pub fn is_due(&mut self, cycle: u64) -> bool {
        self.is_due_at(cycle, Instant::now())
    }

    fn is_due_at(&mut self, cycle: u64, now: Instant) -> bool {
        match &mut self.rule {
            Rule::Predicate(predicate) => predicate(cycle),
            Rule::Policy {
                cadence,
                interval,
                last_fired,
            } => {
                let due = match cadence {
                    Cadence::Always => true,
                    Cadence::Never => false,
                    Cadence::EveryCycles(n) => *n > 0 && cycle % *n == 0,
                    Cadence::Interval(_) => match (*interval, *last_fired) {
                        (Some(_), None) => true,
                        (Some(every), Some(last)) => now.duration_since(last) >= every,
                        (None, _) => false,
                    },
                };
                if due {
                    *last_fired = Some(now);
                }
                due
            }
        }
    }
}

impl fmt::Debug for CadenceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rule {
            Rule::Policy { cadence, .. } => f.debug_tuple("CadenceGate").field(cadence).finish(),
            Rule::Predicate(_) => f.write_str("CadenceGate(<predicate>)"),
        }
    }
}

/// Parse a short duration string: "250ms", "5s", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_and_never() {
        let mut always = CadenceGate::from_policy(Cadence::Always);
        let mut never = CadenceGate::from_policy(Cadence::Never);
        for cycle in 0..5 {
            assert!(always.is_due(cycle));
            assert!(!never.is_due(cycle));
        }
    }

    #[test]
    fn every_n_cycles() {
        let mut gate = CadenceGate::from_policy(Cadence::EveryCycles(3));
        let fired: Vec<u64> = (0..7).filter(|c| gate.is_due(*c)).collect();
        assert_eq!(fired, vec![0, 3, 6]);
    }

    #[test]
    fn interval_fires_first_then_waits() {
        let mut gate = CadenceGate::from_policy(Cadence::Interval("10s".to_string()));
        let start = Instant::now();
        assert!(gate.is_due_at(0, start));
        assert!(!gate.is_due_at(1, start + Duration::from_secs(3)));
        assert!(gate.is_due_at(2, start + Duration::from_secs(10)));
        assert!(!gate.is_due_at(3, start + Duration::from_secs(15)));
    }

    #[test]
    fn predicate_is_injectable() {
        let mut gate = CadenceGate::from_predicate(|cycle| cycle % 2 == 1);
        assert!(!gate.is_due(0));
        assert!(gate.is_due(1));
    }

    #[test]
    fn validate_rejects_zero_and_bad_interval() {
        assert!(Cadence::EveryCycles(0).validate().is_err());
        assert!(Cadence::Interval("soon".to_string()).validate().is_err());
        assert!(Cadence::Interval("500ms".to_string()).validate().is_ok());
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s"), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("invalid"), None);
    }
}
