//! Deterministic risk scorer for appointment no-show prediction.
//!
//! Rule-based (v1). No ML - fully auditable and explainable. Each factor
//! produces a signal in [0, 1]; the weighted sum is the final score.
//!
//! Thresholds:
//!     0.00 – 0.29  →  low
//!     0.30 – 0.59  →  medium
//!     0.60 – 1.00  →  high

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Timelike, Utc, Weekday};
use shared_types::{Appointment, RiskLevel, RiskResult};

const W_NO_SHOW_HISTORY: f64 = 0.40;
const W_FIRST_VISIT: f64 = 0.15;
const W_LEAD_TIME: f64 = 0.15;
const W_TIME_OF_DAY: f64 = 0.10;
const W_DAY_OF_WEEK: f64 = 0.10;
const W_CONTACT: f64 = 0.10;

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn level_for(score: f64) -> RiskLevel {
    if score < 0.3 {
        RiskLevel::Low
    } else if score < 0.6 {
        RiskLevel::Medium
    } else {
        RiskLevel::High
    }
}

/// Accept RFC 3339 instants and naive local timestamps alike; feeds are not
/// consistent about offsets.
pub(crate) fn parse_instant(iso: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(iso) {
        return Some(dt);
    }
    NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|naive| naive.and_local_timezone(FixedOffset::east_opt(0)?).single())
}

/// Deterministic no-show risk scorer.
///
/// Factors:
///     1. No-show history   - strongest predictor (weight 0.40)
///     2. First visit       - new patients no-show 15-25 % more (0.15)
///     3. Lead time         - same-day and very-far-out are riskier (0.15)
///     4. Time of day       - early morning / late afternoon (0.10)
///     5. Day of week       - Monday / Friday (0.10)
///     6. Contact available - unreachable patients are riskier (0.10)
#[derive(Debug, Default, Clone)]
pub struct RiskScorer;

impl RiskScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score an appointment for no-show risk against the current wall clock.
    pub fn score(&self, appointment: &Appointment) -> RiskResult {
        self.score_at(appointment, Utc::now())
    }

    /// Score against an explicit `now` - the pure core of the scorer.
    pub fn score_at(&self, appointment: &Appointment, now: DateTime<Utc>) -> RiskResult {
        let mut factors = BTreeMap::new();

        let history = match appointment.previous_no_shows {
            0 => 0.0,
            1 => 0.5,
            2 => 0.75,
            _ => 1.0,
        };
        factors.insert("no_show_history".to_string(), history);

        let first_visit = if appointment.is_first_visit { 0.6 } else { 0.0 };
        factors.insert("first_visit".to_string(), first_visit);

        let parsed = parse_instant(&appointment.scheduled_at);

        let lead_time = match parsed {
            Some(scheduled) => {
                let days =
                    (scheduled.with_timezone(&Utc) - now).num_seconds() as f64 / 86_400.0;
                if days < 1.0 {
                    0.7
                } else if days < 3.0 {
                    0.3
                } else if days > 14.0 {
                    0.5
                } else {
                    0.1
                }
            }
            None => 0.3,
        };
        factors.insert("lead_time".to_string(), lead_time);

        let time_of_day = match parsed {
            Some(scheduled) => {
                let hour = scheduled.hour();
                if !(9..17).contains(&hour) {
                    0.6
                } else if hour < 11 {
                    0.2
                } else {
                    0.1
                }
            }
            None => 0.3,
        };
        factors.insert("time_of_day".to_string(), time_of_day);

        let day_of_week = match parsed {
            Some(scheduled) => match scheduled.weekday() {
                Weekday::Mon | Weekday::Fri => 0.6,
                Weekday::Sat | Weekday::Sun => 0.4,
                _ => 0.1,
            },
            None => 0.3,
        };
        factors.insert("day_of_week".to_string(), day_of_week);

        let has_phone = !appointment.patient_phone.is_empty();
        let has_whatsapp = appointment.patient_whatsapp;
        let contact = if has_phone && has_whatsapp {
            0.0
        } else if has_phone || has_whatsapp {
            0.3
        } else {
            0.8
        };
        factors.insert("contact".to_string(), contact);

        let raw = W_NO_SHOW_HISTORY * history
            + W_FIRST_VISIT * first_visit
            + W_LEAD_TIME * lead_time
            + W_TIME_OF_DAY * time_of_day
            + W_DAY_OF_WEEK * day_of_week
            + W_CONTACT * contact;
        let score = clamp01(round4(raw));

        RiskResult {
            score,
            level: level_for(score),
            factors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        // A Wednesday, mid-morning UTC.
        Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap()
    }

    fn appointment(previous_no_shows: u32) -> Appointment {
        Appointment {
            appointment_id: "APT-1".to_string(),
            patient_id: "PAT-1".to_string(),
            clinic_id: "CL-1".to_string(),
            // One week out, a Wednesday at 10:00.
            scheduled_at: "2026-03-18T10:00:00+00:00".to_string(),
            treatment_type: String::new(),
            is_first_visit: false,
            previous_no_shows,
            patient_phone: "+34600000000".to_string(),
            patient_whatsapp: true,
            consent_given: true,
        }
    }

    #[test]
    fn zero_history_reachable_patient_is_low_risk() {
        let result = RiskScorer::new().score_at(&appointment(0), fixed_now());
        assert_eq!(result.level, RiskLevel::Low);
        assert!(result.score < 0.3);
    }

    #[test]
    fn heavy_history_first_visit_unreachable_is_high_risk() {
        let mut appt = appointment(5);
        appt.is_first_visit = true;
        // Monday, early morning, same week.
        appt.scheduled_at = "2026-03-16T08:00:00+00:00".to_string();
        appt.patient_phone = String::new();
        appt.patient_whatsapp = false;
        let result = RiskScorer::new().score_at(&appt, fixed_now());
        assert_eq!(result.level, RiskLevel::High);
        assert!(result.score >= 0.6);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        for n in 0..6 {
            let result = RiskScorer::new().score_at(&appointment(n), fixed_now());
            assert!((0.0..=1.0).contains(&result.score));
        }
    }

    #[test]
    fn all_factors_populated() {
        let result = RiskScorer::new().score_at(&appointment(2), fixed_now());
        let keys: Vec<&str> = result.factors.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "contact",
                "day_of_week",
                "first_visit",
                "lead_time",
                "no_show_history",
                "time_of_day",
            ]
        );
    }

    #[test]
    fn unparseable_instant_uses_neutral_signals() {
        let mut appt = appointment(0);
        appt.scheduled_at = "not-a-date".to_string();
        let result = RiskScorer::new().score_at(&appt, fixed_now());
        assert_eq!(result.factors["lead_time"], 0.3);
        assert_eq!(result.factors["time_of_day"], 0.3);
        assert_eq!(result.factors["day_of_week"], 0.3);
    }

    #[test]
    fn naive_timestamps_are_accepted() {
        let mut appt = appointment(0);
        appt.scheduled_at = "2026-03-18T10:00:00".to_string();
        let result = RiskScorer::new().score_at(&appt, fixed_now());
        assert_eq!(result.factors["time_of_day"], 0.2);
    }

    #[test]
    fn score_is_monotonic_in_no_show_count() {
        let scorer = RiskScorer::new();
        let scores: Vec<f64> = (0..5)
            .map(|n| scorer.score_at(&appointment(n), fixed_now()).score)
            .collect();
        for pair in scores.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn level_is_pure_function_of_score() {
        assert_eq!(level_for(0.0), RiskLevel::Low);
        assert_eq!(level_for(0.2999), RiskLevel::Low);
        assert_eq!(level_for(0.3), RiskLevel::Medium);
        assert_eq!(level_for(0.5999), RiskLevel::Medium);
        assert_eq!(level_for(0.6), RiskLevel::High);
        assert_eq!(level_for(1.0), RiskLevel::High);
    }
}
