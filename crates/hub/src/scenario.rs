//! Operator-adjustable scenario: which day it is, which shift is in, how big
//! the class is, which lessons run as half-class groups, and whether the
//! controller is allowed to drive the actuators.
//!
//! Updates arrive as a loosely-typed [`ScenarioUpdate`] (from HTTP or the
//! config file), are validated field by field into a [`ValidatedUpdate`]
//! outside of any lock, and are then applied in a single step.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::Date;

use crate::controller::Mode;

pub const MIN_CLASS_SIZE: u32 = 5;
pub const MAX_CLASS_SIZE: u32 = 40;

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    /// Morning schedule.
    First,
    /// Afternoon schedule.
    Second,
}

impl Shift {
    pub fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }
}

impl TryFrom<i64> for Shift {
    type Error = FieldError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::First),
            2 => Ok(Self::Second),
            other => Err(FieldError::Shift(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    date_override: Option<Date>,
    shift: Shift,
    class_size: u32,
    group_lessons: BTreeSet<u32>,
    auto_mode: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            date_override: None,
            shift: Shift::First,
            class_size: 30,
            group_lessons: BTreeSet::new(),
            auto_mode: true,
        }
    }
}

impl Scenario {
    pub fn date_override(&self) -> Option<Date> {
        self.date_override
    }

    pub fn shift(&self) -> Shift {
        self.shift
    }

    pub fn class_size(&self) -> u32 {
        self.class_size
    }

    /// Whether lesson `index` (1-based) runs with half the class.
    pub fn is_group_lesson(&self, index: u32) -> bool {
        self.group_lessons.contains(&index)
    }

    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    pub fn mode(&self) -> Mode {
        Mode::from_auto_flag(self.auto_mode())
    }

    /// Set the class size, clamped to the supported range.
    pub fn set_class_size(&mut self, size: i64) {
        self.class_size =
            size.clamp(i64::from(MIN_CLASS_SIZE), i64::from(MAX_CLASS_SIZE)) as u32;
    }

    pub fn view(&self) -> ScenarioView {
        ScenarioView {
            date: self.date_override.map(|d| d.to_string()),
            shift: self.shift.number(),
            class_size: self.class_size,
            group_lessons: self.group_lessons.iter().copied().collect(),
            auto: self.auto_mode,
        }
    }
}

/// JSON shape of the scenario in status responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioView {
    pub date: Option<String>,
    pub shift: u8,
    pub class_size: u32,
    pub group_lessons: Vec<u32>,
    pub auto: bool,
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// A scalar as forms and scripts send it. Coercion to the field's real type
/// happens per field in [`ScenarioUpdate::validate`], so one badly typed
/// field never hides the others.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(serde_json::Value),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

impl FieldValue {
    /// Whole numbers, integral floats and numeric strings.
    fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(x) if x.is_finite() && x.fract() == 0.0 => Some(*x as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn invalid(&self, field: &'static str, expected: &'static str) -> FieldError {
        FieldError::Invalid {
            field,
            value: self.to_string(),
            expected,
        }
    }
}

/// Group lessons either as a `"1,3,5"` string or as a list of indices.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum GroupLessons {
    Csv(String),
    List(Vec<u32>),
    Other(serde_json::Value),
}

/// A partial scenario change. Absent fields leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScenarioUpdate {
    /// `YYYY-MM-DD` to pin the calendar date, `"today"` to follow the clock.
    pub date: Option<FieldValue>,
    /// `1`, `2`, `"2"` or a label starting with the shift number.
    pub shift: Option<FieldValue>,
    pub class_size: Option<FieldValue>,
    pub group_lessons: Option<GroupLessons>,
    /// A bool, `0`/`1`, `"on"`/`"off"` style text, or a checklist of values
    /// that switches auto on when it contains `"on"`.
    pub auto: Option<FieldValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("date {0:?} is not a YYYY-MM-DD calendar date")]
    Date(String),
    #[error("shift {0} is not 1 or 2")]
    Shift(i64),
    #[error("{field} {value} is not {expected}")]
    Invalid {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl FieldError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Date(_) => "date",
            Self::Shift(_) => "shift",
            Self::Invalid { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateChange {
    Pin(Date),
    FollowClock,
}

/// The accepted subset of a [`ScenarioUpdate`] plus what was rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedUpdate {
    date: Option<DateChange>,
    shift: Option<Shift>,
    class_size: Option<i64>,
    group_lessons: Option<BTreeSet<u32>>,
    auto: Option<bool>,
    rejected: Vec<FieldError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedField {
    pub field: &'static str,
    pub reason: String,
}

/// Result of applying a scenario update, returned across the API boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub ok: bool,
    pub applied: Vec<&'static str>,
    pub rejected: Vec<RejectedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScenarioUpdate {
    pub fn validate(&self) -> ValidatedUpdate {
        let mut rejected = Vec::new();

        let date = accept(self.date.as_ref().map(coerce_date), &mut rejected).flatten();
        let shift = accept(self.shift.as_ref().map(coerce_shift), &mut rejected);
        let class_size = accept(self.class_size.as_ref().map(coerce_class_size), &mut rejected);
        let group_lessons = accept(
            self.group_lessons.as_ref().map(coerce_group_lessons),
            &mut rejected,
        );
        let auto = accept(self.auto.as_ref().map(coerce_auto), &mut rejected);

        ValidatedUpdate {
            date,
            shift,
            class_size,
            group_lessons,
            auto,
            rejected,
        }
    }
}

fn accept<T>(field: Option<Result<T, FieldError>>, rejected: &mut Vec<FieldError>) -> Option<T> {
    match field? {
        Ok(v) => Some(v),
        Err(e) => {
            rejected.push(e);
            None
        }
    }
}

/// `Ok(None)` for an empty string, which counts as absent.
fn coerce_date(v: &FieldValue) -> Result<Option<DateChange>, FieldError> {
    let FieldValue::Text(s) = v else {
        return Err(v.invalid("date", "a YYYY-MM-DD date or \"today\""));
    };
    match s.trim() {
        "" => Ok(None),
        s if s.eq_ignore_ascii_case("today") => Ok(Some(DateChange::FollowClock)),
        s => parse_date(s).map(|d| Some(DateChange::Pin(d))),
    }
}

fn coerce_shift(v: &FieldValue) -> Result<Shift, FieldError> {
    let number = match v {
        // Labels such as "2 (afternoon)" carry the shift as a prefix.
        FieldValue::Text(s) => {
            let s = s.trim();
            let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            s[..digits].parse().ok()
        }
        other => other.as_integer(),
    };
    match number {
        Some(n) => Shift::try_from(n),
        None => Err(v.invalid("shift", "1 or 2")),
    }
}

fn coerce_class_size(v: &FieldValue) -> Result<i64, FieldError> {
    match v {
        FieldValue::Float(x) if x.is_finite() => Ok(x.trunc() as i64),
        other => other
            .as_integer()
            .ok_or_else(|| other.invalid("class_size", "a whole number")),
    }
}

fn coerce_group_lessons(g: &GroupLessons) -> Result<BTreeSet<u32>, FieldError> {
    match g {
        GroupLessons::Csv(csv) => Ok(parse_group_lessons(csv)),
        GroupLessons::List(list) => Ok(list.iter().copied().collect()),
        GroupLessons::Other(v) => Err(FieldError::Invalid {
            field: "group_lessons",
            value: v.to_string(),
            expected: "a comma-separated string or a list of lesson numbers",
        }),
    }
}

fn coerce_auto(v: &FieldValue) -> Result<bool, FieldError> {
    const EXPECTED: &str = "a bool, 0/1, or on/off";
    match v {
        FieldValue::Bool(b) => Ok(*b),
        FieldValue::Int(0) => Ok(false),
        FieldValue::Int(1) => Ok(true),
        FieldValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" | "1" | "yes" => Ok(true),
            "off" | "false" | "0" | "no" => Ok(false),
            _ => Err(v.invalid("auto", EXPECTED)),
        },
        // Checklist widgets send the list of ticked values.
        FieldValue::Other(serde_json::Value::Array(items)) => {
            Ok(items.iter().any(|i| i.as_str() == Some("on")))
        }
        _ => Err(v.invalid("auto", EXPECTED)),
    }
}

impl ValidatedUpdate {
    pub fn rejected(&self) -> &[FieldError] {
        &self.rejected
    }

    /// Write every accepted field into `scenario`.
    pub fn apply_to(self, scenario: &mut Scenario) -> ApplyOutcome {
        let mut applied = Vec::new();

        if let Some(change) = self.date {
            scenario.date_override = match change {
                DateChange::Pin(d) => Some(d),
                DateChange::FollowClock => None,
            };
            applied.push("date");
        }
        if let Some(shift) = self.shift {
            scenario.shift = shift;
            applied.push("shift");
        }
        if let Some(size) = self.class_size {
            scenario.set_class_size(size);
            applied.push("class_size");
        }
        if let Some(lessons) = self.group_lessons {
            scenario.group_lessons = lessons;
            applied.push("group_lessons");
        }
        if let Some(auto) = self.auto {
            scenario.auto_mode = auto;
            applied.push("auto");
        }

        let rejected: Vec<RejectedField> = self
            .rejected
            .iter()
            .map(|e| RejectedField {
                field: e.field(),
                reason: e.to_string(),
            })
            .collect();

        let error = if rejected.is_empty() {
            None
        } else {
            Some(
                rejected
                    .iter()
                    .map(|r| r.reason.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        };

        ApplyOutcome {
            ok: rejected.is_empty(),
            applied,
            rejected,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_date(s: &str) -> Result<Date, FieldError> {
    Date::parse(s, format_description!("[year]-[month]-[day]"))
        .map_err(|_| FieldError::Date(s.to_string()))
}

/// Parse `"1, 3,x,5"` into `{1, 3, 5}`. Tokens that are not plain digits are
/// dropped.
pub fn parse_group_lessons(csv: &str) -> BTreeSet<u32> {
    csv.split(',')
        .map(str::trim)
        .filter(|tok| !tok.is_empty() && tok.bytes().all(|b| b.is_ascii_digit()))
        .filter_map(|tok| tok.parse().ok())
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn apply(update: ScenarioUpdate) -> (Scenario, ApplyOutcome) {
        let mut scenario = Scenario::default();
        let outcome = update.validate().apply_to(&mut scenario);
        (scenario, outcome)
    }

    // -- Defaults -----------------------------------------------------------

    #[test]
    fn default_scenario() {
        let s = Scenario::default();
        assert_eq!(s.date_override(), None);
        assert_eq!(s.shift(), Shift::First);
        assert_eq!(s.class_size(), 30);
        assert!(s.auto_mode());
        assert_eq!(s.mode(), Mode::Auto);
    }

    // -- Shift --------------------------------------------------------------

    #[test]
    fn shift_three_rejected_and_unchanged() {
        let (s, out) = apply(ScenarioUpdate {
            shift: Some(FieldValue::Int(3)),
            ..Default::default()
        });
        assert_eq!(s.shift(), Shift::First);
        assert!(!out.ok);
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.rejected[0].field, "shift");
        assert!(out.error.unwrap().contains("shift 3"));
    }

    #[test]
    fn shift_two_accepted() {
        let (s, out) = apply(ScenarioUpdate {
            shift: Some(FieldValue::Int(2)),
            ..Default::default()
        });
        assert_eq!(s.shift(), Shift::Second);
        assert!(out.ok);
        assert_eq!(out.applied, vec!["shift"]);
        assert!(out.error.is_none());
    }

    #[test]
    fn shift_zero_and_negative_rejected() {
        for bad in [0, -1, 12] {
            assert_eq!(Shift::try_from(bad), Err(FieldError::Shift(bad)));
        }
    }

    // -- Class size ---------------------------------------------------------

    #[test]
    fn class_size_clamped() {
        let (s, _) = apply(ScenarioUpdate {
            class_size: Some(FieldValue::Int(100)),
            ..Default::default()
        });
        assert_eq!(s.class_size(), MAX_CLASS_SIZE);

        let (s, _) = apply(ScenarioUpdate {
            class_size: Some(FieldValue::Int(1)),
            ..Default::default()
        });
        assert_eq!(s.class_size(), MIN_CLASS_SIZE);

        let (s, out) = apply(ScenarioUpdate {
            class_size: Some(FieldValue::Int(-20)),
            ..Default::default()
        });
        assert_eq!(s.class_size(), MIN_CLASS_SIZE);
        assert!(out.ok);
    }

    // -- Group lessons ------------------------------------------------------

    #[test]
    fn group_lessons_csv_drops_garbage() {
        assert_eq!(
            parse_group_lessons("1, 3,x,5,,-2,+4, 7 "),
            BTreeSet::from([1, 3, 5, 7])
        );
    }

    #[test]
    fn group_lessons_empty_csv_clears() {
        let mut s = Scenario::default();
        ScenarioUpdate {
            group_lessons: Some(GroupLessons::Csv("2".into())),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);
        assert!(s.is_group_lesson(2));

        ScenarioUpdate {
            group_lessons: Some(GroupLessons::Csv(String::new())),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);
        assert!(!s.is_group_lesson(2));
    }

    #[test]
    fn group_lessons_accepts_list_form() {
        let update: ScenarioUpdate =
            serde_json::from_str(r#"{"group_lessons":[2,4]}"#).unwrap();
        let (s, _) = apply(update);
        assert!(s.is_group_lesson(2));
        assert!(s.is_group_lesson(4));
        assert!(!s.is_group_lesson(3));
    }

    // -- Date ---------------------------------------------------------------

    #[test]
    fn date_pins_override() {
        let (s, out) = apply(ScenarioUpdate {
            date: Some("2025-10-05".into()),
            ..Default::default()
        });
        assert_eq!(s.date_override(), Some(date!(2025 - 10 - 05)));
        assert_eq!(out.applied, vec!["date"]);
    }

    #[test]
    fn today_clears_override() {
        let mut s = Scenario::default();
        ScenarioUpdate {
            date: Some("2025-10-05".into()),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);
        ScenarioUpdate {
            date: Some("Today".into()),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);
        assert_eq!(s.date_override(), None);
    }

    #[test]
    fn empty_date_is_absent() {
        let (s, out) = apply(ScenarioUpdate {
            date: Some("  ".into()),
            ..Default::default()
        });
        assert_eq!(s.date_override(), None);
        assert!(out.ok);
        assert!(out.applied.is_empty());
    }

    #[test]
    fn malformed_date_rejected_not_cleared() {
        let mut s = Scenario::default();
        ScenarioUpdate {
            date: Some("2025-10-05".into()),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);

        let out = ScenarioUpdate {
            date: Some("2025-13-40".into()),
            ..Default::default()
        }
        .validate()
        .apply_to(&mut s);
        assert!(!out.ok);
        assert_eq!(out.rejected[0].field, "date");
        assert_eq!(s.date_override(), Some(date!(2025 - 10 - 05)));
    }

    // -- Mixed updates ------------------------------------------------------

    #[test]
    fn valid_fields_applied_alongside_rejected_ones() {
        let (s, out) = apply(ScenarioUpdate {
            shift: Some(FieldValue::Int(7)),
            class_size: Some(FieldValue::Int(24)),
            auto: Some(FieldValue::Bool(false)),
            ..Default::default()
        });
        assert!(!out.ok);
        assert_eq!(out.applied, vec!["class_size", "auto"]);
        assert_eq!(s.class_size(), 24);
        assert_eq!(s.mode(), Mode::ManualStopped);
        assert_eq!(s.shift(), Shift::First);
    }

    // -- Loosely typed fields ----------------------------------------------

    fn from_json(body: &str) -> ScenarioUpdate {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn string_shift_applied_with_other_fields() {
        let (s, out) = apply(from_json(r#"{"shift":"2","class_size":12,"auto":false}"#));
        assert!(out.ok, "{:?}", out.error);
        assert_eq!(out.applied, vec!["shift", "class_size", "auto"]);
        assert_eq!(s.shift(), Shift::Second);
        assert_eq!(s.class_size(), 12);
        assert!(!s.auto_mode());
    }

    #[test]
    fn shift_label_and_out_of_range_text() {
        let (s, _) = apply(from_json(r#"{"shift":"2 (afternoon)"}"#));
        assert_eq!(s.shift(), Shift::Second);

        let (s, out) = apply(from_json(r#"{"shift":"3"}"#));
        assert_eq!(s.shift(), Shift::First);
        assert_eq!(out.rejected[0].reason, "shift 3 is not 1 or 2");
    }

    #[test]
    fn wrongly_typed_field_rejected_alone() {
        let (s, out) = apply(from_json(
            r#"{"shift":true,"class_size":"lots","auto":"maybe","date":20251006,"group_lessons":{"a":1}}"#,
        ));
        assert!(!out.ok);
        assert!(out.applied.is_empty());
        let fields: Vec<_> = out.rejected.iter().map(|r| r.field).collect();
        assert_eq!(
            fields,
            vec!["date", "shift", "class_size", "group_lessons", "auto"]
        );
        assert_eq!(s, Scenario::default());

        let (s, out) = apply(from_json(r#"{"shift":[1],"class_size":"18"}"#));
        assert_eq!(out.applied, vec!["class_size"]);
        assert_eq!(out.rejected[0].field, "shift");
        assert_eq!(s.class_size(), 18);
    }

    #[test]
    fn auto_accepts_switch_forms() {
        for (body, want) in [
            (r#"{"auto":"on"}"#, true),
            (r#"{"auto":"OFF"}"#, false),
            (r#"{"auto":0}"#, false),
            (r#"{"auto":["on"]}"#, true),
            (r#"{"auto":[]}"#, false),
        ] {
            let mut s = Scenario::default();
            s.auto_mode = !want;
            let out = from_json(body).validate().apply_to(&mut s);
            assert!(out.ok, "{body}");
            assert_eq!(s.auto_mode(), want, "{body}");
        }
    }

    #[test]
    fn class_size_float_truncated() {
        let (s, _) = apply(from_json(r#"{"class_size":17.9}"#));
        assert_eq!(s.class_size(), 17);
    }

    #[test]
    fn empty_update_is_ok_noop() {
        let (s, out) = apply(ScenarioUpdate::default());
        assert_eq!(s, Scenario::default());
        assert!(out.ok);
        assert!(out.applied.is_empty());
    }

    #[test]
    fn outcome_serializes_without_error_when_ok() {
        let (_, out) = apply(ScenarioUpdate {
            auto: Some(FieldValue::Bool(true)),
            ..Default::default()
        });
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["ok"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn view_reflects_scenario() {
        let (s, _) = apply(ScenarioUpdate {
            date: Some("2025-10-06".into()),
            shift: Some(FieldValue::Int(2)),
            group_lessons: Some(GroupLessons::Csv("3,1".into())),
            ..Default::default()
        });
        let v = s.view();
        assert_eq!(v.date.as_deref(), Some("2025-10-06"));
        assert_eq!(v.shift, 2);
        assert_eq!(v.group_lessons, vec![1, 3]);
    }
}
