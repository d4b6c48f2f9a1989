use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Weekday names in canonical form. Upstream exports encode the day either as a
/// display name (full or abbreviated) or as a 0-based index into this
/// Sunday-first array.
pub const WEEKDAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// One scheduled occupation of a (day, period) slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlotAssignment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub day: String,
    pub period: String,
    pub class_id: String,
    pub section_id: String,
    pub subject_id: String,
    pub teacher_id: String,
    pub room: String,
}

pub const VIOLATION_TEACHER_BUSY: &str = "teacher already assigned in this time slot";
pub const VIOLATION_SECTION_BUSY: &str = "this class/section already has a teacher at this time";
pub const VIOLATION_ROOM_BUSY: &str = "room already occupied at this time";

/// Resolve a day value to its canonical name. Accepts a 0-6 integer (as text),
/// a full weekday name, or an abbreviation of at least three letters, all
/// case-insensitive.
pub fn canonical_day(raw: &str) -> Option<&'static str> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(n) = t.parse::<usize>() {
        return WEEKDAY_NAMES.get(n).copied();
    }
    let lower = t.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    WEEKDAY_NAMES
        .iter()
        .find(|name| name.to_ascii_lowercase().starts_with(&lower))
        .copied()
}

// Field aliases seen across upstream timetable exports, most specific first.
const ID_ALIASES: &[&str] = &["id", "slotId", "slot_id"];
const CLASS_ALIASES: &[&str] = &["classId", "class_id", "className", "class_name", "class"];
const SECTION_ALIASES: &[&str] = &["sectionId", "section_id", "sectionName", "section_name", "section"];
const SUBJECT_ALIASES: &[&str] = &["subjectId", "subject_id", "subjectName", "subject_name", "subject"];
const TEACHER_ALIASES: &[&str] = &["teacherId", "teacher_id", "teacherName", "teacher_name", "teacher"];
const DAY_ALIASES: &[&str] = &["day", "dayName", "day_name", "weekday", "dayOfWeek", "day_of_week"];
const PERIOD_ALIASES: &[&str] = &["period", "periodLabel", "period_label", "periodName", "period_name"];
const ROOM_ALIASES: &[&str] = &["room", "roomNo", "room_no", "roomNumber", "room_number"];

fn first_string(raw: &Value, aliases: &[&str]) -> String {
    for key in aliases {
        match raw.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.trim().to_string(),
            Some(Value::Number(n)) => return n.to_string(),
            _ => {}
        }
    }
    String::new()
}

/// Normalize a raw timetable record of any known field-naming variant into a
/// canonical [`SlotAssignment`]. Two records describing the same logical slot
/// under different naming conventions normalize to equal keys. Attributes with
/// no recognizable value come back empty and are caught by [`validate`].
pub fn normalize_record(raw: &Value) -> SlotAssignment {
    let id = {
        let v = first_string(raw, ID_ALIASES);
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    };
    let day = canonical_day(&first_string(raw, DAY_ALIASES))
        .map(|d| d.to_string())
        .unwrap_or_default();
    SlotAssignment {
        id,
        day,
        period: first_string(raw, PERIOD_ALIASES),
        class_id: first_string(raw, CLASS_ALIASES),
        section_id: first_string(raw, SECTION_ALIASES),
        subject_id: first_string(raw, SUBJECT_ALIASES),
        teacher_id: first_string(raw, TEACHER_ALIASES),
        room: first_string(raw, ROOM_ALIASES),
    }
}

/// Check a candidate assignment against the existing timetable. Returns the
/// ordered list of violations; empty means acceptable.
///
/// Rules, in order:
/// 1. all of classId/sectionId/subjectId/teacherId/day/period present
///    (missing fields short-circuit the slot rules);
/// 2. no teacher double-booking within the same (day, period);
/// 3. no class/section double-booking within the same (day, period);
/// 4. a room may be reused within the slot only by the same class/section.
///
/// Advisory only: the workspace store re-checks inside the write transaction
/// and carries unique indexes for rules 2 and 3.
pub fn validate(candidate: &SlotAssignment, existing: &[SlotAssignment]) -> Vec<String> {
    let mut violations = Vec::new();

    let required = [
        ("classId", &candidate.class_id),
        ("sectionId", &candidate.section_id),
        ("subjectId", &candidate.subject_id),
        ("teacherId", &candidate.teacher_id),
        ("day", &candidate.day),
        ("period", &candidate.period),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            violations.push(format!("{} is required", name));
        }
    }
    if !violations.is_empty() {
        return violations;
    }

    // An assignment being edited must not conflict with itself.
    let same_slot: Vec<&SlotAssignment> = existing
        .iter()
        .filter(|e| e.day == candidate.day && e.period == candidate.period)
        .filter(|e| match (&e.id, &candidate.id) {
            (Some(a), Some(b)) => a != b,
            _ => true,
        })
        .collect();

    if same_slot
        .iter()
        .any(|e| e.teacher_id == candidate.teacher_id)
    {
        violations.push(VIOLATION_TEACHER_BUSY.to_string());
    }

    if same_slot
        .iter()
        .any(|e| e.class_id == candidate.class_id && e.section_id == candidate.section_id)
    {
        violations.push(VIOLATION_SECTION_BUSY.to_string());
    }

    if !candidate.room.is_empty() {
        let occupied = same_slot.iter().any(|e| {
            !e.room.is_empty()
                && e.room.eq_ignore_ascii_case(&candidate.room)
                && (e.class_id != candidate.class_id || e.section_id != candidate.section_id)
        });
        if occupied {
            violations.push(VIOLATION_ROOM_BUSY.to_string());
        }
    }

    violations
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotResolveError {
    NoMatch,
    Ambiguous(usize),
}

/// Find the single scheduled slot for a (class, section, subject, day)
/// selection. A roster is defined over exactly one slot; zero or multiple
/// matches block the caller until the selection is disambiguated.
pub fn resolve_slot<'a>(
    slots: &'a [SlotAssignment],
    class_id: &str,
    section_id: &str,
    subject_id: &str,
    day: &str,
) -> Result<&'a SlotAssignment, SlotResolveError> {
    let mut matches = slots.iter().filter(|s| {
        s.class_id == class_id
            && s.section_id == section_id
            && s.subject_id == subject_id
            && s.day == day
    });
    let first = matches.next().ok_or(SlotResolveError::NoMatch)?;
    let rest = matches.count();
    if rest > 0 {
        return Err(SlotResolveError::Ambiguous(rest + 1));
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(
        id: Option<&str>,
        day: &str,
        period: &str,
        class_id: &str,
        section_id: &str,
        teacher_id: &str,
        room: &str,
    ) -> SlotAssignment {
        SlotAssignment {
            id: id.map(|s| s.to_string()),
            day: day.to_string(),
            period: period.to_string(),
            class_id: class_id.to_string(),
            section_id: section_id.to_string(),
            subject_id: "subj".to_string(),
            teacher_id: teacher_id.to_string(),
            room: room.to_string(),
        }
    }

    #[test]
    fn canonical_day_accepts_names_indices_and_abbreviations() {
        assert_eq!(canonical_day("Monday"), Some("Monday"));
        assert_eq!(canonical_day("mon"), Some("Monday"));
        assert_eq!(canonical_day("THURS"), Some("Thursday"));
        assert_eq!(canonical_day("0"), Some("Sunday"));
        assert_eq!(canonical_day("6"), Some("Saturday"));
        assert_eq!(canonical_day("7"), None);
        assert_eq!(canonical_day("M"), None);
        assert_eq!(canonical_day(""), None);
    }

    #[test]
    fn normalize_unifies_field_naming_variants() {
        let snake = json!({
            "slot_id": 14,
            "class_name": "3",
            "section": "A",
            "subject_id": 9,
            "teacher_id": "7",
            "weekday": 1,
            "period_name": "1st",
            "room_no": "204"
        });
        let camel = json!({
            "id": "14",
            "classId": "3",
            "sectionId": "A",
            "subjectId": "9",
            "teacherId": "7",
            "day": "Monday",
            "period": "1st",
            "room": " 204 "
        });
        assert_eq!(normalize_record(&snake), normalize_record(&camel));
    }

    #[test]
    fn normalize_leaves_unknown_attributes_empty() {
        let raw = json!({ "day": "Fri", "period": "2nd" });
        let s = normalize_record(&raw);
        assert_eq!(s.day, "Friday");
        assert_eq!(s.period, "2nd");
        assert!(s.class_id.is_empty());
        assert!(s.id.is_none());
    }

    #[test]
    fn missing_fields_each_violate_and_short_circuit() {
        let candidate = slot(None, "Monday", "", "", "A", "7", "");
        let existing = vec![slot(Some("1"), "Monday", "1st", "3", "A", "7", "")];
        let violations = validate(&candidate, &existing);
        assert_eq!(
            violations,
            vec!["classId is required", "period is required"]
        );
    }

    #[test]
    fn teacher_double_booking_is_flagged_both_ways() {
        let a = slot(Some("1"), "Monday", "1st", "3", "A", "7", "");
        let b = slot(Some("2"), "Monday", "1st", "5", "B", "7", "");
        assert!(validate(&a, &[b.clone()]).contains(&VIOLATION_TEACHER_BUSY.to_string()));
        assert!(validate(&b, &[a]).contains(&VIOLATION_TEACHER_BUSY.to_string()));
    }

    #[test]
    fn class_section_conflict_ignores_subject_and_teacher() {
        let mut a = slot(None, "Tuesday", "3rd", "4", "B", "11", "");
        a.subject_id = "math".to_string();
        let mut b = slot(Some("9"), "Tuesday", "3rd", "4", "B", "12", "");
        b.subject_id = "science".to_string();
        assert_eq!(validate(&a, &[b]), vec![VIOLATION_SECTION_BUSY.to_string()]);
    }

    #[test]
    fn editing_an_assignment_does_not_conflict_with_itself() {
        let stored = slot(Some("42"), "Monday", "1st", "3", "A", "7", "204");
        let edited = slot(Some("42"), "Monday", "1st", "3", "A", "7", "105");
        assert!(validate(&edited, &[stored]).is_empty());
    }

    #[test]
    fn same_section_reusing_its_room_raises_only_section_conflict() {
        // Split subjects in one room: the room rule is excused for the same
        // class/section, but that pair being taken at all is still a conflict.
        let candidate = slot(None, "Monday", "1st", "3", "A", "7", "204");
        let existing = vec![slot(Some("1"), "Monday", "1st", "3", "A", "9", "204")];
        assert_eq!(
            validate(&candidate, &existing),
            vec![VIOLATION_SECTION_BUSY.to_string()]
        );
    }

    #[test]
    fn free_teacher_in_free_room_conflicts_only_on_teacher() {
        let candidate = slot(None, "Monday", "1st", "3", "A", "7", "204");
        let existing = vec![slot(Some("2"), "Monday", "1st", "5", "B", "7", "101")];
        assert_eq!(
            validate(&candidate, &existing),
            vec![VIOLATION_TEACHER_BUSY.to_string()]
        );
    }

    #[test]
    fn room_comparison_is_case_insensitive() {
        let candidate = slot(None, "Monday", "1st", "3", "A", "7", "lab-2");
        let existing = vec![slot(Some("1"), "Monday", "1st", "5", "B", "9", "LAB-2")];
        assert_eq!(
            validate(&candidate, &existing),
            vec![VIOLATION_ROOM_BUSY.to_string()]
        );
    }

    #[test]
    fn empty_rooms_never_collide() {
        let candidate = slot(None, "Monday", "1st", "3", "A", "7", "");
        let existing = vec![slot(Some("1"), "Monday", "1st", "5", "B", "9", "")];
        assert!(validate(&candidate, &existing).is_empty());
    }

    #[test]
    fn validate_is_idempotent() {
        let candidate = slot(None, "Monday", "1st", "3", "A", "7", "204");
        let existing = vec![
            slot(Some("1"), "Monday", "1st", "3", "A", "9", "204"),
            slot(Some("2"), "Monday", "1st", "5", "B", "7", "101"),
        ];
        let first = validate(&candidate, &existing);
        let second = validate(&candidate, &existing);
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_slot_requires_exactly_one_match() {
        let slots = vec![
            slot(Some("1"), "Monday", "1st", "3", "A", "7", ""),
            slot(Some("2"), "Monday", "4th", "3", "A", "7", ""),
            slot(Some("3"), "Tuesday", "1st", "3", "A", "7", ""),
        ];
        assert_eq!(
            resolve_slot(&slots, "3", "A", "subj", "Tuesday")
                .map(|s| s.id.clone())
                .unwrap(),
            Some("3".to_string())
        );
        assert_eq!(
            resolve_slot(&slots, "3", "A", "subj", "Monday"),
            Err(SlotResolveError::Ambiguous(2))
        );
        assert_eq!(
            resolve_slot(&slots, "9", "A", "subj", "Monday"),
            Err(SlotResolveError::NoMatch)
        );
    }
}
