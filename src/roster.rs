use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted attendance states. "Unset" is not a legal stored value; a roster
/// row always carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "LATE" => Some(AttendanceStatus::Late),
            "EXCUSED" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

/// Roster member, read-only input to the builder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterStudent {
    pub id: String,
    pub full_name: String,
}

/// A persisted attendance record for one (student, date, slot), as fetched
/// from the store.
#[derive(Debug, Clone)]
pub struct ExistingRecord {
    pub id: Option<String>,
    pub student_id: String,
    pub status: AttendanceStatus,
    pub remarks: String,
}

/// One editable roster row. Rows without a record id have never been saved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance_record_id: Option<String>,
    pub status: AttendanceStatus,
    pub remarks: String,
}

/// Merge a class/section roster with the attendance records that exist for
/// one date and slot. Every student gets exactly one row, in the input order;
/// students without a record get `default_status`, empty remarks, and no
/// record id. When the store hands back duplicates for one student, the last
/// one wins.
pub fn build_roster(
    students: &[RosterStudent],
    existing: &[ExistingRecord],
    default_status: AttendanceStatus,
) -> Vec<AttendanceRow> {
    let mut by_student: HashMap<&str, &ExistingRecord> = HashMap::new();
    for rec in existing {
        by_student.insert(rec.student_id.as_str(), rec);
    }

    students
        .iter()
        .map(|s| match by_student.get(s.id.as_str()) {
            Some(rec) => AttendanceRow {
                student_id: s.id.clone(),
                attendance_record_id: rec.id.clone(),
                status: rec.status,
                remarks: rec.remarks.clone(),
            },
            None => AttendanceRow {
                student_id: s.id.clone(),
                attendance_record_id: None,
                status: default_status,
                remarks: String::new(),
            },
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
    pub remarks: String,
}

/// One bulk upsert request: the store matches entries by
/// (studentId, date, slotId) to decide create vs. update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePayload {
    pub slot_id: String,
    pub date: String,
    pub entries: Vec<SaveEntry>,
}

/// Package an edited roster for saving. Record ids and display fields are
/// stripped; only the editable state travels.
pub fn prepare_save_payload(slot_id: &str, date: &str, roster: &[AttendanceRow]) -> SavePayload {
    SavePayload {
        slot_id: slot_id.to_string(),
        date: date.to_string(),
        entries: roster
            .iter()
            .map(|row| SaveEntry {
                student_id: row.student_id.clone(),
                status: row.status,
                remarks: row.remarks.clone(),
            })
            .collect(),
    }
}
