use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_query, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::roster::{build_roster, prepare_save_payload, AttendanceRow, AttendanceStatus, ExistingRecord, RosterStudent};
use crate::timetable::{resolve_slot, SlotAssignment, SlotResolveError, WEEKDAY_NAMES};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

use super::core::DEFAULT_STATUS_KEY;
use super::timetable::load_slots;

fn parse_date(raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))
}

fn weekday_name(date: NaiveDate) -> &'static str {
    WEEKDAY_NAMES[date.weekday().num_days_from_sunday() as usize]
}

fn default_status(conn: &Connection) -> Result<AttendanceStatus, HandlerErr> {
    let value = db::settings_get_json(conn, DEFAULT_STATUS_KEY)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(value
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(AttendanceStatus::parse)
        .unwrap_or(AttendanceStatus::Present))
}

fn load_students(
    conn: &Connection,
    class_id: &str,
    section_id: &str,
) -> Result<Vec<RosterStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, full_name FROM students
             WHERE class_id = ? AND section_id = ? AND active = 1
             ORDER BY sort_order",
        )
        .map_err(db_query)?;
    stmt.query_map((class_id, section_id), |r| {
        Ok(RosterStudent {
            id: r.get(0)?,
            full_name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_query)
}

fn load_records(
    conn: &Connection,
    slot_id: &str,
    date: &str,
) -> Result<Vec<ExistingRecord>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, status, remarks FROM attendance_records
             WHERE slot_id = ? AND date = ?",
        )
        .map_err(db_query)?;
    let raw = stmt
        .query_map((slot_id, date), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;

    let mut records = Vec::with_capacity(raw.len());
    for (id, student_id, status, remarks) in raw {
        let status = AttendanceStatus::parse(&status).ok_or_else(|| {
            HandlerErr::new(
                "db_query_failed",
                format!("stored attendance status is unreadable: {}", status),
            )
        })?;
        records.push(ExistingRecord {
            id: Some(id),
            student_id,
            status,
            remarks,
        });
    }
    Ok(records)
}

fn load_slot_by_id(conn: &Connection, slot_id: &str) -> Result<SlotAssignment, HandlerErr> {
    conn.query_row(
        "SELECT id, day, period, class_id, section_id, subject_id, teacher_id, room
         FROM timetable_slots WHERE id = ?",
        [slot_id],
        |row| {
            Ok(SlotAssignment {
                id: Some(row.get(0)?),
                day: row.get(1)?,
                period: row.get(2)?,
                class_id: row.get(3)?,
                section_id: row.get(4)?,
                subject_id: row.get(5)?,
                teacher_id: row.get(6)?,
                room: row.get(7)?,
            })
        },
    )
    .optional()
    .map_err(db_query)?
    .ok_or_else(|| HandlerErr::not_found("timetable slot not found"))
}

/// The roster is always rebuilt from a fresh read of students and records so
/// record ids assigned by a save are reflected before the next edit.
fn roster_payload(
    conn: &Connection,
    slot: &SlotAssignment,
    date: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = slot.id.clone().unwrap_or_default();
    let students = load_students(conn, &slot.class_id, &slot.section_id)?;
    let records = load_records(conn, &slot_id, date)?;
    let default = default_status(conn)?;
    let rows = build_roster(&students, &records, default);

    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| json!({ "id": s.id, "fullName": s.full_name }))
        .collect();
    let rows_json = serde_json::to_value(&rows)
        .map_err(|e| HandlerErr::new("internal_error", e.to_string()))?;

    Ok(json!({
        "slotId": slot_id,
        "day": slot.day,
        "period": slot.period,
        "date": date,
        "defaultStatus": default.as_str(),
        "students": students_json,
        "rows": rows_json
    }))
}

fn roster_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let section_id = get_required_str(params, "sectionId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let date = get_required_str(params, "date")?;
    let day = weekday_name(parse_date(&date)?);

    let slots = load_slots(conn)?;
    let slot = match resolve_slot(&slots, &class_id, &section_id, &subject_id, day) {
        Ok(slot) => slot,
        Err(SlotResolveError::NoMatch) => {
            return Err(HandlerErr::with_details(
                "ambiguous_slot",
                format!("no scheduled period matches this selection on {}", day),
                json!({ "matches": 0 }),
            ))
        }
        Err(SlotResolveError::Ambiguous(n)) => {
            return Err(HandlerErr::with_details(
                "ambiguous_slot",
                format!("selection matches {} scheduled periods on {}", n, day),
                json!({ "matches": n }),
            ))
        }
    };

    roster_payload(conn, slot, &date)
}

fn roster_save(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = get_required_str(params, "slotId")?;
    let date = get_required_str(params, "date")?;
    parse_date(&date)?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    let slot = load_slot_by_id(conn, &slot_id)?;

    let mut edited = Vec::with_capacity(entries.len());
    for entry in entries {
        let student_id = get_required_str(entry, "studentId")?;
        let status_raw = get_required_str(entry, "status")?;
        let status = AttendanceStatus::parse(&status_raw)
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", status_raw)))?;
        let remarks = get_optional_str(entry, "remarks").unwrap_or_default();
        edited.push(AttendanceRow {
            student_id,
            attendance_record_id: get_optional_str(entry, "attendanceRecordId"),
            status,
            remarks,
        });
    }

    // Record ids are stripped here; the store matches each entry by
    // (student, date, slot) to decide create vs. update, so stale ids from
    // the editing session cannot produce duplicates.
    let payload = prepare_save_payload(&slot_id, &date, &edited);

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut saved: i64 = 0;
    for entry in &payload.entries {
        // Entries for students outside the slot's class/section are dropped,
        // mirroring how roster rows for transferred students disappear.
        let member = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND class_id = ? AND section_id = ?",
                (&entry.student_id, &slot.class_id, &slot.section_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(db_query)?
            .is_some();
        if !member {
            continue;
        }

        tx.execute(
            "INSERT INTO attendance_records(id, slot_id, student_id, date, status, remarks, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date, slot_id) DO UPDATE SET
               status = excluded.status,
               remarks = excluded.remarks,
               updated_at = excluded.updated_at",
            (
                Uuid::new_v4().to_string(),
                &slot_id,
                &entry.student_id,
                &date,
                entry.status.as_str(),
                &entry.remarks,
                &now,
            ),
        )
        .map_err(|e| HandlerErr::with_details(
            "db_update_failed",
            e.to_string(),
            json!({ "table": "attendance_records" }),
        ))?;
        saved += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let mut reloaded = roster_payload(conn, &slot, &date)?;
    reloaded["saved"] = json!(saved);
    Ok(reloaded)
}

fn dispatch(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.rosterOpen" => Some(dispatch(state, req, roster_open)),
        "attendance.rosterSave" => Some(dispatch(state, req, roster_save)),
        _ => None,
    }
}
