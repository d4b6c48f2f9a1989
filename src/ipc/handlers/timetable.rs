use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, db_update, get_optional_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::timetable::{canonical_day, normalize_record, validate, SlotAssignment, WEEKDAY_NAMES};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn slot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SlotAssignment> {
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
}

pub fn load_slots(conn: &Connection) -> Result<Vec<SlotAssignment>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, day, period, class_id, section_id, subject_id, teacher_id, room
             FROM timetable_slots",
        )
        .map_err(db_query)?;
    stmt.query_map([], slot_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)
}

fn candidate_from_params(params: &serde_json::Value) -> Result<SlotAssignment, HandlerErr> {
    let day = match get_optional_str(params, "day") {
        None => String::new(),
        Some(raw) => canonical_day(&raw)
            .map(|d| d.to_string())
            .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", raw)))?,
    };
    Ok(SlotAssignment {
        id: get_optional_str(params, "slotId"),
        day,
        period: get_optional_str(params, "period").unwrap_or_default(),
        class_id: get_optional_str(params, "classId").unwrap_or_default(),
        section_id: get_optional_str(params, "sectionId").unwrap_or_default(),
        subject_id: get_optional_str(params, "subjectId").unwrap_or_default(),
        teacher_id: get_optional_str(params, "teacherId").unwrap_or_default(),
        room: get_optional_str(params, "room").unwrap_or_default(),
    })
}

fn id_exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(db_query)
}

fn check_references(conn: &Connection, slot: &SlotAssignment) -> Result<(), HandlerErr> {
    if !id_exists(conn, "SELECT 1 FROM classes WHERE id = ?", &slot.class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let section_ok = conn
        .query_row(
            "SELECT 1 FROM sections WHERE id = ? AND class_id = ?",
            (&slot.section_id, &slot.class_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_query)?
        .is_some();
    if !section_ok {
        return Err(HandlerErr::not_found("section not found in class"));
    }
    if !id_exists(conn, "SELECT 1 FROM subjects WHERE id = ?", &slot.subject_id)? {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if !id_exists(conn, "SELECT 1 FROM staff WHERE id = ?", &slot.teacher_id)? {
        return Err(HandlerErr::not_found("teacher not found"));
    }
    Ok(())
}

fn slot_json(slot: &SlotAssignment) -> serde_json::Value {
    json!({
        "id": slot.id,
        "day": slot.day,
        "period": slot.period,
        "classId": slot.class_id,
        "sectionId": slot.section_id,
        "subjectId": slot.subject_id,
        "teacherId": slot.teacher_id,
        "room": slot.room
    })
}

fn weekday_index(day: &str) -> usize {
    WEEKDAY_NAMES.iter().position(|d| *d == day).unwrap_or(7)
}

fn timetable_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");
    let section_id = get_optional_str(params, "sectionId");
    let teacher_id = get_optional_str(params, "teacherId");
    let day = match get_optional_str(params, "day") {
        None => None,
        Some(raw) => Some(
            canonical_day(&raw)
                .map(|d| d.to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown day: {}", raw)))?,
        ),
    };

    let mut slots = load_slots(conn)?;
    slots.retain(|s| {
        class_id.as_deref().map_or(true, |v| s.class_id == v)
            && section_id.as_deref().map_or(true, |v| s.section_id == v)
            && teacher_id.as_deref().map_or(true, |v| s.teacher_id == v)
            && day.as_deref().map_or(true, |v| s.day == v)
    });
    slots.sort_by(|a, b| {
        (weekday_index(&a.day), a.period.as_str()).cmp(&(weekday_index(&b.day), b.period.as_str()))
    });

    let rows: Vec<serde_json::Value> = slots.iter().map(slot_json).collect();
    Ok(json!({ "slots": rows }))
}

fn timetable_validate(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let candidate = candidate_from_params(params)?;
    let existing = load_slots(conn)?;
    let violations = validate(&candidate, &existing);
    Ok(json!({ "valid": violations.is_empty(), "violations": violations }))
}

fn timetable_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let candidate = candidate_from_params(params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Validation runs against the rows visible inside the write transaction,
    // so the pre-flight timetable.validate result cannot go stale between
    // check and write.
    let existing = load_slots(&tx)?;
    let violations = validate(&candidate, &existing);
    if !violations.is_empty() {
        return Err(HandlerErr::with_details(
            "validation_failed",
            "timetable conflict",
            json!({ "violations": violations }),
        ));
    }
    check_references(&tx, &candidate)?;

    let slot_id = match &candidate.id {
        Some(slot_id) => {
            let known = existing.iter().any(|s| s.id.as_deref() == Some(slot_id));
            if !known {
                return Err(HandlerErr::not_found("timetable slot not found"));
            }
            tx.execute(
                "UPDATE timetable_slots
                 SET day = ?, period = ?, class_id = ?, section_id = ?,
                     subject_id = ?, teacher_id = ?, room = ?
                 WHERE id = ?",
                (
                    &candidate.day,
                    &candidate.period,
                    &candidate.class_id,
                    &candidate.section_id,
                    &candidate.subject_id,
                    &candidate.teacher_id,
                    &candidate.room,
                    slot_id,
                ),
            )
            .map_err(|e| db_update(e, "timetable_slots"))?;
            slot_id.clone()
        }
        None => {
            let slot_id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO timetable_slots(id, day, period, class_id, section_id, subject_id, teacher_id, room)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &slot_id,
                    &candidate.day,
                    &candidate.period,
                    &candidate.class_id,
                    &candidate.section_id,
                    &candidate.subject_id,
                    &candidate.teacher_id,
                    &candidate.room,
                ),
            )
            .map_err(|e| db_insert(e, "timetable_slots"))?;
            slot_id
        }
    };

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    let mut stored = candidate;
    stored.id = Some(slot_id);
    Ok(slot_json(&stored))
}

fn timetable_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let slot_id = match get_optional_str(params, "slotId") {
        Some(v) => v,
        None => return Err(HandlerErr::bad_params("missing slotId")),
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // Attendance rows are keyed by their slot; they go with it. Other slots
    // are never affected.
    tx.execute("DELETE FROM attendance_records WHERE slot_id = ?", [&slot_id])
        .map_err(|e| db_delete(e, "attendance_records"))?;
    let deleted = tx
        .execute("DELETE FROM timetable_slots WHERE id = ?", [&slot_id])
        .map_err(|e| db_delete(e, "timetable_slots"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("timetable slot not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
}

/// Bulk ingest of timetable records exported by the upstream system, which
/// names fields inconsistently. Records are normalized, conflict-checked
/// against the stored timetable and each other, and inserted with fresh ids;
/// rejects are reported per record index.
fn timetable_import(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(records) = params.get("records").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing records"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut context = load_slots(&tx)?;
    let mut imported: i64 = 0;
    let mut skipped: Vec<serde_json::Value> = Vec::new();

    for (index, raw) in records.iter().enumerate() {
        let mut candidate = normalize_record(raw);
        // Foreign ids are not trusted; accepted records get fresh ids below.
        candidate.id = None;

        let mut reasons = validate(&candidate, &context);
        if reasons.is_empty() {
            if let Err(e) = check_references(&tx, &candidate) {
                reasons.push(e.message);
            }
        }
        if !reasons.is_empty() {
            skipped.push(json!({ "index": index, "reasons": reasons }));
            continue;
        }

        let slot_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO timetable_slots(id, day, period, class_id, section_id, subject_id, teacher_id, room)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
            (
                &slot_id,
                &candidate.day,
                &candidate.period,
                &candidate.class_id,
                &candidate.section_id,
                &candidate.subject_id,
                &candidate.teacher_id,
                &candidate.room,
            ),
        )
        .map_err(|e| db_insert(e, "timetable_slots"))?;

        candidate.id = Some(slot_id);
        context.push(candidate);
        imported += 1;
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "imported": imported, "skipped": skipped }))
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
        "timetable.list" => Some(dispatch(state, req, timetable_list)),
        "timetable.validate" => Some(dispatch(state, req, timetable_validate)),
        "timetable.upsert" => Some(dispatch(state, req, timetable_upsert)),
        "timetable.delete" => Some(dispatch(state, req, timetable_delete)),
        "timetable.importRecords" => Some(dispatch(state, req, timetable_import)),
        _ => None,
    }
}
