use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, db_update, get_optional_bool, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn section_in_class(conn: &Connection, class_id: &str, section_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM sections WHERE id = ? AND class_id = ?",
        (section_id, class_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_query)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let section_id = get_optional_str(params, "sectionId");

    let mut sql = String::from(
        "SELECT id, class_id, section_id, full_name, active, sort_order
         FROM students
         WHERE class_id = ?",
    );
    if section_id.is_some() {
        sql.push_str(" AND section_id = ?");
    }
    sql.push_str(" ORDER BY sort_order");

    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        let id: String = row.get(0)?;
        let class_id: String = row.get(1)?;
        let section_id: String = row.get(2)?;
        let full_name: String = row.get(3)?;
        let active = row.get::<_, i64>(4)? != 0;
        let sort_order: i64 = row.get(5)?;
        Ok(json!({
            "id": id,
            "classId": class_id,
            "sectionId": section_id,
            "fullName": full_name,
            "active": active,
            "sortOrder": sort_order
        }))
    };

    let students = match &section_id {
        Some(sec) => stmt
            .query_map((&class_id, sec), map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([&class_id], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_query)?;

    Ok(json!({ "students": students }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let section_id = get_required_str(params, "sectionId")?;
    let full_name = get_required_str(params, "fullName")?;
    let active = get_optional_bool(params, "active").unwrap_or(true);

    if !section_in_class(conn, &class_id, &section_id)? {
        return Err(HandlerErr::not_found("section not found in class"));
    }

    // New students append to the roster order.
    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students
             WHERE class_id = ? AND section_id = ?",
            (&class_id, &section_id),
            |r| r.get(0),
        )
        .map_err(db_query)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, section_id, full_name, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &section_id,
            &full_name,
            active as i64,
            next_sort,
            now_iso(),
        ),
    )
    .map_err(|e| db_insert(e, "students"))?;

    Ok(json!({ "studentId": student_id, "fullName": full_name, "sortOrder": next_sort }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let current = conn
        .query_row(
            "SELECT class_id, section_id, full_name, active FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)? != 0,
                ))
            },
        )
        .optional()
        .map_err(db_query)?;
    let Some((class_id, section_id, full_name, active)) = current else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let section_id = get_optional_str(patch, "sectionId").unwrap_or(section_id);
    let full_name = get_optional_str(patch, "fullName").unwrap_or(full_name);
    let active = get_optional_bool(patch, "active").unwrap_or(active);

    if !section_in_class(conn, &class_id, &section_id)? {
        return Err(HandlerErr::not_found("section not found in class"));
    }

    conn.execute(
        "UPDATE students SET section_id = ?, full_name = ?, active = ?, updated_at = ? WHERE id = ?",
        (&section_id, &full_name, active as i64, now_iso(), &student_id),
    )
    .map_err(|e| db_update(e, "students"))?;

    Ok(json!({
        "studentId": student_id,
        "sectionId": section_id,
        "fullName": full_name,
        "active": active
    }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "DELETE FROM attendance_records WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| db_delete(e, "attendance_records"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| db_delete(e, "students"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "ok": true }))
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
        "students.list" => Some(dispatch(state, req, students_list)),
        "students.create" => Some(dispatch(state, req, students_create)),
        "students.update" => Some(dispatch(state, req, students_update)),
        "students.delete" => Some(dispatch(state, req, students_delete)),
        _ => None,
    }
}
