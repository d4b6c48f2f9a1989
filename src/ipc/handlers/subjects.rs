use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, db_update, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn subjects_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, code FROM subjects ORDER BY name")
        .map_err(db_query)?;
    let subjects = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let code: Option<String> = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "code": code }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code");
    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, code) VALUES(?, ?, ?)",
        (&subject_id, &name, &code),
    )
    .map_err(|e| db_insert(e, "subjects"))?;
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_required_str(params, "name")?;
    let code = get_optional_str(params, "code");
    let changed = conn
        .execute(
            "UPDATE subjects SET name = ?, code = ? WHERE id = ?",
            (&name, &code, &subject_id),
        )
        .map_err(|e| db_update(e, "subjects"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let exists = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("subject not found"));
    }

    // A subject still on the timetable cannot be removed.
    let slot_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM timetable_slots WHERE subject_id = ?",
            [&subject_id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    if slot_count > 0 {
        return Err(HandlerErr::with_details(
            "subject_in_use",
            "subject has timetable slots; delete those first",
            json!({ "slotCount": slot_count }),
        ));
    }

    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| db_delete(e, "subjects"))?;
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
        "subjects.list" => Some(dispatch(state, req, |c, _| subjects_list(c))),
        "subjects.create" => Some(dispatch(state, req, subjects_create)),
        "subjects.update" => Some(dispatch(state, req, subjects_update)),
        "subjects.delete" => Some(dispatch(state, req, subjects_delete)),
        _ => None,
    }
}
