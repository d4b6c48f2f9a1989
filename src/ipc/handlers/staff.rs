use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, db_update, get_optional_bool, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn staff_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, full_name, role, email, active FROM staff ORDER BY full_name")
        .map_err(db_query)?;
    let members = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let role: Option<String> = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            let active = row.get::<_, i64>(4)? != 0;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "role": role,
                "email": email,
                "active": active
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "staff": members }))
}

fn staff_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let full_name = get_required_str(params, "fullName")?;
    let role = get_optional_str(params, "role");
    let email = get_optional_str(params, "email");
    let active = get_optional_bool(params, "active").unwrap_or(true);

    let staff_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO staff(id, full_name, role, email, active) VALUES(?, ?, ?, ?, ?)",
        (&staff_id, &full_name, &role, &email, active as i64),
    )
    .map_err(|e| db_insert(e, "staff"))?;
    Ok(json!({ "staffId": staff_id, "fullName": full_name }))
}

fn staff_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;
    let Some(patch) = params.get("patch") else {
        return Err(HandlerErr::bad_params("missing patch"));
    };

    let current = conn
        .query_row(
            "SELECT full_name, role, email, active FROM staff WHERE id = ?",
            [&staff_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, i64>(3)? != 0,
                ))
            },
        )
        .optional()
        .map_err(db_query)?;
    let Some((full_name, role, email, active)) = current else {
        return Err(HandlerErr::not_found("staff member not found"));
    };

    let full_name = get_optional_str(patch, "fullName").unwrap_or(full_name);
    let role = get_optional_str(patch, "role").or(role);
    let email = get_optional_str(patch, "email").or(email);
    let active = get_optional_bool(patch, "active").unwrap_or(active);

    conn.execute(
        "UPDATE staff SET full_name = ?, role = ?, email = ?, active = ? WHERE id = ?",
        (&full_name, &role, &email, active as i64, &staff_id),
    )
    .map_err(|e| db_update(e, "staff"))?;
    Ok(json!({ "staffId": staff_id, "fullName": full_name, "active": active }))
}

fn staff_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let staff_id = get_required_str(params, "staffId")?;

    let exists = conn
        .query_row("SELECT 1 FROM staff WHERE id = ?", [&staff_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("staff member not found"));
    }

    // A teacher still on the timetable cannot be removed.
    let slot_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM timetable_slots WHERE teacher_id = ?",
            [&staff_id],
            |r| r.get(0),
        )
        .map_err(db_query)?;
    if slot_count > 0 {
        return Err(HandlerErr::with_details(
            "staff_in_use",
            "staff member has timetable slots; delete those first",
            json!({ "slotCount": slot_count }),
        ));
    }

    conn.execute("DELETE FROM staff WHERE id = ?", [&staff_id])
        .map_err(|e| db_delete(e, "staff"))?;
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
        "staff.list" => Some(dispatch(state, req, |c, _| staff_list(c))),
        "staff.create" => Some(dispatch(state, req, staff_create)),
        "staff.update" => Some(dispatch(state, req, staff_update)),
        "staff.delete" => Some(dispatch(state, req, staff_delete)),
        _ => None,
    }
}
