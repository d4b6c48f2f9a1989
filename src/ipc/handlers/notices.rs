use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, db_update, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn notices_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, body, published_at FROM notices
             ORDER BY published_at DESC, title",
        )
        .map_err(db_query)?;
    let notices = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let body: String = row.get(2)?;
            let published_at: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "title": title,
                "body": body,
                "publishedAt": published_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_query)?;
    Ok(json!({ "notices": notices }))
}

fn notices_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let body = get_required_str(params, "body")?;
    let published_at = get_optional_str(params, "publishedAt");

    let notice_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO notices(id, title, body, published_at) VALUES(?, ?, ?, ?)",
        (&notice_id, &title, &body, &published_at),
    )
    .map_err(|e| db_insert(e, "notices"))?;
    Ok(json!({ "noticeId": notice_id, "title": title }))
}

fn notices_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let notice_id = get_required_str(params, "noticeId")?;
    let title = get_required_str(params, "title")?;
    let body = get_required_str(params, "body")?;
    let published_at = get_optional_str(params, "publishedAt");

    let changed = conn
        .execute(
            "UPDATE notices SET title = ?, body = ?, published_at = ? WHERE id = ?",
            (&title, &body, &published_at, &notice_id),
        )
        .map_err(|e| db_update(e, "notices"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("notice not found"));
    }
    Ok(json!({ "noticeId": notice_id, "title": title }))
}

fn notices_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let notice_id = get_required_str(params, "noticeId")?;
    let deleted = conn
        .execute("DELETE FROM notices WHERE id = ?", [&notice_id])
        .map_err(|e| db_delete(e, "notices"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("notice not found"));
    }
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
        "notices.list" => Some(dispatch(state, req, |c, _| notices_list(c))),
        "notices.create" => Some(dispatch(state, req, notices_create)),
        "notices.update" => Some(dispatch(state, req, notices_update)),
        "notices.delete" => Some(dispatch(state, req, notices_delete)),
        _ => None,
    }
}
