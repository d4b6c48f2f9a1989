use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_delete, db_insert, db_query, get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

// Result reports are produced elsewhere (exam processing is not this
// daemon's business); the report payload is stored and served verbatim.

fn results_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");

    let mut sql = String::from(
        "SELECT id, class_id, section_id, exam_name, published_at, report FROM exam_results",
    );
    if class_id.is_some() {
        sql.push_str(" WHERE class_id = ?");
    }
    sql.push_str(" ORDER BY published_at DESC, exam_name");

    let mut stmt = conn.prepare(&sql).map_err(db_query)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, Option<String>, String, Option<String>, String)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    };
    let raw = match &class_id {
        Some(cid) => stmt
            .query_map([cid], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
        None => stmt
            .query_map([], map_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>()),
    }
    .map_err(db_query)?;

    let mut results = Vec::with_capacity(raw.len());
    for (id, class_id, section_id, exam_name, published_at, report) in raw {
        let report: serde_json::Value = serde_json::from_str(&report)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
        results.push(json!({
            "id": id,
            "classId": class_id,
            "sectionId": section_id,
            "examName": exam_name,
            "publishedAt": published_at,
            "report": report
        }));
    }
    Ok(json!({ "results": results }))
}

fn results_publish(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let section_id = get_optional_str(params, "sectionId");
    let exam_name = get_required_str(params, "examName")?;
    let published_at = get_optional_str(params, "publishedAt");
    let Some(report) = params.get("report") else {
        return Err(HandlerErr::bad_params("missing report"));
    };

    let class_exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_query)?
        .is_some();
    if !class_exists {
        return Err(HandlerErr::not_found("class not found"));
    }

    let result_id = Uuid::new_v4().to_string();
    let report_text = serde_json::to_string(report)
        .map_err(|e| HandlerErr::new("internal_error", e.to_string()))?;
    conn.execute(
        "INSERT INTO exam_results(id, class_id, section_id, exam_name, published_at, report)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &result_id,
            &class_id,
            &section_id,
            &exam_name,
            &published_at,
            &report_text,
        ),
    )
    .map_err(|e| db_insert(e, "exam_results"))?;
    Ok(json!({ "resultId": result_id, "examName": exam_name }))
}

fn results_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let deleted = conn
        .execute("DELETE FROM exam_results WHERE id = ?", [&result_id])
        .map_err(|e| db_delete(e, "exam_results"))?;
    if deleted == 0 {
        return Err(HandlerErr::not_found("result not found"));
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
        "results.list" => Some(dispatch(state, req, results_list)),
        "results.publish" => Some(dispatch(state, req, results_publish)),
        "results.delete" => Some(dispatch(state, req, results_delete)),
        _ => None,
    }
}
