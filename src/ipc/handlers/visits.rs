use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_trimmed, required_str, student_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, NaiveDateTime};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepts the storage format or RFC 3339; RFC 3339 values are normalized to UTC.
fn parse_visited_at(raw: &str) -> Option<String> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, STAMP_FORMAT) {
        return Some(dt.format(STAMP_FORMAT).to_string());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.naive_utc().format(STAMP_FORMAT).to_string())
}

/// Newest first.
pub fn list_for_student(conn: &Connection, student_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, visited_at, note, teacher_name
             FROM visit_notes
             WHERE student_id = ?
             ORDER BY visited_at DESC, rowid DESC",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([student_id], |row| {
        let id: String = row.get(0)?;
        let visited_at: String = row.get(1)?;
        let note: String = row.get(2)?;
        let teacher_name: Option<String> = row.get(3)?;
        Ok(json!({
            "id": id,
            "studentId": student_id,
            "visitedAt": visited_at,
            "note": note,
            "teacherName": teacher_name
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_visits_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match list_for_student(conn, &student_id) {
        Ok(visits) => ok(&req.id, json!({ "visits": visits })),
        Err(e) => e.response(&req.id),
    }
}

fn handle_visits_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(note) = optional_trimmed(&req.params, "note") else {
        return err(&req.id, "bad_params", "note must not be empty", None);
    };
    let teacher_name = optional_trimmed(&req.params, "teacherName");
    let visited_at = match optional_trimmed(&req.params, "visitedAt") {
        None => db::now_stamp(),
        Some(raw) => match parse_visited_at(&raw) {
            Some(v) => v,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "visitedAt must be 'YYYY-MM-DD HH:MM:SS' or RFC 3339",
                    Some(json!({ "visitedAt": raw })),
                )
            }
        },
    };

    match student_exists(conn, &student_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return e.response(&req.id),
    }

    let visit_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO visit_notes(id, student_id, visited_at, note, teacher_name)
         VALUES(?, ?, ?, ?, ?)",
        (&visit_id, &student_id, &visited_at, &note, teacher_name.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "visit_notes" })),
        );
    }

    tracing::info!(visit_id = %visit_id, student_id = %student_id, "visit note added");
    ok(
        &req.id,
        json!({
            "visit": {
                "id": visit_id,
                "studentId": student_id,
                "visitedAt": visited_at,
                "note": note,
                "teacherName": teacher_name
            }
        }),
    )
}

fn handle_visits_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let visit_id = match required_str(req, "visitId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match conn.execute("DELETE FROM visit_notes WHERE id = ?", [&visit_id]) {
        Ok(0) => err(&req.id, "not_found", "visit note not found", None),
        Ok(_) => {
            tracing::info!(visit_id = %visit_id, "visit note deleted");
            ok(&req.id, json!({ "ok": true }))
        }
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "visits.list" => Some(handle_visits_list(state, req)),
        "visits.create" => Some(handle_visits_create(state, req)),
        "visits.delete" => Some(handle_visits_delete(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visited_at_accepts_both_formats() {
        assert_eq!(
            parse_visited_at("2024-03-05 14:30:00").as_deref(),
            Some("2024-03-05 14:30:00")
        );
        assert_eq!(
            parse_visited_at("2024-03-05T14:30:00+03:00").as_deref(),
            Some("2024-03-05 11:30:00")
        );
        assert_eq!(parse_visited_at("05/03/2024"), None);
    }
}
