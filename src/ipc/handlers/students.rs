use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_exists, class_filter, db_conn, is_unique_violation, optional_trimmed, required_str,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

use super::{evaluations, visits};

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub first_name: String,
    pub last_name: String,
    pub student_no: String,
    pub phone: Option<String>,
    pub class_id: Option<String>,
}

impl NewStudent {
    pub fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        let first_name = optional_trimmed(params, "firstName");
        let last_name = optional_trimmed(params, "lastName");
        let student_no = optional_trimmed(params, "studentNo");
        let (Some(first_name), Some(last_name), Some(student_no)) =
            (first_name, last_name, student_no)
        else {
            return Err(HandlerErr::new(
                "bad_params",
                "firstName, lastName and studentNo are required",
            ));
        };
        Ok(Self {
            first_name,
            last_name,
            student_no,
            phone: optional_trimmed(params, "phone"),
            class_id: class_filter(params),
        })
    }
}

const STUDENT_COLUMNS: &str =
    "s.id, s.class_id, c.name, s.first_name, s.last_name, s.student_no, s.phone, s.registered_at";

fn student_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let class_id: Option<String> = row.get(1)?;
    let class_name: Option<String> = row.get(2)?;
    let first_name: String = row.get(3)?;
    let last_name: String = row.get(4)?;
    let student_no: String = row.get(5)?;
    let phone: Option<String> = row.get(6)?;
    let registered_at: String = row.get(7)?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "className": class_name,
        "firstName": first_name,
        "lastName": last_name,
        "fullName": format!("{} {}", first_name, last_name),
        "studentNo": student_no,
        "phone": phone,
        "registeredAt": registered_at
    }))
}

/// Insert one student. Shared by `students.create` and CSV import.
pub fn insert_student(conn: &Connection, student: &NewStudent) -> Result<String, HandlerErr> {
    if let Some(class_id) = student.class_id.as_deref() {
        if !class_exists(conn, class_id)? {
            return Err(HandlerErr::new("not_found", "class not found"));
        }
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, first_name, last_name, student_no, phone, registered_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            student.class_id.as_deref(),
            &student.first_name,
            &student.last_name,
            &student.student_no,
            student.phone.as_deref(),
            db::now_stamp(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::new(
                "duplicate_student_no",
                format!("student number {} is already registered", student.student_no),
            )
        } else {
            HandlerErr::db("db_insert_failed", e)
        }
    })?;
    Ok(student_id)
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };
    let class_id = class_filter(&req.params);

    let sql = format!(
        "SELECT {STUDENT_COLUMNS},
           (SELECT COUNT(*) FROM visit_notes v WHERE v.student_id = s.id) AS visit_count
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
         ORDER BY s.registered_at DESC, s.last_name, s.first_name"
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([class_id.as_deref()], |row| {
            let mut v = student_json(row)?;
            let visits: i64 = row.get(8)?;
            v["visitCount"] = json!(visits);
            Ok(v)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let sql = format!(
        "SELECT {STUDENT_COLUMNS}
         FROM students s
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE s.id = ?"
    );
    let student = match conn.query_row(&sql, [&student_id], student_json).optional() {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let visits = match visits::list_for_student(conn, &student_id) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let rubric = match evaluations::load_rubric(conn, &student_id) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let term = match evaluations::load_term(conn, &student_id) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "student": student,
            "visits": visits,
            "rubric": rubric.to_json(Some(&student_id)),
            "term": term.to_json(Some(&student_id))
        }),
    )
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student = match NewStudent::from_params(&req.params) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match insert_student(conn, &student) {
        Ok(student_id) => {
            tracing::info!(student_id = %student_id, student_no = %student.student_no, "student created");
            ok(&req.id, json!({ "studentId": student_id }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").filter(|p| p.is_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    // Blank values leave the stored field untouched.
    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    for (key, column) in [
        ("firstName", "first_name = ?"),
        ("lastName", "last_name = ?"),
        ("phone", "phone = ?"),
    ] {
        if let Some(v) = optional_trimmed(patch, key) {
            sets.push(column);
            values.push(v.into());
        }
    }
    if let Some(class_id) = optional_trimmed(patch, "classId") {
        match class_exists(conn, &class_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return e.response(&req.id),
        }
        sets.push("class_id = ?");
        values.push(class_id.into());
    }

    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true, "changed": false }));
    }

    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    values.push(student_id.clone().into());
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    tracing::info!(student_id = %student_id, fields = sets.len(), "student updated");
    ok(&req.id, json!({ "ok": true, "changed": true }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Dependents first (no ON DELETE CASCADE).
    for table in ["visit_notes", "rubric_evaluations", "term_evaluations"] {
        let sql = format!("DELETE FROM {} WHERE student_id = ?", table);
        if let Err(e) = tx.execute(&sql, [&student_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    let deleted = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if deleted == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    tracing::info!(student_id = %student_id, "student deleted");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
