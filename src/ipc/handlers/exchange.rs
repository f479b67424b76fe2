use crate::grading::{self, RubricComponent, RUBRIC_DISPLAY_PLACES, TERM_DISPLAY_PLACES};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_exists, class_filter, db_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::reports::{rubric_rows, term_rows};
use super::students::{insert_student, NewStudent};

const ABSENT: &str = "-";

const TEMPLATE_HEADER: [&str; 4] = ["First Name", "Last Name", "Student No", "Phone"];
const TEMPLATE_SAMPLES: [[&str; 4]; 2] = [
    ["Ayse", "Yilmaz", "2021001", "05551234567"],
    ["Mehmet", "Kaya", "2021002", ""],
];

fn csv_err(e: csv::Error, path: &Path) -> HandlerErr {
    let code = if e.is_io_error() { "io_failed" } else { "csv_failed" };
    HandlerErr {
        code,
        message: e.to_string(),
        details: Some(json!({ "path": path.to_string_lossy() })),
    }
}

fn io_err(e: std::io::Error, path: &Path) -> HandlerErr {
    HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": path.to_string_lossy() })),
    }
}

fn path_param(req: &Request, key: &str) -> Result<PathBuf, serde_json::Value> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(err(&req.id, "bad_params", format!("missing {}", key), None)),
    }
}

fn write_csv<H, R>(out: &Path, header: &[H], rows: &[R]) -> Result<usize, HandlerErr>
where
    H: AsRef<[u8]>,
    R: AsRef<[String]>,
{
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_err(e, out))?;
    }
    let mut writer = csv::Writer::from_path(out).map_err(|e| csv_err(e, out))?;
    writer
        .write_record(header)
        .map_err(|e| csv_err(e, out))?;
    for row in rows {
        writer
            .write_record(row.as_ref())
            .map_err(|e| csv_err(e, out))?;
    }
    writer.flush().map_err(|e| io_err(e, out))?;
    Ok(rows.len())
}

fn opt_cell(v: Option<f64>) -> String {
    v.map(|x| x.to_string()).unwrap_or_else(|| ABSENT.to_string())
}

fn fixed(v: f64, places: u32) -> String {
    format!(
        "{:.*}",
        places as usize,
        grading::round_display(v, places)
    )
}

fn student_rows(conn: &Connection, class_id: Option<&str>) -> Result<Vec<Vec<String>>, HandlerErr> {
    let rubric: HashMap<String, _> = rubric_rows(conn, class_id)?
        .into_iter()
        .map(|r| (r.student.student_id, r.record.result()))
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT s.id, c.name, s.first_name, s.last_name, s.student_no, s.phone, s.registered_at,
               (SELECT COUNT(*) FROM visit_notes v WHERE v.student_id = s.id)
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE (?1 IS NULL OR s.class_id = ?1)
             ORDER BY c.name, s.student_no",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<String>>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, Option<String>>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, i64>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    Ok(rows
        .into_iter()
        .map(
            |(id, class_name, first, last, student_no, phone, registered_at, visits)| {
                let (aggregate, letter) = match rubric.get(&id) {
                    Some(res) => (
                        fixed(res.aggregate, RUBRIC_DISPLAY_PLACES),
                        grading::grade_label(res.letter_grade).to_string(),
                    ),
                    None => (ABSENT.to_string(), ABSENT.to_string()),
                };
                vec![
                    class_name.unwrap_or_default(),
                    first,
                    last,
                    student_no,
                    phone.unwrap_or_default(),
                    registered_at,
                    visits.to_string(),
                    aggregate,
                    letter,
                ]
            },
        )
        .collect())
}

fn handle_export_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out = match path_param(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);

    let header = [
        "Class",
        "First Name",
        "Last Name",
        "Student No",
        "Phone",
        "Registered At",
        "Visits",
        "Rubric Aggregate",
        "Rubric Grade",
    ];
    let result = student_rows(conn, class_id.as_deref()).and_then(|rows| write_csv(&out, &header, &rows));
    exported(req, &out, "students", result)
}

fn handle_export_rubric_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out = match path_param(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);

    let mut header: Vec<String> = ["Class", "Student No", "Full Name"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    header.extend(
        RubricComponent::ALL
            .iter()
            .map(|c| format!("{} ({}p)", c.label(), c.max_points())),
    );
    header.extend(
        ["Visiting Lecturer (0%)", "Aggregate", "Letter Grade", "Updated At"]
            .iter()
            .map(|s| s.to_string()),
    );

    let result = rubric_rows(conn, class_id.as_deref()).and_then(|rows| {
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|r| {
                let res = r.record.result();
                let mut row = vec![
                    r.student.class_name.clone().unwrap_or_default(),
                    r.student.student_no.clone(),
                    r.student.full_name.clone(),
                ];
                row.extend(
                    RubricComponent::ALL
                        .iter()
                        .map(|c| r.record.scores.get(*c).to_string()),
                );
                row.push(r.record.visiting_lecturer.to_string());
                row.push(fixed(res.aggregate, RUBRIC_DISPLAY_PLACES));
                row.push(grading::grade_label(res.letter_grade).to_string());
                row.push(r.record.updated_at.clone().unwrap_or_default());
                row
            })
            .collect();
        write_csv(&out, &header, &cells)
    });
    exported(req, &out, "rubric", result)
}

fn handle_export_term_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out = match path_param(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);

    let header = [
        "Class",
        "Student No",
        "Full Name",
        "Midterm",
        "Midterm Assignment",
        "Midterm Assignment Weight %",
        "Midterm Aggregate",
        "Final",
        "Final Assignment",
        "Final Assignment Weight %",
        "Final Aggregate",
        "Attendance",
        "Makeup",
        "Makeup Assignment",
        "Makeup Assignment Weight %",
        "Makeup Aggregate",
        "Overall",
        "Letter Grade",
        "Updated At",
    ];

    let result = term_rows(conn, class_id.as_deref()).and_then(|rows| {
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|r| {
                let s = &r.record.scores;
                let res = r.record.result();
                let places = TERM_DISPLAY_PLACES;
                vec![
                    r.student.class_name.clone().unwrap_or_default(),
                    r.student.student_no.clone(),
                    r.student.full_name.clone(),
                    s.midterm_score.to_string(),
                    opt_cell(s.midterm_assignment_score),
                    s.midterm_assignment_weight_percent.to_string(),
                    fixed(res.midterm_aggregate, places),
                    s.final_score.to_string(),
                    opt_cell(s.final_assignment_score),
                    s.final_assignment_weight_percent.to_string(),
                    fixed(res.final_aggregate, places),
                    if s.attendance_ok { "passed" } else { "failed" }.to_string(),
                    opt_cell(s.makeup_score),
                    opt_cell(s.makeup_assignment_score),
                    s.makeup_assignment_weight_percent.to_string(),
                    res.makeup_aggregate
                        .map(|m| fixed(m, places))
                        .unwrap_or_else(|| ABSENT.to_string()),
                    fixed(res.overall_aggregate, places),
                    res.letter_grade.as_str().to_string(),
                    r.record.updated_at.clone().unwrap_or_default(),
                ]
            })
            .collect();
        write_csv(&out, &header, &cells)
    });
    exported(req, &out, "term", result)
}

fn exported(
    req: &Request,
    out: &Path,
    kind: &str,
    result: Result<usize, HandlerErr>,
) -> serde_json::Value {
    match result {
        Ok(rows) => {
            tracing::info!(kind, rows, path = %out.display(), "csv exported");
            ok(
                &req.id,
                json!({ "ok": true, "rowsExported": rows, "path": out.to_string_lossy() }),
            )
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_write_student_template(req: &Request) -> serde_json::Value {
    let out = match path_param(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let samples: Vec<Vec<String>> = TEMPLATE_SAMPLES
        .iter()
        .map(|row| row.iter().map(|s| s.to_string()).collect())
        .collect();
    let result = write_csv(&out, &TEMPLATE_HEADER, &samples);
    exported(req, &out, "template", result)
}

/// Header positions keyed case-insensitively.
#[derive(Debug)]
struct ImportColumns {
    first_name: usize,
    last_name: usize,
    student_no: usize,
    phone: Option<usize>,
}

impl ImportColumns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, HandlerErr> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let mut missing = Vec::new();
        let mut required = |name: &'static str| {
            let idx = find(name);
            if idx.is_none() {
                missing.push(name);
            }
            idx.unwrap_or(0)
        };
        let first_name = required("First Name");
        let last_name = required("Last Name");
        let student_no = required("Student No");
        if !missing.is_empty() {
            return Err(HandlerErr {
                code: "csv_failed",
                message: format!("missing column(s): {}", missing.join(", ")),
                details: Some(json!({ "missing": missing })),
            });
        }
        Ok(Self {
            first_name,
            last_name,
            student_no,
            phone: find("Phone"),
        })
    }

    fn student(&self, record: &csv::StringRecord, class_id: Option<&str>) -> Result<NewStudent, String> {
        let cell = |i: usize| {
            record
                .get(i)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let (Some(first_name), Some(last_name), Some(student_no)) = (
            cell(self.first_name),
            cell(self.last_name),
            cell(self.student_no),
        ) else {
            return Err("First Name, Last Name and Student No are required".to_string());
        };
        Ok(NewStudent {
            first_name,
            last_name,
            student_no,
            phone: self.phone.and_then(cell),
            class_id: class_id.map(str::to_string),
        })
    }
}

#[derive(Debug, Default)]
struct ImportSummary {
    imported: usize,
    skipped: usize,
    errors: Vec<String>,
}

fn import_students(
    conn: &Connection,
    path: &Path,
    class_id: Option<&str>,
) -> Result<ImportSummary, HandlerErr> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| csv_err(e, path))?;
    let columns = ImportColumns::from_headers(reader.headers().map_err(|e| csv_err(e, path))?)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut summary = ImportSummary::default();
    for (i, record) in reader.records().enumerate() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                summary.errors.push(format!("line {}: {}", i + 2, e));
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or(i as u64 + 2);
        if record.iter().all(|c| c.trim().is_empty()) {
            summary.skipped += 1;
            continue;
        }
        let outcome = columns
            .student(&record, class_id)
            .and_then(|s| insert_student(&tx, &s).map_err(|e| e.message));
        match outcome {
            Ok(_) => summary.imported += 1,
            Err(message) => summary.errors.push(format!("line {}: {}", line, message)),
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;
    Ok(summary)
}

fn handle_import_students_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let max_bytes = state.max_import_bytes;
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let in_path = match path_param(req, "inPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);
    if let Some(id) = class_id.as_deref() {
        match class_exists(conn, id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "class not found", None),
            Err(e) => return e.response(&req.id),
        }
    }

    let size = match std::fs::metadata(&in_path) {
        Ok(m) => m.len(),
        Err(e) => return io_err(e, &in_path).response(&req.id),
    };
    if size > max_bytes {
        tracing::warn!(path = %in_path.display(), size, max_bytes, "import file rejected");
        return err(
            &req.id,
            "file_too_large",
            format!("file is {} bytes; the limit is {} bytes", size, max_bytes),
            Some(json!({ "size": size, "limit": max_bytes })),
        );
    }

    match import_students(conn, &in_path, class_id.as_deref()) {
        Ok(summary) => {
            tracing::info!(
                path = %in_path.display(),
                imported = summary.imported,
                failed = summary.errors.len(),
                "students imported"
            );
            ok(
                &req.id,
                json!({
                    "imported": summary.imported,
                    "skipped": summary.skipped,
                    "errors": summary.errors
                }),
            )
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "exchange.exportStudentsCsv" => Some(handle_export_students_csv(state, req)),
        "exchange.exportRubricCsv" => Some(handle_export_rubric_csv(state, req)),
        "exchange.exportTermCsv" => Some(handle_export_term_csv(state, req)),
        "exchange.writeStudentTemplate" => Some(handle_write_student_template(req)),
        "exchange.importStudentsCsv" => Some(handle_import_students_csv(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_columns_match_case_insensitively() {
        let headers = csv::StringRecord::from(vec!["student no", "LAST NAME", "First Name", "phone"]);
        let cols = ImportColumns::from_headers(&headers).unwrap_or_else(|e| panic!("{}", e.message));
        assert_eq!(cols.student_no, 0);
        assert_eq!(cols.last_name, 1);
        assert_eq!(cols.first_name, 2);
        assert_eq!(cols.phone, Some(3));
    }

    #[test]
    fn import_columns_report_every_missing_header() {
        let headers = csv::StringRecord::from(vec!["First Name", "Phone"]);
        let e = ImportColumns::from_headers(&headers).expect_err("missing headers");
        assert_eq!(e.code, "csv_failed");
        assert!(e.message.contains("Last Name"));
        assert!(e.message.contains("Student No"));
    }

    #[test]
    fn row_without_student_no_is_rejected() {
        let headers = csv::StringRecord::from(vec!["First Name", "Last Name", "Student No"]);
        let cols = ImportColumns::from_headers(&headers).unwrap_or_else(|e| panic!("{}", e.message));
        let row = csv::StringRecord::from(vec!["Ada", "Lovelace", " "]);
        assert!(cols.student(&row, None).is_err());
    }

    #[test]
    fn fixed_cells_round_half_up() {
        assert_eq!(fixed(89.96, 1), "90.0");
        assert_eq!(fixed(58.0, 2), "58.00");
        assert_eq!(opt_cell(None), "-");
    }
}
