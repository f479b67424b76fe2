use crate::db;
use crate::grading::{
    self, check_range, GradeError, RubricComponent, RubricResult, RubricScores, TermResult,
    TermScores,
};
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, required_str, student_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};

/// Stored rubric inputs. The visiting lecturer score is informational and never summed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RubricRecord {
    pub visiting_lecturer: f64,
    pub scores: RubricScores,
    pub updated_at: Option<String>,
}

impl RubricRecord {
    pub fn result(&self) -> RubricResult {
        grading::evaluate_rubric(&self.scores)
    }

    pub fn validate(&self) -> Result<(), GradeError> {
        self.scores.validate()?;
        check_range("visitingLecturerScore", self.visiting_lecturer, 0.0, 100.0)
    }

    pub fn to_json(&self, student_id: Option<&str>) -> Value {
        let result = self.result();
        json!({
            "studentId": student_id,
            "persisted": self.updated_at.is_some(),
            "scores": self.scores,
            "visitingLecturerScore": self.visiting_lecturer,
            "aggregate": result.aggregate_display(),
            "letterGrade": result.letter_grade,
            "letterLabel": grading::grade_label(result.letter_grade),
            "updatedAt": self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermRecord {
    pub scores: TermScores,
    pub updated_at: Option<String>,
}

impl TermRecord {
    pub fn result(&self) -> TermResult {
        grading::evaluate_term(&self.scores)
    }

    pub fn to_json(&self, student_id: Option<&str>) -> Value {
        json!({
            "studentId": student_id,
            "persisted": self.updated_at.is_some(),
            "scores": self.scores,
            "result": self.result().display(),
            "updatedAt": self.updated_at,
        })
    }
}

/// Column list matching `rubric_from_row`, qualified with `alias`.
pub fn rubric_columns(alias: &str) -> String {
    let mut cols = vec![format!("{alias}.visiting_lecturer")];
    cols.extend(
        RubricComponent::ALL
            .iter()
            .map(|c| format!("{alias}.{}", c.column())),
    );
    cols.push(format!("{alias}.updated_at"));
    cols.join(", ")
}

pub fn rubric_from_row(row: &Row, offset: usize) -> rusqlite::Result<RubricRecord> {
    let mut scores = RubricScores::default();
    for (i, c) in RubricComponent::ALL.iter().enumerate() {
        scores.set(*c, row.get(offset + 1 + i)?);
    }
    Ok(RubricRecord {
        visiting_lecturer: row.get(offset)?,
        scores,
        updated_at: row.get(offset + 1 + RubricComponent::ALL.len())?,
    })
}

/// Column list matching `term_from_row`, qualified with `alias`.
pub fn term_columns(alias: &str) -> String {
    [
        "midterm_score",
        "midterm_assignment_score",
        "midterm_assignment_weight",
        "final_score",
        "final_assignment_score",
        "final_assignment_weight",
        "attendance_ok",
        "makeup_score",
        "makeup_assignment_score",
        "makeup_assignment_weight",
        "updated_at",
    ]
    .iter()
    .map(|c| format!("{alias}.{c}"))
    .collect::<Vec<_>>()
    .join(", ")
}

pub fn term_from_row(row: &Row, offset: usize) -> rusqlite::Result<TermRecord> {
    let attendance: i64 = row.get(offset + 6)?;
    Ok(TermRecord {
        scores: TermScores {
            midterm_score: row.get(offset)?,
            midterm_assignment_score: row.get(offset + 1)?,
            midterm_assignment_weight_percent: row.get(offset + 2)?,
            final_score: row.get(offset + 3)?,
            final_assignment_score: row.get(offset + 4)?,
            final_assignment_weight_percent: row.get(offset + 5)?,
            attendance_ok: attendance != 0,
            makeup_score: row.get(offset + 7)?,
            makeup_assignment_score: row.get(offset + 8)?,
            makeup_assignment_weight_percent: row.get(offset + 9)?,
        },
        updated_at: row.get(offset + 10)?,
    })
}

pub fn load_rubric(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<RubricRecord>> {
    let sql = format!(
        "SELECT {} FROM rubric_evaluations r WHERE r.student_id = ?",
        rubric_columns("r")
    );
    conn.query_row(&sql, [student_id], |row| rubric_from_row(row, 0))
        .optional()
}

pub fn load_term(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<TermRecord>> {
    let sql = format!(
        "SELECT {} FROM term_evaluations t WHERE t.student_id = ?",
        term_columns("t")
    );
    conn.query_row(&sql, [student_id], |row| term_from_row(row, 0))
        .optional()
}

fn scores_object<'a>(req: &'a Request) -> Result<&'a Map<String, Value>, HandlerErr> {
    match req.params.get("scores") {
        Some(Value::Object(m)) => Ok(m),
        None | Some(Value::Null) => Err(HandlerErr::new("bad_params", "missing scores")),
        Some(_) => Err(HandlerErr::new("bad_params", "scores must be an object")),
    }
}

/// Absent and null are both "not supplied"; anything else must be a JSON number.
fn number_field(obj: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, GradeError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or(GradeError::NonFinite { field: key }),
    }
}

fn apply_rubric_patch(record: &mut RubricRecord, obj: &Map<String, Value>) -> Result<(), GradeError> {
    for c in RubricComponent::ALL {
        if let Some(v) = number_field(obj, c.key())? {
            record.scores.set(c, v);
        }
    }
    if let Some(v) = number_field(obj, "visitingLecturerScore")? {
        record.visiting_lecturer = v;
    }
    Ok(())
}

fn parse_term_scores(obj: &Map<String, Value>) -> Result<TermScores, HandlerErr> {
    let attendance_ok = match obj.get("attendanceOk") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(v) if v.as_i64() == Some(0) => false,
        Some(v) if v.as_i64() == Some(1) => true,
        Some(_) => {
            return Err(HandlerErr::new(
                "bad_params",
                "attendanceOk must be a boolean",
            ))
        }
    };

    Ok(TermScores {
        midterm_score: number_field(obj, "midtermScore")?.unwrap_or(0.0),
        midterm_assignment_score: number_field(obj, "midtermAssignmentScore")?,
        midterm_assignment_weight_percent: number_field(obj, "midtermAssignmentWeightPercent")?
            .unwrap_or(0.0),
        final_score: number_field(obj, "finalScore")?.unwrap_or(0.0),
        final_assignment_score: number_field(obj, "finalAssignmentScore")?,
        final_assignment_weight_percent: number_field(obj, "finalAssignmentWeightPercent")?
            .unwrap_or(0.0),
        attendance_ok,
        makeup_score: number_field(obj, "makeupScore")?,
        makeup_assignment_score: number_field(obj, "makeupAssignmentScore")?,
        makeup_assignment_weight_percent: number_field(obj, "makeupAssignmentWeightPercent")?
            .unwrap_or(0.0),
    })
}

fn ensure_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    if student_exists(conn, student_id)? {
        Ok(())
    } else {
        Err(HandlerErr::new("not_found", "student not found"))
    }
}

fn save_rubric(
    conn: &Connection,
    student_id: &str,
    patch: &Map<String, Value>,
) -> Result<RubricRecord, HandlerErr> {
    ensure_student(conn, student_id)?;

    // Read-merge-write in one transaction so the stored pair (inputs, grade) is coherent.
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut record = load_rubric(&tx, student_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .unwrap_or_default();
    apply_rubric_patch(&mut record, patch)?;
    record.validate()?;

    let result = record.result();
    let stamp = db::now_stamp();
    let s = &record.scores;
    tx.execute(
        "INSERT INTO rubric_evaluations(
           student_id, visiting_lecturer, supervisor, content_structure, company_info,
           writing_quality, illustrations, language_use, conclusion, notebook_interview,
           aggregate, letter_grade, updated_at
         ) VALUES(
           :student_id, :visiting_lecturer, :supervisor, :content_structure, :company_info,
           :writing_quality, :illustrations, :language_use, :conclusion, :notebook_interview,
           :aggregate, :letter_grade, :updated_at
         )
         ON CONFLICT(student_id) DO UPDATE SET
           visiting_lecturer = excluded.visiting_lecturer,
           supervisor = excluded.supervisor,
           content_structure = excluded.content_structure,
           company_info = excluded.company_info,
           writing_quality = excluded.writing_quality,
           illustrations = excluded.illustrations,
           language_use = excluded.language_use,
           conclusion = excluded.conclusion,
           notebook_interview = excluded.notebook_interview,
           aggregate = excluded.aggregate,
           letter_grade = excluded.letter_grade,
           updated_at = excluded.updated_at",
        named_params! {
            ":student_id": student_id,
            ":visiting_lecturer": record.visiting_lecturer,
            ":supervisor": s.supervisor,
            ":content_structure": s.content_structure,
            ":company_info": s.company_info,
            ":writing_quality": s.writing_quality,
            ":illustrations": s.illustrations,
            ":language_use": s.language_use,
            ":conclusion": s.conclusion,
            ":notebook_interview": s.notebook_interview,
            ":aggregate": result.aggregate,
            ":letter_grade": result.letter_grade.map(|g| g.as_str()),
            ":updated_at": &stamp,
        },
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    record.updated_at = Some(stamp);
    tracing::info!(
        student_id,
        aggregate = result.aggregate,
        grade = grading::grade_label(result.letter_grade),
        "rubric evaluation saved"
    );
    Ok(record)
}

fn save_term(conn: &Connection, student_id: &str, scores: TermScores) -> Result<TermRecord, HandlerErr> {
    ensure_student(conn, student_id)?;
    scores.validate()?;

    let result = grading::evaluate_term(&scores);
    let stamp = db::now_stamp();
    conn.execute(
        "INSERT INTO term_evaluations(
           student_id,
           midterm_score, midterm_assignment_score, midterm_assignment_weight,
           final_score, final_assignment_score, final_assignment_weight,
           attendance_ok,
           makeup_score, makeup_assignment_score, makeup_assignment_weight,
           midterm_aggregate, final_aggregate, makeup_aggregate, overall_aggregate,
           letter_grade, updated_at
         ) VALUES(
           :student_id,
           :midterm_score, :midterm_assignment_score, :midterm_assignment_weight,
           :final_score, :final_assignment_score, :final_assignment_weight,
           :attendance_ok,
           :makeup_score, :makeup_assignment_score, :makeup_assignment_weight,
           :midterm_aggregate, :final_aggregate, :makeup_aggregate, :overall_aggregate,
           :letter_grade, :updated_at
         )
         ON CONFLICT(student_id) DO UPDATE SET
           midterm_score = excluded.midterm_score,
           midterm_assignment_score = excluded.midterm_assignment_score,
           midterm_assignment_weight = excluded.midterm_assignment_weight,
           final_score = excluded.final_score,
           final_assignment_score = excluded.final_assignment_score,
           final_assignment_weight = excluded.final_assignment_weight,
           attendance_ok = excluded.attendance_ok,
           makeup_score = excluded.makeup_score,
           makeup_assignment_score = excluded.makeup_assignment_score,
           makeup_assignment_weight = excluded.makeup_assignment_weight,
           midterm_aggregate = excluded.midterm_aggregate,
           final_aggregate = excluded.final_aggregate,
           makeup_aggregate = excluded.makeup_aggregate,
           overall_aggregate = excluded.overall_aggregate,
           letter_grade = excluded.letter_grade,
           updated_at = excluded.updated_at",
        named_params! {
            ":student_id": student_id,
            ":midterm_score": scores.midterm_score,
            ":midterm_assignment_score": scores.midterm_assignment_score,
            ":midterm_assignment_weight": scores.midterm_assignment_weight_percent,
            ":final_score": scores.final_score,
            ":final_assignment_score": scores.final_assignment_score,
            ":final_assignment_weight": scores.final_assignment_weight_percent,
            ":attendance_ok": scores.attendance_ok as i64,
            ":makeup_score": scores.makeup_score,
            ":makeup_assignment_score": scores.makeup_assignment_score,
            ":makeup_assignment_weight": scores.makeup_assignment_weight_percent,
            ":midterm_aggregate": result.midterm_aggregate,
            ":final_aggregate": result.final_aggregate,
            ":makeup_aggregate": result.makeup_aggregate,
            ":overall_aggregate": result.overall_aggregate,
            ":letter_grade": result.letter_grade.as_str(),
            ":updated_at": &stamp,
        },
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;

    tracing::info!(
        student_id,
        overall = result.overall_aggregate,
        grade = result.letter_grade.as_str(),
        attendance_ok = scores.attendance_ok,
        makeup = scores.makeup_score.is_some(),
        "term evaluation saved"
    );
    Ok(TermRecord {
        scores,
        updated_at: Some(stamp),
    })
}

fn rejected(req: &Request, e: HandlerErr) -> Value {
    tracing::warn!(method = %req.method, code = e.code, message = %e.message, "evaluation rejected");
    e.response(&req.id)
}

fn handle_rubric_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_student(conn, &student_id) {
        return e.response(&req.id);
    }
    match load_rubric(conn, &student_id) {
        Ok(record) => ok(
            &req.id,
            record.unwrap_or_default().to_json(Some(&student_id)),
        ),
        Err(e) => HandlerErr::db("db_query_failed", e).response(&req.id),
    }
}

fn handle_rubric_save(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let patch = match scores_object(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match save_rubric(conn, &student_id, patch) {
        Ok(record) => ok(&req.id, record.to_json(Some(&student_id))),
        Err(e) => rejected(req, e),
    }
}

fn handle_rubric_preview(req: &Request) -> Value {
    let patch = match scores_object(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let mut record = RubricRecord::default();
    let checked = apply_rubric_patch(&mut record, patch).and_then(|_| record.validate());
    match checked {
        Ok(()) => ok(&req.id, record.to_json(None)),
        Err(e) => rejected(req, e.into()),
    }
}

fn handle_term_get(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = ensure_student(conn, &student_id) {
        return e.response(&req.id);
    }
    match load_term(conn, &student_id) {
        Ok(record) => ok(
            &req.id,
            record.unwrap_or_default().to_json(Some(&student_id)),
        ),
        Err(e) => HandlerErr::db("db_query_failed", e).response(&req.id),
    }
}

fn handle_term_save(state: &mut AppState, req: &Request) -> Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let scores = match scores_object(req).and_then(parse_term_scores) {
        Ok(v) => v,
        Err(e) => return rejected(req, e),
    };
    match save_term(conn, &student_id, scores) {
        Ok(record) => ok(&req.id, record.to_json(Some(&student_id))),
        Err(e) => rejected(req, e),
    }
}

fn handle_term_preview(req: &Request) -> Value {
    let scores = match scores_object(req).and_then(parse_term_scores) {
        Ok(v) => v,
        Err(e) => return rejected(req, e),
    };
    if let Err(e) = scores.validate() {
        return rejected(req, e.into());
    }
    let record = TermRecord {
        scores,
        updated_at: None,
    };
    ok(&req.id, record.to_json(None))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "rubric.get" => Some(handle_rubric_get(state, req)),
        "rubric.save" => Some(handle_rubric_save(state, req)),
        "rubric.preview" => Some(handle_rubric_preview(req)),
        "term.get" => Some(handle_term_get(state, req)),
        "term.save" => Some(handle_term_save(state, req)),
        "term.preview" => Some(handle_term_preview(req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().expect("object")
    }

    #[test]
    fn rubric_patch_keeps_unsupplied_components() {
        let mut record = RubricRecord::default();
        record.scores.language_use = 15.0;
        apply_rubric_patch(
            &mut record,
            &obj(json!({ "supervisor": 8, "languageUse": null, "conclusion": 7.5 })),
        )
        .expect("patch");
        assert_eq!(record.scores.supervisor, 8.0);
        assert_eq!(record.scores.language_use, 15.0);
        assert_eq!(record.scores.conclusion, 7.5);
    }

    #[test]
    fn rubric_patch_rejects_non_numeric() {
        let mut record = RubricRecord::default();
        let e = apply_rubric_patch(&mut record, &obj(json!({ "illustrations": "ten" })))
            .expect_err("string value");
        assert_eq!(e.code(), "invalid_number");
        assert_eq!(e.field(), "illustrations");
    }

    #[test]
    fn term_parse_defaults_absent_fields() {
        let scores = parse_term_scores(&obj(json!({
            "midtermScore": 60,
            "midtermAssignmentScore": null,
            "attendanceOk": true
        })))
        .unwrap_or_else(|e| panic!("{}", e.message));
        assert_eq!(scores.midterm_score, 60.0);
        assert_eq!(scores.midterm_assignment_score, None);
        assert_eq!(scores.final_score, 0.0);
        assert_eq!(scores.makeup_score, None);
        assert!(scores.attendance_ok);
    }

    #[test]
    fn column_lists_line_up_with_row_readers() {
        assert_eq!(rubric_columns("r").split(", ").count(), 10);
        assert_eq!(term_columns("t").split(", ").count(), 11);
        assert!(rubric_columns("r").starts_with("r.visiting_lecturer, r.supervisor"));
    }
}
