use crate::grading::LetterGrade;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{class_filter, db_conn, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, Row};
use serde_json::json;

use super::evaluations::{
    rubric_columns, rubric_from_row, term_columns, term_from_row, RubricRecord, TermRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Rubric,
    Term,
}

impl Scheme {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rubric" => Some(Scheme::Rubric),
            "term" => Some(Scheme::Term),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Scheme::Rubric => "rubric",
            Scheme::Term => "term",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StudentRef {
    pub student_id: String,
    pub class_name: Option<String>,
    pub student_no: String,
    pub full_name: String,
}

impl StudentRef {
    const COLUMNS: &'static str = "s.id, c.name, s.student_no, s.first_name, s.last_name";
    const WIDTH: usize = 5;

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let first: String = row.get(3)?;
        let last: String = row.get(4)?;
        Ok(Self {
            student_id: row.get(0)?,
            class_name: row.get(1)?,
            student_no: row.get(2)?,
            full_name: format!("{} {}", first, last),
        })
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "studentId": self.student_id,
            "className": self.class_name,
            "studentNo": self.student_no,
            "fullName": self.full_name
        })
    }
}

#[derive(Debug, Clone)]
pub struct RubricRow {
    pub student: StudentRef,
    pub record: RubricRecord,
}

#[derive(Debug, Clone)]
pub struct TermRow {
    pub student: StudentRef,
    pub record: TermRecord,
}

/// Students holding a rubric record, optionally limited to one class.
pub fn rubric_rows(conn: &Connection, class_id: Option<&str>) -> Result<Vec<RubricRow>, HandlerErr> {
    let sql = format!(
        "SELECT {}, {}
         FROM rubric_evaluations r
         JOIN students s ON s.id = r.student_id
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
         ORDER BY c.name, s.student_no",
        StudentRef::COLUMNS,
        rubric_columns("r")
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([class_id], |row| {
        Ok(RubricRow {
            student: StudentRef::from_row(row)?,
            record: rubric_from_row(row, StudentRef::WIDTH)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

/// Students holding a term record, optionally limited to one class.
pub fn term_rows(conn: &Connection, class_id: Option<&str>) -> Result<Vec<TermRow>, HandlerErr> {
    let sql = format!(
        "SELECT {}, {}
         FROM term_evaluations t
         JOIN students s ON s.id = t.student_id
         LEFT JOIN classes c ON c.id = s.class_id
         WHERE (?1 IS NULL OR s.class_id = ?1)
         ORDER BY c.name, s.student_no",
        StudentRef::COLUMNS,
        term_columns("t")
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([class_id], |row| {
        Ok(TermRow {
            student: StudentRef::from_row(row)?,
            record: term_from_row(row, StudentRef::WIDTH)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Distribution {
    pub counts: [usize; 9],
    pub ungraded: usize,
}

impl Distribution {
    pub fn tally<I>(grades: I) -> Self
    where
        I: IntoIterator<Item = Option<LetterGrade>>,
    {
        let mut d = Distribution::default();
        for g in grades {
            match g.and_then(|g| LetterGrade::ALL.iter().position(|x| *x == g)) {
                Some(i) => d.counts[i] += 1,
                None => d.ungraded += 1,
            }
        }
        d
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum::<usize>() + self.ungraded
    }

    fn to_json(&self) -> serde_json::Value {
        let counts: Vec<serde_json::Value> = LetterGrade::ALL
            .iter()
            .zip(self.counts.iter())
            .map(|(g, n)| json!({ "grade": g.as_str(), "count": n }))
            .collect();
        json!({
            "counts": counts,
            "ungraded": self.ungraded,
            "total": self.total()
        })
    }
}

fn handle_grade_distribution(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let raw_scheme = req
        .params
        .get("scheme")
        .and_then(|v| v.as_str())
        .unwrap_or("rubric");
    let Some(scheme) = Scheme::parse(raw_scheme) else {
        return err(
            &req.id,
            "bad_params",
            "scheme must be one of: rubric, term",
            Some(json!({ "scheme": raw_scheme })),
        );
    };
    let class_id = class_filter(&req.params);

    // Grades are re-derived from stored inputs, never read back from the stored letter.
    let dist = match scheme {
        Scheme::Rubric => rubric_rows(conn, class_id.as_deref()).map(|rows| {
            Distribution::tally(rows.iter().map(|r| r.record.result().letter_grade))
        }),
        Scheme::Term => term_rows(conn, class_id.as_deref()).map(|rows| {
            Distribution::tally(rows.iter().map(|r| Some(r.record.result().letter_grade)))
        }),
    };

    match dist {
        Ok(d) => {
            let mut body = d.to_json();
            body["scheme"] = json!(scheme.as_str());
            body["classId"] = json!(class_id);
            ok(&req.id, body)
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_rubric_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);
    match rubric_rows(conn, class_id.as_deref()) {
        Ok(rows) => {
            let rows: Vec<serde_json::Value> = rows
                .iter()
                .map(|r| {
                    let mut v = r.student.to_json();
                    v["evaluation"] = r.record.to_json(Some(&r.student.student_id));
                    v
                })
                .collect();
            ok(&req.id, json!({ "classId": class_id, "rows": rows }))
        }
        Err(e) => e.response(&req.id),
    }
}

fn handle_term_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = class_filter(&req.params);
    match term_rows(conn, class_id.as_deref()) {
        Ok(rows) => {
            let rows: Vec<serde_json::Value> = rows
                .iter()
                .map(|r| {
                    let mut v = r.student.to_json();
                    v["evaluation"] = r.record.to_json(Some(&r.student.student_id));
                    v
                })
                .collect();
            ok(&req.id, json!({ "classId": class_id, "rows": rows }))
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.gradeDistribution" => Some(handle_grade_distribution(state, req)),
        "reports.rubricModel" => Some(handle_rubric_model(state, req)),
        "reports.termModel" => Some(handle_term_model(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_keeps_canonical_order_and_counts_sentinel() {
        let d = Distribution::tally([
            Some(LetterGrade::AA),
            Some(LetterGrade::FF),
            None,
            Some(LetterGrade::AA),
        ]);
        assert_eq!(d.counts[0], 2);
        assert_eq!(d.counts[8], 1);
        assert_eq!(d.ungraded, 1);
        assert_eq!(d.total(), 4);
    }

    #[test]
    fn scheme_parse_is_case_insensitive() {
        assert_eq!(Scheme::parse("Term"), Some(Scheme::Term));
        assert_eq!(Scheme::parse("rubric"), Some(Scheme::Rubric));
        assert_eq!(Scheme::parse("final"), None);
    }
}
