use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "practicum.sqlite3";

/// UTC timestamp in the storage format (`YYYY-MM-DD HH:MM:SS`).
pub fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            student_no TEXT NOT NULL UNIQUE,
            phone TEXT,
            registered_at TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS visit_notes(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            visited_at TEXT NOT NULL,
            note TEXT NOT NULL,
            teacher_name TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_visit_notes_student ON visit_notes(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rubric_evaluations(
            student_id TEXT PRIMARY KEY,
            visiting_lecturer REAL NOT NULL DEFAULT 0,
            supervisor REAL NOT NULL DEFAULT 0,
            content_structure REAL NOT NULL DEFAULT 0,
            company_info REAL NOT NULL DEFAULT 0,
            writing_quality REAL NOT NULL DEFAULT 0,
            illustrations REAL NOT NULL DEFAULT 0,
            language_use REAL NOT NULL DEFAULT 0,
            conclusion REAL NOT NULL DEFAULT 0,
            notebook_interview REAL NOT NULL DEFAULT 0,
            aggregate REAL NOT NULL DEFAULT 0,
            letter_grade TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_evaluations(
            student_id TEXT PRIMARY KEY,
            midterm_score REAL NOT NULL DEFAULT 0,
            midterm_assignment_score REAL,
            midterm_assignment_weight REAL NOT NULL DEFAULT 0,
            final_score REAL NOT NULL DEFAULT 0,
            final_assignment_score REAL,
            final_assignment_weight REAL NOT NULL DEFAULT 0,
            attendance_ok INTEGER NOT NULL DEFAULT 0,
            makeup_score REAL,
            makeup_assignment_score REAL,
            makeup_assignment_weight REAL NOT NULL DEFAULT 0,
            midterm_aggregate REAL NOT NULL DEFAULT 0,
            final_aggregate REAL NOT NULL DEFAULT 0,
            makeup_aggregate REAL,
            overall_aggregate REAL NOT NULL DEFAULT 0,
            letter_grade TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_db_is_idempotent() {
        let dir = std::env::temp_dir().join(format!("practicumd-db-{}", uuid::Uuid::new_v4()));
        let conn = open_db(&dir).expect("first open");
        conn.execute(
            "INSERT INTO classes(id, name, created_at) VALUES('c1', 'A', ?)",
            [now_stamp()],
        )
        .expect("insert class");
        drop(conn);

        let conn = open_db(&dir).expect("second open");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0))
            .expect("count");
        assert_eq!(n, 1);
        drop(conn);
        let _ = std::fs::remove_dir_all(dir);
    }
}
