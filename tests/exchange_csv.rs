use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_practicumd");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("PRACTICUMD_WORKSPACE")
        .env_remove("PRACTICUMD_MAX_IMPORT_BYTES")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn practicumd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn template_import_and_exports_roundtrip_through_files() {
    let workspace = temp_dir("practicum-exchange");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "Imported" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let template = workspace.join("out").join("template.csv");
    let written = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exchange.writeStudentTemplate",
        json!({ "outPath": template.to_string_lossy() }),
    );
    assert_eq!(written["rowsExported"].as_i64(), Some(2));
    let text = std::fs::read_to_string(&template).expect("read template");
    assert!(text.starts_with("First Name,Last Name,Student No,Phone"));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exchange.importStudentsCsv",
        json!({ "inPath": template.to_string_lossy(), "classId": class_id }),
    );
    assert_eq!(imported["imported"].as_i64(), Some(2));
    assert_eq!(imported["errors"].as_array().map(|v| v.len()), Some(0));

    // Header order and case are free; bad rows are reported by line and skipped.
    let messy = workspace.join("messy.csv");
    std::fs::write(
        &messy,
        "student no,PHONE,last name,first name\n\
         3001,,Yildiz,Elif\n\
         2021001,,Again,Duplicate\n\
         ,,Nobody,NoNumber\n\
         ,,,\n\
         3002,5550000,Sahin,Emre\n",
    )
    .expect("write messy csv");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exchange.importStudentsCsv",
        json!({ "inPath": messy.to_string_lossy() }),
    );
    assert_eq!(second["imported"].as_i64(), Some(2));
    assert_eq!(second["skipped"].as_i64(), Some(1));
    let errors: Vec<String> = second["errors"]
        .as_array()
        .expect("errors")
        .iter()
        .filter_map(|e| e.as_str().map(str::to_string))
        .collect();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].starts_with("line 3:"), "{:?}", errors);
    assert!(errors[1].starts_with("line 4:"), "{:?}", errors);

    let missing_header = workspace.join("bad-header.csv");
    std::fs::write(&missing_header, "Name,Phone\nA,1\n").expect("write bad header");
    let rejected = request(
        &mut stdin,
        &mut reader,
        "4",
        "exchange.importStudentsCsv",
        json!({ "inPath": missing_header.to_string_lossy() }),
    );
    assert_eq!(rejected["error"]["code"], json!("csv_failed"));

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "classId": class_id }),
    );
    let students = listed["students"].as_array().expect("students");
    assert_eq!(students.len(), 2);

    let sample_id = students
        .iter()
        .find(|s| s["studentNo"] == json!("2021001"))
        .and_then(|s| s["id"].as_str())
        .expect("imported sample student")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "rubric.save",
        json!({
            "studentId": sample_id,
            "scores": {
                "supervisor": 10, "contentStructure": 10, "companyInfo": 10,
                "writingQuality": 10, "illustrations": 10, "languageUse": 20,
                "conclusion": 10, "notebookInterview": 19.96
            }
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "term.save",
        json!({
            "studentId": sample_id,
            "scores": { "midtermScore": 50, "finalScore": 70, "attendanceOk": true }
        }),
    );

    let rubric_out = workspace.join("rubric.csv");
    let rubric = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "exchange.exportRubricCsv",
        json!({ "outPath": rubric_out.to_string_lossy(), "classId": class_id }),
    );
    assert_eq!(rubric["rowsExported"].as_i64(), Some(1));
    let rubric_text = std::fs::read_to_string(&rubric_out).expect("read rubric csv");
    let mut lines = rubric_text.lines();
    let header = lines.next().expect("header");
    assert!(header.contains("Supervisor (10p)"));
    assert!(header.contains("Language Use (20p)"));
    let row = lines.next().expect("row");
    // 99.96 displays as 100.0; the visiting lecturer column stays 0.
    assert!(row.contains(",19.96,0,100.0,AA,"), "{}", row);

    let term_out = workspace.join("term.csv");
    request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "exchange.exportTermCsv",
        json!({ "outPath": term_out.to_string_lossy() }),
    );
    let term_text = std::fs::read_to_string(&term_out).expect("read term csv");
    let term_row = term_text.lines().nth(1).expect("term row");
    assert!(term_row.contains(",passed,"));
    assert!(term_row.contains(",62.00,CB,"));
    assert!(term_row.contains(",-,"));

    let students_out = workspace.join("students.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "exchange.exportStudentsCsv",
        json!({ "outPath": students_out.to_string_lossy() }),
    );
    assert_eq!(exported["rowsExported"].as_i64(), Some(4));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn import_refuses_files_over_the_configured_limit() {
    let workspace = temp_dir("practicum-exchange-limit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&["--max-import-bytes", "16"]);
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let big = workspace.join("big.csv");
    std::fs::write(&big, "First Name,Last Name,Student No\nA,B,1\n").expect("write csv");
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "exchange.importStudentsCsv",
        json!({ "inPath": big.to_string_lossy() }),
    );
    assert_eq!(resp["error"]["code"], json!("file_too_large"));
    assert_eq!(resp["error"]["details"]["limit"].as_i64(), Some(16));

    let listed = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().map(|v| v.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
