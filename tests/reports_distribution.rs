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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_practicumd");
    let mut child = Command::new(exe)
        .env_remove("PRACTICUMD_WORKSPACE")
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

fn count_for(dist: &serde_json::Value, grade: &str) -> i64 {
    dist["counts"]
        .as_array()
        .expect("counts")
        .iter()
        .find(|c| c["grade"] == json!(grade))
        .and_then(|c| c["count"].as_i64())
        .expect("grade present")
}

#[test]
fn grade_distribution_counts_recomputed_grades_per_scheme() {
    let workspace = temp_dir("practicum-reports");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
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
        json!({ "name": "Section 1" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();

    let mut ids = Vec::new();
    for (i, class) in [Some(&class_id), Some(&class_id), None].iter().enumerate() {
        let no = format!("R-{}", i);
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.create",
            json!({ "firstName": "Student", "lastName": no, "studentNo": no, "classId": class }),
        );
        ids.push(created["studentId"].as_str().expect("studentId").to_string());
    }

    // 100 -> AA, 0 -> no grade, 15 -> FF
    let rubric_inputs = [
        json!({
            "supervisor": 10, "contentStructure": 10, "companyInfo": 10, "writingQuality": 10,
            "illustrations": 10, "languageUse": 20, "conclusion": 10, "notebookInterview": 20
        }),
        json!({ "supervisor": 0 }),
        json!({ "supervisor": 8, "conclusion": 7 }),
    ];
    for (i, scores) in rubric_inputs.iter().enumerate() {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("r{}", i),
            "rubric.save",
            json!({ "studentId": ids[i], "scores": scores }),
        );
    }

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "d1",
        "reports.gradeDistribution",
        json!({ "scheme": "rubric" }),
    );
    assert_eq!(all["scheme"], json!("rubric"));
    assert_eq!(all["total"].as_i64(), Some(3));
    assert_eq!(all["ungraded"].as_i64(), Some(1));
    assert_eq!(count_for(&all, "AA"), 1);
    assert_eq!(count_for(&all, "FF"), 1);
    assert_eq!(all["counts"][0]["grade"], json!("AA"));
    assert_eq!(all["counts"][8]["grade"], json!("FF"));

    let section = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "reports.gradeDistribution",
        json!({ "scheme": "rubric", "classId": class_id }),
    );
    assert_eq!(section["total"].as_i64(), Some(2));
    assert_eq!(count_for(&section, "FF"), 0);

    request_ok(
        &mut stdin,
        &mut reader,
        "t0",
        "term.save",
        json!({
            "studentId": ids[0],
            "scores": { "midtermScore": 90, "finalScore": 90, "attendanceOk": true }
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "term.save",
        json!({
            "studentId": ids[1],
            "scores": { "midtermScore": 90, "finalScore": 90, "attendanceOk": false }
        }),
    );
    let term = request_ok(
        &mut stdin,
        &mut reader,
        "d3",
        "reports.gradeDistribution",
        json!({ "scheme": "term", "classId": "ALL" }),
    );
    assert_eq!(term["total"].as_i64(), Some(2));
    assert_eq!(term["ungraded"].as_i64(), Some(0));
    assert_eq!(count_for(&term, "AA"), 1);
    assert_eq!(count_for(&term, "FF"), 1);

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "m",
        "reports.termModel",
        json!({ "classId": class_id }),
    );
    let rows = model["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["className"], json!("Section 1"));
    assert_eq!(rows[0]["studentNo"], json!("R-0"));
    assert_eq!(
        rows[0]["evaluation"]["result"]["overallAggregate"].as_f64(),
        Some(90.0)
    );

    let bad = request(
        &mut stdin,
        &mut reader,
        "d4",
        "reports.gradeDistribution",
        json!({ "scheme": "weekly" }),
    );
    assert_eq!(bad["error"]["code"], json!("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
