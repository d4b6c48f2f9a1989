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
    let exe = env!("CARGO_BIN_EXE_schoolhubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolhubd");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn result_str(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

fn error_code(resp: &serde_json::Value) -> String {
    resp["error"]["code"].as_str().unwrap_or("").to_string()
}

fn violations(resp: &serde_json::Value) -> Vec<String> {
    resp["error"]["details"]["violations"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

struct Seed {
    class_a: String,
    section_a: String,
    class_b: String,
    section_b: String,
    math: String,
    science: String,
    teacher_one: String,
    teacher_two: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_a = result_str(
        &request_ok(stdin, reader, "s2", "classes.create", json!({ "name": "Grade 3" })),
        "classId",
    );
    let section_a = result_str(
        &request_ok(
            stdin,
            reader,
            "s3",
            "sections.create",
            json!({ "classId": class_a, "name": "A" }),
        ),
        "sectionId",
    );
    let class_b = result_str(
        &request_ok(stdin, reader, "s4", "classes.create", json!({ "name": "Grade 5" })),
        "classId",
    );
    let section_b = result_str(
        &request_ok(
            stdin,
            reader,
            "s5",
            "sections.create",
            json!({ "classId": class_b, "name": "B" }),
        ),
        "sectionId",
    );
    let math = result_str(
        &request_ok(
            stdin,
            reader,
            "s6",
            "subjects.create",
            json!({ "name": "Mathematics", "code": "MATH" }),
        ),
        "subjectId",
    );
    let science = result_str(
        &request_ok(
            stdin,
            reader,
            "s7",
            "subjects.create",
            json!({ "name": "Science", "code": "SCI" }),
        ),
        "subjectId",
    );
    let teacher_one = result_str(
        &request_ok(
            stdin,
            reader,
            "s8",
            "staff.create",
            json!({ "fullName": "Rahim Uddin", "role": "teacher" }),
        ),
        "staffId",
    );
    let teacher_two = result_str(
        &request_ok(
            stdin,
            reader,
            "s9",
            "staff.create",
            json!({ "fullName": "Karima Begum", "role": "teacher" }),
        ),
        "staffId",
    );
    Seed {
        class_a,
        section_a,
        class_b,
        section_b,
        math,
        science,
        teacher_one,
        teacher_two,
    }
}

#[test]
fn teacher_double_booking_is_rejected() {
    let workspace = temp_dir("schoolhub-conflict-teacher");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one,
            "room": "101"
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_b,
            "sectionId": seeded.section_b,
            "subjectId": seeded.science,
            "teacherId": seeded.teacher_one,
            "room": "202"
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    assert_eq!(
        violations(&resp),
        vec!["teacher already assigned in this time slot"]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_section_double_booking_is_rejected() {
    let workspace = temp_dir("schoolhub-conflict-section");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one
        }),
    );

    // Same class/section and period, different subject and teacher.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.science,
            "teacherId": seeded.teacher_two
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    assert_eq!(
        violations(&resp),
        vec!["this class/section already has a teacher at this time"]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn room_reuse_across_sections_is_rejected_case_insensitively() {
    let workspace = temp_dir("schoolhub-conflict-room");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Wednesday",
            "period": "2nd",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one,
            "room": "Lab-2"
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.upsert",
        json!({
            "day": "Wednesday",
            "period": "2nd",
            "classId": seeded.class_b,
            "sectionId": seeded.section_b,
            "subjectId": seeded.science,
            "teacherId": seeded.teacher_two,
            "room": "LAB-2"
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    assert_eq!(violations(&resp), vec!["room already occupied at this time"]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn dry_run_validate_reports_without_persisting() {
    let workspace = temp_dir("schoolhub-conflict-dryrun");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one,
            "room": "204"
        }),
    );

    // Same class-section, same room: the room rule is excused for the same
    // pair, so exactly the class/section conflict comes back.
    let checked = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.validate",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.science,
            "teacherId": seeded.teacher_two,
            "room": "204"
        }),
    );
    assert_eq!(checked.get("valid").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        checked["violations"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default(),
        vec!["this class/section already has a teacher at this time"]
    );

    // Dry runs leave the timetable unchanged.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "timetable.list",
        json!({}),
    );
    assert_eq!(listed["slots"].as_array().map(|a| a.len()), Some(1));

    // Missing required fields come back one violation each, in field order.
    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "timetable.validate",
        json!({ "day": "Monday", "teacherId": seeded.teacher_one }),
    );
    assert_eq!(
        missing["violations"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default(),
        vec![
            "classId is required",
            "sectionId is required",
            "subjectId is required",
            "period is required"
        ]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn editing_a_slot_does_not_conflict_with_itself() {
    let workspace = temp_dir("schoolhub-conflict-self");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one,
            "room": "204"
        }),
    );
    let slot_id = result_str(&created, "id");

    // Re-saving the same slot with a new room must pass against itself.
    let edited = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.upsert",
        json!({
            "slotId": slot_id,
            "day": "Monday",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one,
            "room": "105"
        }),
    );
    assert_eq!(result_str(&edited, "id"), slot_id);
    assert_eq!(edited.get("room").and_then(|v| v.as_str()), Some("105"));

    let listed = request_ok(&mut stdin, &mut reader, "3", "timetable.list", json!({}));
    assert_eq!(listed["slots"].as_array().map(|a| a.len()), Some(1));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn day_labels_normalize_before_comparison() {
    let workspace = temp_dir("schoolhub-conflict-day-alias");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "timetable.upsert",
        json!({
            "day": "Mon",
            "period": "1st",
            "classId": seeded.class_a,
            "sectionId": seeded.section_a,
            "subjectId": seeded.math,
            "teacherId": seeded.teacher_one
        }),
    );

    // "1" is Monday in the Sunday-first indexing; the conflict must be seen
    // through the alias.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "timetable.upsert",
        json!({
            "day": "1",
            "period": "1st",
            "classId": seeded.class_b,
            "sectionId": seeded.section_b,
            "subjectId": seeded.science,
            "teacherId": seeded.teacher_one
        }),
    );
    assert_eq!(error_code(&resp), "validation_failed");
    assert_eq!(
        violations(&resp),
        vec!["teacher already assigned in this time slot"]
    );

    let _ = std::fs::remove_dir_all(workspace);
}
