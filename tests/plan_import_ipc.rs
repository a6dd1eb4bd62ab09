use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

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

/// Kills the plan store when the test ends, pass or fail.
struct PlanStore {
    child: Child,
    url: String,
}

impl Drop for PlanStore {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_plan_store(dir: &Path) -> PlanStore {
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("reserve port")
        .local_addr()
        .expect("local addr")
        .port();
    let child = Command::new(env!("CARGO_BIN_EXE_plansd"))
        .env("PLANS_PORT", port.to_string())
        .env("PLANS_DB_PATH", dir.join("plans.sqlite3"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn plansd");
    let store = PlanStore {
        child,
        url: format!("http://127.0.0.1:{}", port),
    };

    let deadline = Instant::now() + Duration::from_secs(15);
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(Instant::now() < deadline, "plansd did not start");
        std::thread::sleep(Duration::from_millis(50));
    }
    store
}

fn spawn_sidecar(plan_store_url: &str) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_librettod");
    let mut child = Command::new(exe)
        .env("LIBRETTO_PLANS_URL", plan_store_url)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn librettod");
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
        value.get("error").cloned().unwrap_or_default()
    );
    value.get("result").cloned().unwrap_or_default()
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &Path,
) {
    request_ok(
        stdin,
        reader,
        "select",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

fn close(mut child: Child, stdin: ChildStdin) {
    drop(stdin);
    let _ = child.wait();
}

const PLAN_CSV: &str = "Codice;Denominazione;CFU\nMAT01;Analisi I;12\nFIS01;Fisica;6\n;Senza codice;6\n";

fn utf16le_with_bom(text: &str) -> Vec<u8> {
    let mut out = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

#[test]
fn import_replaces_exams_and_shares_plan_once() {
    let root = temp_dir("libretto-import");
    let store = spawn_plan_store(&root);
    let workspace = root.join("workspace");
    let csv = root.join("07-89.csv");
    std::fs::write(&csv, PLAN_CSV).expect("write plan csv");

    let (child, mut stdin, mut reader) = spawn_sidecar(&store.url);
    select_workspace(&mut stdin, &mut reader, &workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.add",
        json!({ "name": "Vecchio esame", "cfu": 6, "grade": "18" }),
    );

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "plans.importCsv",
        json!({ "path": csv.to_string_lossy() }),
    );
    assert_eq!(imported["code"], json!("07-89"));
    assert_eq!(imported["imported"], json!(2));
    assert_eq!(imported["dropped"], json!(1));
    assert_eq!(imported["encoding"], json!("utf8"));
    assert_eq!(imported["delimiter"], json!(";"));
    assert_eq!(imported["published"], json!(true));
    assert_eq!(imported["alreadyShared"], json!(false));
    assert!(imported.get("publishError").is_none());

    let listed = request_ok(&mut stdin, &mut reader, "3", "exams.list", json!({}));
    let exams = listed["exams"].as_array().expect("exams");
    let names: Vec<&str> = exams.iter().filter_map(|e| e["name"].as_str()).collect();
    assert_eq!(names, vec!["Analisi I", "Fisica"]);
    assert!(exams.iter().all(|e| e["grade"] == json!("")));

    // Same code, different content: the shared plan is kept as is.
    let other_dir = root.join("other");
    std::fs::create_dir_all(&other_dir).expect("create other dir");
    let other_csv = other_dir.join("07-89.csv");
    std::fs::write(
        &other_csv,
        utf16le_with_bom("Codice,Denominazione,CFU\r\nCHI01,Chimica,9\r\n"),
    )
    .expect("write utf16 csv");
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "plans.importCsv",
        json!({ "path": other_csv.to_string_lossy() }),
    );
    assert_eq!(again["encoding"], json!("utf16_le_bom"));
    assert_eq!(again["delimiter"], json!(","));
    assert_eq!(again["imported"], json!(1));
    assert_eq!(again["published"], json!(false));
    assert_eq!(again["alreadyShared"], json!(true));

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "plans.fetch",
        json!({ "code": "07-89" }),
    );
    assert_eq!(fetched["found"], json!(true));
    assert_eq!(
        fetched["plan"]["rows"],
        json!([
            { "codice": "MAT01", "denominazione": "Analisi I", "cfu": 12 },
            { "codice": "FIS01", "denominazione": "Fisica", "cfu": 6 }
        ])
    );

    let missing = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "plans.fetch",
        json!({ "code": "99-99" }),
    );
    assert_eq!(missing["found"], json!(false));
    assert!(missing.get("plan").is_none());

    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "plans.fetch",
        json!({ "code": "7-89" }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    close(child, stdin);
}

#[test]
fn merge_adds_only_missing_rows_and_exports_plan() {
    let root = temp_dir("libretto-merge");
    let store = spawn_plan_store(&root);
    let csv = root.join("10-20.csv");
    std::fs::write(&csv, PLAN_CSV).expect("write plan csv");

    // Share the plan from one workspace...
    let (child, mut stdin, mut reader) = spawn_sidecar(&store.url);
    select_workspace(&mut stdin, &mut reader, &root.join("sharer"));
    let shared = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "plans.importCsv",
        json!({ "path": csv.to_string_lossy() }),
    );
    assert_eq!(shared["published"], json!(true));
    close(child, stdin);

    // ...and merge it into another.
    let (child, mut stdin, mut reader) = spawn_sidecar(&store.url);
    select_workspace(&mut stdin, &mut reader, &root.join("merger"));
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.add",
        json!({ "name": "ANALISI  i", "cfu": 12, "grade": "28" }),
    );

    let resp = request(&mut stdin, &mut reader, "2", "plans.merge", json!({}));
    assert_eq!(error_code(&resp), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "plans.fetch",
        json!({ "code": "10-20" }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "plans.merge",
        json!({ "indices": [0, 5] }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    let merged = request_ok(&mut stdin, &mut reader, "5", "plans.merge", json!({}));
    assert_eq!(merged["added"], json!(1));
    assert_eq!(merged["skipped"], json!(1));
    assert_eq!(merged["summary"]["examCount"], json!(2));

    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "plans.merge",
        json!({ "indices": [1] }),
    );
    assert_eq!(again["added"], json!(0));
    assert_eq!(again["skipped"], json!(1));

    let listed = request_ok(&mut stdin, &mut reader, "7", "exams.list", json!({}));
    assert_eq!(listed["exams"][0]["grade"], json!("28"));
    assert_eq!(listed["exams"][1]["name"], json!("Fisica"));

    let out = root.join("exported.csv");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "plans.exportCsv",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported["rowsExported"], json!(2));
    assert_eq!(
        std::fs::read_to_string(&out).expect("read exported plan"),
        "Codice;Denominazione;CFU\r\nMAT01;Analisi I;12\r\nFIS01;Fisica;6\r\n"
    );

    close(child, stdin);
}

#[test]
fn rejected_files_leave_exams_untouched() {
    let root = temp_dir("libretto-bad-import");
    let workspace = root.join("workspace");
    // No store is needed: every import here fails before publishing.
    let (child, mut stdin, mut reader) = spawn_sidecar("http://127.0.0.1:9");
    select_workspace(&mut stdin, &mut reader, &workspace);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.add",
        json!({ "name": "Algebra", "cfu": 9, "grade": "30" }),
    );

    let bad_name = root.join("piano.csv");
    std::fs::write(&bad_name, PLAN_CSV).expect("write csv");
    let bad_header = root.join("01-02.csv");
    std::fs::write(&bad_header, "Codice;Nome;CFU\nA;B;6\n").expect("write csv");
    let no_rows = root.join("03-04.csv");
    std::fs::write(&no_rows, "Codice;Denominazione;CFU\nA;B;0\n;C;6\n").expect("write csv");
    let empty = root.join("05-06.csv");
    std::fs::write(&empty, "").expect("write csv");

    for (i, path) in [&bad_name, &bad_header, &no_rows, &empty].iter().enumerate() {
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("bad-{}", i),
            "plans.importCsv",
            json!({ "path": path.to_string_lossy() }),
        );
        assert_eq!(error_code(&resp), "import_failed", "{}", path.display());
    }

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "plans.importCsv",
        json!({ "path": bad_header.to_string_lossy() }),
    );
    let message = resp["error"]["message"].as_str().unwrap_or("");
    assert!(message.contains("Codice;Denominazione;CFU"), "{}", message);
    assert!(message.contains("Codice;Nome;CFU"), "{}", message);

    let listed = request_ok(&mut stdin, &mut reader, "3", "exams.list", json!({}));
    assert_eq!(listed["exams"].as_array().map(|e| e.len()), Some(1));
    assert_eq!(listed["exams"][0]["name"], json!("Algebra"));

    close(child, stdin);
}

#[test]
fn unreachable_store_does_not_block_local_import() {
    let root = temp_dir("libretto-offline");
    let csv = root.join("07-89.csv");
    std::fs::write(&csv, PLAN_CSV).expect("write plan csv");

    let (child, mut stdin, mut reader) = spawn_sidecar("http://127.0.0.1:9");
    select_workspace(&mut stdin, &mut reader, &root.join("workspace"));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "plans.importCsv",
        json!({ "path": csv.to_string_lossy() }),
    );
    assert_eq!(imported["imported"], json!(2));
    assert_eq!(imported["published"], json!(false));
    assert_eq!(imported["alreadyShared"], json!(false));
    assert!(imported["publishError"].is_string());

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "plans.fetch",
        json!({ "code": "07-89" }),
    );
    assert_eq!(error_code(&resp), "plan_store_failed");

    close(child, stdin);
}
