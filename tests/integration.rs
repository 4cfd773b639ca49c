#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn harvest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("harvest");
    path
}

const SOURCE_A: &str = r#"#!/bin/sh
cat > productos_a.json <<'JSON'
[
  {"titulo": "TV A", "marca": "LG", "fuente": "a", "contador_extraccion": 1, "precio_valor": 100},
  {"titulo": "TV B", "marca": "Samsung", "fuente": "a", "contador_extraccion": 2, "precio_texto": "COP 2,599,000"}
]
JSON
"#;

const SOURCE_PAGES: &str = r#"#!/bin/sh
echo "{\"titulo\": \"Paged\", \"fuente\": \"paged\", \"contador_extraccion\": 1, \"pagina\": $1}" > productos.jsonl
"#;

fn write_source(root: &Path, name: &str, script: &str) {
    let dir = root.join("sources").join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("scrape.sh"), script).unwrap();
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    write_source(&root, "a", SOURCE_A);
    write_source(&root, "b", "#!/bin/sh\necho 'blocked' >&2\nexit 1\n");
    write_source(&root, "paged", SOURCE_PAGES);

    let config_content = format!(
        r#"[db]
path = "{root}/data/harvest.sqlite"

[pipeline]
output_dir = "{root}/scraped_output"
timeout_secs = 30

[logging]
level = "warn"

[admin]
backup_dir = "{root}/backups"

[sources.a]
cwd = "{root}/sources/a"
command = ["sh", "scrape.sh"]

[sources.b]
cwd = "{root}/sources/b"
command = ["sh", "scrape.sh"]

[sources.paged]
cwd = "{root}/sources/paged"
command = ["sh", "scrape.sh"]
args = ["{{paginas}}"]

[sources.ghost]
cwd = "{root}/sources/does-not-exist"
command = ["sh", "scrape.sh"]
"#,
        root = root.display()
    );

    let config_path = config_dir.join("harvest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_harvest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = harvest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run harvest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn run_summary(stdout: &str) -> serde_json::Value {
    serde_json::from_str(stdout).unwrap_or_else(|e| panic!("stdout is not JSON ({}): {}", e, stdout))
}

#[test]
fn test_init_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/harvest.sqlite").exists());

    let (_, _, success) = run_harvest(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_run_one_success_one_failure() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(&config_path, &["run", "--sources", "a,b", "--pages", "1"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);

    let summary = run_summary(&stdout);
    assert_eq!(summary["scrapers_ejecutados"], 1);
    assert_eq!(summary["scrapers_fallidos"], 1);
    assert_eq!(summary["productos_procesados"], 2);
    assert_eq!(summary["errores"], serde_json::json!(["Falló scraper b"]));
    assert_eq!(summary["archivos_generados"].as_array().unwrap().len(), 1);

    let summaries: Vec<_> = fs::read_dir(tmp.path().join("scraped_output"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].starts_with("ejecucion_"));
}

#[test]
fn test_run_with_nothing_accomplished_exits_nonzero() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_harvest(&config_path, &["run", "--sources", "b,ghost"]);
    assert!(!success);

    let summary = run_summary(&stdout);
    assert_eq!(summary["scrapers_ejecutados"], 0);
    assert_eq!(summary["scrapers_fallidos"], 2);
}

#[test]
fn test_run_aborts_when_store_is_unreachable() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("data"), "not a directory").unwrap();

    let (stdout, stderr, success) = run_harvest(&config_path, &["run", "--sources", "a"]);
    assert!(!success, "run should fail: stdout={}", stdout);
    assert!(stderr.contains("document store"), "stderr={}", stderr);
    assert!(!tmp.path().join("sources/a/productos_a.json").exists());
    assert!(!tmp.path().join("scraped_output").exists());
}

#[test]
fn test_rerun_reports_unchanged() {
    let (_tmp, config_path) = setup_test_env();

    run_harvest(&config_path, &["run", "--sources", "a"]);
    let (stdout, _, success) = run_harvest(&config_path, &["run", "--sources", "a"]);
    assert!(success);

    let summary = run_summary(&stdout);
    assert_eq!(summary["productos_procesados"], 2);
    assert_eq!(summary["resultados"][0]["inserted"], 0);
    assert_eq!(summary["resultados"][0]["unchanged"], 2);
}

#[test]
fn test_page_count_reaches_source() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) =
        run_harvest(&config_path, &["run", "--sources", "paged", "--pages", "3"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);

    let (_, _, success) = run_harvest(&config_path, &["admin", "--backup-only"]);
    assert!(success);

    let backup_path = fs::read_dir(tmp.path().join("backups"))
        .unwrap()
        .next()
        .unwrap()
        .unwrap()
        .path();
    let backup: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(backup_path).unwrap()).unwrap();
    assert_eq!(backup["documents"][0]["_id"], "paged_1");
    assert_eq!(backup["documents"][0]["page"], 3);
}

#[test]
fn test_upload_and_stats() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_harvest(
        &config_path,
        &[
            "upload",
            "--json",
            r#"[{"fuente": "exito", "contador_extraccion": 1}, 7]"#,
        ],
    );
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("inserted   1"));
    assert!(stdout.contains("errors     1"));

    let (stdout, _, success) = run_harvest(&config_path, &["admin", "--stats-only"]);
    assert!(success);
    assert!(stdout.contains("Documents:  1"));
    assert!(stdout.contains("exito"));
}

#[test]
fn test_admin_clear_requires_confirmation() {
    let (tmp, config_path) = setup_test_env();
    run_harvest(&config_path, &["run", "--sources", "a"]);

    let (stdout, _, success) = run_harvest(&config_path, &["admin"]);
    assert!(success);
    assert!(stdout.contains("--confirm-clear"));

    let (stdout, _, _) = run_harvest(&config_path, &["admin", "--stats-only"]);
    assert!(stdout.contains("Documents:  2"));

    let (stdout, stderr, success) = run_harvest(&config_path, &["admin", "--confirm-clear"]);
    assert!(success, "clear failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Deleted 2 documents"));
    assert_eq!(fs::read_dir(tmp.path().join("backups")).unwrap().count(), 1);

    let (stdout, _, _) = run_harvest(&config_path, &["admin", "--stats-only"]);
    assert!(stdout.contains("Documents:  0"));
}

#[test]
fn test_sources_listing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_harvest(&config_path, &["sources"]);
    assert!(success);
    let ghost = stdout.lines().find(|l| l.starts_with("ghost")).unwrap();
    assert!(ghost.contains("MISSING"));
    let a = stdout.lines().find(|l| l.starts_with("a ")).unwrap();
    assert!(a.contains("OK"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_harvest(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("config"));
}
