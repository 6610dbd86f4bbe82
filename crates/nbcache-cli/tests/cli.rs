use assert_cmd::Command;
use nbcache_notebook::{Cell, CodeCell, Notebook, OtherCell};
use predicates::prelude::*;
use serde_json::json;
use std::path::Path;

fn jcache(cache_root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("jcache").unwrap();
    cmd.arg("--cache-path").arg(cache_root);
    cmd
}

fn write_executed_nb(path: &Path, sources: &[&str]) {
    let mut nb = Notebook::new(4);
    nb.metadata
        .insert("kernelspec".to_string(), json!({"name": "python3"}));
    nb.cells.push(Cell::Other(OtherCell::markdown("# Title")));
    for (i, source) in sources.iter().enumerate() {
        nb.cells
            .push(Cell::Code(CodeCell::with_count(*source, (i + 1) as i64)));
    }
    std::fs::write(path, nb.to_json_pretty().unwrap()).unwrap();
}

#[test]
fn project_init_version_and_cache_limit() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");

    jcache(&root)
        .args(["project", "version"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cache found"));

    jcache(&root)
        .args(["project", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache limit: 1000"));

    jcache(&root).args(["project", "version"]).assert().success();

    jcache(&root)
        .args(["project", "cache-limit", "5"])
        .assert()
        .success();
    jcache(&root)
        .args(["project", "cache-limit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Current cache limit: 5"));
}

#[test]
fn project_clear_requires_force() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    jcache(&root).args(["project", "init"]).assert().success();

    jcache(&root)
        .args(["project", "clear"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    assert!(root.exists());

    jcache(&root)
        .args(["project", "clear", "--force"])
        .assert()
        .success();
    assert!(!root.exists());
}

#[test]
fn notebook_add_list_info_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    let nb_path = tmp.path().join("a.ipynb");
    write_executed_nb(&nb_path, &["x = 1"]);

    jcache(&root)
        .args(["notebook", "add"])
        .arg(&nb_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Added [1]"));

    jcache(&root)
        .args(["notebook", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.ipynb"));

    jcache(&root)
        .args(["notebook", "list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"read_recipe\""));

    jcache(&root)
        .args(["notebook", "info", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reader: ipynb"));

    jcache(&root)
        .args(["notebook", "remove", "1"])
        .assert()
        .success();
    jcache(&root)
        .args(["notebook", "info", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn cache_add_show_diff_and_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    let nb_path = tmp.path().join("a.ipynb");
    write_executed_nb(&nb_path, &["x = 1", "x + 1"]);

    jcache(&root)
        .args(["cache", "add"])
        .arg(&nb_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Cached [1]"));

    // Duplicate without --overwrite is a controlled failure.
    jcache(&root)
        .args(["cache", "add"])
        .arg(&nb_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("overwrite"));

    jcache(&root)
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("a.ipynb"));

    jcache(&root)
        .args(["cache", "info", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fingerprint:"));

    // The stored canonical notebook has no markdown cells.
    jcache(&root)
        .args(["cache", "show", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("x = 1").and(predicate::str::contains("Title").not()));

    let edited = tmp.path().join("edited.ipynb");
    write_executed_nb(&edited, &["x = 1", "x + 2"]);
    jcache(&root)
        .args(["cache", "diff", "1"])
        .arg(&edited)
        .assert()
        .success()
        .stdout(predicate::str::contains("modified code cell 1"));

    jcache(&root)
        .args(["cache", "remove", "1"])
        .assert()
        .success();
    jcache(&root)
        .args(["cache", "info", "1"])
        .assert()
        .failure();
}

#[test]
fn cache_add_validates_execution_counts() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    let nb_path = tmp.path().join("a.ipynb");

    let mut nb = Notebook::new(4);
    nb.cells.push(Cell::Code(CodeCell::new("x = 1")));
    std::fs::write(&nb_path, nb.to_json_pretty().unwrap()).unwrap();

    jcache(&root)
        .args(["cache", "add"])
        .arg(&nb_path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("execution_count"));

    jcache(&root)
        .args(["cache", "add", "--no-validate"])
        .arg(&nb_path)
        .assert()
        .success();
}

#[test]
fn cat_artifact_prints_bytes_and_rejects_escapes() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");
    let nb_dir = tmp.path().join("nbs");
    std::fs::create_dir_all(&nb_dir).unwrap();
    let nb_path = nb_dir.join("a.ipynb");
    write_executed_nb(&nb_path, &["x = 1"]);

    // Build the cached artifact via the library, then read it via the CLI.
    let cache = nbcache::NotebookCache::new(&root);
    std::fs::write(nb_dir.join("out.txt"), "artifact-bytes").unwrap();
    cache
        .ingest_file(
            &nb_path,
            None,
            vec![std::path::PathBuf::from("out.txt")],
            json!({}),
            nbcache::IngestOptions::default(),
        )
        .unwrap();

    jcache(&root)
        .args(["cache", "cat-artifact", "1", "out.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("artifact-bytes"));

    jcache(&root)
        .args(["cache", "cat-artifact", "1", "../escape.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must be relative"));
}

#[test]
fn notebook_merge_writes_outputs_into_the_source() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");

    // Cache the executed form, then merge into an unexecuted copy with the
    // same code.
    let executed = tmp.path().join("executed.ipynb");
    write_executed_nb(&executed, &["x = 1"]);
    jcache(&root)
        .args(["cache", "add"])
        .arg(&executed)
        .assert()
        .success();

    let source = tmp.path().join("source.ipynb");
    let mut nb = Notebook::new(4);
    nb.metadata
        .insert("kernelspec".to_string(), json!({"name": "python3"}));
    nb.cells.push(Cell::Other(OtherCell::markdown("# Title")));
    nb.cells.push(Cell::Code(CodeCell::new("x = 1")));
    std::fs::write(&source, nb.to_json_pretty().unwrap()).unwrap();

    let merged_path = tmp.path().join("merged.ipynb");
    jcache(&root)
        .args(["notebook", "merge"])
        .arg(&source)
        .arg("--output")
        .arg(&merged_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Merged outputs"));

    let merged = Notebook::from_json_str(&std::fs::read_to_string(&merged_path).unwrap()).unwrap();
    assert_eq!(merged.cells.len(), 2);
    let code = merged.code_cells().next().unwrap();
    assert_eq!(code.execution_count, Some(1));
}

#[test]
fn execute_without_a_driver_is_a_controlled_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("cache");

    jcache(&root)
        .args(["project", "execute"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cell-execution driver"));

    jcache(&root)
        .args(["project", "execute", "--executor", "bogus"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Executor not found"));
}
