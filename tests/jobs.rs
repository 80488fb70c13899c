// Job setup (write modes, split) and multi-instance runs.

use anyhow::Result;
use rollsink::{
    FakeServer, JobConfig, JobSettings, LineEnding, LocalTransport, RemoteTransport, RollError,
    VecSource, WriterSettings, prepare, run_task, split,
};
use std::fs;
use std::path::Path;

fn job(dir: &Path, mode: &str, extra: &str) -> Result<JobSettings> {
    let json = format!(
        r#"{{"path":{path},"writeMode":"{mode}","prefix":"orders"{extra}}}"#,
        path = serde_json::to_string(&dir.to_string_lossy())?,
    );
    Ok(JobConfig::from_json_str(&json)?.validate()?)
}

fn local() -> LocalTransport {
    LocalTransport::new()
        .with_line_ending(LineEnding::Lf)
        .without_sync()
}

fn names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

// ============================================================================
// Write modes
// ============================================================================

#[test]
fn prepare_creates_missing_directories() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("a/b/c");
    prepare(&mut local(), &job(&dir, "append", "")?)?;
    assert!(dir.is_dir());
    Ok(())
}

#[test]
fn truncate_removes_only_matching_entries() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("orders-OLD-1.txt"), "old")?;
    fs::create_dir(tmp.path().join("orders-dir"))?;
    fs::write(tmp.path().join("orders-dir/inner"), "x")?;
    fs::write(tmp.path().join("invoices-1.txt"), "keep")?;

    prepare(&mut local(), &job(tmp.path(), "truncate", "")?)?;
    assert_eq!(names(tmp.path())?, vec!["invoices-1.txt"]);
    Ok(())
}

#[test]
fn append_keeps_existing_entries() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("orders-OLD-1.txt"), "old")?;
    prepare(&mut local(), &job(tmp.path(), "append", "")?)?;
    assert_eq!(names(tmp.path())?, vec!["orders-OLD-1.txt"]);
    Ok(())
}

#[test]
fn non_conflict_fails_on_existing_prefix() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let settings = job(tmp.path(), "nonConflict", "")?;
    prepare(&mut local(), &settings)?;

    fs::write(tmp.path().join("orders-OLD-1.txt"), "old")?;
    fs::write(tmp.path().join("orders-OLD-2.txt"), "old")?;
    match prepare(&mut local(), &settings) {
        Err(RollError::Conflict { sample, count, .. }) => {
            assert_eq!(sample, "orders-OLD-1.txt");
            assert_eq!(count, 2);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }
    Ok(())
}

#[test]
fn truncate_on_a_remote_server() -> Result<()> {
    let server = FakeServer::new();
    server.put_file("/exports/orders-A-1.txt", b"1\n");
    server.put_file("/exports/orders-A-2.txt.tmp", b"2\n");
    server.put_file("/exports/other.txt", b"3\n");
    server.put_file("/exports/orders-B/part/1.txt", b"4\n");

    let settings = JobConfig::from_json_str(
        r#"{"path":"/exports/","writeMode":"truncate","prefix":"orders",
            "session":{"protocol":"ftp","host":"h","username":"u","password":"p"}}"#,
    )?
    .validate()?;
    prepare(&mut RemoteTransport::new(server.session()), &settings)?;
    assert_eq!(server.file_paths(), vec!["/exports/other.txt".to_string()]);
    assert!(!server.has_dir("/exports/orders-B"));
    assert!(server.has_dir("/exports"));
    Ok(())
}

// ============================================================================
// Split and multi-instance runs
// ============================================================================

#[test]
fn split_prefixes_do_not_collide_with_existing_files() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    fs::write(tmp.path().join("orders-X-1.txt"), "")?;
    let settings = job(tmp.path(), "append", "")?;
    let prefixes = split(&mut local(), &settings, 8)?;

    assert_eq!(prefixes.len(), 8);
    let existing = names(tmp.path())?;
    for p in &prefixes {
        assert!(p.starts_with("orders-"));
        assert!(existing.iter().all(|n| !n.starts_with(p.as_str())));
    }
    Ok(())
}

#[test]
fn instances_sharing_a_directory_never_collide() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let settings = job(tmp.path(), "truncate", r#","rollCount":4"#)?;
    prepare(&mut local(), &settings)?;
    let prefixes = split(&mut local(), &settings, 3)?;

    let mut published = Vec::new();
    for prefix in &prefixes {
        let rows: Vec<Vec<String>> = (0..10).map(|i| vec![format!("{prefix}:{i}")]).collect();
        let report = run_task(
            local(),
            WriterSettings::for_instance(&settings, prefix.clone()),
            &mut VecSource::new(rows),
        )?;
        assert_eq!(report.files.len(), 3);
        published.extend(report.files);
    }

    assert_eq!(names(tmp.path())?.len(), 9);
    published.sort();
    published.dedup();
    assert_eq!(published.len(), 9);
    Ok(())
}

#[cfg(feature = "parallel-io")]
#[test]
fn parallel_run_conserves_rows() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let settings = job(tmp.path(), "truncate", r#","rollCount":25,"header":["v"]"#)?;
    prepare(&mut local(), &settings)?;
    let prefixes = split(&mut local(), &settings, 4)?;

    let sources: Vec<VecSource> = (0..4)
        .map(|t| VecSource::new((0..100).map(|i| vec![format!("{t}-{i}")]).collect::<Vec<_>>()))
        .collect();
    let reports = rollsink::run_parallel(&settings, prefixes.clone(), sources, || Ok(local()))?;

    assert_eq!(reports.len(), 4);
    for (report, prefix) in reports.iter().zip(&prefixes) {
        assert_eq!(&report.prefix, prefix);
        assert_eq!(report.rows, 100);
        assert_eq!(report.files.len(), 4);
    }

    let mut total = 0;
    for name in names(tmp.path())? {
        assert!(name.ends_with(".txt"), "{name} was left unpublished");
        let text = fs::read_to_string(tmp.path().join(&name))?;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("v"));
        total += lines.count();
    }
    assert_eq!(total, 400);
    Ok(())
}

#[cfg(feature = "parallel-io")]
#[test]
fn parallel_run_rejects_mismatched_inputs() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = job(tmp.path(), "append", "").unwrap();
    let out = rollsink::run_parallel(
        &settings,
        vec!["a".to_string()],
        Vec::<VecSource>::new(),
        || Ok(local()),
    );
    assert!(matches!(out, Err(RollError::Config(_))));
}
