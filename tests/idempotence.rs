//! End-to-end runs of real step-list files against a scratch directory.

use provisio::core::error::ErrorKind;
use provisio::core::parser;
use provisio::core::runner::{self, RunOptions};
use provisio::core::types::Outcome;
use std::path::{Path, PathBuf};

/// A gzip tarball with one top-level directory containing `VERSION`.
fn make_tarball(dir: &Path) -> PathBuf {
    let path = dir.join("libdemo-1.0.tar.gz");
    let file = std::fs::File::create(&path).unwrap();
    let gz = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(gz);
    let body = b"1.0\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "libdemo-1.0/VERSION", &body[..])
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn machine_list(root: &Path) -> String {
    let tarball = make_tarball(root);
    std::fs::write(root.join("requirements.txt"), "numpy\nscipy==1.7.1\n").unwrap();
    format!(
        r#"
version: "1.0"
name: scratch-machine
params:
  root: "{root}"
settings:
  prefix: "{{{{params.root}}}}/prefix"
  profile: "{{{{params.root}}}}/.bashrc"
  work_dir: "{{{{params.root}}}}/work"
  install_command: "touch {{{{params.root}}}}/pkgdb/{{package}}"
  query_command: "test -e {{{{params.root}}}}/pkgdb/{{package}}"
steps:
  - id: pkgdb
    kind: env-export
    target: PKGDB
    params: {{ value: "{{{{params.root}}}}/pkgdb" }}
    check: {{ file_contains: {{ path: "{{{{settings.profile}}}}", text: "export PKGDB=" }} }}
  - id: mkdir-pkgdb
    kind: source-build
    target: libdemo
    params:
      source: "{tarball}"
      recipe: |
        mkdir -p {{{{params.root}}}}/pkgdb
        mkdir -p $PREFIX/share/libdemo
        cp VERSION $PREFIX/share/libdemo/VERSION
    check: {{ path_exists: "{{{{settings.prefix}}}}/share/libdemo/VERSION" }}
  - id: curl
    kind: package-install
    target: curl
    depends_on: [mkdir-pkgdb]
    check: {{ package_installed: curl }}
  - id: scipy
    kind: file-patch
    target: "{{{{params.root}}}}/requirements.txt"
    params: {{ pattern: "scipy==1.7.1", replacement: "scipy>=1.7.1" }}
    check: {{ file_contains: {{ path: "{{{{params.root}}}}/requirements.txt", text: "scipy>=1.7.1" }} }}
"#,
        root = root.display(),
        tarball = tarball.display()
    )
}

fn load(root: &Path, body: &str) -> provisio::core::types::StepList {
    let path = root.join("provisio.yaml");
    std::fs::write(&path, body).unwrap();
    parser::load_list_file(&path).unwrap()
}

#[test]
fn second_run_skips_every_step() {
    let dir = tempfile::tempdir().unwrap();
    let list = load(dir.path(), &machine_list(dir.path()));
    let opts = RunOptions::new(dir.path().join("state"));

    let first = runner::run(&list, &opts).unwrap();
    let diag: Vec<String> = first
        .results
        .iter()
        .map(|r| format!("{} {} {}", r.step_id(), r.outcome(), r.diagnostic()))
        .collect();
    assert!(first.is_success(), "{:#?}", diag);
    assert_eq!(first.summary().succeeded, 4);

    let profile_before = std::fs::read_to_string(dir.path().join(".bashrc")).unwrap();
    let second = runner::run(&list, &opts).unwrap();
    assert_eq!(second.summary().skipped, 4);
    assert_eq!(second.summary().succeeded + second.summary().failed, 0);
    assert_eq!(
        std::fs::read_to_string(dir.path().join(".bashrc")).unwrap(),
        profile_before
    );

    let requirements = std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap();
    assert_eq!(requirements, "numpy\nscipy>=1.7.1\n");
    let work: Vec<_> = std::fs::read_dir(dir.path().join("work"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(work.is_empty(), "build scratch directories must be removed");
}

#[test]
fn dependent_step_alone_fails_then_succeeds_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let list = load(dir.path(), &machine_list(dir.path()));

    let mut only_curl = RunOptions::new(dir.path().join("state"));
    only_curl.only = Some("curl".to_string());
    let alone = runner::run(&list, &only_curl).unwrap();
    assert_eq!(alone.results.len(), 1);
    assert_eq!(alone.results[0].outcome(), Outcome::Failed);
    assert_eq!(alone.results[0].error(), Some(ErrorKind::PackageError));

    let full = runner::run(&list, &RunOptions::new(dir.path().join("state"))).unwrap();
    assert!(full.is_success());
    assert!(dir.path().join("pkgdb/curl").exists());
}

#[test]
fn failed_build_leaves_no_scratch_and_stops() {
    let dir = tempfile::tempdir().unwrap();
    let body = machine_list(dir.path()).replace(
        "cp VERSION $PREFIX/share/libdemo/VERSION",
        "cp MISSING $PREFIX/share/libdemo/VERSION",
    );
    let list = load(dir.path(), &body);
    let report = runner::run(&list, &RunOptions::new(dir.path().join("state"))).unwrap();

    assert_eq!(report.results.len(), 2);
    let build = &report.results[1];
    assert_eq!(build.error(), Some(ErrorKind::BuildError));
    assert!(build.diagnostic().contains("cp MISSING"));
    let work: Vec<_> = std::fs::read_dir(dir.path().join("work"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(work.is_empty());
}
