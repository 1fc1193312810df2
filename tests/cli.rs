//! Tests for the `autoexp` command line.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::process::Output;
use std::process::Stdio;

use tempfile::tempdir;

/// Runs `autoexp` in the given directory.
fn autoexp(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_autoexp"))
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("RUST_BACKTRACE")
        .env("XDG_CONFIG_HOME", dir.join("xdg"))
        .spawn()
        .expect("failed to spawn command")
        .wait_with_output()
        .expect("failed while waiting for command to finish")
}

/// Writes a two job experiment to the given directory.
fn write_experiment(dir: &Path) {
    fs::write(
        dir.join("train.sbatch.tpl"),
        "#!/bin/bash\n#SBATCH --job-name={name}\npython train.py --lr {lr}\n",
    )
    .unwrap();

    fs::write(
        dir.join("experiment.yaml"),
        r#"
template: train.sbatch.tpl
name: "lr-{lr}"
lr: [0.1, 0.01]
output_file: "logs/{name}.out"
sbatch_script: "scripts/{name}.sbatch"
cmd: "sbatch scripts/{name}.sbatch"
termination_str: "Training finished"
"#,
    )
    .unwrap();
}

/// Asserts that a command succeeded.
fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed {status}: {stderr}",
        status = output.status,
        stderr = str::from_utf8(&output.stderr).unwrap_or("<not UTF-8>")
    );
}

/// Ensures `autoexp expand` prints every job as JSON.
#[test]
fn expand_prints_jobs() {
    let dir = tempdir().unwrap();
    write_experiment(dir.path());

    let output = autoexp(dir.path(), &["expand", "experiment.yaml"]);
    assert_success(&output);

    let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["name"], "lr-0.1");
    assert_eq!(jobs[1]["name"], "lr-0.01");
    assert_eq!(jobs[1]["cmd"], "sbatch scripts/lr-0.01.sbatch");
    assert_eq!(jobs[1]["termination_str"], "Training finished");
    assert_eq!(jobs[1]["check_interval_secs"], 900.0);
    assert_eq!(
        jobs[0]["rendered_config"],
        "#!/bin/bash\n#SBATCH --job-name=lr-0.1\npython train.py --lr 0.1\n"
    );

    // Nothing is written by expanding
    assert!(!dir.path().join("scripts").exists());
}

/// Ensures `autoexp expand --select` only prints the selected jobs.
#[test]
fn expand_selects_jobs() {
    let dir = tempdir().unwrap();
    write_experiment(dir.path());

    let output = autoexp(dir.path(), &["expand", "experiment.yaml", "-s", "lr=0.01"]);
    assert_success(&output);

    let jobs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names = jobs
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["name"].as_str().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["lr-0.01"]);
}

/// Ensures `autoexp run --dry-run` writes the scripts without submitting.
#[test]
fn dry_run_writes_scripts() {
    let dir = tempdir().unwrap();
    write_experiment(dir.path());

    let output = autoexp(dir.path(), &["run", "experiment.yaml", "--dry-run", "-v"]);
    assert_success(&output);

    assert_eq!(
        fs::read_to_string(dir.path().join("scripts/lr-0.1.sbatch")).unwrap(),
        "#!/bin/bash\n#SBATCH --job-name=lr-0.1\npython train.py --lr 0.1\n"
    );
    assert!(dir.path().join("scripts/lr-0.01.sbatch").is_file());
    assert!(dir.path().join("logs").is_dir());

    let stderr = str::from_utf8(&output.stderr).unwrap();
    assert!(
        stderr.contains("not submitting"),
        "unexpected stderr: {stderr}"
    );
}

/// Ensures an invalid experiment exits with an error.
#[test]
fn invalid_experiment_fails() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("experiment.yaml"), "name: a\n").unwrap();

    let output = autoexp(dir.path(), &["expand", "experiment.yaml"]);
    assert!(!output.status.success());

    let stderr = str::from_utf8(&output.stderr).unwrap();
    assert!(
        stderr.contains("error: failed to expand experiment `experiment.yaml`"),
        "unexpected stderr: {stderr}"
    );
    assert!(stderr.contains("template"), "unexpected stderr: {stderr}");
}

/// Ensures `autoexp config` reflects the configuration files.
#[test]
fn config_is_merged() {
    let dir = tempdir().unwrap();

    let output = autoexp(dir.path(), &["config", "init"]);
    assert_success(&output);
    let stdout = str::from_utf8(&output.stdout).unwrap();
    assert!(stdout.contains("[scheduler]"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("scancel"), "unexpected stdout: {stdout}");

    fs::write(
        dir.path().join("autoexp.toml"),
        "[manager]\nmax_jobs = 4\n\n[scheduler]\nshell = \"bash\"\n",
    )
    .unwrap();

    let output = autoexp(dir.path(), &["config", "resolve"]);
    assert_success(&output);
    let stdout = str::from_utf8(&output.stdout).unwrap();
    assert!(stdout.contains("max_jobs = 4"), "unexpected stdout: {stdout}");
    assert!(stdout.contains("shell = \"bash\""), "unexpected stdout: {stdout}");

    fs::write(dir.path().join("autoexp.toml"), "[manager]\nmax_jobs = 0\n").unwrap();
    let output = autoexp(dir.path(), &["config", "resolve"]);
    assert!(!output.status.success());
}
