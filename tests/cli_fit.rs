use std::fs;
use std::process::Command;

use tempfile::tempdir;

const FOUR_ROWS: &str = "y\tx\nfalse\t0\nfalse\t1\ntrue\t2\ntrue\t3\n";

#[test]
fn fit_then_predict_from_saved_model() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("train.tsv");
    fs::write(&data_path, FOUR_ROWS).expect("write training data");

    let exe = env!("CARGO_BIN_EXE_simple-logit");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "fit",
            data_path.to_str().expect("path str"),
            "--predict",
            "1.6",
            "--report-out",
            "report.toml",
        ])
        .output()
        .expect("run simple-logit fit");

    assert!(output.status.success(), "fit exited with {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Iterative Reweighted Least Squares"));
    assert!(stdout.contains("McFadden R-squared"));
    assert!(stdout.contains("Decision: true"));
    assert!(tmp.path().join("model.toml").exists(), "model.toml missing");
    assert!(tmp.path().join("report.toml").exists(), "report.toml missing");

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["predict", "--model", "model.toml", "-0.5"])
        .output()
        .expect("run simple-logit predict");
    assert!(output.status.success(), "predict exited with {:?}", output.status);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Decision: false"));
}

#[test]
fn wrong_prediction_length_exits_with_error() {
    let tmp = tempdir().expect("temporary directory");
    let data_path = tmp.path().join("train.tsv");
    fs::write(&data_path, FOUR_ROWS).expect("write training data");

    let output = Command::new(env!("CARGO_BIN_EXE_simple-logit"))
        .current_dir(tmp.path())
        .args(["fit", data_path.to_str().expect("path str"), "--predict", "1,2"])
        .output()
        .expect("run simple-logit fit");

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
