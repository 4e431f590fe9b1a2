use std::error::Error;
use std::fs;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_clusters_identical_spectra_into_one() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let out_path = dir.path().join("clusters.msp");
    let cls_path = dir.path().join("clustering_result.cls");

    let mut cmd = Command::cargo_bin("mzclusterer")?;
    cmd.arg("./tests/data/single_cluster.mgf")
        .args(["-o", out_path.to_str().unwrap()])
        .args(["--cls-file", cls_path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Read 2 spectra"))
        .stderr(predicate::str::contains("Wrote 1 clusters"));

    let msp = fs::read_to_string(&out_path)?;
    assert!(msp.contains("Parent=977.0230"), "unexpected MSP output:\n{msp}");
    assert!(msp.contains("Nreps=2"), "unexpected MSP output:\n{msp}");
    assert!(msp.contains("Num peaks: 12"), "unexpected MSP output:\n{msp}");

    // the opaque clustering result stays behind
    assert!(cls_path.exists());
    assert!(fs::metadata(&cls_path)?.len() > 0);
    Ok(())
}

#[test]
fn test_unsupported_file_type_exit_code() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("spectra.pkl");
    fs::write(&path, "500.1 2 1\n100.0 10.0\n")?;

    let mut cmd = Command::cargo_bin("mzclusterer")?;
    cmd.arg(path.to_str().unwrap()).args(["-o", "-"]);
    cmd.assert().failure().code(4);
    Ok(())
}

#[test]
fn test_missing_file_is_an_io_failure() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzclusterer")?;
    cmd.arg("not_real.mgf").args(["-o", "-"]);
    cmd.assert().failure().code(3);
    Ok(())
}

#[test]
fn test_static_store_requires_expected_count() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mzclusterer")?;
    cmd.arg("./tests/data/single_cluster.mgf")
        .args(["-o", "-", "--cluster-store-mode", "static"]);
    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("expected-cluster-count"));
    Ok(())
}

#[test]
fn test_malformed_config_file_exit_code() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let config = dir.path().join("config.json");
    fs::write(&config, "{ not json")?;

    let mut cmd = Command::cargo_bin("mzclusterer")?;
    cmd.arg("./tests/data/single_cluster.mgf")
        .args(["-o", "-"])
        .args(["--config-file", config.to_str().unwrap()]);
    cmd.assert().failure().code(2);
    Ok(())
}
