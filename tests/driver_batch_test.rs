//! Batch-level driver behavior over a synthetic observation tree.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use omdataprep::astrometry::OmattConfig;
use omdataprep::constants::OMICHAIN_LOG_NAME;
use omdataprep::driver::DriverConfig;
use omdataprep::{OmPrepError, ReductionDriver};

fn batch_root(dir: &TempDir) -> Utf8PathBuf {
    Utf8Path::from_path(dir.path()).unwrap().to_path_buf()
}

fn config_for(root: &Utf8Path) -> DriverConfig {
    DriverConfig {
        batch_root: root.to_path_buf(),
        initsas_path: root.join("initsas.sh"),
        model_dir: root.join("models"),
        sextractor_config: root.join("default.sex"),
        omatt: OmattConfig::default(),
        remove_odf: false,
        remove_tar: false,
    }
}

#[test]
fn fully_reduced_batch_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = batch_root(&dir);

    // Two observations, both already carrying a work/ directory. Neither
    // the init script nor the model directory exists, so any attempt to
    // actually reduce would fail loudly instead of short-circuiting.
    for obsid in ["0500760101", "0722700101"] {
        std::fs::create_dir_all(root.join(obsid).join("work")).unwrap();
    }

    let driver = ReductionDriver::new(config_for(&root)).unwrap();
    let summary = driver.run().unwrap();

    assert!(summary.processed.is_empty());
    assert!(summary.errored.is_empty());
    assert_eq!(
        summary.already_processed,
        vec!["0500760101".to_string(), "0722700101".to_string()]
    );

    let log = std::fs::read_to_string(root.join(OMICHAIN_LOG_NAME)).unwrap();
    assert!(log.contains("2 already processed"));
}

#[test]
fn stray_files_in_the_batch_root_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let root = batch_root(&dir);

    std::fs::create_dir_all(root.join("0500760101").join("work")).unwrap();
    std::fs::write(root.join("0722700101.tar.gz"), b"").unwrap();
    std::fs::write(root.join("notes.txt"), b"").unwrap();

    let driver = ReductionDriver::new(config_for(&root)).unwrap();
    let summary = driver.run().unwrap();

    assert_eq!(summary.already_processed, vec!["0500760101".to_string()]);
    assert!(summary.processed.is_empty());
    assert!(summary.errored.is_empty());
}

#[test]
fn observation_without_init_script_is_errored_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let root = batch_root(&dir);

    // One fresh observation but no initsas.sh anywhere: its preparation
    // fails, the batch itself still completes.
    std::fs::create_dir_all(root.join("0500760101").join("odf")).unwrap();

    let driver = ReductionDriver::new(config_for(&root)).unwrap();
    let summary = driver.run().unwrap();

    assert_eq!(summary.errored, vec!["0500760101".to_string()]);
    assert!(summary.processed.is_empty());
    assert!(summary.already_processed.is_empty());
}

#[test]
fn failed_observation_still_gets_odf_and_tar_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let root = batch_root(&dir);

    let obs_dir = root.join("0500760101");
    std::fs::create_dir_all(obs_dir.join("odf")).unwrap();
    std::fs::write(root.join("0500760101.tar.gz"), b"").unwrap();

    let mut config = config_for(&root);
    config.remove_odf = true;
    config.remove_tar = true;

    // The init script is missing, so the observation fails before any
    // reduction; cleanup must run regardless.
    let driver = ReductionDriver::new(config).unwrap();
    let summary = driver.run().unwrap();

    assert_eq!(summary.errored, vec!["0500760101".to_string()]);
    assert!(!obs_dir.join("odf").exists());
    assert!(!root.join("0500760101.tar.gz").exists());
}

#[test]
fn missing_batch_root_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let root = batch_root(&dir).join("does_not_exist");
    assert!(matches!(
        ReductionDriver::new(config_for(&root)),
        Err(OmPrepError::Config(_))
    ));
}
