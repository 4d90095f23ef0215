//! Batch entry point.
//!
//! Runs the three phases in order over a fixed deployment layout:
//! acquisition (catalog + archive download), extraction, then the
//! per-observation reduction and post-processing driver. The paths and
//! the catalog row range below are the deployment's only knobs; edit and
//! rebuild to retarget a run.

use camino::{Utf8Path, Utf8PathBuf};
use log::{error, info};

use omdataprep::astrometry::OmattConfig;
use omdataprep::constants::OmResult;
use omdataprep::driver::DriverConfig;
use omdataprep::{Downloader, Extractor, ObservationCatalog, ReductionDriver};

/// Observation catalog table (one OBSID per selected row).
const CATALOG_PATH: &str = "/data/xmm/catalog/om_observations.csv";
/// Destination of the downloaded archives and the batch working tree.
const BATCH_ROOT: &str = "/data/xmm/om_batch";
/// Directory containing the `aioclient` archive client executable.
const AIOCLIENT_DIR: &str = "/opt/aioclient";
/// Half-open catalog row range to acquire.
const ROW_START: usize = 0;
const ROW_END: usize = 50;
/// Archive request parameters.
const INSTRUMENT: &str = "OM";
const FILTERS: &str = "UVW1 UVM2";
/// SAS environment-initialization script copied into each `work/`.
const INITSAS_PATH: &str = "/opt/sas/initsas.sh";
/// Stray-light calibration model frames.
const MODEL_DIR: &str = "/data/xmm/models";
/// SExtractor configuration for the detection pass.
const SEXTRACTOR_CONFIG: &str = "/data/xmm/sextractor/default.sex";

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        error!("batch aborted: {e}");
        std::process::exit(1);
    }
}

fn run() -> OmResult<()> {
    let batch_root = Utf8PathBuf::from(BATCH_ROOT);

    info!("loading observation catalog from {CATALOG_PATH}");
    let catalog = ObservationCatalog::from_csv(Utf8Path::new(CATALOG_PATH))?;
    info!("{} observation id(s) in the catalog", catalog.obs_ids().len());

    let downloader = Downloader::new(
        catalog,
        &batch_root,
        Utf8Path::new(AIOCLIENT_DIR),
        ROW_START,
        ROW_END,
        INSTRUMENT,
        FILTERS,
    )?;
    downloader.fetch_observations()?;

    Extractor::new(&batch_root, false).extract_and_organize()?;

    let driver = ReductionDriver::new(DriverConfig {
        batch_root,
        initsas_path: Utf8PathBuf::from(INITSAS_PATH),
        model_dir: Utf8PathBuf::from(MODEL_DIR),
        sextractor_config: Utf8PathBuf::from(SEXTRACTOR_CONFIG),
        omatt: OmattConfig {
            tolerance: 2.0,
            verbosity: 4,
            ..OmattConfig::default()
        },
        remove_odf: false,
        remove_tar: false,
    })?;

    let summary = driver.run()?;
    info!(
        "batch summary: {} processed, {} errored, {} already processed",
        summary.processed.len(),
        summary.errored.len(),
        summary.already_processed.len()
    );
    if !summary.errored.is_empty() {
        info!("errored observations: {}", summary.errored.join(", "));
    }
    Ok(())
}
