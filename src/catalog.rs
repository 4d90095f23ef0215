//! Observation catalog reader.
//!
//! The batch to download is selected from a delimited text table with one
//! mandatory column, `OBSERVATION.OBSERVATION_ID`. Lines starting with
//! `#` are comments. A numeric row range then picks which ids to fetch.

use camino::Utf8Path;
use serde::Deserialize;

use crate::constants::{OmResult, OBSID_COLUMN};
use crate::errors::OmPrepError;
use crate::naming::ObsId;

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(rename = "OBSERVATION.OBSERVATION_ID")]
    observation_id: String,
}

/// The list of observation ids selected for acquisition.
#[derive(Debug, Clone)]
pub struct ObservationCatalog {
    obs_ids: Vec<ObsId>,
}

impl ObservationCatalog {
    /// Load a catalog from a comma-delimited file.
    ///
    /// Arguments
    /// ---------
    /// * `path`: the catalog table; `#` lines are ignored.
    ///
    /// Return
    /// ------
    /// * The parsed catalog, or [`OmPrepError::MissingColumn`] when the
    ///   observation-id column is absent.
    pub fn from_csv(path: &Utf8Path) -> OmResult<ObservationCatalog> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .from_path(path)?;

        let headers = reader.headers()?;
        if !headers.iter().any(|h| h == OBSID_COLUMN) {
            return Err(OmPrepError::MissingColumn(OBSID_COLUMN.to_string()));
        }

        let mut obs_ids = Vec::new();
        for row in reader.deserialize::<CatalogRow>() {
            let row = row?;
            obs_ids.push(ObsId::new(&row.observation_id));
        }
        Ok(ObservationCatalog { obs_ids })
    }

    /// All ids, in table order.
    pub fn obs_ids(&self) -> &[ObsId] {
        &self.obs_ids
    }

    /// Ids of the half-open row range `[start, end)`, clamped to the
    /// table length.
    pub fn select_range(&self, start: usize, end: usize) -> &[ObsId] {
        let end = end.min(self.obs_ids.len());
        let start = start.min(end);
        &self.obs_ids[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_catalog(content: &str) -> (tempfile::TempDir, camino::Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("catalog.csv")).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{content}").unwrap();
        (dir, path)
    }

    #[test]
    fn parses_ids_and_zero_pads() {
        let (_dir, path) = write_catalog(
            "# subsample with redshift\n\
             OBSERVATION.OBSERVATION_ID,Z\n\
             722700101,0.05\n\
             0500760101,0.10\n",
        );
        let catalog = ObservationCatalog::from_csv(&path).unwrap();
        let ids: Vec<&str> = catalog.obs_ids().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["0722700101", "0500760101"]);
    }

    #[test]
    fn missing_column_is_a_configuration_error() {
        let (_dir, path) = write_catalog("OBSID,Z\n1,2\n");
        let err = ObservationCatalog::from_csv(&path).unwrap_err();
        assert!(matches!(err, OmPrepError::MissingColumn(_)));
    }

    #[test]
    fn range_selection_is_clamped() {
        let (_dir, path) = write_catalog(
            "OBSERVATION.OBSERVATION_ID\n1\n2\n3\n",
        );
        let catalog = ObservationCatalog::from_csv(&path).unwrap();
        assert_eq!(catalog.select_range(1, 2).len(), 1);
        assert_eq!(catalog.select_range(0, 50).len(), 3);
        assert_eq!(catalog.select_range(5, 6).len(), 0);
    }
}
