//! # omdataprep: XMM-Newton Optical Monitor batch reduction
//!
//! This crate drives the multi-stage reduction of XMM-Newton Optical Monitor
//! (OM) observations: downloading raw ODF archives from the XMM-Newton
//! science archive, unpacking them, running the SAS reduction chain
//! (`omichain`), and applying the in-house post-processing steps
//! (stray-light correction, astrometric refinement with `omatt`, WCS header
//! synchronization, mosaicking with `ommosaic`, UV band combination, and
//! source masking via `source-extractor` segmentation maps).
//!
//! ## Overview
//! -----------
//! The pipeline is strictly sequential and directory-driven. Every stage
//! discovers its inputs by matching OM product file names inside an
//! observation's `work/` directory, and the presence of `work/` itself is
//! the only resumability marker: an observation that already has one is
//! never reprocessed.
//!
//! The heavy lifting (astrometric matching, mosaicking, source detection)
//! is delegated to external, unmodifiable binaries from the SAS suite and
//! SExtractor. This crate owns the orchestration, the file
//! classification/pairing heuristics, and the simple pixel arithmetic
//! (model division, NaN-safe summation, segmentation masking).
//!
//! ## Module map
//! -------------
//! * [`catalog`] / [`download`] / [`extract`] — archive acquisition.
//! * [`sas`] — external SAS task invocation with an explicit
//!   per-observation environment ([`sas::SasContext`]).
//! * [`naming`] — the typed filename descriptor shared by all stages.
//! * [`fits_image`] — FITS primary-plane access built on `fitsio`.
//! * [`corrector`], [`astrometry`], [`wcs_sync`], [`mosaic`], [`combine`],
//!   [`segmentation`] — the per-observation post-processing stages.
//! * [`driver`] — the batch orchestrator and its outcome bookkeeping.
//!
//! ## Failure isolation
//! --------------------
//! One observation's failure never aborts the batch: the driver wraps every
//! stage boundary and degrades failures into [`driver::StageOutcome`]
//! values, aggregated into a [`driver::BatchSummary`].

pub mod astrometry;
pub mod batch_log;
pub mod catalog;
pub mod combine;
pub mod constants;
pub mod corrector;
pub mod download;
pub mod driver;
pub mod errors;
pub mod extract;
pub mod fits_image;
pub mod mosaic;
pub mod naming;
pub mod sas;
pub mod segmentation;
pub mod wcs_sync;

pub use batch_log::BatchLog;
pub use catalog::ObservationCatalog;
pub use download::Downloader;
pub use driver::{BatchSummary, DriverConfig, ReductionDriver};
pub use errors::OmPrepError;
pub use extract::Extractor;
pub use naming::{ExposureTag, Filter, ObsId};
