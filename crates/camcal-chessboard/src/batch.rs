//! Parallel detection over many independent images.

use crate::detector::{ChessboardDetector, DetectionFailure};
use camcal_core::{BoardGeometry, CornerSet, GrayImageView};
use log::{debug, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Upper bound on detector threads. `None` uses the global rayon pool.
    pub max_workers: Option<usize>,
}

/// Run the detector on every image. Results line up with `images`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(images = images.len()))
)]
pub fn detect_batch(
    detector: &ChessboardDetector,
    images: &[GrayImageView<'_>],
    board: &BoardGeometry,
    options: &BatchOptions,
) -> Vec<Result<CornerSet, DetectionFailure>> {
    let run = || -> Vec<Result<CornerSet, DetectionFailure>> {
        images
            .par_iter()
            .map(|img| detector.detect(img, board))
            .collect()
    };

    let results = match options.max_workers {
        Some(n) => match rayon::ThreadPoolBuilder::new().num_threads(n.max(1)).build() {
            Ok(pool) => pool.install(run),
            Err(err) => {
                warn!("could not build a {n}-thread detection pool ({err}), using the global pool");
                run()
            }
        },
        None => run(),
    };

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    debug!("batch detection: {accepted}/{} images accepted", images.len());
    results
}
