use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
    time::Instant,
};

use image::DynamicImage;
#[cfg(feature = "multi-thread")]
use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, warn};

pub use config::QueryConfig;
pub use error::{Error, Result};
pub use haar::{ImageData, Signature, NUM_CHANNELS, NUM_COEFS, NUM_PIXELS};
pub use index::{ImageId, QueryIndex};
pub use score::{score, Scorer, SignatureMap};
pub use sql::SqlDB;
pub use weights::{position_bucket, Mode};

use crate::index::{read, write};

mod bucket;
pub mod codec;
mod config;
mod error;
mod haar;
mod index;
pub mod sampler;
mod score;
mod sql;
mod weights;

/// Samples and transforms a decoded image.
pub fn compute_signature(img: &DynamicImage) -> Result<Signature> {
    Signature::from_image(img)
}

/// Same as [`compute_signature`] for a raw interleaved RGB buffer.
pub fn compute_signature_from_rgb(width: u32, height: u32, pixels: &[u8]) -> Result<Signature> {
    Ok(sampler::sample_rgb(width, height, pixels)?.into_signature())
}

/// One ranked result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub id: ImageId,
    /// Ranking score, lower is closer.
    pub distance: f64,
    /// Percentage where the query against itself scores 100.
    pub similarity: f32,
}

/// Outcome of [`DB::rescan`].
#[derive(Debug, Default)]
pub struct RescanReport {
    /// Images indexed with their fresh signature, ready to persist.
    pub indexed: Vec<(ImageId, Signature)>,
    /// Images that could not be indexed and were dropped from the index.
    pub not_indexed: Vec<(ImageId, Error)>,
    /// Images skipped because the scan was cancelled.
    pub skipped: Vec<ImageId>,
}

impl RescanReport {
    pub fn cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }
}

enum Outcome {
    Indexed(ImageId, Signature),
    Failed(ImageId, Error),
    Skipped(ImageId),
}

/// Similarity engine: the inverted index plus the signatures it scores.
///
/// All methods take `&self`; share it between threads behind an `Arc`.
#[derive(Default)]
pub struct DB {
    index: QueryIndex,
    signatures: RwLock<HashMap<ImageId, Arc<Signature>>>,
    config: QueryConfig,
}

impl DB {
    pub fn new(config: QueryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::default()
        })
    }

    /// Builds an engine from already computed signatures. Invalid ones are
    /// logged and left out.
    pub fn from_signatures(
        config: QueryConfig,
        signatures: impl IntoIterator<Item = (ImageId, Signature)>,
    ) -> Result<Self> {
        let db = Self::new(config)?;
        let start = Instant::now();
        for (id, signature) in signatures {
            if let Err(error) = db.insert(id, signature) {
                warn!(id, %error, "skipping signature");
            }
        }
        info!(
            images = db.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "index loaded"
        );
        Ok(db)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        read(&self.signatures).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ImageId) -> bool {
        read(&self.signatures).contains_key(&id)
    }

    pub fn signature(&self, id: ImageId) -> Option<Arc<Signature>> {
        read(&self.signatures).get(&id).cloned()
    }

    /// Indexes `signature` under `id`, replacing what `id` had before.
    pub fn insert(&self, id: ImageId, signature: Signature) -> Result<()> {
        signature.check()?;
        let signature = Arc::new(signature);
        let mut signatures = write(&self.signatures);
        let previous = signatures.insert(id, Arc::clone(&signature));
        match previous {
            Some(previous) if *previous == *signature => return Ok(()),
            // The write guard serializes replacements of `id`.
            Some(previous) => self.index.replace(id, &previous, &signature),
            None => self.index.insert(id, &signature),
        }
        debug!(id, "image indexed");
        Ok(())
    }

    /// Drops `id`; returns its signature when it was indexed.
    pub fn remove(&self, id: ImageId) -> Option<Arc<Signature>> {
        let mut signatures = write(&self.signatures);
        let previous = signatures.remove(&id)?;
        self.index.remove(id, &previous);
        debug!(id, "image removed");
        Some(previous)
    }

    /// Ranked matches for `signature` under `config`.
    pub fn query(&self, signature: &Signature, config: &QueryConfig) -> Result<Vec<Match>> {
        config.validate()?;
        let scorer = Scorer::new(signature, config.mode)?;
        if config.limit == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<(ImageId, Arc<Signature>)> = {
            let ids = self.index.candidates_for(signature, config.min_shared);
            let signatures = read(&self.signatures);
            ids.into_iter()
                .filter_map(|id| signatures.get(&id).map(|s| (id, Arc::clone(s))))
                .collect()
        };

        let score_one = |(id, candidate): &(ImageId, Arc<Signature>)| -> Result<Match> {
            let distance = scorer.score(candidate)?;
            Ok(Match {
                id: *id,
                distance,
                similarity: scorer.similarity(distance),
            })
        };
        #[cfg(feature = "multi-thread")]
        let scored: Result<Vec<Match>> = candidates.par_iter().map(score_one).collect();
        #[cfg(not(feature = "multi-thread"))]
        let scored: Result<Vec<Match>> = candidates.iter().map(score_one).collect();

        let mut matches = scored?;
        if let Some(max_distance) = config.max_distance {
            matches.retain(|m| m.distance <= max_distance);
        }
        matches.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
        matches.truncate(config.limit);
        Ok(matches)
    }

    /// At most `max_results` matches no farther than `threshold`, using the
    /// engine's configured mode and candidate filter.
    pub fn find_similar(
        &self,
        signature: &Signature,
        threshold: f64,
        max_results: usize,
    ) -> Result<Vec<Match>> {
        let config = self
            .config
            .clone()
            .with_max_distance(threshold)
            .with_limit(max_results);
        self.query(signature, &config)
    }

    /// Recomputes and reindexes the signatures of `ids`, pulling each image
    /// from `load`. Work is spread across images; `cancel` is checked before
    /// each image and never interrupts a transform. Images that fail are
    /// removed from the index and listed in the report.
    pub fn rescan<F>(&self, ids: &[ImageId], load: F, cancel: &AtomicBool) -> RescanReport
    where
        F: Fn(ImageId) -> Result<DynamicImage> + Sync,
    {
        let start = Instant::now();
        let process = |&id: &ImageId| {
            if cancel.load(Ordering::Relaxed) {
                return Outcome::Skipped(id);
            }
            let signature = load(id).and_then(|img| compute_signature(&img));
            match signature.and_then(|s| self.insert(id, s.clone()).map(|_| s)) {
                Ok(signature) => Outcome::Indexed(id, signature),
                Err(error) => {
                    self.remove(id);
                    warn!(id, %error, "image not indexed");
                    Outcome::Failed(id, error)
                }
            }
        };

        #[cfg(feature = "multi-thread")]
        let outcomes: Vec<Outcome> = ids.par_iter().map(process).collect();
        #[cfg(not(feature = "multi-thread"))]
        let outcomes: Vec<Outcome> = ids.iter().map(process).collect();

        let mut report = RescanReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Indexed(id, signature) => report.indexed.push((id, signature)),
                Outcome::Failed(id, error) => report.not_indexed.push((id, error)),
                Outcome::Skipped(id) => report.skipped.push(id),
            }
        }
        info!(
            indexed = report.indexed.len(),
            not_indexed = report.not_indexed.len(),
            skipped = report.skipped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rescan finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    fn pattern(seed: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(96, 80, |x, y| {
            let v = ((x * seed + y * (seed + 3)) % 256) as u8;
            let w = if (x / 12 + y / (seed % 7 + 5)) % 2 == 0 { 220 } else { 30 };
            Rgb([v, w, v / 2 + w / 2])
        }))
    }

    fn signature(seed: u32) -> Signature {
        compute_signature(&pattern(seed)).unwrap()
    }

    #[test]
    fn finds_itself_first() {
        let db = DB::default();
        for seed in 1..8 {
            db.insert(seed as ImageId, signature(seed)).unwrap();
        }
        let results = db.query(&signature(4), &QueryConfig::new()).unwrap();
        assert_eq!(results[0].id, 4);
        assert!((results[0].similarity - 100.0).abs() < 1e-3);
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn limit_and_threshold() {
        let db = DB::default();
        for seed in 1..8 {
            db.insert(seed as ImageId, signature(seed)).unwrap();
        }
        let query = signature(4);
        let all = db.query(&query, &QueryConfig::new().with_min_shared(0)).unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(db.query(&query, &QueryConfig::new().with_limit(2)).unwrap().len(), 2);
        assert!(db.query(&query, &QueryConfig::new().with_limit(0)).unwrap().is_empty());

        let cutoff = all[0].distance;
        let close = db.find_similar(&query, cutoff, 10).unwrap();
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].id, 4);
    }

    #[test]
    fn remove_and_replace() {
        let db = DB::default();
        db.insert(1, signature(1)).unwrap();
        db.insert(2, signature(2)).unwrap();
        assert!(db.remove(1).is_some());
        assert!(db.remove(1).is_none());
        let results = db.query(&signature(1), &QueryConfig::new().with_min_shared(0)).unwrap();
        assert!(results.iter().all(|m| m.id != 1));

        db.insert(2, signature(1)).unwrap();
        assert_eq!(db.len(), 1);
        let results = db.query(&signature(1), &QueryConfig::new()).unwrap();
        assert_eq!(results[0].id, 2);
        let own = score(&signature(1), &signature(1), Mode::Photographic).unwrap();
        assert_eq!(results[0].distance, own);
    }

    #[test]
    fn replacing_reuses_the_slot() {
        let db = DB::default();
        for round in 0..200 {
            db.insert(1, signature(1 + round % 2)).unwrap();
        }
        assert_eq!(db.len(), 1);
        assert_eq!(db.index.slot_count(), 1);
        let results = db.query(&signature(2), &QueryConfig::new()).unwrap();
        assert_eq!(results[0].id, 1);
        assert_eq!(*db.signature(1).unwrap(), signature(2));
    }

    #[test]
    fn out_of_range_queries_are_errors() {
        let db = DB::default();
        db.insert(1, signature(1)).unwrap();
        for position in [-16384, 16384, 20000, i16::MIN] {
            let mut query = signature(1);
            query.sig[0] = position;
            assert!(matches!(
                db.query(&query, &QueryConfig::new()),
                Err(Error::CorruptSignature(_))
            ));
            assert!(db.query(&query, &QueryConfig::new().with_limit(0)).is_err());
            assert!(db.find_similar(&query, 0.0, 5).is_err());
            assert!(score(&query, &signature(1), Mode::Photographic).is_err());
            // A bad candidate never matches the out-of-range position.
            assert!(score(&signature(1), &query, Mode::Sketch).is_ok());
        }
    }

    #[test]
    fn rejects_malformed_signatures() {
        let db = DB::default();
        let mut sig = signature(1);
        sig.sig.pop();
        assert!(matches!(
            db.insert(1, sig.clone()),
            Err(Error::SignatureVersionMismatch { .. })
        ));
        assert!(db.query(&sig, &QueryConfig::new()).is_err());
        assert!(db.is_empty());
    }

    #[test]
    fn empty_engine_returns_nothing() {
        let db = DB::new(QueryConfig::new().with_mode(Mode::Sketch)).unwrap();
        assert!(db.find_similar(&signature(1), f64::MAX, 10).unwrap().is_empty());
    }

    #[test]
    fn rescan_reports_failures() {
        let db = DB::default();
        db.insert(3, signature(3)).unwrap();
        let cancel = AtomicBool::new(false);
        let report = db.rescan(
            &[1, 2, 3],
            |id| {
                if id == 3 {
                    Ok(DynamicImage::ImageRgb8(RgbImage::new(0, 0)))
                } else {
                    Ok(pattern(id as u32))
                }
            },
            &cancel,
        );
        assert_eq!(report.indexed.len(), 2);
        assert_eq!(report.not_indexed.len(), 1);
        assert_eq!(report.not_indexed[0].0, 3);
        assert!(matches!(report.not_indexed[0].1, Error::UnsupportedInput(_)));
        assert!(!report.cancelled());
        assert!(db.contains(1) && db.contains(2) && !db.contains(3));
    }

    #[test]
    fn rescan_honours_cancel() {
        let db = DB::default();
        let cancel = AtomicBool::new(true);
        let report = db.rescan(&[1, 2], |id| Ok(pattern(id as u32)), &cancel);
        assert!(report.cancelled());
        assert_eq!(report.skipped.len(), 2);
        assert!(db.is_empty());
    }
}
