//! Best-frame selection from a burst of live captures.

use thiserror::Error;

use crate::config::QualityConfig;
use crate::detector::FaceDetector;
use crate::photo::Image;
use crate::quality;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("frame has zero dimensions")]
    ZeroDimensions,
    #[error("detected face box lies outside the frame")]
    EmptyFaceRegion,
}

/// Quality breakdown for one burst frame with a detected face.
#[derive(Debug, Clone)]
pub struct FrameQualityScore<'a> {
    pub frame_index: usize,
    pub face_size_score: f32,
    pub sharpness_score: f32,
    pub frontal_score: f32,
    pub total_score: f32,
    pub image: &'a Image,
}

/// Scores every frame of a burst and keeps the best one.
pub struct FrameSelector<'a, D: ?Sized> {
    detector: &'a D,
    config: &'a QualityConfig,
}

impl<'a, D: FaceDetector + ?Sized> FrameSelector<'a, D> {
    pub fn new(detector: &'a D, config: &'a QualityConfig) -> Self {
        Self { detector, config }
    }

    /// Score all frames with a detectable face, best first.
    ///
    /// Frames without a face are excluded rather than scored as zero. Frames
    /// that fail evaluation are skipped with a warning. Ties keep burst order,
    /// so the result is identical across runs regardless of evaluation order.
    pub fn rank<'f>(&self, frames: &'f [Image]) -> Vec<FrameQualityScore<'f>> {
        let evaluated = self.evaluate_all(frames);

        let mut scored: Vec<FrameQualityScore<'f>> = evaluated
            .into_iter()
            .enumerate()
            .filter_map(|(index, outcome)| match outcome {
                Ok(Some(score)) => Some(score),
                Ok(None) => {
                    tracing::debug!(frame = index, "no face detected; frame excluded");
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        stage = "select",
                        frame = index,
                        error = %e,
                        "frame evaluation failed; skipping"
                    );
                    None
                }
            })
            .collect();

        // Stable sort: equal totals stay in burst order.
        scored.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        scored
    }

    /// The highest-scoring frame, or `None` for an empty burst or one where no
    /// frame has a detectable face.
    pub fn select_best<'f>(&self, frames: &'f [Image]) -> Option<FrameQualityScore<'f>> {
        let best = self.rank(frames).into_iter().next()?;
        tracing::info!(
            stage = "select",
            frame = best.frame_index,
            score = best.total_score,
            face_size = best.face_size_score,
            sharpness = best.sharpness_score,
            frontal = best.frontal_score,
            "best frame selected"
        );
        Some(best)
    }

    #[cfg(feature = "parallel")]
    fn evaluate_all<'f>(
        &self,
        frames: &'f [Image],
    ) -> Vec<Result<Option<FrameQualityScore<'f>>, FrameError>> {
        use rayon::prelude::*;
        frames
            .par_iter()
            .enumerate()
            .map(|(index, image)| self.evaluate(index, image))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn evaluate_all<'f>(
        &self,
        frames: &'f [Image],
    ) -> Vec<Result<Option<FrameQualityScore<'f>>, FrameError>> {
        frames
            .iter()
            .enumerate()
            .map(|(index, image)| self.evaluate(index, image))
            .collect()
    }

    /// Score one frame; `Ok(None)` when no face is detected.
    pub fn evaluate<'f>(
        &self,
        index: usize,
        image: &'f Image,
    ) -> Result<Option<FrameQualityScore<'f>>, FrameError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimensions);
        }

        let detection = self.detector.detect(image.pixels());
        if !detection.detected {
            return Ok(None);
        }

        let face = detection.bounds.clamp_to(width, height);
        if face.is_empty() {
            return Err(FrameError::EmptyFaceRegion);
        }

        let c = self.config;
        let face_size_score = quality::face_size_score(face, width, height);
        let gray = image.pixels().to_luma8();
        let sharpness_score = quality::sharpness_score(&gray, face, c.sharpness_normalization);
        let frontal_score = quality::frontal_score(
            detection.landmarks.as_ref(),
            c.max_tilt_radians,
            c.neutral_frontal_score,
        );
        let total_score = quality::total_score(c, face_size_score, sharpness_score, frontal_score);

        tracing::debug!(
            frame = index,
            face_size = face_size_score,
            sharpness = sharpness_score,
            frontal = frontal_score,
            total = total_score,
            "frame scored"
        );

        Ok(Some(FrameQualityScore {
            frame_index: index,
            face_size_score,
            sharpness_score,
            frontal_score,
            total_score,
            image,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::HeuristicDetector;
    use crate::types::{DetectionResult, Rect};
    use image::{DynamicImage, GrayImage, Luma};

    fn flat(width: u32, height: u32) -> Image {
        let gray = GrayImage::from_pixel(width, height, Luma([128]));
        Image::new(Vec::new(), DynamicImage::ImageLuma8(gray))
    }

    fn checkered(width: u32, height: u32, cell: u32) -> Image {
        let gray = GrayImage::from_fn(width, height, |x, y| {
            Luma([if (x / cell + y / cell) % 2 == 0 { 220 } else { 30 }])
        });
        Image::new(Vec::new(), DynamicImage::ImageLuma8(gray))
    }

    struct NoFace;

    impl FaceDetector for NoFace {
        fn detect(&self, _image: &DynamicImage) -> DetectionResult {
            DetectionResult::none()
        }

        fn name(&self) -> &'static str {
            "none"
        }
    }

    struct OffImage;

    impl FaceDetector for OffImage {
        fn detect(&self, image: &DynamicImage) -> DetectionResult {
            DetectionResult::face(Rect::new(image.width() + 5, 0, 10, 10), None, 0.9)
        }

        fn name(&self) -> &'static str {
            "off-image"
        }
    }

    #[test]
    fn test_empty_burst() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        assert!(selector.select_best(&[]).is_none());
    }

    #[test]
    fn test_no_face_burst() {
        let config = QualityConfig::default();
        let selector = FrameSelector::new(&NoFace, &config);
        let frames = vec![flat(64, 64), flat(64, 64)];
        assert!(selector.select_best(&frames).is_none());
    }

    #[test]
    fn test_sharpest_frame_wins() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        let frames = vec![flat(120, 120), checkered(120, 120, 1), flat(120, 120)];
        let best = selector.select_best(&frames).unwrap();
        assert_eq!(best.frame_index, 1);
        assert!(best.sharpness_score > 0.9);
    }

    #[test]
    fn test_ties_prefer_lowest_index() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        let frames = vec![flat(80, 80), flat(80, 80), flat(80, 80)];
        for _ in 0..5 {
            assert_eq!(selector.select_best(&frames).unwrap().frame_index, 0);
        }
    }

    #[test]
    fn test_rank_is_sorted_descending() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        let frames = vec![flat(100, 100), checkered(100, 100, 4), checkered(100, 100, 1)];
        let ranked = selector.rank(&frames);
        assert_eq!(ranked.len(), 3);
        assert!(ranked.windows(2).all(|w| w[0].total_score >= w[1].total_score));
    }

    #[test]
    fn test_heuristic_component_scores() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        let frame = flat(100, 100);
        let s = selector.evaluate(0, &frame).unwrap().unwrap();
        // 60x70 of 100x100 → sqrt(0.42)
        assert!((s.face_size_score - 0.42f32.sqrt()).abs() < 1e-4);
        assert_eq!(s.sharpness_score, 0.0);
        assert!((s.frontal_score - 1.0).abs() < 1e-6);
        assert!((s.total_score - (0.5 * 0.42f32.sqrt() + 0.2)).abs() < 1e-4);
    }

    #[test]
    fn test_failed_frame_is_skipped_not_fatal() {
        let config = QualityConfig::default();
        let selector = FrameSelector::new(&OffImage, &config);
        let frames = vec![flat(50, 50)];
        assert_eq!(selector.evaluate(0, &frames[0]).unwrap_err(), FrameError::EmptyFaceRegion);
        assert!(selector.select_best(&frames).is_none());
    }

    #[test]
    fn test_zero_size_frame_skipped() {
        let config = QualityConfig::default();
        let detector = HeuristicDetector::new();
        let selector = FrameSelector::new(&detector, &config);
        let frames = vec![flat(0, 0), flat(40, 40)];
        assert_eq!(selector.select_best(&frames).unwrap().frame_index, 1);
    }
}
