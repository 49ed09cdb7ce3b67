//! Profile photo selection
//!
//! Walks every embedded image of a document in (page, image) order and
//! returns the first one in which the detector finds a face.

use crate::error::{Error, Result};
use crate::face::FaceDetector;
use crate::pdf::{EmbeddedFormat, EmbeddedImage, ImageRef, PdfDocument};
use crate::source::{decode_base64, Staging};
use std::sync::Arc;

/// The image chosen as profile photo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedImage {
    /// Page index (0-indexed)
    pub page: usize,
    /// Image index within the page (0-indexed)
    pub index: usize,
    pub format: EmbeddedFormat,
    /// Encoded bytes as extracted from the document
    pub data: Vec<u8>,
}

impl SelectedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

impl From<EmbeddedImage> for SelectedImage {
    fn from(image: EmbeddedImage) -> Self {
        Self {
            page: image.page,
            index: image.index,
            format: image.format,
            data: image.data,
        }
    }
}

/// Result of a completed search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    Found(SelectedImage),
    NotFound,
}

impl SelectionOutcome {
    pub fn found(&self) -> Option<&SelectedImage> {
        match self {
            SelectionOutcome::Found(image) => Some(image),
            SelectionOutcome::NotFound => None,
        }
    }
}

/// What inspecting one embedded image produced
#[derive(Debug)]
pub enum Candidate {
    /// The image contains a face
    Match(EmbeddedImage),
    /// The image decoded but holds no face
    NoFace,
    /// The image could not be extracted or decoded
    Skip,
}

/// Picks the first face-bearing image of a document
#[derive(Clone)]
pub struct ProfilePhotoSelector {
    detector: Arc<dyn FaceDetector>,
    staging: Staging,
}

impl ProfilePhotoSelector {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self {
            detector,
            staging: Staging::default(),
        }
    }

    /// Stage input documents through temporary files instead of parsing from memory
    pub fn with_staging(mut self, staging: Staging) -> Self {
        self.staging = staging;
        self
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Decode a base64 payload and select from the resulting document
    pub fn select_from_base64(&self, encoded: Option<&str>) -> Result<SelectionOutcome> {
        let data = decode_base64(encoded)?;
        tracing::debug!(bytes = data.len(), "Decoded payload");
        self.select_profile_image(&data)
    }

    /// Return the first embedded image, in (page, image) order, that contains a face.
    ///
    /// Images that cannot be extracted or decoded are skipped. Detector
    /// failures abort the search. The document is released before this returns.
    pub fn select_profile_image(&self, data: &[u8]) -> Result<SelectionOutcome> {
        if data.is_empty() {
            return Err(Error::missing_document());
        }

        let document = PdfDocument::open_with(data, &self.staging)?;
        tracing::info!(pages = document.page_count(), "Searching document for a profile photo");

        let result = self.search(&document);
        document.close();
        result
    }

    fn search(&self, document: &PdfDocument) -> Result<SelectionOutcome> {
        let mut inspected = 0usize;
        let found = document
            .images()
            .map(|image| {
                inspected += 1;
                self.inspect(&image)
            })
            .find_map(|candidate| match candidate {
                Ok(Candidate::Match(image)) => Some(Ok(image)),
                Ok(Candidate::NoFace | Candidate::Skip) => None,
                Err(e) => Some(Err(e)),
            })
            .transpose()?;

        match found {
            Some(image) => {
                tracing::info!(
                    page = image.page,
                    index = image.index,
                    inspected,
                    "Selected profile photo"
                );
                Ok(SelectionOutcome::Found(image.into()))
            }
            None => {
                tracing::info!(inspected, "No face found in any images");
                Ok(SelectionOutcome::NotFound)
            }
        }
    }

    /// Classify a single embedded image
    pub fn inspect(&self, image: &ImageRef<'_>) -> Result<Candidate> {
        let decoded = image
            .extract()
            .and_then(|embedded| embedded.decode().map(|pixels| (embedded, pixels)));
        let (embedded, pixels) = match decoded {
            Ok(decoded) => decoded,
            Err(e) if e.is_recoverable() => {
                tracing::warn!(page = image.page(), index = image.index(), error = %e, "Skipping image");
                return Ok(Candidate::Skip);
            }
            Err(e) => return Err(e),
        };

        let faces = self.detector.detect(&pixels)?;
        tracing::debug!(
            page = image.page(),
            index = image.index(),
            name = image.name(),
            width = pixels.width(),
            height = pixels.height(),
            faces = faces.len(),
            "Inspected image"
        );

        if faces.is_empty() {
            Ok(Candidate::NoFace)
        } else {
            Ok(Candidate::Match(embedded))
        }
    }
}

impl std::fmt::Debug for ProfilePhotoSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfilePhotoSelector")
            .field("staging", &self.staging)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::FaceRegion;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use lopdf::{dictionary, Object, Stream};
    use pretty_assertions::assert_eq;
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Treats red images as faces and records the width of every image it sees
    #[derive(Default)]
    struct RedDetector {
        seen: Mutex<Vec<u32>>,
    }

    impl FaceDetector for RedDetector {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<FaceRegion>> {
            self.seen.lock().unwrap().push(image.width());
            let px = image.to_rgb8().get_pixel(0, 0).0;
            if px[0] > 160 && px[1] < 100 {
                Ok(vec![FaceRegion {
                    x: 0,
                    y: 0,
                    width: image.width(),
                    height: image.height(),
                    neighbors: 5,
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<FaceRegion>> {
            Err(Error::Detection {
                reason: "model exploded".to_string(),
            })
        }
    }

    fn jpeg(width: u32, color: [u8; 3]) -> Vec<u8> {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, 16, Rgb(color)))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    /// One page per entry, each holding the given JPEG images in order
    fn document(pages: &[Vec<Vec<u8>>]) -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let mut kids = Vec::new();
        for images in pages {
            let mut xobjects = lopdf::Dictionary::new();
            for (i, data) in images.iter().enumerate() {
                let id = doc.add_object(Stream::new(
                    dictionary! {
                        "Type" => "XObject",
                        "Subtype" => "Image",
                        "Width" => 16_i64,
                        "Height" => 16_i64,
                        "ColorSpace" => "DeviceRGB",
                        "BitsPerComponent" => 8_i64,
                        "Filter" => "DCTDecode",
                    },
                    data.clone(),
                ));
                xobjects.set(format!("Im{}", i), id);
            }
            let page = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Resources" => dictionary! { "XObject" => xobjects },
            });
            kids.push(Object::Reference(page));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    const RED: [u8; 3] = [230, 20, 20];
    const BLUE: [u8; 3] = [20, 20, 230];

    #[test]
    fn test_first_face_wins_and_search_stops() {
        let face = jpeg(20, RED);
        let data = document(&[
            vec![jpeg(10, BLUE)],
            vec![face.clone(), jpeg(21, RED)],
            vec![jpeg(30, RED)],
        ]);
        let detector = Arc::new(RedDetector::default());
        let selector = ProfilePhotoSelector::new(detector.clone());

        let outcome = selector.select_profile_image(&data).unwrap();
        assert_eq!(
            outcome,
            SelectionOutcome::Found(SelectedImage {
                page: 1,
                index: 0,
                format: EmbeddedFormat::Jpeg,
                data: face,
            })
        );
        assert_eq!(*detector.seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_corrupt_image_is_skipped() {
        let face = jpeg(12, RED);
        let data = document(&[vec![vec![0xFF, 0xD8, 0xFF, 0x00, 0x13], face.clone()]]);
        let detector = Arc::new(RedDetector::default());
        let selector = ProfilePhotoSelector::new(detector.clone());

        let outcome = selector.select_profile_image(&data).unwrap();
        assert_eq!(outcome.found().map(|s| (s.page, s.index)), Some((0, 1)));
        assert_eq!(outcome.found().unwrap().data, face);
        assert_eq!(*detector.seen.lock().unwrap(), vec![12]);
    }

    #[test]
    fn test_no_face_anywhere() {
        let data = document(&[vec![jpeg(10, BLUE)], vec![]]);
        let selector = ProfilePhotoSelector::new(Arc::new(RedDetector::default()));
        assert_eq!(
            selector.select_profile_image(&data).unwrap(),
            SelectionOutcome::NotFound
        );
    }

    #[test]
    fn test_detector_failure_aborts() {
        let data = document(&[vec![jpeg(10, BLUE), jpeg(11, RED)]]);
        let selector = ProfilePhotoSelector::new(Arc::new(FailingDetector));
        let result = selector.select_profile_image(&data);
        assert!(matches!(result, Err(Error::Detection { .. })));
    }

    #[test]
    fn test_empty_and_missing_input() {
        let selector = ProfilePhotoSelector::new(Arc::new(RedDetector::default()));
        assert!(matches!(
            selector.select_profile_image(&[]),
            Err(Error::InvalidRequest { .. })
        ));
        assert!(matches!(
            selector.select_from_base64(None),
            Err(Error::InvalidRequest { .. })
        ));
        assert!(matches!(
            selector.select_from_base64(Some("%%%")),
            Err(Error::Base64Decode(_))
        ));
    }

    #[test]
    fn test_staged_selection_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let selector = ProfilePhotoSelector::new(Arc::new(RedDetector::default()))
            .with_staging(Staging::TempDir(dir.path().to_path_buf()));

        let found = document(&[vec![jpeg(10, RED)]]);
        assert!(selector.select_profile_image(&found).unwrap().found().is_some());
        assert!(selector.select_profile_image(b"%PDF-1.4 broken").is_err());

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
