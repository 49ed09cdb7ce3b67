//! PDF document wrapper exposing embedded images in document order

use crate::error::{Error, Result};
use crate::pdf::embedded::{extract_image, resolve, EmbeddedImage};
use crate::source::{StagedFile, Staging};
use lopdf::{Dictionary, Object, ObjectId};
use std::collections::HashSet;

/// Maximum depth of nested Form XObjects followed when listing images
const MAX_FORM_DEPTH: usize = 8;

/// Maximum number of page tree ancestors consulted for inherited resources
const MAX_INHERITANCE_DEPTH: usize = 64;

/// An opened PDF document.
///
/// Owns the parsed object graph and, when staging is enabled, the temporary
/// file the bytes were written to. Both are released together when the
/// document is closed or dropped.
pub struct PdfDocument {
    inner: lopdf::Document,
    page_ids: Vec<ObjectId>,
    staged: Option<StagedFile>,
}

impl PdfDocument {
    /// Open a PDF from bytes
    pub fn open(data: &[u8]) -> Result<Self> {
        Self::check_header(data)?;
        let inner = lopdf::Document::load_mem(data).map_err(Self::map_lopdf_error)?;
        Self::from_parsed(inner, None)
    }

    /// Open a PDF from bytes, honouring the staging mode
    pub fn open_with(data: &[u8], staging: &Staging) -> Result<Self> {
        match staging {
            Staging::Memory => Self::open(data),
            Staging::TempDir(dir) => {
                Self::check_header(data)?;
                let staged = StagedFile::create(dir, data)?;
                // On parse failure `staged` is dropped here, removing the file
                let inner =
                    lopdf::Document::load(staged.path()).map_err(Self::map_lopdf_error)?;
                Self::from_parsed(inner, Some(staged))
            }
        }
    }

    fn check_header(data: &[u8]) -> Result<()> {
        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(Error::InvalidPdf {
                reason: "Not a valid PDF file".to_string(),
            });
        }
        Ok(())
    }

    fn map_lopdf_error(err: lopdf::Error) -> Error {
        Error::InvalidPdf {
            reason: err.to_string(),
        }
    }

    fn from_parsed(inner: lopdf::Document, staged: Option<StagedFile>) -> Result<Self> {
        let has_catalog = inner
            .trailer
            .get(b"Root")
            .and_then(|root| root.as_reference())
            .and_then(|id| inner.get_object(id))
            .and_then(|obj| obj.as_dict())
            .is_ok();
        if !has_catalog {
            return Err(Error::InvalidPdf {
                reason: "Document has no catalog".to_string(),
            });
        }

        // get_pages is keyed by 1-based page number, so values come out in page order
        let page_ids = inner.get_pages().into_values().collect();
        Ok(Self {
            inner,
            page_ids,
            staged,
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Whether the document was staged through a temporary file
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Pages in stored order. Each call starts again from the first page.
    pub fn pages(&self) -> impl Iterator<Item = Page<'_>> + '_ {
        self.page_ids
            .iter()
            .enumerate()
            .map(move |(index, &id)| Page {
                doc: &self.inner,
                index,
                id,
            })
    }

    /// Every embedded image reference, page by page, in stored order
    pub fn images(&self) -> impl Iterator<Item = ImageRef<'_>> + '_ {
        self.pages().flat_map(|page| page.images())
    }

    /// Release the document and any staged file
    pub fn close(self) {
        tracing::debug!(pages = self.page_count(), staged = self.is_staged(), "Closing document");
    }
}

/// A page of an opened document
pub struct Page<'a> {
    doc: &'a lopdf::Document,
    index: usize,
    id: ObjectId,
}

impl<'a> Page<'a> {
    /// Page index (0-indexed)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Image XObjects used by this page, in resource dictionary order.
    ///
    /// Images inside Form XObjects are listed where the form appears.
    pub fn images(&self) -> std::vec::IntoIter<ImageRef<'a>> {
        let mut refs = Vec::new();
        match self.resources() {
            Some(resources) => {
                let mut visited = HashSet::new();
                self.collect_images(resources, &mut visited, 0, &mut refs);
            }
            None => tracing::debug!(page = self.index, "Page has no resources"),
        }

        tracing::debug!(page = self.index, images = refs.len(), "Listed page images");
        refs.into_iter()
    }

    /// Resources dictionary, inherited from the page tree when absent on the page
    fn resources(&self) -> Option<&'a Dictionary> {
        let mut current = self.id;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let node = self.doc.get_object(current).ok()?.as_dict().ok()?;
            if let Ok(obj) = node.get(b"Resources") {
                return resolve(self.doc, obj)?.as_dict().ok();
            }
            current = node.get(b"Parent").ok()?.as_reference().ok()?;
        }
        None
    }

    fn collect_images(
        &self,
        resources: &'a Dictionary,
        visited: &mut HashSet<ObjectId>,
        depth: usize,
        refs: &mut Vec<ImageRef<'a>>,
    ) {
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| resolve(self.doc, obj))
            .and_then(|obj| obj.as_dict().ok())
        else {
            return;
        };

        for (name, value) in xobjects.iter() {
            let Ok(id) = value.as_reference() else {
                continue;
            };
            let Some(stream) = self
                .doc
                .get_object(id)
                .ok()
                .and_then(|obj| obj.as_stream().ok())
            else {
                tracing::debug!(page = self.index, object = ?id, "XObject is not a stream");
                continue;
            };

            match stream.dict.get(b"Subtype") {
                Ok(Object::Name(subtype)) if subtype.as_slice() == b"Image" => {
                    refs.push(ImageRef {
                        doc: self.doc,
                        page: self.index,
                        index: refs.len(),
                        id,
                        name: String::from_utf8_lossy(name).into_owned(),
                    });
                }
                Ok(Object::Name(subtype)) if subtype.as_slice() == b"Form" => {
                    if depth >= MAX_FORM_DEPTH || !visited.insert(id) {
                        continue;
                    }
                    if let Some(form_resources) = stream
                        .dict
                        .get(b"Resources")
                        .ok()
                        .and_then(|obj| resolve(self.doc, obj))
                        .and_then(|obj| obj.as_dict().ok())
                    {
                        self.collect_images(form_resources, visited, depth + 1, refs);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Reference to one embedded image, borrowed from its document
#[derive(Clone)]
pub struct ImageRef<'a> {
    doc: &'a lopdf::Document,
    page: usize,
    index: usize,
    id: ObjectId,
    name: String,
}

impl<'a> ImageRef<'a> {
    /// Page index (0-indexed)
    pub fn page(&self) -> usize {
        self.page
    }

    /// Position of the image on its page (0-indexed)
    pub fn index(&self) -> usize {
        self.index
    }

    /// Object id of the image stream
    pub fn object_id(&self) -> ObjectId {
        self.id
    }

    /// Resource name the page uses for the image (e.g. `Im0`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve the reference into encoded image bytes
    pub fn extract(&self) -> Result<EmbeddedImage> {
        let stream = self
            .doc
            .get_object(self.id)
            .and_then(|obj| obj.as_stream())
            .map_err(|e| Error::ImageExtraction {
                page: self.page,
                index: self.index,
                reason: e.to_string(),
            })?;

        extract_image(self.doc, stream, self.page, self.index)
    }
}

impl std::fmt::Debug for ImageRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageRef")
            .field("page", &self.page)
            .field("index", &self.index)
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{dictionary, Stream};

    fn jpeg_stream(marker: u8) -> Stream {
        Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 1_i64,
                "Height" => 1_i64,
                "Filter" => "DCTDecode",
            },
            vec![0xFF, 0xD8, marker],
        )
    }

    fn save(mut doc: lopdf::Document) -> Vec<u8> {
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Two pages sharing resources through the page tree, plus a form on page 1
    fn layered_document() -> Vec<u8> {
        let mut doc = lopdf::Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let inherited = doc.add_object(jpeg_stream(1));
        let nested = doc.add_object(jpeg_stream(2));
        let after_form = doc.add_object(jpeg_stream(3));
        let form = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Nested" => nested },
                },
            },
            b"/Nested Do".to_vec(),
        ));

        let page0 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
        });
        let page1 = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Fm0" => form, "Im9" => after_form },
            },
        });

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page0), Object::Reference(page1)],
                "Count" => 2_i64,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im0" => inherited },
                },
            }),
        );
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        save(doc)
    }

    #[test]
    fn test_invalid_pdf_detection() {
        let result = PdfDocument::open(b"not a pdf");
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }

    #[test]
    fn test_truncated_pdf_is_rejected() {
        let result = PdfDocument::open(b"%PDF-1.4\n1 0 obj\n<< /Type");
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }

    #[test]
    fn test_images_follow_inheritance_and_forms() {
        let data = layered_document();
        let doc = PdfDocument::open(&data).unwrap();
        assert_eq!(doc.page_count(), 2);

        let refs: Vec<_> = doc.images().collect();
        let summary: Vec<(usize, usize, &str)> = refs
            .iter()
            .map(|r| (r.page(), r.index(), r.name()))
            .collect();
        assert_eq!(
            summary,
            vec![(0, 0, "Im0"), (1, 0, "Nested"), (1, 1, "Im9")]
        );

        let markers: Vec<u8> = refs
            .iter()
            .map(|r| *r.extract().unwrap().data.last().unwrap())
            .collect();
        assert_eq!(markers, vec![1, 2, 3]);
    }

    #[test]
    fn test_pages_are_restartable() {
        let data = layered_document();
        let doc = PdfDocument::open(&data).unwrap();

        let first: Vec<usize> = doc.pages().map(|p| p.index()).collect();
        let second: Vec<usize> = doc.pages().map(|p| p.index()).collect();
        assert_eq!(first, vec![0, 1]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_staged_document_removes_file_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let data = layered_document();

        let doc = PdfDocument::open_with(&data, &Staging::TempDir(dir.path().to_path_buf()))
            .unwrap();
        assert!(doc.is_staged());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(doc.images().count(), 3);

        doc.close();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_staged_parse_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = PdfDocument::open_with(
            b"%PDF-1.7\ngarbage without objects",
            &Staging::TempDir(dir.path().to_path_buf()),
        );
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
