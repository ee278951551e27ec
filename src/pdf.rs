//! Splits a rulebook PDF into standalone single-page documents.
//!
//! Each output page is a complete PDF built from the page object, the attributes it inherits
//! from the page tree, and the objects it references. Nothing reachable only from other pages
//! is copied, so the work per page tracks the size of that page. Splitting is synchronous;
//! async callers run it on a blocking thread.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised while splitting a document.
#[derive(Debug, Error)]
pub enum PdfError {
    /// Input could not be parsed as a paginated PDF.
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}

/// One page of the source document re-encoded as its own PDF.
#[derive(Debug, Clone)]
pub struct SinglePage {
    /// 1-based position of the page in the source document.
    pub page_number: u32,
    /// Complete single-page PDF bytes.
    pub bytes: Vec<u8>,
    /// Standard base64 encoding of `bytes`, as sent to the extraction endpoint.
    pub base64: String,
}

/// Result of splitting a document.
#[derive(Debug, Clone)]
pub struct SplitDocument {
    /// Total number of pages in the source document.
    pub page_count: u32,
    /// Pages in source order, one per source page.
    pub pages: Vec<SinglePage>,
}

/// Split `data` into one single-page PDF per source page, preserving order.
pub fn split_pdf(data: &[u8]) -> Result<SplitDocument, PdfError> {
    let source =
        Document::load_mem(data).map_err(|err| PdfError::MalformedDocument(err.to_string()))?;
    let page_ids = source.get_pages();
    if page_ids.is_empty() {
        return Err(PdfError::MalformedDocument("document has no pages".into()));
    }

    let mut pages = Vec::with_capacity(page_ids.len());
    for (&page_number, &page_id) in &page_ids {
        let bytes = isolate_page(&source, page_number, page_id)?;
        let base64 = BASE64_STANDARD.encode(&bytes);
        pages.push(SinglePage {
            page_number,
            bytes,
            base64,
        });
    }

    tracing::debug!(pages = pages.len(), "Split document into single pages");
    Ok(SplitDocument {
        page_count: pages.len() as u32,
        pages,
    })
}

/// Page attributes a page may take from its ancestors in the page tree.
const INHERITED_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Write a fresh document holding `page_id` and the objects reachable from it.
///
/// Object ids are kept from the source so references need no rewriting. References into other
/// pages or page-tree nodes are left dangling, which readers treat as null.
fn isolate_page(
    source: &Document,
    page_number: u32,
    page_id: ObjectId,
) -> Result<Vec<u8>, PdfError> {
    let mut page = source
        .get_dictionary(page_id)
        .map_err(|err| PdfError::MalformedDocument(format!("page {page_number}: {err}")))?
        .clone();
    inherit_attributes(source, &mut page);
    page.remove(b"Parent");

    let mut document = Document::with_version(source.version.clone());
    document.max_id = source.max_id;

    let mut pending = Vec::new();
    for (_, value) in page.iter() {
        push_references(value, &mut pending);
    }
    while let Some(id) = pending.pop() {
        if id == page_id || document.objects.contains_key(&id) {
            continue;
        }
        let Ok(object) = source.get_object(id) else {
            continue;
        };
        if let Ok(dict) = object.as_dict()
            && (dict.type_is(b"Page") || dict.type_is(b"Pages"))
        {
            continue;
        }
        push_references(object, &mut pending);
        document.objects.insert(id, object.clone());
    }

    let pages_id = document.new_object_id();
    page.set("Parent", pages_id);
    document.objects.insert(page_id, Object::Dictionary(page));
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).map_err(|err| {
        PdfError::MalformedDocument(format!("failed to write page {page_number}: {err}"))
    })?;
    Ok(bytes)
}

/// Copy attributes the page inherits from the page tree onto the page itself.
fn inherit_attributes(source: &Document, page: &mut Dictionary) {
    let mut visited = BTreeSet::new();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    while let Some(id) = parent {
        if !visited.insert(id) {
            break;
        }
        let Ok(node) = source.get_dictionary(id) else {
            break;
        };
        for key in INHERITED_KEYS {
            if !page.has(key)
                && let Ok(value) = node.get(key)
            {
                page.set(key, value.clone());
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
}

fn push_references(object: &Object, pending: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => pending.push(*id),
        Object::Array(items) => {
            for item in items {
                push_references(item, pending);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter() {
                push_references(value, pending);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter() {
                push_references(value, pending);
            }
        }
        _ => {}
    }
}

/// Build an in-memory PDF whose page `n` draws the text `Page n`.
#[cfg(test)]
pub(crate) fn build_test_pdf(page_count: u32) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::Stream;

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for number in 1..=page_count {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::string_literal(format!("Page {number}"))],
                ),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id =
            doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_text(bytes: &[u8]) -> String {
        let doc = Document::load_mem(bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1, "split output must hold exactly one page");
        let page_id = pages[&1];
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    #[test]
    fn split_emits_one_document_per_page_in_order() {
        let split = split_pdf(&build_test_pdf(4)).expect("split succeeds");

        assert_eq!(split.page_count, 4);
        let numbers: Vec<u32> = split.pages.iter().map(|page| page.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);

        for page in &split.pages {
            let content = page_text(&page.bytes);
            assert!(
                content.contains(&format!("(Page {})", page.page_number)),
                "page {} carried content {content:?}",
                page.page_number
            );
        }
    }

    #[test]
    fn base64_matches_page_bytes() {
        let split = split_pdf(&build_test_pdf(1)).unwrap();
        let page = &split.pages[0];
        let decoded = BASE64_STANDARD.decode(&page.base64).unwrap();
        assert_eq!(decoded, page.bytes);
    }

    #[test]
    fn pages_keep_inherited_resources_and_media_box() {
        let split = split_pdf(&build_test_pdf(2)).unwrap();
        let doc = Document::load_mem(&split.pages[1].bytes).unwrap();
        let page_id = doc.get_pages()[&1];
        let page = doc.get_dictionary(page_id).unwrap();

        assert!(page.has(b"MediaBox"));
        let resources = match page.get(b"Resources").unwrap() {
            Object::Reference(id) => doc.get_dictionary(*id).unwrap(),
            Object::Dictionary(dict) => dict,
            other => panic!("unexpected resources {other:?}"),
        };
        let fonts = resources.get(b"Font").unwrap().as_dict().unwrap();
        let font_id = fonts.get(b"F1").unwrap().as_reference().unwrap();
        assert!(doc.get_dictionary(font_id).unwrap().type_is(b"Font"));
    }

    #[test]
    fn large_documents_split_without_carrying_other_pages() {
        let source = build_test_pdf(300);
        let split = split_pdf(&source).unwrap();

        assert_eq!(split.page_count, 300);
        for page_number in [1, 150, 300] {
            let page = &split.pages[page_number as usize - 1];
            assert_eq!(page.page_number, page_number);
            assert!(page_text(&page.bytes).contains(&format!("(Page {page_number})")));
        }
        let largest = split.pages.iter().map(|page| page.bytes.len()).max().unwrap();
        assert!(
            largest * 20 < source.len(),
            "single page of {largest} bytes from a {} byte source",
            source.len()
        );
    }

    #[test]
    fn garbage_input_is_malformed() {
        let error = split_pdf(b"definitely not a pdf").unwrap_err();
        assert!(matches!(error, PdfError::MalformedDocument(_)));
    }
}
