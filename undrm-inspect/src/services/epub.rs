//! Container structural parser
//!
//! Opens a decrypted EPUB (zip) entirely in memory and extracts:
//! - the manifest (declared files and media types) and spine (reading order)
//!   from the OPF package document located via `META-INF/container.xml`
//! - the flattened table of contents, trying the EPUB 3 nav document first
//!   and falling back to the EPUB 2 NCX
//! - character counts for spine text files, used as inference context
//!
//! Every spine reference and every TOC href must resolve to a manifest
//! item; anything else rejects the parse with [`Error::Structure`], as does
//! a container with no usable table of contents. Nothing is ever written to
//! durable storage.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::ZipArchive;

use crate::models::{ContainerManifest, FileTextStat, ManifestItem, TocEntry};
use undrm_common::{Error, Result};

const CONTAINER_XML_PATH: &str = "META-INF/container.xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Href keywords marking files that are almost never narrative content
const EXCLUDE_KEYWORDS: [&str; 4] = ["cover", "toc", "copyright", "nav"];

/// Parse a decrypted container into its structural description
pub fn parse_container(decrypted: &[u8]) -> Result<ContainerManifest> {
    let mut archive = ZipArchive::new(Cursor::new(decrypted))
        .map_err(|e| Error::Structure(format!("Cannot open container archive: {}", e)))?;

    let opf_path = find_opf_path(&mut archive)?;
    let opf_dir = parent_dir(&opf_path);

    let opf_bytes = zip_read(&mut archive, &opf_path)?;
    let opf = parse_opf(&opf_bytes)?;

    // Manifest hrefs become archive-rooted for all later resolution
    let items: Vec<ManifestItem> = opf
        .items
        .iter()
        .map(|raw| ManifestItem {
            id: raw.id.clone(),
            href: normalize_zip_path(&join_path(&opf_dir, &raw.href)),
            media_type: raw.media_type.clone(),
            properties: raw.properties.clone(),
        })
        .collect();

    let by_id: HashMap<&str, &ManifestItem> =
        items.iter().map(|item| (item.id.as_str(), item)).collect();

    // Invariant: every spine reference resolves to a manifest item
    let mut spine = Vec::with_capacity(opf.spine_idrefs.len());
    for idref in &opf.spine_idrefs {
        let item = by_id.get(idref.as_str()).ok_or_else(|| {
            Error::Structure(format!("Spine references unknown manifest item '{}'", idref))
        })?;
        spine.push(item.href.clone());
    }

    let toc = extract_toc(&mut archive, &items, &by_id, opf.spine_toc_id.as_deref())?;
    if toc.is_empty() {
        return Err(Error::Structure(
            "Container has no usable table of contents".to_string(),
        ));
    }

    // Invariant: every TOC href resolves to a manifest item
    for entry in &toc {
        if !items.iter().any(|item| item.href == entry.href) {
            return Err(Error::Structure(format!(
                "TOC entry '{}' references '{}' which is not in the manifest",
                entry.label, entry.href
            )));
        }
    }

    let text_stats = collect_text_stats(&mut archive, &spine)?;

    tracing::debug!(
        toc_entries = toc.len(),
        spine_len = spine.len(),
        text_files = text_stats.len(),
        "Container parsed"
    );

    Ok(ContainerManifest {
        items,
        spine,
        toc,
        text_stats,
    })
}

// ============================================================================
// Path handling
// ============================================================================

/// Normalize a zip member path: percent-decoding, backslash to slash,
/// `.`/`..` segment resolution
pub(crate) fn normalize_zip_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    let decoded = urlencoding::decode(path)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| path.to_string());
    let unified = decoded.replace('\\', "/");

    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

fn parent_dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..idx].to_string(),
        None => String::new(),
    }
}

fn join_path(base_dir: &str, rel: &str) -> String {
    if base_dir.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", base_dir, rel)
    }
}

/// Resolve an href relative to a base directory into an archive-rooted
/// path plus optional fragment. An href that is only a fragment
/// (`#some-id`) resolves to the base document itself.
fn resolve_href(base_dir: &str, href: &str, self_path: &str) -> (String, Option<String>) {
    let (path_part, fragment) = match href.split_once('#') {
        Some((p, f)) => (p, Some(f.to_string())),
        None => (href, None),
    };
    let fragment = fragment.filter(|f| !f.is_empty());

    if path_part.is_empty() {
        return (normalize_zip_path(self_path), fragment);
    }
    (normalize_zip_path(&join_path(base_dir, path_part)), fragment)
}

/// Read a member, falling back to a scan over normalized names for
/// archives whose package documents record paths non-canonically
fn zip_read(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>> {
    let normalized = normalize_zip_path(path);

    let mut buf = Vec::new();
    if let Ok(mut file) = archive.by_name(&normalized) {
        file.read_to_end(&mut buf)
            .map_err(|e| Error::Structure(format!("Cannot read member '{}': {}", normalized, e)))?;
        return Ok(buf);
    }

    let fallback = archive
        .file_names()
        .find(|name| normalize_zip_path(name) == normalized)
        .map(|name| name.to_string());

    match fallback {
        Some(name) => {
            let mut file = archive.by_name(&name).map_err(|e| {
                Error::Structure(format!("Cannot read member '{}': {}", name, e))
            })?;
            file.read_to_end(&mut buf)
                .map_err(|e| Error::Structure(format!("Cannot read member '{}': {}", name, e)))?;
            Ok(buf)
        }
        None => Err(Error::Structure(format!(
            "Member '{}' not found in container",
            normalized
        ))),
    }
}

// ============================================================================
// Package document (container.xml + OPF)
// ============================================================================

/// Locate the OPF package document through `META-INF/container.xml`
fn find_opf_path(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<String> {
    let container_xml = zip_read(archive, CONTAINER_XML_PATH)
        .map_err(|_| Error::Structure("Missing META-INF/container.xml".to_string()))?;

    let mut reader = Reader::from_reader(container_xml.as_slice());
    reader.trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"rootfile" =>
            {
                if let Some(path) = attr_value(&e, b"full-path") {
                    return Ok(normalize_zip_path(&path));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Structure(format!("Invalid container.xml: {}", e)));
            }
        }
        buf.clear();
    }
    Err(Error::Structure(
        "container.xml declares no rootfile full-path".to_string(),
    ))
}

/// Manifest item as written in the OPF, href still OPF-relative
struct RawManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: String,
}

struct OpfDocument {
    items: Vec<RawManifestItem>,
    spine_idrefs: Vec<String>,
    /// The spine's `toc` attribute, naming the NCX manifest item (EPUB 2)
    spine_toc_id: Option<String>,
}

fn parse_opf(opf_bytes: &[u8]) -> Result<OpfDocument> {
    let mut reader = Reader::from_reader(opf_bytes);
    reader.trim_text(true);

    let mut items = Vec::new();
    let mut spine_idrefs = Vec::new();
    let mut spine_toc_id = None;
    let mut saw_manifest = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"manifest" => saw_manifest = true,
                b"item" => {
                    let id = attr_value(&e, b"id");
                    let href = attr_value(&e, b"href");
                    if let (Some(id), Some(href)) = (id, href) {
                        items.push(RawManifestItem {
                            id,
                            href,
                            media_type: attr_value(&e, b"media-type").unwrap_or_default(),
                            properties: attr_value(&e, b"properties").unwrap_or_default(),
                        });
                    }
                }
                b"spine" => {
                    spine_toc_id = attr_value(&e, b"toc");
                }
                b"itemref" => {
                    if let Some(idref) = attr_value(&e, b"idref") {
                        spine_idrefs.push(idref);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Structure(format!(
                    "Invalid package document: {}",
                    e
                )));
            }
        }
        buf.clear();
    }

    if !saw_manifest || items.is_empty() {
        return Err(Error::Structure(
            "Package document declares no manifest items".to_string(),
        ));
    }
    if spine_idrefs.is_empty() {
        return Err(Error::Structure(
            "Package document declares an empty spine".to_string(),
        ));
    }

    Ok(OpfDocument {
        items,
        spine_idrefs,
        spine_toc_id,
    })
}

fn attr_value(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

// ============================================================================
// Table of contents (EPUB 3 nav, EPUB 2 NCX fallback)
// ============================================================================

/// Extract the flattened TOC, preferring the EPUB 3 nav document
fn extract_toc(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    items: &[ManifestItem],
    by_id: &HashMap<&str, &ManifestItem>,
    spine_toc_id: Option<&str>,
) -> Result<Vec<TocEntry>> {
    // EPUB 3: manifest item with the "nav" property
    if let Some(nav_item) = items
        .iter()
        .find(|item| item.properties.split_whitespace().any(|p| p == "nav"))
    {
        let nav_path = nav_item.href.clone();
        match zip_read(archive, &nav_path).and_then(|bytes| parse_nav_document(&bytes, &nav_path))
        {
            Ok(entries) if !entries.is_empty() => {
                tracing::debug!(source = "nav", entries = entries.len(), "TOC extracted");
                return Ok(entries);
            }
            Ok(_) => {
                tracing::warn!("Nav document yielded no entries, trying NCX");
            }
            Err(e) => {
                tracing::warn!("Nav document unusable ({}), trying NCX", e);
            }
        }
    }

    // EPUB 2: NCX named by the spine's toc attribute, or found by media type
    let ncx_item = spine_toc_id
        .and_then(|id| by_id.get(id).copied())
        .or_else(|| items.iter().find(|item| item.media_type == NCX_MEDIA_TYPE));

    if let Some(ncx_item) = ncx_item {
        let ncx_path = ncx_item.href.clone();
        let bytes = zip_read(archive, &ncx_path)?;
        let entries = parse_ncx_document(&bytes, &ncx_path)?;
        if !entries.is_empty() {
            tracing::debug!(source = "ncx", entries = entries.len(), "TOC extracted");
            return Ok(entries);
        }
    }

    Ok(Vec::new())
}

/// Parse an EPUB 3 nav document's `<nav epub:type="toc">` element.
///
/// Nesting depth follows `<ol>` levels; each `<li>` contributes the text of
/// its first `<a>` and that anchor's href. Entries appear in document
/// order, which is the flattened reading order.
fn parse_nav_document(data: &[u8], nav_path: &str) -> Result<Vec<TocEntry>> {
    let base_dir = parent_dir(nav_path);
    let mut reader = Reader::from_reader(data);
    reader.check_end_names(false);

    let mut entries = Vec::new();
    let mut in_toc_nav = false;
    let mut nav_depth = 0usize;
    let mut ol_depth = 0usize;
    let mut current_href: Option<(String, Option<String>)> = None;
    let mut current_label = String::new();
    let mut in_anchor = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"nav" => {
                        nav_depth += 1;
                        if !in_toc_nav && nav_type_is_toc(&e) {
                            in_toc_nav = true;
                            nav_depth = 1;
                        }
                    }
                    b"ol" if in_toc_nav => ol_depth += 1,
                    b"a" if in_toc_nav && ol_depth > 0 && !in_anchor => {
                        in_anchor = true;
                        current_label.clear();
                        let href = attr_value(&e, b"href").unwrap_or_default();
                        current_href = Some(resolve_href(&base_dir, &href, nav_path));
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(t)) if in_anchor => {
                if let Ok(text) = t.unescape() {
                    if !current_label.is_empty() && !text.trim().is_empty() {
                        current_label.push(' ');
                    }
                    current_label.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"a" if in_anchor => {
                        in_anchor = false;
                        if let Some((href, anchor)) = current_href.take() {
                            entries.push(TocEntry {
                                label: current_label.trim().to_string(),
                                href,
                                anchor,
                                order: entries.len() + 1,
                                depth: ol_depth,
                            });
                        }
                    }
                    b"ol" if in_toc_nav && ol_depth > 0 => ol_depth -= 1,
                    b"nav" if in_toc_nav => {
                        nav_depth -= 1;
                        if nav_depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Structure(format!("Invalid nav document: {}", e)));
            }
        }
        buf.clear();
    }

    Ok(entries)
}

/// Whether a `<nav>` element's epub:type attribute marks it as the TOC
fn nav_type_is_toc(element: &BytesStart<'_>) -> bool {
    element
        .attributes()
        .flatten()
        .any(|attr| {
            attr.key.as_ref().ends_with(b"type")
                && String::from_utf8_lossy(&attr.value)
                    .split_whitespace()
                    .any(|t| t == "toc")
        })
}

/// Parse an EPUB 2 NCX document's navMap.
///
/// `navPoint` elements nest to express hierarchy; depth is the nesting
/// level and order is document order.
fn parse_ncx_document(data: &[u8], ncx_path: &str) -> Result<Vec<TocEntry>> {
    let base_dir = parent_dir(ncx_path);
    let mut reader = Reader::from_reader(data);
    reader.trim_text(true);

    let mut entries: Vec<TocEntry> = Vec::new();
    let mut depth = 0usize;
    let mut in_nav_label = false;
    let mut in_text = false;
    // Label/href for the navPoint at each open depth
    let mut pending: Vec<(String, Option<(String, Option<String>)>)> = Vec::new();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"navPoint" => {
                    depth += 1;
                    pending.push((String::new(), None));
                }
                b"navLabel" if depth > 0 => in_nav_label = true,
                b"text" if in_nav_label => in_text = true,
                b"content" if depth > 0 => {
                    if let (Some(src), Some(slot)) = (attr_value(&e, b"src"), pending.last_mut()) {
                        slot.1 = Some(resolve_href(&base_dir, &src, ncx_path));
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"content" && depth > 0 => {
                if let (Some(src), Some(slot)) = (attr_value(&e, b"src"), pending.last_mut()) {
                    slot.1 = Some(resolve_href(&base_dir, &src, ncx_path));
                }
                // Self-closing content produces no end event; emit here so
                // parents precede their children in document order
                flush_navpoint(&mut entries, &mut pending, depth);
            }
            Ok(Event::Text(t)) if in_text => {
                if let (Ok(text), Some(slot)) = (t.unescape(), pending.last_mut()) {
                    slot.0.push_str(text.trim());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"text" if in_text => in_text = false,
                b"navLabel" if in_nav_label => {
                    in_nav_label = false;
                    // Label and content are both direct children of
                    // navPoint; emit once both are available
                    flush_navpoint(&mut entries, &mut pending, depth);
                }
                b"content" if depth > 0 => {
                    flush_navpoint(&mut entries, &mut pending, depth);
                }
                b"navPoint" => {
                    flush_navpoint(&mut entries, &mut pending, depth);
                    pending.pop();
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(Error::Structure(format!("Invalid NCX document: {}", e)));
            }
        }
        buf.clear();
    }

    Ok(entries)
}

/// Emit the navPoint at the current depth once its label and href are both
/// known and it has not been emitted yet (label cleared after emission)
fn flush_navpoint(
    entries: &mut Vec<TocEntry>,
    pending: &mut [(String, Option<(String, Option<String>)>)],
    depth: usize,
) {
    if let Some((label, href)) = pending.last_mut() {
        if let (false, Some((path, anchor))) = (label.is_empty(), href.clone()) {
            entries.push(TocEntry {
                label: std::mem::take(label),
                href: path,
                anchor,
                order: entries.len() + 1,
                depth,
            });
            *href = None;
        }
    }
}

// ============================================================================
// Spine text statistics
// ============================================================================

/// Character counts for spine files that look like narrative content
fn collect_text_stats(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    spine: &[String],
) -> Result<Vec<FileTextStat>> {
    let mut stats = Vec::new();
    for href in spine {
        let lowered = href.to_ascii_lowercase();
        if EXCLUDE_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            continue;
        }
        let bytes = match zip_read(archive, href) {
            Ok(b) => b,
            // A spine file that cannot be read contributes no statistics;
            // the manifest invariant was already checked
            Err(_) => continue,
        };
        let text = extract_plain_text(&bytes);
        stats.push(FileTextStat {
            path: href.clone(),
            chars: text.chars().count(),
        });
    }
    Ok(stats)
}

/// Extract plain text from an XHTML document: scripts and styles removed,
/// tags stripped, entities decoded, whitespace collapsed
pub(crate) fn extract_plain_text(data: &[u8]) -> String {
    let mut reader = Reader::from_reader(data);
    reader.check_end_names(false);

    let mut out = String::new();
    let mut skip_depth = 0usize;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth += 1;
                }
            }
            Ok(Event::End(e)) => {
                if matches!(e.local_name().as_ref(), b"script" | b"style") {
                    skip_depth = skip_depth.saturating_sub(1);
                }
            }
            Ok(Event::Text(t)) if skip_depth == 0 => {
                if let Ok(text) = t.unescape() {
                    let trimmed = text.trim();
                    if !trimmed.is_empty() {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(trimmed);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            // Malformed markup past this point: keep what was extracted
            Err(_) => break,
        }
        buf.clear();
    }
    out
}
