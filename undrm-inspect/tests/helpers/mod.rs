//! Shared fixtures: encrypted EPUB construction and a canned
//! chat-completions endpoint

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type HmacSha1 = Hmac<Sha1>;

/// Container format constants, matching the service's decryptor
const AES_256_IV_FILE: [u8; 16] = [
    0x2A, 0x22, 0x32, 0x62, 0x5C, 0x5F, 0x6F, 0x67, 0x75, 0x6D, 0x7B, 0x29, 0x2B, 0x2E, 0x78,
    0x69,
];
const HMAC_SHA1_KEY_FILE_V2: [u8; 64] = [
    0x3E, 0x40, 0x7A, 0x6C, 0x71, 0x38, 0x7D, 0x7C, 0x51, 0x70, 0x2C, 0x62, 0x53, 0x39, 0x5F,
    0x7E, 0x2B, 0x78, 0x57, 0x31, 0x26, 0x4E, 0x49, 0x71, 0x68, 0x29, 0x31, 0x36, 0x25, 0x3B,
    0x41, 0x74, 0x59, 0x3B, 0x73, 0x36, 0x30, 0x31, 0x78, 0x35, 0x7A, 0x6C, 0x23, 0x5F, 0x61,
    0x4C, 0x41, 0x7E, 0x60, 0x34, 0x4D, 0x2A, 0x71, 0x50, 0x3B, 0x44, 0x64, 0x2B, 0x3D, 0x37,
    0x26, 0x2C, 0x4A, 0x44,
];

pub const TEST_AES_KEY: [u8; 32] = [0x11; 32];

pub fn base64_key(key: &[u8; 32]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(key)
}

/// Encrypt one member in the native v2 layout
pub fn encrypt_member_v2(plain: &[u8], key32: &[u8; 32], hmac_front: usize) -> Vec<u8> {
    let ciphertext = Aes256CbcEnc::new(key32.into(), &AES_256_IV_FILE.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plain);

    let mut mac = HmacSha1::new_from_slice(&HMAC_SHA1_KEY_FILE_V2).unwrap();
    mac.update(&ciphertext);
    let digest = mac.finalize().into_bytes();

    let mut out = Vec::new();
    out.extend_from_slice(&(plain.len() as u32).to_le_bytes());
    out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    out.extend_from_slice(&(hmac_front as u32).to_le_bytes());
    out.extend_from_slice(&digest[..hmac_front]);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&digest[hmac_front..]);
    out
}

pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn chapter_html(i: usize) -> String {
    format!(
        "<html><body><p>Chapter {} begins here and carries on for a while.</p></body></html>",
        i
    )
}

const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container xmlns="urn:oasis:names:tc:opendocument:xmlns:container" version="1.0">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

fn opf(chapters: usize) -> String {
    let mut items = String::new();
    let mut itemrefs = String::new();
    for i in 1..=chapters {
        items.push_str(&format!(
            "<item id=\"ch{i}\" href=\"text/ch{i}.xhtml\" media-type=\"application/xhtml+xml\"/>\n"
        ));
        itemrefs.push_str(&format!("<itemref idref=\"ch{i}\"/>\n"));
    }
    format!(
        r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    {items}
  </manifest>
  <spine>
    {itemrefs}
  </spine>
</package>"#
    )
}

fn nav(chapters: usize) -> String {
    let mut lis = String::new();
    for i in 1..=chapters {
        lis.push_str(&format!(
            "<li><a href=\"text/ch{i}.xhtml\">Chapter {i}</a></li>\n"
        ));
    }
    format!(
        r#"<?xml version="1.0"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="toc"><ol>
    {lis}
  </ol></nav>
</body>
</html>"#
    )
}

fn encryption_xml(uris: &[String]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\"?>\
         <encryption xmlns:enc=\"http://www.w3.org/2001/04/xmlenc#\">",
    );
    for uri in uris {
        xml.push_str(&format!(
            "<enc:EncryptedData><enc:CipherData>\
             <enc:CipherReference URI=\"{}\"/>\
             </enc:CipherData></enc:EncryptedData>",
            uri
        ));
    }
    xml.push_str("</encryption>");
    xml
}

/// A well-formed encrypted EPUB with `chapters` chapters, each listed in
/// the nav TOC, chapter bodies encrypted with `key`
pub fn build_encrypted_epub(chapters: usize, key: &[u8; 32]) -> Vec<u8> {
    let opf_doc = opf(chapters);
    let nav_doc = nav(chapters);

    let mut chapter_bodies = Vec::new();
    let mut uris = Vec::new();
    for i in 1..=chapters {
        chapter_bodies.push(encrypt_member_v2(chapter_html(i).as_bytes(), key, 8));
        uris.push(format!("OEBPS/text/ch{}.xhtml", i));
    }
    let enc_xml = encryption_xml(&uris);

    let mut entries: Vec<(&str, &[u8])> = vec![
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("META-INF/encryption.xml", enc_xml.as_bytes()),
        ("OEBPS/content.opf", opf_doc.as_bytes()),
        ("OEBPS/nav.xhtml", nav_doc.as_bytes()),
    ];
    let names: Vec<String> = (1..=chapters)
        .map(|i| format!("OEBPS/text/ch{}.xhtml", i))
        .collect();
    for (name, body) in names.iter().zip(chapter_bodies.iter()) {
        entries.push((name.as_str(), body.as_slice()));
    }
    build_zip(&entries)
}

/// Same container, but with the package document replaced by garbage
pub fn build_encrypted_epub_with_broken_opf(key: &[u8; 32]) -> Vec<u8> {
    let nav_doc = nav(2);
    let ch1 = encrypt_member_v2(chapter_html(1).as_bytes(), key, 8);
    let enc_xml = encryption_xml(&["OEBPS/text/ch1.xhtml".to_string()]);
    build_zip(&[
        ("mimetype", b"application/epub+zip".as_slice()),
        ("META-INF/container.xml", CONTAINER_XML.as_bytes()),
        ("META-INF/encryption.xml", enc_xml.as_bytes()),
        ("OEBPS/content.opf", b"<package><manifest></broken".as_slice()),
        ("OEBPS/nav.xhtml", nav_doc.as_bytes()),
        ("OEBPS/text/ch1.xhtml", &ch1),
    ])
}

// ============================================================================
// Canned chat-completions endpoint
// ============================================================================

/// What the mock saw: one user prompt per completion request
pub type PromptLog = Arc<Mutex<Vec<serde_json::Value>>>;

#[derive(Clone)]
struct MockState {
    answers: Arc<Mutex<VecDeque<String>>>,
    prompts: PromptLog,
}

async fn completions(
    axum::extract::State(state): axum::extract::State<MockState>,
    axum::Json(body): axum::Json<serde_json::Value>,
) -> axum::Json<serde_json::Value> {
    let user_prompt = body["messages"][1]["content"]
        .as_str()
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or(serde_json::Value::Null);
    state.prompts.lock().unwrap().push(user_prompt);

    let content = state
        .answers
        .lock()
        .unwrap()
        .pop_front()
        .expect("mock inference endpoint ran out of canned answers");
    axum::Json(serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

/// Serve canned completion contents on an ephemeral port. Returns the base
/// URL and a log of the structured prompts received.
pub async fn spawn_inference_mock(answers: Vec<String>) -> (String, PromptLog) {
    let prompts: PromptLog = Arc::new(Mutex::new(Vec::new()));
    let state = MockState {
        answers: Arc::new(Mutex::new(answers.into())),
        prompts: prompts.clone(),
    };

    let app = axum::Router::new()
        .route("/v1/chat/completions", axum::routing::post(completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), prompts)
}

/// A canned answer naming `file` with the given confidence
pub fn answer_json(file: &str, confidence: f64) -> String {
    serde_json::json!({
        "file": file,
        "anchor": null,
        "confidence": confidence,
        "rationale": "First narrative chapter after front matter."
    })
    .to_string()
}
