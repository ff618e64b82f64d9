//! In-memory container decryption (native v2 format)
//!
//! The encrypted container is an EPUB (zip) whose `META-INF/encryption.xml`
//! lists the member URIs that carry native v2 encryption. Each encrypted
//! member is laid out as:
//!
//! ```text
//! [plain_len u32 LE][cipher_len u32 LE][hmac_front u32 LE]
//! [HMAC prefix, hmac_front bytes][ciphertext][HMAC suffix, 20-hmac_front bytes]
//! ```
//!
//! The 20-byte digest is HMAC-SHA1 over the ciphertext with a fixed key and
//! is compared in constant time. The ciphertext is AES-256-CBC with a fixed
//! IV and PKCS#7 padding; the plaintext is truncated to `plain_len`.
//!
//! Decryption is a pure transformation: nothing touches disk, the input is
//! not modified, and the caller owns the returned buffer's lifetime. Any
//! integrity or format mismatch (wrong key included) surfaces as
//! [`Error::Decryption`].

use std::io::{Cursor, Read, Write};

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha1::Sha1;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::models::{DecryptedContent, KeyMaterial};
use undrm_common::{Error, Result};

type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha1 = Hmac<Sha1>;

/// Fixed IV for AES-256-CBC member decryption
pub(crate) const AES_256_IV_FILE: [u8; 16] = [
    0x2A, 0x22, 0x32, 0x62, 0x5C, 0x5F, 0x6F, 0x67, 0x75, 0x6D, 0x7B, 0x29, 0x2B, 0x2E, 0x78,
    0x69,
];

/// Fixed key for HMAC-SHA1 member integrity verification
pub(crate) const HMAC_SHA1_KEY_FILE_V2: [u8; 64] = [
    0x3E, 0x40, 0x7A, 0x6C, 0x71, 0x38, 0x7D, 0x7C, 0x51, 0x70, 0x2C, 0x62, 0x53, 0x39, 0x5F,
    0x7E, 0x2B, 0x78, 0x57, 0x31, 0x26, 0x4E, 0x49, 0x71, 0x68, 0x29, 0x31, 0x36, 0x25, 0x3B,
    0x41, 0x74, 0x59, 0x3B, 0x73, 0x36, 0x30, 0x31, 0x78, 0x35, 0x7A, 0x6C, 0x23, 0x5F, 0x61,
    0x4C, 0x41, 0x7E, 0x60, 0x34, 0x4D, 0x2A, 0x71, 0x50, 0x3B, 0x44, 0x64, 0x2B, 0x3D, 0x37,
    0x26, 0x2C, 0x4A, 0x44,
];

const ENCRYPTION_XML_PATH: &str = "META-INF/encryption.xml";
const HMAC_LEN: usize = 20;

/// Decrypt an encrypted container into a plaintext container.
///
/// A container without `META-INF/encryption.xml` is passed through
/// unmodified. Otherwise every member named in it is decrypted; the
/// rebuilt archive stores members uncompressed and omits
/// `encryption.xml` itself.
pub fn decrypt_container(encrypted: &[u8], key: &KeyMaterial) -> Result<DecryptedContent> {
    let mut archive = ZipArchive::new(Cursor::new(encrypted))
        .map_err(|e| Error::Decryption(format!("Cannot open encrypted container: {}", e)))?;

    let encrypted_members = match read_member(&mut archive, ENCRYPTION_XML_PATH) {
        Some(xml) => parse_encryption_xml(&xml),
        None => {
            // No DRM metadata: treat the container as already plaintext
            tracing::debug!("Container carries no encryption.xml, passing through");
            return Ok(DecryptedContent::new(encrypted.to_vec()));
        }
    };

    let names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Stored);

    for name in names {
        if name == ENCRYPTION_XML_PATH {
            continue;
        }
        // Directory entries carry no content
        if name.ends_with('/') {
            writer
                .add_directory(name.trim_end_matches('/'), options)
                .map_err(|e| Error::Decryption(format!("Archive rebuild failed: {}", e)))?;
            continue;
        }

        let mut content = Vec::new();
        archive
            .by_name(&name)
            .and_then(|mut f| {
                f.read_to_end(&mut content)?;
                Ok(())
            })
            .map_err(|e| Error::Decryption(format!("Cannot read member '{}': {}", name, e)))?;

        if encrypted_members.iter().any(|m| m == &name) {
            content = decrypt_member_v2(&content, key.aes_key())
                .map_err(|e| Error::Decryption(format!("Member '{}': {}", name, e)))?;
        }

        writer
            .start_file(name.as_str(), options)
            .and_then(|_| writer.write_all(&content).map_err(Into::into))
            .map_err(|e| Error::Decryption(format!("Archive rebuild failed: {}", e)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| Error::Decryption(format!("Archive rebuild failed: {}", e)))?;
    Ok(DecryptedContent::new(cursor.into_inner()))
}

/// Read one archive member, or `None` if it does not exist
fn read_member(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    match archive.by_name(name) {
        Ok(mut file) => file.read_to_end(&mut buf).ok().map(|_| buf),
        Err(_) => None,
    }
}

/// Extract encrypted member URIs from `encryption.xml`
///
/// Looks for `EncryptedData/CipherData/CipherReference@URI` elements in the
/// xmlenc namespace; matching is by local name so namespace prefixes do not
/// matter. Unparsable XML yields an empty list, matching a container that
/// declares no encrypted members.
fn parse_encryption_xml(xml: &[u8]) -> Vec<String> {
    let mut reader = Reader::from_reader(xml);
    reader.trim_text(true);

    let mut uris = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"CipherReference" =>
            {
                for attr in e.attributes().flatten() {
                    if attr.key.local_name().as_ref() == b"URI" {
                        uris.push(String::from_utf8_lossy(&attr.value).into_owned());
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return Vec::new(),
        }
        buf.clear();
    }
    uris
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Decrypt a single native v2 member
fn decrypt_member_v2(data: &[u8], key32: &[u8; 32]) -> Result<Vec<u8>> {
    if data.len() < 32 {
        return Err(Error::Decryption("Encrypted member too short".to_string()));
    }

    let mut off = 0usize;
    let plain_len = read_u32_le(data, off) as usize;
    off += 4;
    let cipher_len = read_u32_le(data, off) as usize;
    off += 4;
    let hmac_front = read_u32_le(data, off) as usize;
    off += 4;

    if hmac_front == 0 || hmac_front > HMAC_LEN {
        return Err(Error::Decryption("Invalid HMAC split length".to_string()));
    }

    let expected_total = off + hmac_front + cipher_len + (HMAC_LEN - hmac_front);
    if expected_total > data.len() {
        return Err(Error::Decryption(
            "Encrypted member length mismatch".to_string(),
        ));
    }

    // The 20-byte digest is split around the ciphertext; reassemble it
    let mut digest = [0u8; HMAC_LEN];
    digest[..hmac_front].copy_from_slice(&data[off..off + hmac_front]);
    off += hmac_front;
    let ciphertext = &data[off..off + cipher_len];
    off += cipher_len;
    digest[hmac_front..].copy_from_slice(&data[off..off + HMAC_LEN - hmac_front]);

    // Constant-time integrity check before any decryption
    let mut mac = HmacSha1::new_from_slice(&HMAC_SHA1_KEY_FILE_V2)
        .map_err(|e| Error::Decryption(format!("HMAC init failed: {}", e)))?;
    mac.update(ciphertext);
    mac.verify_slice(&digest).map_err(|_| {
        Error::Decryption("HMAC verification failed: tampered data or wrong key".to_string())
    })?;

    let plain = Aes256CbcDec::new(key32.into(), &AES_256_IV_FILE.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::Decryption("AES decryption failed".to_string()))?;

    if plain.len() < plain_len {
        return Err(Error::Decryption(
            "Decrypted member shorter than declared length".to_string(),
        ));
    }

    Ok(plain[..plain_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    type Aes256CbcEnc = cbc::Encryptor<Aes256>;

    const TEST_KEY: [u8; 32] = [0x11; 32];

    /// Inverse of `decrypt_member_v2`, for fixtures
    fn encrypt_member_v2(plain: &[u8], key32: &[u8; 32], hmac_front: usize) -> Vec<u8> {
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

    fn key_material(key32: &[u8; 32]) -> KeyMaterial {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        KeyMaterial::from_base64(&STANDARD.encode(key32), None).unwrap()
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = FileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn encryption_xml(uris: &[&str]) -> Vec<u8> {
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
        xml.into_bytes()
    }

    #[test]
    fn member_round_trip() {
        let plain = b"The quick brown fox jumps over the lazy dog";
        for hmac_front in [1usize, 10, 20] {
            let enc = encrypt_member_v2(plain, &TEST_KEY, hmac_front);
            let dec = decrypt_member_v2(&enc, &TEST_KEY).unwrap();
            assert_eq!(dec, plain);
        }
    }

    #[test]
    fn member_rejects_wrong_key() {
        let plain = b"secret chapter";
        let enc = encrypt_member_v2(plain, &TEST_KEY, 8);
        // HMAC is keyed by a fixed key, so a wrong AES key passes the
        // integrity check; it must then fail padding validation or at
        // worst produce garbage, never the original plaintext
        let wrong_key = [0x22u8; 32];
        match decrypt_member_v2(&enc, &wrong_key) {
            Err(_) => {}
            Ok(out) => assert_ne!(out, plain),
        }
    }

    #[test]
    fn member_rejects_tampered_ciphertext() {
        let mut enc = encrypt_member_v2(b"secret chapter", &TEST_KEY, 8);
        let mid = enc.len() / 2;
        enc[mid] ^= 0xFF;
        let err = decrypt_member_v2(&enc, &TEST_KEY).unwrap_err();
        assert!(err.to_string().contains("HMAC"));
    }

    #[test]
    fn member_rejects_truncated_data() {
        assert!(decrypt_member_v2(&[0u8; 16], &TEST_KEY).is_err());
    }

    #[test]
    fn container_without_encryption_xml_passes_through() {
        let zip = build_zip(&[("mimetype", b"application/epub+zip")]);
        let out = decrypt_container(&zip, &key_material(&TEST_KEY)).unwrap();
        assert_eq!(out.as_bytes(), zip.as_slice());
    }

    #[test]
    fn container_decrypts_listed_members_and_drops_encryption_xml() {
        let chapter = b"<html><body>Chapter One</body></html>";
        let enc_chapter = encrypt_member_v2(chapter, &TEST_KEY, 12);
        let zip = build_zip(&[
            ("mimetype", b"application/epub+zip".as_slice()),
            ("META-INF/encryption.xml", &encryption_xml(&["OEBPS/ch1.xhtml"])),
            ("OEBPS/ch1.xhtml", &enc_chapter),
            ("OEBPS/style.css", b"body {}".as_slice()),
        ]);

        let out = decrypt_container(&zip, &key_material(&TEST_KEY)).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(out.as_bytes())).unwrap();

        assert!(archive.by_name("META-INF/encryption.xml").is_err());

        let mut decrypted = Vec::new();
        archive
            .by_name("OEBPS/ch1.xhtml")
            .unwrap()
            .read_to_end(&mut decrypted)
            .unwrap();
        assert_eq!(decrypted, chapter);

        let mut css = Vec::new();
        archive
            .by_name("OEBPS/style.css")
            .unwrap()
            .read_to_end(&mut css)
            .unwrap();
        assert_eq!(css, b"body {}");
    }

    #[test]
    fn container_fails_on_wrong_key() {
        let enc_chapter = encrypt_member_v2(b"content", &TEST_KEY, 4);
        let zip = build_zip(&[
            ("META-INF/encryption.xml", &encryption_xml(&["ch1.xhtml"])),
            ("ch1.xhtml", &enc_chapter),
        ]);

        let wrong = key_material(&[0x99u8; 32]);
        let err = decrypt_container(&zip, &wrong).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn non_zip_input_is_a_decryption_error() {
        let err = decrypt_container(b"not a zip", &key_material(&TEST_KEY)).unwrap_err();
        assert!(matches!(err, Error::Decryption(_)));
    }

    #[test]
    fn parse_encryption_xml_extracts_uris() {
        let xml = encryption_xml(&["OEBPS/a.xhtml", "OEBPS/b.xhtml"]);
        let uris = parse_encryption_xml(&xml);
        assert_eq!(uris, vec!["OEBPS/a.xhtml", "OEBPS/b.xhtml"]);
    }

    #[test]
    fn parse_encryption_xml_tolerates_garbage() {
        assert!(parse_encryption_xml(b"<<<not xml").is_empty());
    }
}
