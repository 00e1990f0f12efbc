//! Shared content-decoding heuristic for the blockfile and Simple Cache
//! backends: gzip is detected from the body's own magic, brotli/deflate
//! from a `content-encoding:` marker inside the associated metadata blob.

use std::io::Read;

use flate2::read::{DeflateDecoder, GzDecoder};

/// Decodes `body` using the gzip/brotli/deflate heuristic driven by `meta`
/// (the opaque HTTP response metadata blob). Returns the raw body
/// unmodified if no recognised encoding is detected, or if decompression
/// of a detected encoding fails.
pub fn decode_content(body: &[u8], meta: &[u8]) -> Vec<u8> {
    if body.len() >= 2 && body[0] == 0x1f && body[1] == 0x8b {
        let mut decoder = GzDecoder::new(body);
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
        return body.to_vec();
    }

    if contains(meta, b"content-encoding:br") {
        let mut out = Vec::new();
        let mut decoder = brotli::Decompressor::new(body, 4096);
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
        return body.to_vec();
    }

    if contains(meta, b"content-encoding:deflate") {
        let mut decoder = DeflateDecoder::new(body);
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() {
            return out;
        }
        return body.to_vec();
    }

    body.to_vec()
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_unrecognised_body() {
        let body = b"plain body bytes";
        assert_eq!(decode_content(body, b""), body.to_vec());
    }

    #[test]
    fn detects_gzip_magic() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decode_content(&compressed, b""), b"hello world".to_vec());
    }
}
