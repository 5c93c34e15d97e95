//! ToUnicode CMap parsing for composite fonts
//!
//! Type0 fonts show text as 2-byte CIDs; their ToUnicode CMap is the only
//! reliable way back to readable heading text.

use flate2::read::ZlibDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::iter::Peekable;
use std::str::Chars;

/// A parsed ToUnicode CMap mapping CIDs to Unicode strings
#[derive(Debug, Default, Clone)]
pub struct ToUnicodeCMap {
    /// Direct mappings from `bfchar` sections and array-form `bfrange` entries
    pub char_map: HashMap<u16, String>,
    /// Incrementing `bfrange` entries: (start_cid, end_cid, base_codepoint)
    pub ranges: Vec<(u16, u16, u32)>,
}

impl ToUnicodeCMap {
    /// Parse a ToUnicode CMap from its decompressed content
    ///
    /// Returns `None` when the content holds no mappings at all.
    pub fn parse(content: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(content);
        let mut cmap = ToUnicodeCMap::default();

        for section in sections(&text, "beginbfchar", "endbfchar") {
            cmap.parse_bfchar_section(section);
        }
        for section in sections(&text, "beginbfrange", "endbfrange") {
            cmap.parse_bfrange_section(section);
        }

        if cmap.char_map.is_empty() && cmap.ranges.is_empty() {
            None
        } else {
            Some(cmap)
        }
    }

    /// `<src> <dst>` pairs
    fn parse_bfchar_section(&mut self, section: &str) {
        let mut chars = section.chars().peekable();
        while let (Some(src), Some(dst)) = (next_hex_token(&mut chars), next_hex_token(&mut chars))
        {
            if let (Some(src), Some(dst)) = (parse_hex_u16(&src), hex_to_unicode_string(&dst)) {
                self.char_map.insert(src, dst);
            }
        }
    }

    /// `<start> <end> <base>` or `<start> <end> [<dst> <dst> ...]` triplets
    fn parse_bfrange_section(&mut self, section: &str) {
        let mut chars = section.chars().peekable();
        loop {
            let (Some(start), Some(end)) = (next_hex_token(&mut chars), next_hex_token(&mut chars))
            else {
                break;
            };
            let (Some(start), Some(end)) = (parse_hex_u16(&start), parse_hex_u16(&end)) else {
                break;
            };

            skip_whitespace(&mut chars);
            match chars.peek() {
                Some('<') => {
                    let Some(dst) = next_hex_token(&mut chars) else {
                        break;
                    };
                    let units = hex_to_utf16_units(&dst);
                    if units.len() > 1 {
                        self.insert_multi_unit_range(start, end, units);
                    } else if let Some(base) = parse_hex_u32(&dst) {
                        self.ranges.push((start, end, base));
                    }
                }
                Some('[') => {
                    chars.next();
                    let mut cid = start;
                    while cid <= end {
                        skip_whitespace(&mut chars);
                        if chars.peek() != Some(&'<') {
                            break;
                        }
                        if let Some(dst) = next_hex_token(&mut chars)
                            .as_deref()
                            .and_then(hex_to_unicode_string)
                        {
                            self.char_map.insert(cid, dst);
                        }
                        match cid.checked_add(1) {
                            Some(next) => cid = next,
                            None => break,
                        }
                    }
                    // Consume through the closing bracket
                    for c in chars.by_ref() {
                        if c == ']' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Ranges with multi-unit destinations (ligatures, surrogate pairs)
    /// increment the last code unit for each successive CID
    fn insert_multi_unit_range(&mut self, start: u16, end: u16, units: Vec<u16>) {
        let Some((&last, head)) = units.split_last() else {
            return;
        };
        for (offset, cid) in (start..=end).enumerate() {
            let Some(last) = u16::try_from(offset)
                .ok()
                .and_then(|offset| last.checked_add(offset))
            else {
                break;
            };
            let mut dst = head.to_vec();
            dst.push(last);
            let text: String = char::decode_utf16(dst).filter_map(Result::ok).collect();
            if !text.is_empty() {
                self.char_map.insert(cid, text);
            }
        }
    }

    /// Look up a CID and return the Unicode string
    pub fn lookup(&self, cid: u16) -> Option<String> {
        if let Some(s) = self.char_map.get(&cid) {
            return Some(s.clone());
        }

        self.ranges
            .iter()
            .find(|&&(start, end, _)| cid >= start && cid <= end)
            .and_then(|&(start, _, base)| base.checked_add((cid - start) as u32))
            .and_then(char::from_u32)
            .map(|c| c.to_string())
    }

    /// Decode a byte slice of CIDs (2 bytes each, big-endian) to a Unicode string
    pub fn decode_cids(&self, bytes: &[u8]) -> String {
        bytes
            .chunks_exact(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .filter_map(|cid| {
                self.lookup(cid)
                    .or_else(|| char::from_u32(cid as u32).map(|c| c.to_string()))
            })
            .collect()
    }
}

/// Bodies between each `begin` and its following `end` marker
fn sections<'a>(text: &'a str, begin: &'a str, end: &'a str) -> impl Iterator<Item = &'a str> {
    let mut pos = 0;
    std::iter::from_fn(move || {
        let start = pos + text[pos..].find(begin)? + begin.len();
        let stop = start + text[start..].find(end)?;
        pos = stop + end.len();
        Some(&text[start..stop])
    })
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

/// Read the next `<hex>` token, or `None` if the next token is not one
fn next_hex_token(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    skip_whitespace(chars);
    if chars.peek() != Some(&'<') {
        return None;
    }
    chars.next();

    let mut hex = String::new();
    for c in chars.by_ref() {
        if c == '>' {
            return Some(hex);
        }
        if !c.is_whitespace() {
            hex.push(c);
        }
    }
    None
}

fn parse_hex_u16(hex: &str) -> Option<u16> {
    u16::from_str_radix(hex.trim(), 16).ok()
}

fn parse_hex_u32(hex: &str) -> Option<u32> {
    u32::from_str_radix(hex.trim(), 16).ok()
}

/// Split UTF-16BE hex (4 digits per code unit) into code units
fn hex_to_utf16_units(hex: &str) -> Vec<u16> {
    hex.trim()
        .as_bytes()
        .chunks_exact(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .filter_map(|digits| u16::from_str_radix(digits, 16).ok())
        .collect()
}

/// Convert UTF-16BE hex to a string
fn hex_to_unicode_string(hex: &str) -> Option<String> {
    let result: String = char::decode_utf16(hex_to_utf16_units(hex))
        .filter_map(Result::ok)
        .collect();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

/// Extract a stream from raw PDF bytes by object number
///
/// Used when lopdf cannot load a ToUnicode stream, which happens with some
/// linearized files.
pub fn extract_stream_from_raw_pdf(pdf_bytes: &[u8], obj_num: u32) -> Option<Vec<u8>> {
    let pattern = format!("{} 0 obj", obj_num);
    let obj_start = find_object_header(pdf_bytes, pattern.as_bytes())?;

    let search_start = obj_start + pattern.len();
    let stream_start = search_start + find_pattern(&pdf_bytes[search_start..], b"stream")? + 6;

    let mut content_start = stream_start;
    if pdf_bytes.get(content_start) == Some(&b'\r') {
        content_start += 1;
    }
    if pdf_bytes.get(content_start) == Some(&b'\n') {
        content_start += 1;
    }

    // Strip the single EOL marker before "endstream"
    let mut content_end = content_start + find_pattern(&pdf_bytes[content_start..], b"endstream")?;
    if content_end > content_start && pdf_bytes[content_end - 1] == b'\n' {
        content_end -= 1;
    }
    if content_end > content_start && pdf_bytes[content_end - 1] == b'\r' {
        content_end -= 1;
    }
    let stream_data = &pdf_bytes[content_start..content_end];

    let dict_region = &pdf_bytes[obj_start..stream_start];
    if find_pattern(dict_region, b"FlateDecode").is_none() {
        return Some(stream_data.to_vec());
    }

    let mut decompressed = Vec::new();
    match ZlibDecoder::new(stream_data).read_to_end(&mut decompressed) {
        Ok(_) => Some(decompressed),
        Err(_) => Some(stream_data.to_vec()),
    }
}

/// Find `N 0 obj` where N is not the tail of a longer object number
fn find_object_header(pdf_bytes: &[u8], header: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = find_pattern(&pdf_bytes[from..], header) {
        let at = from + pos;
        if at == 0 || pdf_bytes[at - 1].is_ascii_whitespace() || pdf_bytes[at - 1] == b'\0' {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    const CMAP: &str = r#"
/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
1 begincodespacerange
<0000><FFFF>
endcodespacerange
3 beginbfchar
<0003> <0020>
<0024> <0041>
<0025> <0042>
endbfchar
2 beginbfrange
<0030> <0039> <0030>
<0050> <0051> [<0052> <0053>]
endbfrange
endcmap
"#;

    #[test]
    fn test_parse_bfchar_and_ranges() {
        let cmap = ToUnicodeCMap::parse(CMAP.as_bytes()).unwrap();

        assert_eq!(cmap.lookup(0x0003), Some(" ".to_string()));
        assert_eq!(cmap.lookup(0x0024), Some("A".to_string()));
        assert_eq!(cmap.lookup(0x0035), Some("5".to_string()));
        assert_eq!(cmap.lookup(0x0050), Some("R".to_string()));
        assert_eq!(cmap.lookup(0x0051), Some("S".to_string()));
        assert_eq!(cmap.lookup(0x0100), None);
    }

    #[test]
    fn test_decode_cids() {
        let cmap = ToUnicodeCMap::parse(CMAP.as_bytes()).unwrap();
        // "AB 1" in CID encoding
        let cids = [0x00, 0x24, 0x00, 0x25, 0x00, 0x03, 0x00, 0x31];
        assert_eq!(cmap.decode_cids(&cids), "AB 1");
    }

    #[test]
    fn test_parse_empty_returns_none() {
        assert!(ToUnicodeCMap::parse(b"begincmap endcmap").is_none());
    }

    #[test]
    fn test_surrogate_pair_destination() {
        let cmap = ToUnicodeCMap::parse(b"1 beginbfchar\n<0001> <D835DC00>\nendbfchar").unwrap();
        assert_eq!(cmap.lookup(1), Some("\u{1D400}".to_string()));
    }

    #[test]
    fn test_extract_stream_from_raw_pdf_flate() {
        let body = b"1 beginbfchar <0001> <0041> endbfchar";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut pdf = b"%PDF-1.4\n7 0 obj\n<< /Filter /FlateDecode >>\nstream\n".to_vec();
        pdf.extend_from_slice(&compressed);
        pdf.extend_from_slice(b"\r\nendstream\nendobj\n");

        let stream = extract_stream_from_raw_pdf(&pdf, 7).unwrap();
        assert_eq!(stream, body);
        assert!(extract_stream_from_raw_pdf(&pdf, 8).is_none());
    }

    #[test]
    fn test_raw_stream_lookup_skips_longer_object_numbers() {
        let pdf = b"%PDF-1.4\n17 0 obj\n<< /Length 5 >>\nstream\nWRONG\nendstream\nendobj\n\
7 0 obj\n<< /Length 5 >>\nstream\nRIGHT\nendstream\nendobj\n";

        assert_eq!(extract_stream_from_raw_pdf(pdf, 7).unwrap(), b"RIGHT");
        assert_eq!(extract_stream_from_raw_pdf(pdf, 17).unwrap(), b"WRONG");
    }

    #[test]
    fn test_range_near_codepoint_limit_does_not_overflow() {
        let cmap =
            ToUnicodeCMap::parse(b"1 beginbfrange\n<0000> <0005> <FFFFFFFF>\nendbfrange").unwrap();
        assert_eq!(cmap.lookup(1), None);
        assert_eq!(cmap.decode_cids(&[0x00, 0x01, 0x00, 0x41]), "\u{1}A");

        let cmap = ToUnicodeCMap {
            char_map: HashMap::new(),
            ranges: vec![(0x0000, 0x0005, u32::MAX)],
        };
        assert_eq!(cmap.lookup(0), None);
        assert_eq!(cmap.lookup(5), None);
    }

    #[test]
    fn test_range_with_multi_unit_destination() {
        let cmap = ToUnicodeCMap::parse(
            b"2 beginbfrange\n<0010> <0011> <00660069>\n<0020> <0021> <D835DC00>\nendbfrange",
        )
        .unwrap();
        assert_eq!(cmap.lookup(0x10), Some("fi".to_string()));
        assert_eq!(cmap.lookup(0x11), Some("fj".to_string()));
        assert_eq!(cmap.lookup(0x20), Some("\u{1D400}".to_string()));
        assert_eq!(cmap.lookup(0x21), Some("\u{1D401}".to_string()));
        assert!(cmap.ranges.is_empty());
    }
}
