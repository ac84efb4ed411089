//! Count the elements of a category in model metadata, without loading it into memory.
//!
//! The object tree of a large model can be hundreds of megabytes of JSON. Instead of parsing it,
//! we scan the raw bytes for quoted string values mentioning the category, e.g.
//! `"name": "Basic Wall [12345]"`, keeping only a small carry-over buffer between chunks.

use anyhow::Error;
use futures::io::{AsyncRead, AsyncReadExt};
use regex::bytes::{Regex, RegexBuilder};

/// Size of the chunks read from the response body.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Bytes kept between chunks when a chunk contains no match, so that a value split across two
/// chunks is still counted.
const CARRY: usize = 512;

/// The terms to search for.
///
/// Plural category names also match their singular form, so `Walls` matches `Basic Wall`.
pub fn search_terms(category: &str) -> Vec<String> {
    let mut terms = vec![category.to_string()];
    if category.chars().count() > 2 {
        if let Some(singular) = category
            .strip_suffix('s')
            .or_else(|| category.strip_suffix('S'))
        {
            terms.push(singular.to_string());
        }
    }
    terms
}

/// Incremental matcher over a byte stream.
pub struct CategoryScanner {
    pattern: Regex,
    buffer: Vec<u8>,
    count: u64,
}

impl CategoryScanner {
    pub fn new(category: &str) -> Result<Self, Error> {
        let terms = search_terms(category)
            .iter()
            .map(|term| regex::escape(term))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r#":\s*"(?-u:[^"])*({terms})(?-u:[^"])*""#))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern,
            buffer: vec![],
            count: 0,
        })
    }

    /// Scan the next chunk of the stream.
    pub fn feed(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.extend_from_slice(chunk);

        let mut last_end = None;
        for m in self.pattern.find_iter(&self.buffer) {
            self.count += 1;
            last_end = Some(m.end());
        }
        let keep_from = match last_end {
            Some(end) => end,
            None => self.buffer.len().saturating_sub(CARRY),
        };
        self.buffer.drain(..keep_from);
    }

    /// The number of matches seen so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Count matches for `category` in everything read from `reader`.
pub async fn count_matches<R>(mut reader: R, category: &str) -> Result<u64, Error>
where
    R: AsyncRead + Unpin,
{
    let mut scanner = CategoryScanner::new(category)?;
    let mut chunk = vec![0; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        scanner.feed(&chunk[..n]);
    }
    Ok(scanner.count())
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::io::Cursor;

    #[test]
    fn test_search_terms() {
        assert_eq!(search_terms("Walls"), ["Walls", "Wall"]);
        assert_eq!(search_terms("DOORS"), ["DOORS", "DOOR"]);
        assert_eq!(search_terms("Glass"), ["Glass", "Glas"]);
        assert_eq!(search_terms("Roof"), ["Roof"]);
        // Too short to singularize.
        assert_eq!(search_terms("Ts"), ["Ts"]);
        // Length is counted in characters, not bytes.
        assert_eq!(search_terms("Ös"), ["Ös"]);
        assert_eq!(search_terms("Äxs"), ["Äxs", "Äx"]);
    }

    #[test]
    fn test_counts_string_values() {
        let mut scanner = CategoryScanner::new("Walls").unwrap();
        scanner.feed(
            br#"{"objects": [
                {"name": "Basic Wall [101]", "objectid": 1},
                {"name": "basic wall [102]", "objectid": 2},
                {"name": "Curtain Walls", "objectid": 3},
                {"name": "Single Door [5]", "objectid": 4},
                {"Wall": 12}
            ]}"#,
        );
        // Keys are not values, and numbers are not strings.
        assert_eq!(scanner.count(), 3);
    }

    #[test]
    fn test_special_characters_are_literal() {
        let mut scanner = CategoryScanner::new("Doors (Interior)").unwrap();
        scanner.feed(br#"{"a": "Doors (Interior) [1]", "b": "Doors Interior [2]"}"#);
        assert_eq!(scanner.count(), 1);
    }

    #[test]
    fn test_match_split_across_chunks() {
        let mut scanner = CategoryScanner::new("Windows").unwrap();
        scanner.feed(br#"{"name": "Fixed Win"#);
        assert_eq!(scanner.count(), 0);
        scanner.feed(br#"dow [7]"}"#);
        assert_eq!(scanner.count(), 1);
    }

    #[test]
    fn test_matches_are_not_counted_twice() {
        let mut scanner = CategoryScanner::new("Floor").unwrap();
        scanner.feed(br#"{"a": "Floor [1]", "b": "Fl"#);
        scanner.feed(br#"oor [2]"}"#);
        assert_eq!(scanner.count(), 2);
    }

    #[test]
    fn test_carry_is_bounded() {
        let mut scanner = CategoryScanner::new("Walls").unwrap();
        let noise = vec![b'x'; 10 * CARRY];
        scanner.feed(&noise);
        scanner.feed(&noise);
        assert_eq!(scanner.count(), 0);
        assert!(scanner.buffer.len() <= CARRY);
    }

    #[test]
    fn test_invalid_utf8() {
        let mut scanner = CategoryScanner::new("Walls").unwrap();
        scanner.feed(b": \"\xff\xfe Wall \xc0\"");
        assert_eq!(scanner.count(), 1);
    }

    #[async_std::test]
    async fn test_count_matches_large_stream() {
        let mut body = String::from(r#"{"data": {"objects": ["#);
        for i in 0..5000 {
            body.push_str(&format!(r#"{{"objectid": {i}, "name": "Basic Wall [{i}]"}},"#));
            body.push_str(&format!(r#"{{"objectid": {i}, "name": "Single Door [{i}]"}},"#));
        }
        body.push_str("]}}");
        assert!(body.len() > 4 * CHUNK_SIZE);

        let walls = count_matches(Cursor::new(body.as_bytes()), "Walls")
            .await
            .unwrap();
        assert_eq!(walls, 5000);
        let doors = count_matches(Cursor::new(body.as_bytes()), "door")
            .await
            .unwrap();
        assert_eq!(doors, 5000);
    }
}
