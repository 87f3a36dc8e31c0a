//! URL query string helpers

use heapless::{String, Vec};

use crate::errors::QueryError;

/// Raw value of `key` in a `key=value&key=value` query
///
/// A key without `=` has an empty value. The first match wins.
pub fn query_value<'q>(query: &'q str, key: &str) -> Option<&'q str> {
    query
        .split('&')
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .find(|(k, _)| *k == key)
        .map(|(_, value)| value)
}

/// Copy the raw value of `key` into a fixed capacity string
pub fn query_key_value<const N: usize>(query: &str, key: &str) -> Result<String<N>, QueryError> {
    let value = query_value(query, key).ok_or(QueryError::NotFound)?;
    let mut out = String::new();
    out.push_str(value).map_err(|_| QueryError::TooLong)?;
    Ok(out)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` escapes and `+`
///
/// Malformed escapes are copied through unchanged.
pub fn percent_decode<const N: usize>(input: &str) -> Result<String<N>, QueryError> {
    let bytes = input.as_bytes();
    let mut out: Vec<u8, N> = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let decoded = match bytes[i] {
            b'%' => {
                match (
                    bytes.get(i + 1).copied().and_then(hex_value),
                    bytes.get(i + 2).copied().and_then(hex_value),
                ) {
                    (Some(high), Some(low)) => {
                        i += 2;
                        (high << 4) | low
                    }
                    _ => b'%',
                }
            }
            b'+' => b' ',
            other => other,
        };
        out.push(decoded).map_err(|_| QueryError::TooLong)?;
        i += 1;
    }
    String::from_utf8(out).map_err(|_| QueryError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_value_lookup() {
        let query = "query1=abc%20def&query2=x&flag";
        assert_eq!(query_value(query, "query1"), Some("abc%20def"));
        assert_eq!(query_value(query, "query2"), Some("x"));
        assert_eq!(query_value(query, "flag"), Some(""));
        assert_eq!(query_value(query, "query"), None);
    }

    #[test]
    fn test_query_key_value_capacity() {
        let value: String<16> = query_key_value("a=1&query1=abc", "query1").unwrap();
        assert_eq!(value.as_str(), "abc");
        assert_eq!(
            query_key_value::<2>("query1=abc", "query1"),
            Err(QueryError::TooLong)
        );
        assert_eq!(
            query_key_value::<16>("a=1", "query1"),
            Err(QueryError::NotFound)
        );
    }

    #[test]
    fn test_percent_decode() {
        let decoded: String<64> = percent_decode("abc%20def").unwrap();
        assert_eq!(decoded.as_str(), "abc def");
        let decoded: String<64> = percent_decode("America%2FLos_Angeles").unwrap();
        assert_eq!(decoded.as_str(), "America/Los_Angeles");
        let decoded: String<64> = percent_decode("a+b%2b").unwrap();
        assert_eq!(decoded.as_str(), "a b+");
        let decoded: String<64> = percent_decode("%C3%A9t%C3%A9").unwrap();
        assert_eq!(decoded.as_str(), "été");
    }

    #[test]
    fn test_percent_decode_malformed() {
        let decoded: String<64> = percent_decode("100%").unwrap();
        assert_eq!(decoded.as_str(), "100%");
        let decoded: String<64> = percent_decode("%zz%4").unwrap();
        assert_eq!(decoded.as_str(), "%zz%4");
        assert_eq!(percent_decode::<64>("%ff"), Err(QueryError::InvalidUtf8));
        assert_eq!(percent_decode::<3>("abcd"), Err(QueryError::TooLong));
    }
}
