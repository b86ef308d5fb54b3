use percent_encoding::{percent_decode_str, AsciiSet, CONTROLS};

/// Characters that must survive a round-trip through a `:`-joined storage
/// key. `%` itself is included so a previously-encoded segment can be
/// encoded again without colliding with a literal reserved character.
///
/// Built on top of `CONTROLS` rather than the crate's broad
/// `NON_ALPHANUMERIC`, because only this fixed list is reserved by the
/// key format.
const RESERVED: &AsciiSet = &CONTROLS
    .add(b'%')
    .add(b':')
    .add(b'.')
    .add(b'|')
    .add(b'$')
    .add(b'#')
    .add(b'&')
    .add(b'=')
    .add(b'+')
    .add(b' ');

/// Percent-encode a single path segment so it can be joined with `:`
/// without ambiguity. Because `percent_encoding::utf8_percent_encode`
/// scans the *input* once, `%` is implicitly "encoded first": a literal
/// `%` in `segment` becomes `%25` in the same pass that escapes every
/// other reserved character, so the output never contains a `%XX` run
/// that could be mistaken for a second encoding pass.
pub fn encode_segment(segment: &str) -> String {
    percent_encoding::utf8_percent_encode(segment, RESERVED).to_string()
}

/// Reverse [`encode_segment`]. A single percent-decoding pass is
/// sufficient and correct: every reserved byte - including `%` - was
/// escaped to a distinct `%XX` token, so there is no ordering ambiguity
/// on the way back.
pub fn decode_segment(segment: &str) -> Result<String, std::str::Utf8Error> {
    Ok(percent_decode_str(segment).decode_utf8()?.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_reserved_characters() {
        let cases = [
            "plain",
            "with space",
            "100%",
            "a:b",
            "a.b.c",
            "a|b$c#d&e=f+g",
            "%25 already encoded looking",
            "unicode: caf\u{e9} \u{1f600}",
        ];
        for case in cases {
            let encoded = encode_segment(case);
            assert_eq!(decode_segment(&encoded).unwrap(), case, "case = {case:?}");
        }
    }

    #[test]
    fn encodes_percent_first() {
        // A literal "%3A" (which looks like an encoded colon) must not be
        // mistaken for one: the `%` is escaped independently of the `3A`
        // that follows it.
        let encoded = encode_segment("%3A");
        assert_eq!(decode_segment(&encoded).unwrap(), "%3A");
        assert_eq!(encoded, "%253A");
    }

    #[test]
    fn whitespace_encodes_as_percent_twenty() {
        assert_eq!(encode_segment(" "), "%20");
    }

    #[test]
    fn leaves_non_reserved_bytes_alone() {
        assert_eq!(encode_segment("todos-42_v1"), "todos-42_v1");
    }
}
