pub const FALLBACK_FILENAME: &str = "video";
pub const MAX_FILENAME_CHARS: usize = 100;

/// Turns an arbitrary media title into an ASCII fragment that is safe both as
/// a path component and inside a quoted `Content-Disposition` value.
pub fn sanitize_filename(raw: Option<&str>) -> String {
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return FALLBACK_FILENAME.to_string();
    };

    let replaced = raw
        .chars()
        .filter(char::is_ascii)
        .map(|character| {
            if is_reserved(character) {
                '_'
            } else {
                character
            }
        })
        .collect::<String>();

    let sanitized = replaced
        .trim_matches(|character| matches!(character, ' ' | '.'))
        .replace('"', "'")
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect::<String>();

    if sanitized.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        sanitized
    }
}

fn is_reserved(character: char) -> bool {
    matches!(
        character,
        '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'
    ) || character.is_ascii_control()
}

/// `attachment; filename="<safe>.<ext>"`, plus an RFC 6266 `filename*` carrying
/// the title whenever sanitizing had to change it. Both parts are capped at
/// [`MAX_FILENAME_CHARS`] characters.
pub fn build_content_disposition(raw_title: Option<&str>, extension: &str) -> String {
    let safe = sanitize_filename(raw_title);
    let mut header = format!("attachment; filename=\"{safe}.{extension}\"");

    let title = raw_title
        .unwrap_or_default()
        .chars()
        .filter(|character| !character.is_control())
        .collect::<String>();
    let title = title
        .trim()
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect::<String>();

    if !title.is_empty() && title != safe {
        header.push_str(&format!(
            "; filename*=UTF-8''{}.{extension}",
            urlencoding::encode(&title)
        ));
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, "video")]
    #[case(Some(""), "video")]
    #[case(Some("   "), "video")]
    #[case(Some("..."), "video")]
    #[case(Some("😀😀"), "video")]
    #[case(Some("Plain title"), "Plain title")]
    #[case(Some("My Video 😀 <Test>:\"x\""), "My Video  _Test___x_")]
    #[case(Some("a/b\\c|d?e*f"), "a_b_c_d_e_f")]
    #[case(Some(" .hidden. "), "hidden")]
    #[case(Some("tab\there\nnewline"), "tab_here_newline")]
    #[case(Some("Caf\u{e9} cr\u{e8}me"), "Caf crme")]
    #[case(Some("it's fine"), "it's fine")]
    fn test_sanitize_filename(#[case] input: Option<&str>, #[case] expected: &str) {
        assert_eq!(sanitize_filename(input), expected);
    }

    #[test]
    fn test_sanitize_truncates_to_limit() {
        let long = "x".repeat(250);
        let sanitized = sanitize_filename(Some(&long));
        assert_eq!(sanitized.len(), MAX_FILENAME_CHARS);
    }

    #[test]
    fn test_sanitize_truncates_after_stripping() {
        let input = format!("...{}", "é".repeat(10) + &"a".repeat(150));
        let sanitized = sanitize_filename(Some(&input));
        assert_eq!(sanitized, "a".repeat(MAX_FILENAME_CHARS));
    }

    #[test]
    fn test_sanitize_never_emits_reserved_characters() {
        let mut inputs = vec![
            String::from("\u{0}\u{1f}\u{7f}"),
            String::from("<<>>::\"\"//\\\\||??**"),
            String::from(". . . <> . . ."),
            "\"quoted\" ".repeat(40),
        ];
        inputs.extend((0u8..=127).map(|byte| char::from(byte).to_string().repeat(3)));
        inputs.push((0u8..=127).map(char::from).collect());

        for input in inputs {
            let sanitized = sanitize_filename(Some(&input));
            assert!(!sanitized.is_empty(), "{input:?}");
            assert!(sanitized.chars().count() <= MAX_FILENAME_CHARS, "{input:?}");
            assert!(
                sanitized.chars().all(|c| c.is_ascii() && !is_reserved(c)),
                "{input:?} -> {sanitized:?}"
            );
            assert!(axum::http::HeaderValue::from_str(&sanitized).is_ok());
        }
    }

    #[test]
    fn test_content_disposition_plain_title() {
        assert_eq!(
            build_content_disposition(Some("Holiday"), "mp4"),
            "attachment; filename=\"Holiday.mp4\""
        );
    }

    #[test]
    fn test_content_disposition_missing_title() {
        assert_eq!(
            build_content_disposition(None, "mp4"),
            "attachment; filename=\"video.mp4\""
        );
    }

    #[test]
    fn test_content_disposition_keeps_original_title() {
        let header = build_content_disposition(Some("Café <live>"), "mp4");
        assert_eq!(
            header,
            "attachment; filename=\"Caf _live_.mp4\"; filename*=UTF-8''Caf%C3%A9%20%3Clive%3E.mp4"
        );
        assert!(axum::http::HeaderValue::from_str(&header).is_ok());
    }

    #[test]
    fn test_content_disposition_bounded_for_long_titles() {
        let title = "\u{1F600}".repeat(2000);
        let header = build_content_disposition(Some(&title), "mp4");

        let capped = "\u{1F600}".repeat(MAX_FILENAME_CHARS);
        assert_eq!(
            header,
            format!(
                "attachment; filename=\"video.mp4\"; filename*=UTF-8''{}.mp4",
                urlencoding::encode(&capped)
            )
        );
        assert!(header.len() < 2 * 1024, "{}", header.len());
        assert!(axum::http::HeaderValue::from_str(&header).is_ok());
    }

    #[test]
    fn test_content_disposition_drops_control_characters() {
        let header = build_content_disposition(Some("Caf\u{e9}\r\nSet-Cookie: x"), "mp4");
        assert_eq!(
            header,
            "attachment; filename=\"Caf__Set-Cookie_ x.mp4\"; \
             filename*=UTF-8''Caf%C3%A9Set-Cookie%3A%20x.mp4"
        );
    }
}
