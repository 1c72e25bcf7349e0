use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_STEM_CHARS: usize = 150;

pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n'], "");
    let name = WS_RE.replace_all(&name, " ");
    let name = name.replace(" | ", "｜");

    let name = name.trim_end_matches([' ', '-', '.', ';']);

    let forbidden: &[(char, char)] = &[
        ('<', '＜'),
        ('>', '＞'),
        (':', '꞉'),
        ('"', '＂'),
        ('/', '⧸'),
        ('\\', '＼'),
        ('|', '｜'),
        ('?', '？'),
        ('*', ' '),
    ];

    let mut result = name.to_string();
    for (from, to) in forbidden {
        result = result.replace(*from, &to.to_string());
    }

    result.trim().to_string()
}

/// `NNN_<title>.<ext>`, the name a catalog lesson is saved under.
pub fn lesson_file_name(index: usize, title: &str, ext: &str) -> String {
    let stem = media_stem(title);
    format!("{:03}_{}.{}", index, stem, ext)
}

/// One part of a playlist lesson: `NNN_Title_partN.ext`.
pub fn lesson_part_file_name(index: usize, title: &str, part: usize, ext: &str) -> String {
    format!("{:03}_{}_part{}.{}", index, media_stem(title), part, ext)
}

/// A safe file stem for a free-form title, capped in length.
pub fn media_stem(title: &str) -> String {
    let cleaned = sanitize_filename::sanitize(sanitize_path_component(title));
    let stem: String = cleaned.chars().take(MAX_STEM_CHARS).collect();
    let stem = stem.trim().to_string();
    if stem.is_empty() {
        "lesson".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_basic_forbidden_chars() {
        assert_eq!(sanitize_path_component("a:b?c"), "a꞉b？c");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_path_component("hello   world"), "hello world");
    }

    #[test]
    fn sanitize_trims_trailing_punctuation() {
        assert_eq!(sanitize_path_component("file name - "), "file name");
    }

    #[test]
    fn sanitize_unicode_nfc_normalization() {
        let decomposed = "e\u{0301}";
        let result = sanitize_path_component(decomposed);
        assert_eq!(result, "\u{00e9}");
    }

    #[test]
    fn sanitize_windows_forbidden_paths() {
        let chars = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
        for c in chars {
            let input = format!("test{}file", c);
            let result = sanitize_path_component(&input);
            assert!(!result.contains(c), "char '{}' should be replaced", c);
        }
    }

    #[test]
    fn lesson_name_is_zero_padded() {
        assert_eq!(lesson_file_name(7, "Clock Game", "mp4"), "007_Clock Game.mp4");
    }

    #[test]
    fn lesson_name_with_path_separators() {
        let name = lesson_file_name(12, "Kata 1/2: \"Heian\"", "mp4");
        assert!(name.starts_with("012_"));
        assert!(!name.contains('/'));
        assert!(!name.contains('"'));
        assert!(name.ends_with(".mp4"));
    }

    #[test]
    fn part_name_keeps_lesson_prefix() {
        assert_eq!(
            lesson_part_file_name(3, "Kata: Heian", 2, "mp4"),
            "003_Kata꞉ Heian_part2.mp4"
        );
    }

    #[test]
    fn empty_title_falls_back() {
        assert_eq!(lesson_file_name(1, "  ", "mp4"), "001_lesson.mp4");
    }

    #[test]
    fn long_title_is_capped() {
        let stem = media_stem(&"a".repeat(400));
        assert_eq!(stem.chars().count(), MAX_STEM_CHARS);
    }
}
