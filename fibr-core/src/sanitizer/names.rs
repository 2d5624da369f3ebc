use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Letters without a canonical decomposition, spelled out in ASCII.
const TRANSLITERATIONS: &[(char, &str)] = &[
    ('æ', "ae"),
    ('ð', "d"),
    ('ł', "l"),
    ('ø', "oe"),
    ('œ', "oe"),
    ('ß', "ss"),
    ('þ', "th"),
];

static QUOTES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["'`]"#).expect("quotes regex should compile"));
static SPECIALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9.\-_/]").expect("specials regex should compile"));
static DOTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{2,}").expect("dots regex should compile"));
static UNDERSCORES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_{2,}").expect("underscores regex should compile"));

/// Normalized form of a single entry name: lower-case ASCII letters, digits,
/// `.`, `-` and `_` only.
pub fn sanitize_name(name: &str) -> String {
    let lowered = name.to_lowercase();

    let mut transliterated = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match TRANSLITERATIONS.iter().find(|(from, _)| *from == ch) {
            Some((_, to)) => transliterated.push_str(to),
            None => transliterated.push(ch),
        }
    }

    let stripped: String = transliterated
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .nfc()
        .collect();

    let spaced = stripped.replace([' ', '/'], "_");
    let unquoted = QUOTES.replace_all(&spaced, "_");
    let plain = SPECIALS.replace_all(&unquoted, "");
    let undotted = DOTS.replace_all(&plain, "_");
    UNDERSCORES.replace_all(&undotted, "_").into_owned()
}
