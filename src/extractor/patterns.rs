//! Pattern catalogue for `ByPattern` strategies
//!
//! Each [`PatternKind`] owns a compiled regex, an optional validation step that
//! rejects lookalike matches, and a post-processing step that normalizes the
//! accepted value. Regexes are compiled once on first use.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::utils::string_utils::normalize_whitespace;

/// Kinds of values recognizable by pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Email,
    Phone,
    PhoneInternational,
    ZipCode,
    Education,
    BarAdmission,
    SocialMedia,
    Price,
    Date,
    Address,
}

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("Invalid email regex")
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[\s.-]?)?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b")
        .expect("Invalid phone regex")
});

static PHONE_INTERNATIONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+\d{1,3}(?:[\s.-]?\(?\d{1,4}\)?){2,5}").expect("Invalid international phone regex")
});

static ZIP_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").expect("Invalid zip code regex"));

static EDUCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:J\.D\.|JD|LL\.M\.|LLM|M\.B\.A\.|MBA|Ph\.D\.|PhD|B\.A\.|BA|B\.S\.|BS|M\.A\.|MA|M\.S\.|MS)[,\s]+[^\n]{0,100}?(?:University|College|School|Institute)(?:\s+of(?:\s+[A-Z][\w.&'-]*)+)?",
    )
    .expect("Invalid education regex")
});

static BAR_ADMISSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:Bar Admissions?|Admitted(?: to practice)?(?: in)?)[:\s]+([A-Z][A-Za-z.]*(?:(?:,\s*|\s+(?:and\s+)?(?:of\s+)?)[A-Z][A-Za-z.]*)*)",
    )
    .expect("Invalid bar admission regex")
});

static SOCIAL_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.)?(?:linkedin\.com/in|twitter\.com|x\.com|facebook\.com|instagram\.com|github\.com)/[A-Za-z0-9_.-]+/?",
    )
    .expect("Invalid social media regex")
});

static PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*\d+(?:,\d{3})*(?:\.\d{2})?").expect("Invalid price regex"));

static DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}|\d{1,2}/\d{1,2}/\d{2,4}|\d{4}-\d{2}-\d{2})\b",
    )
    .expect("Invalid date regex")
});

static ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b\d+\s+[A-Za-z0-9.\s]{2,60}?\b(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b\.?(?:,?\s*(?:Suite|Ste|Floor|Fl)\.?\s*\d+)?",
    )
    .expect("Invalid address regex")
});

/// Abbreviations applied to accepted addresses, whole words only
static ADDRESS_ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        ("Street", "St"),
        ("Avenue", "Ave"),
        ("Road", "Rd"),
        ("Boulevard", "Blvd"),
        ("Suite", "Ste"),
        ("Floor", "Fl"),
    ]
    .into_iter()
    .map(|(long, short)| {
        (
            Regex::new(&format!(r"\b{long}\b")).expect("Invalid address abbreviation regex"),
            short,
        )
    })
    .collect()
});

const DEGREE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("J.D.", "JD"),
    ("LL.M.", "LLM"),
    ("M.B.A.", "MBA"),
    ("Ph.D.", "PhD"),
    ("B.A.", "BA"),
    ("B.S.", "BS"),
    ("M.A.", "MA"),
    ("M.S.", "MS"),
];

impl PatternKind {
    fn regex(self) -> &'static Regex {
        match self {
            Self::Email => &EMAIL,
            Self::Phone => &PHONE,
            Self::PhoneInternational => &PHONE_INTERNATIONAL,
            Self::ZipCode => &ZIP_CODE,
            Self::Education => &EDUCATION,
            Self::BarAdmission => &BAR_ADMISSION,
            Self::SocialMedia => &SOCIAL_MEDIA,
            Self::Price => &PRICE,
            Self::Date => &DATE,
            Self::Address => &ADDRESS,
        }
    }

    /// First validated match in `text`, post-processed.
    ///
    /// Matches are considered in document order. When the pattern has capture
    /// groups, the non-empty groups are joined with a space.
    #[must_use]
    pub fn extract(self, text: &str) -> Option<String> {
        self.regex().captures_iter(text).find_map(|caps| {
            let groups: Vec<&str> = caps
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .collect();
            let raw = if groups.is_empty() {
                caps.get(0)?.as_str().trim().to_string()
            } else {
                groups.join(" ")
            };
            self.is_valid(&raw).then(|| self.post_process(&raw))
        })
    }

    fn is_valid(self, raw: &str) -> bool {
        match self {
            Self::Email => is_valid_email(raw),
            Self::PhoneInternational => (10..=15).contains(&digit_count(raw)),
            Self::ZipCode => matches!(digit_count(raw), 5 | 9),
            Self::Address => is_address_like(raw),
            Self::Phone => matches!(digit_count(raw), 10 | 11),
            _ => !raw.is_empty(),
        }
    }

    fn post_process(self, raw: &str) -> String {
        match self {
            Self::Phone => format_phone(raw),
            Self::Education => {
                let mut value = normalize_whitespace(raw);
                for (dotted, plain) in DEGREE_ABBREVIATIONS {
                    value = value.replace(dotted, plain);
                }
                value
            }
            Self::SocialMedia => {
                let trimmed = raw.trim_end_matches('/');
                if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
                    trimmed.to_string()
                } else {
                    format!("https://{trimmed}")
                }
            }
            Self::Price => raw
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect(),
            Self::Address => {
                let mut value = normalize_whitespace(raw);
                for (pattern, short) in ADDRESS_ABBREVIATIONS.iter() {
                    value = pattern.replace_all(&value, *short).into_owned();
                }
                value
            }
            Self::BarAdmission | Self::Date | Self::PhoneInternational => {
                normalize_whitespace(raw)
            }
            Self::Email | Self::ZipCode => raw.to_string(),
        }
    }
}

fn digit_count(s: &str) -> usize {
    s.chars().filter(char::is_ascii_digit).count()
}

fn is_valid_email(candidate: &str) -> bool {
    let mut parts = candidate.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !candidate.contains("..")
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !local.starts_with('.')
        && !local.ends_with('.')
}

/// Addresses need a house number and a street name
fn is_address_like(candidate: &str) -> bool {
    let digits = digit_count(candidate);
    let letters = candidate.chars().filter(|c| c.is_alphabetic()).count();
    digits >= 1 && letters >= 5
}

/// Group North American numbers as `(AAA) BBB-CCCC`
fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => {
            format!("+1 ({}) {}-{}", &digits[1..4], &digits[4..7], &digits[7..])
        }
        _ => raw.trim().to_string(),
    }
}
