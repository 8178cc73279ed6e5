//! Gender inference from free-text customer names.
//!
//! A layered classifier evaluated in fixed order, short-circuiting at
//! the first match: titles, then patronymic particles, then a curated
//! name dictionary, then a small pattern fallback. Titles and
//! particles are near-certain signals and run before the noisier
//! layers; with no signal at all the result is `Unknown`.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Unknown,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// "dr" and "prof" are deliberately absent: they carry no gender signal.
const MALE_TITLES: &[&str] = &[
    "encik", "en", "mr", "tuan", "sir", "dato", "dato'", "datuk", "haji", "hj",
];
const FEMALE_TITLES: &[&str] = &[
    "puan", "pn", "mrs", "ms", "miss", "cik", "madam", "datin", "hajjah", "hjh",
];

const MALE_PARTICLES: &[&str] = &["bin", "b", "a/l", "s/o"];
const FEMALE_PARTICLES: &[&str] = &["binti", "bt", "bte", "a/p", "d/o"];

static MALE_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Malay
        "ahmad", "amir", "amirul", "azlan", "azman", "faizal", "farid", "hafiz", "hakim",
        "halim", "hamid", "haris", "hassan", "hisham", "ibrahim", "idris", "iskandar",
        "ismail", "jamal", "kamal", "khairul", "lokman", "mahmud", "mustafa", "nazri",
        "omar", "osman", "rahman", "rashid", "razak", "ridzuan", "rosli", "shahrul",
        "sulaiman", "syed", "yusof", "zainal", "zulkifli",
        // Chinese
        "beng", "boon", "chee", "chong", "heng", "hock", "huat", "keat", "kok", "leong",
        "seng", "soon", "teck", "weng",
        // Indian
        "anand", "arun", "bala", "dinesh", "ganesh", "gopal", "krishnan", "kumar",
        "mohan", "muthu", "prakash", "raj", "rajan", "ramesh", "ravi", "sanjay",
        "suresh", "vijay",
    ]
    .into_iter()
    .collect()
});

static FEMALE_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Malay
        "aishah", "aisyah", "aminah", "azizah", "farah", "fatimah", "habibah", "halimah",
        "hasnah", "intan", "kamariah", "khadijah", "latifah", "mariam", "maryam",
        "maznah", "noraini", "norhayati", "puteri", "rahimah", "ramlah", "rohani",
        "rosnah", "salmah", "sharifah", "siti", "zainab", "zaleha",
        // Chinese
        "choo", "fong", "hui", "lian", "ling", "mei", "siew", "ying",
        // Indian
        "anjali", "deepa", "devi", "kaur", "kavitha", "lakshmi", "meena", "priya",
        "radha", "sangeetha", "shanti", "uma", "vani",
    ]
    .into_iter()
    .collect()
});

/// Classify a free-text name. Never guesses without signal.
pub fn classify(name: &str) -> Gender {
    let lowered = name.trim().to_lowercase();
    if lowered.is_empty() {
        return Gender::Unknown;
    }
    let tokens: Vec<&str> = lowered.split_whitespace().collect();

    if let Some(gender) = title_layer(&tokens) {
        return gender;
    }
    if let Some(gender) = particle_layer(&tokens) {
        return gender;
    }
    if let Some(gender) = dictionary_layer(&tokens) {
        return gender;
    }
    if let Some(gender) = pattern_layer(&lowered) {
        return gender;
    }
    Gender::Unknown
}

fn title_layer(tokens: &[&str]) -> Option<Gender> {
    let first = tokens.first()?.trim_end_matches('.');
    if MALE_TITLES.contains(&first) {
        return Some(Gender::Male);
    }
    if FEMALE_TITLES.contains(&first) {
        return Some(Gender::Female);
    }
    None
}

fn particle_layer(tokens: &[&str]) -> Option<Gender> {
    for token in tokens {
        let token = token.trim_end_matches('.');
        if MALE_PARTICLES.contains(&token) {
            return Some(Gender::Male);
        }
        if FEMALE_PARTICLES.contains(&token) {
            return Some(Gender::Female);
        }
    }
    None
}

fn dictionary_layer(tokens: &[&str]) -> Option<Gender> {
    for token in tokens {
        if MALE_NAMES.contains(token) {
            return Some(Gender::Male);
        }
        if FEMALE_NAMES.contains(token) {
            return Some(Gender::Female);
        }
    }
    None
}

fn pattern_layer(name: &str) -> Option<Gender> {
    for prefix in ["muhammad ", "mohammad ", "mohamed ", "mohd ", "muhd "] {
        if name.starts_with(prefix) {
            return Some(Gender::Male);
        }
    }
    for prefix in ["nur", "noor"] {
        if name.starts_with(prefix) {
            return Some(Gender::Female);
        }
    }
    if name.ends_with("wati") {
        return Some(Gender::Female);
    }
    None
}

/// Male/female/unknown counts over a batch of names, used for
/// data-quality auditing of an import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenderStats {
    pub total: usize,
    pub male: usize,
    pub female: usize,
    pub unknown: usize,
    pub male_pct: f64,
    pub female_pct: f64,
    pub unknown_pct: f64,
}

impl GenderStats {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut male = 0;
        let mut female = 0;
        let mut unknown = 0;
        for name in names {
            match classify(name.as_ref()) {
                Gender::Male => male += 1,
                Gender::Female => female += 1,
                Gender::Unknown => unknown += 1,
            }
        }
        let total = male + female + unknown;
        let pct = |count: usize| {
            if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            }
        };
        Self {
            total,
            male,
            female,
            unknown,
            male_pct: pct(male),
            female_pct: pct(female),
            unknown_pct: pct(unknown),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
