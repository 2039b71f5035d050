//! Name parsing and multi-part name similarity.
//!
//! Everything the engine knows about author name strings lives here: how a
//! raw field value splits into surname / initials / given names, how the
//! canonical last-name group key is derived, and the similarity score used
//! by the name comparator. The scoring combines surname edit-distance
//! ratio, initials overlap with a positional-mismatch penalty, and
//! given-name comparison against nickname and gendered-name tables, blended
//! geometrically so one weak component dominates the result.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use strsim::levenshtein;
use unicode_normalization::UnicodeNormalization;

const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// Reject surnames further apart than a third of their length.
const MAX_SURNAME_DISTANCE_RATIO: f64 = 0.33;

/// Any aligned given-name pair further apart than this ratio makes the
/// whole given-name set incompatible.
const MAX_GIVEN_NAME_SCREWUP: f64 = 0.1;

/// A name split into its comparable parts.
///
/// `positions` records, for each given name, its index in the initials
/// list, so "K. John Rob" keeps John at initial position 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub surname: String,
    pub initials: Vec<String>,
    pub given_names: Vec<String>,
    pub positions: Vec<usize>,
}

/// Fold a name to its ASCII skeleton: NFKD decomposition, then everything
/// non-ASCII dropped ("Müller" becomes "Muller").
pub fn ascii_fold(name: &str) -> String {
    name.nfkd().filter(char::is_ascii).collect()
}

fn strip_nonalnum(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => {
            let mut out: String = first.to_uppercase().collect();
            out.extend(chars.flat_map(char::to_lowercase));
            out
        }
        None => String::new(),
    }
}

fn capitalize_surname(raw: &str) -> String {
    // Dash-joined surnames keep every part capitalized: "smith-jones"
    // reads back as "Smith-Jones".
    capitalize(raw.trim())
        .split('-')
        .map(capitalize)
        .collect::<Vec<_>>()
        .join("-")
}

/// Drop parenthesized name additions: "Ellis, John (Jr.)" loses "(Jr.)".
fn strip_additions(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut depth = 0usize;
    for c in name.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// Split a raw name string into [`ParsedName`] parts.
///
/// Handles both "Surname, Rest Of Name" and "Rest Of Name Surname" orders;
/// single tokens are surname-only. Tokens of length one in the rest-of-name
/// become bare initials, longer tokens become given names (and contribute
/// their initial).
pub fn split_name_parts(name: &str) -> ParsedName {
    let name = strip_additions(name);
    let name = name.trim();

    let (surname_raw, rest) = if let Some((sur, rest)) = name.split_once(|c: char| c == ',' || c == ';') {
        (sur, rest)
    } else if let Some((rest, sur)) = name.rsplit_once(' ') {
        (sur, rest)
    } else {
        return ParsedName {
            surname: capitalize_surname(name),
            initials: Vec::new(),
            given_names: Vec::new(),
            positions: Vec::new(),
        };
    };

    // A second comma starts garbage (affiliations, roles); drop it.
    let rest = rest.split(',').next().unwrap_or("");

    let mut initials = Vec::new();
    let mut given_names = Vec::new();
    let mut positions = Vec::new();
    let tokens = rest
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | '=' | '-' | ';'))
        .filter(|t| !t.is_empty());
    for token in tokens {
        if token.chars().count() == 1 {
            initials.push(token.to_uppercase());
        } else {
            positions.push(initials.len());
            let first: String = token
                .chars()
                .next()
                .map(|c| c.to_uppercase().collect())
                .unwrap_or_default();
            initials.push(first);
            given_names.push(capitalize(token));
        }
    }

    ParsedName {
        surname: capitalize_surname(surname_raw),
        initials,
        given_names,
        positions,
    }
}

/// Canonical last-name group key: folded surname, lower-cased, with every
/// non-letter stripped. This is the sharding unit of the whole engine.
pub fn last_name_group(name: &str) -> String {
    let parsed = split_name_parts(&ascii_fold(name));
    parsed
        .surname
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase())
        .collect()
}

/// Nickname and gendered-name word lists used by the given-name
/// comparison. The compiled-in defaults cover the common English sets;
/// production deployments load the full authority files.
#[derive(Debug, Clone)]
pub struct NameTables {
    boys: HashSet<String>,
    girls: HashSet<String>,
    variations: Vec<HashSet<String>>,
}

const DEFAULT_MALE: &[&str] = &[
    "james", "john", "robert", "michael", "william", "david", "richard", "joseph",
    "thomas", "charles", "christopher", "daniel", "matthew", "george", "anthony",
    "donald", "paul", "mark", "andrew", "edward", "steven", "stephen", "kenneth",
    "peter", "brian", "kevin", "hans", "carlo", "juan", "pedro", "luis", "sergio",
    "frederick", "theodore", "nicholas", "alexander", "samuel", "benjamin",
    "alessandro",
];

const DEFAULT_FEMALE: &[&str] = &[
    "mary", "patricia", "jennifer", "linda", "elizabeth", "barbara", "susan",
    "jessica", "sarah", "karen", "nancy", "lisa", "margaret", "sandra", "ashley",
    "dorothy", "kimberly", "emily", "donna", "michelle", "carol", "amanda",
    "melissa", "deborah", "stephanie", "laura", "anna", "maria", "sofia",
    "katherine", "catherine", "victoria", "alice", "helen", "alessandra",
];

const DEFAULT_VARIATIONS: &[&[&str]] = &[
    &["robert", "bob", "rob", "bobby"],
    &["william", "bill", "will", "billy", "liam"],
    &["richard", "rick", "dick", "rich"],
    &["james", "jim", "jimmy"],
    &["john", "jack", "johnny"],
    &["michael", "mike"],
    &["joseph", "joe", "joey"],
    &["thomas", "tom", "tommy"],
    &["charles", "charlie", "chuck"],
    &["christopher", "chris"],
    &["daniel", "dan", "danny"],
    &["matthew", "matt"],
    &["anthony", "tony"],
    &["edward", "ed", "ted", "eddie"],
    &["steven", "steve", "stephen"],
    &["kenneth", "ken", "kenny"],
    &["alexander", "alex", "sasha"],
    &["nicholas", "nick"],
    &["samuel", "sam"],
    &["benjamin", "ben"],
    &["frederick", "fred"],
    &["theodore", "ted", "theo"],
    &["elizabeth", "liz", "beth", "betty", "eliza"],
    &["margaret", "maggie", "peggy", "meg"],
    &["katherine", "kate", "katie", "kathy", "catherine"],
    &["jennifer", "jen", "jenny"],
    &["patricia", "pat", "patty", "tricia"],
    &["susan", "sue", "susie"],
    &["deborah", "debbie", "deb"],
    &["victoria", "vicky"],
];

impl Default for NameTables {
    fn default() -> Self {
        let male: HashSet<String> = DEFAULT_MALE.iter().map(|s| s.to_string()).collect();
        let female: HashSet<String> = DEFAULT_FEMALE.iter().map(|s| s.to_string()).collect();
        let variations = DEFAULT_VARIATIONS
            .iter()
            .map(|group| group.iter().map(|s| s.to_string()).collect())
            .collect();
        Self::from_sets(male, female, variations)
    }
}

impl NameTables {
    fn from_sets(
        male: HashSet<String>,
        female: HashSet<String>,
        variations: Vec<HashSet<String>>,
    ) -> Self {
        // A name on both lists decides nothing; keep only the unambiguous
        // entries on each side.
        let boys = male.difference(&female).cloned().collect();
        let girls = female.difference(&male).cloned().collect();
        Self {
            boys,
            girls,
            variations,
        }
    }

    /// Load authority files: one first name per line for the gender files,
    /// semicolon-separated groups per line for the variations file.
    pub fn from_files(
        male: &Path,
        female: &Path,
        variations: &Path,
    ) -> std::io::Result<Self> {
        let read_set = |path: &Path| -> std::io::Result<HashSet<String>> {
            Ok(fs::read_to_string(path)?
                .lines()
                .map(|l| l.trim().to_lowercase())
                .filter(|l| !l.is_empty())
                .collect())
        };
        let variations = fs::read_to_string(variations)?
            .lines()
            .map(|line| {
                line.split(';')
                    .map(|n| strip_nonalnum(&n.to_lowercase()))
                    .filter(|n| !n.is_empty())
                    .collect::<HashSet<String>>()
            })
            .filter(|set| !set.is_empty())
            .collect();
        Ok(Self::from_sets(read_set(male)?, read_set(female)?, variations))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gender {
    Male,
    Female,
    Conflict,
}

fn gender_of(names: &[String], tables: &NameTables) -> Option<Gender> {
    let mut gender = None;
    for name in names {
        let name = strip_nonalnum(&name.to_lowercase());
        let vote = if tables.boys.contains(&name) {
            Some(Gender::Male)
        } else if tables.girls.contains(&name) {
            Some(Gender::Female)
        } else {
            None
        };
        if let Some(vote) = vote {
            gender = Some(match gender {
                None => vote,
                Some(g) if g == vote => g,
                Some(_) => Gender::Conflict,
            });
        }
    }
    gender
}

fn genders_compatible(a: &[String], b: &[String], tables: &NameTables) -> bool {
    match (gender_of(a, tables), gender_of(b, tables)) {
        (Some(ga), Some(gb)) => {
            ga == gb && ga != Gender::Conflict && gb != Gender::Conflict
        }
        _ => true,
    }
}

/// All variants of a given-name list with one adjacent pair concatenated,
/// plus the list itself: ["guang", "sheng"] also yields "guangsheng".
fn composite_variants(names: &[String]) -> Vec<String> {
    let mut variants = vec![names.join(" ")];
    for i in 0..names.len().saturating_sub(1) {
        let mut merged: Vec<String> = names.to_vec();
        let tail = merged.remove(i + 1);
        merged[i].push_str(&tail);
        variants.push(merged.join(" "));
    }
    variants
}

fn equal_composites(a: &[String], b: &[String]) -> bool {
    let canon = |v: &str| strip_nonalnum(&v.to_lowercase());
    let bs: Vec<String> = composite_variants(b).iter().map(|v| canon(v)).collect();
    composite_variants(a)
        .iter()
        .any(|va| bs.iter().any(|vb| *vb == canon(va)))
}

fn synonymous(a: &[String], b: &[String], tables: &NameTables) -> bool {
    let max_matches = a.len().min(b.len());
    if max_matches == 0 {
        return false;
    }
    let mut matches = vec![false; max_matches];
    for group in &tables.variations {
        for i in 0..max_matches {
            let o = strip_nonalnum(&a[i].to_lowercase());
            let t = strip_nonalnum(&b[i].to_lowercase());
            if o == t || (group.contains(&o) && group.contains(&t)) {
                matches[i] = true;
            }
        }
        if matches.iter().all(|&m| m) {
            return true;
        }
    }
    false
}

fn substring_names(a: &[String], b: &[String]) -> bool {
    a.iter().any(|o| {
        let o = strip_nonalnum(&o.to_lowercase());
        b.iter().any(|t| {
            let t = strip_nonalnum(&t.to_lowercase());
            o.starts_with(&t) || t.starts_with(&o)
        })
    })
}

/// Surname edit-distance ratio. Zero when the distance exceeds a third of
/// the longer cleaned surname, else `1 - dist/max_len`.
pub fn surname_compatibility(a: &str, b: &str) -> f64 {
    let a = strip_nonalnum(&a.to_lowercase());
    let b = strip_nonalnum(&b.to_lowercase());
    let max_len = a.chars().count().max(b.chars().count()) as f64;
    if max_len == 0.0 {
        return 0.0;
    }
    let dist = levenshtein(&a, &b) as f64;
    if dist / max_len > MAX_SURNAME_DISTANCE_RATIO {
        0.0
    } else {
        1.0 - dist / max_len
    }
}

/// Initials overlap score: set overlap, dampened by the edit distance of
/// the joined initials and by a positional-mismatch penalty that weighs
/// mismatches near the front of the longer list heaviest.
pub fn initials_compatibility(a: &[String], b: &[String]) -> f64 {
    let a: Vec<String> = a.iter().map(|i| i.to_uppercase()).collect();
    let b: Vec<String> = b.iter().map(|i| i.to_uppercase()).collect();
    let max_n = a.len().max(b.len());

    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let union = set_a.union(&set_b).count();
    let jaccard = if union > 0 {
        set_a.intersection(&set_b).count() as f64 / union as f64
    } else {
        1.0
    };

    let (longer, shorter) = if a.len() > b.len() { (&a, &b) } else { (&b, &a) };
    let (screwup, distance) = if max_n > 0 {
        let mut penalty = 0usize;
        for (j, init) in longer.iter().enumerate() {
            if j < shorter.len() && *init != shorter[j] {
                // A mismatch at the front of the list costs the most.
                penalty += longer.len() - j;
            }
        }
        let screwup = penalty as f64 / (max_n * (max_n + 1)) as f64 * 2.0;
        let distance = levenshtein(&a.concat(), &b.concat()) as f64 / max_n as f64;
        (screwup, distance)
    } else {
        (0.0, 0.0)
    };

    (0.8 * jaccard + 0.1 * (1.0 - distance) + 0.1 * (1.0 - screwup)).max(0.0)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Given-name set comparison. Both lists must be non-empty.
fn given_names_compatibility(a: &[String], b: &[String], tables: &NameTables) -> f64 {
    let a: Vec<String> = a.iter().map(|n| strip_nonalnum(&n.to_lowercase())).collect();
    let b: Vec<String> = b.iter().map(|n| strip_nonalnum(&n.to_lowercase())).collect();

    let gender_ok = genders_compatible(&a, &b, tables);
    let composites = equal_composites(&a, &b);
    let synonyms = synonymous(&a, &b, tables);
    let substrings = substring_names(&a, &b);

    let (longer, shorter) = if a.len() > b.len() { (&a, &b) } else { (&b, &a) };

    // Position-aligned edit-distance ratios over the shared prefix.
    let aligned: Vec<f64> = longer
        .iter()
        .zip(shorter.iter())
        .map(|(x, y)| levenshtein(x, y) as f64 / char_len(x).max(char_len(y)).max(1) as f64)
        .collect();

    // Greedy best-match assignment: each longer-side name consumes its
    // closest remaining partner.
    let mut remaining: Vec<&String> = shorter.iter().collect();
    let mut assigned: Vec<f64> = Vec::new();
    for name in longer.iter() {
        if remaining.is_empty() {
            break;
        }
        let max_len = char_len(name)
            .max(remaining.iter().map(|k| char_len(k)).max().unwrap_or(0))
            .max(1);
        let mut best = 0;
        let mut best_dist = usize::MAX;
        for (i, k) in remaining.iter().enumerate() {
            let dist = levenshtein(name, k);
            if dist < best_dist {
                best = i;
                best_dist = dist;
            }
        }
        assigned.push(best_dist as f64 / max_len as f64);
        remaining.remove(best);
    }

    let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
    let orig_max = aligned.iter().cloned().fold(0.0f64, f64::max);
    let (max_screwup, min_screwup, avg_screwup) = if orig_max > MAX_GIVEN_NAME_SCREWUP {
        (1.0, 1.0, 1.0)
    } else {
        (
            orig_max,
            assigned.iter().cloned().fold(f64::INFINITY, f64::min),
            (mean(&aligned) + mean(&assigned)) / 2.0,
        )
    };

    let mut score = (1.0
        - (0.25 * max_screwup + 0.5 * avg_screwup + 0.25 * min_screwup))
        .max(0.0);

    if composites && substrings {
        score = (score + 0.7).min(1.0);
    } else if substrings {
        score = (score + ((1.0 - orig_max) * 0.75).max(0.0)).min(1.0);
    }
    if synonyms {
        score = (score + 0.5).min(1.0);
    }
    if !gender_ok {
        score = (score * 0.25).max(0.0);
    }
    score
}

/// Normalized geometric blend: `x·y/√(x²+y²)·√2`. Equals the inputs when
/// they agree, and collapses toward the weaker one when they disagree —
/// which is the point: one bad component must drag the verdict down.
fn geometric_blend(x: f64, y: f64) -> f64 {
    let denom = (x * x + y * y).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        x * y / denom * SQRT_2
    }
}

/// Compare two full name strings, returning a similarity in [0,1].
pub fn compare_names(origin: &str, target: &str, tables: &NameTables) -> f64 {
    let origin = ascii_fold(origin);
    let target = ascii_fold(target);
    let no = split_name_parts(&origin);
    let nt = split_name_parts(&target);

    let surname_score = surname_compatibility(&no.surname, &nt.surname);
    let initials_score = initials_compatibility(&no.initials, &nt.initials);

    let initials_only = no.given_names.is_empty() || nt.given_names.is_empty();
    let rest_score = if initials_only {
        initials_score * 0.6
    } else {
        let given_score = given_names_compatibility(&no.given_names, &nt.given_names, tables);
        geometric_blend(initials_score, given_score)
    };

    geometric_blend(surname_score, rest_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_surname_first() {
        let parsed = split_name_parts("Ellis, John R.");
        assert_eq!(parsed.surname, "Ellis");
        assert_eq!(parsed.initials, vec!["J", "R"]);
        assert_eq!(parsed.given_names, vec!["John"]);
        assert_eq!(parsed.positions, vec![0]);
    }

    #[test]
    fn split_given_first() {
        let parsed = split_name_parts("John Richard Ellis");
        assert_eq!(parsed.surname, "Ellis");
        assert_eq!(parsed.given_names, vec!["John", "Richard"]);
        assert_eq!(parsed.initials, vec!["J", "R"]);
    }

    #[test]
    fn split_keeps_bare_initial_positions() {
        let parsed = split_name_parts("Ellis, K. John Rob");
        assert_eq!(parsed.initials, vec!["K", "J", "R"]);
        assert_eq!(parsed.given_names, vec!["John", "Rob"]);
        assert_eq!(parsed.positions, vec![1, 2]);
    }

    #[test]
    fn split_single_token_is_surname_only() {
        let parsed = split_name_parts("Ellis");
        assert_eq!(parsed.surname, "Ellis");
        assert!(parsed.initials.is_empty());
    }

    #[test]
    fn split_drops_additions() {
        let parsed = split_name_parts("Ellis, John (Jr.)");
        assert_eq!(parsed.given_names, vec!["John"]);
    }

    #[test]
    fn split_capitalizes_dashed_surnames() {
        assert_eq!(split_name_parts("smith-jones, a.").surname, "Smith-Jones");
    }

    #[test]
    fn group_key_strips_non_letters() {
        assert_eq!(last_name_group("O'Neil, Sean"), "oneil");
        assert_eq!(last_name_group("Müller, H."), "muller");
        assert_eq!(last_name_group("van der Berg, J."), "vanderberg");
    }

    #[test]
    fn surname_exact_match_is_one() {
        assert_eq!(surname_compatibility("Ellis", "Ellis"), 1.0);
    }

    #[test]
    fn surname_far_apart_is_zero() {
        assert_eq!(surname_compatibility("Ellis", "Smith"), 0.0);
    }

    #[test]
    fn surname_close_is_high() {
        let score = surname_compatibility("Ellis", "Elis");
        assert!(score > 0.7 && score < 1.0, "score = {score}");
    }

    #[test]
    fn initials_exact_match_is_one() {
        let a = vec!["J".to_string(), "R".to_string()];
        assert!((initials_compatibility(&a, &a) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn initials_disjoint_is_low() {
        let a = vec!["J".to_string()];
        let b = vec!["K".to_string()];
        assert!(initials_compatibility(&a, &b) < 0.2);
    }

    #[test]
    fn initials_front_mismatch_costs_more_than_back() {
        let a = vec!["J".to_string(), "R".to_string(), "T".to_string()];
        let front = vec!["X".to_string(), "R".to_string(), "T".to_string()];
        let back = vec!["J".to_string(), "R".to_string(), "X".to_string()];
        assert!(
            initials_compatibility(&a, &back) > initials_compatibility(&a, &front)
        );
    }

    #[test]
    fn identical_full_names_score_one() {
        let tables = NameTables::default();
        let score = compare_names("Ellis, John R.", "Ellis, John R.", &tables);
        assert!((score - 1.0).abs() < 1e-9, "score = {score}");
    }

    #[test]
    fn compare_is_symmetric() {
        let tables = NameTables::default();
        let a = "Ellis, John R.";
        let b = "Ellis, J. Richard";
        let ab = compare_names(a, b, &tables);
        let ba = compare_names(b, a, &tables);
        assert!((ab - ba).abs() < 1e-12);
    }

    #[test]
    fn different_surnames_score_zero() {
        let tables = NameTables::default();
        assert_eq!(compare_names("Ellis, J.", "Smith, J.", &tables), 0.0);
    }

    #[test]
    fn initial_expands_to_given_name() {
        let tables = NameTables::default();
        let score = compare_names("Ellis, J.", "Ellis, John", &tables);
        assert!(score > 0.4, "score = {score}");
    }

    #[test]
    fn nickname_bonus_applies() {
        let tables = NameTables::default();
        let with_nick = compare_names("Ellis, Rob", "Ellis, Robert", &tables);
        let without = compare_names("Ellis, Rod", "Ellis, Robert", &tables);
        assert!(with_nick > without, "{with_nick} vs {without}");
    }

    #[test]
    fn gender_conflict_penalizes() {
        let tables = NameTables::default();
        let conflict =
            given_names_compatibility(&["Alessandra".into()], &["Alessandro".into()], &tables);
        let neutral =
            given_names_compatibility(&["Alessandre".into()], &["Alessandro".into()], &tables);
        assert!(conflict < neutral, "{conflict} vs {neutral}");
    }

    #[test]
    fn composite_names_match() {
        let tables = NameTables::default();
        let score = compare_names("Li, Guang Sheng", "Li, Guangsheng", &tables);
        assert!(score > 0.6, "score = {score}");
    }

    #[test]
    fn ascii_fold_strips_diacritics() {
        assert_eq!(ascii_fold("Müller"), "Muller");
        assert_eq!(ascii_fold("Gérard"), "Gerard");
    }

    #[test]
    fn blend_punishes_weak_component() {
        let even = geometric_blend(0.9, 0.9);
        let uneven = geometric_blend(0.9, 0.3);
        assert!((even - 0.9).abs() < 1e-12);
        // Far below the linear average of 0.6.
        assert!(uneven < 0.45, "uneven = {uneven}");
    }
}
