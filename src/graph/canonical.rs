// src/graph/canonical.rs
//
// =============================================================================
// MINDLOOM: ENTITY CANONICALIZATION (v 0.1 )
// =============================================================================
//
// Collapses textually divergent mentions to stable strings so that
// "Dog", "dog", "dogs", " a dog " all derive the same entity node id.
//
// Rules run in a strict order; changing the order changes every node id in
// existing databases.

use sha1::{Digest, Sha1};

// ============================================================================
// 1. TYPE NORMALIZATION
// ============================================================================

/// Proper-noun-ish types: display names are title-cased and names are never
/// singularized.
const NO_SINGULARIZE_TYPES: &[&str] = &["Person", "Org", "Place", "Project"];

/// Map any raw type string to a controlled canonical type. Unknown -> Other.
pub fn normalize_entity_type(raw_type: &str) -> &'static str {
    match raw_type.trim().to_lowercase().as_str() {
        "person" | "people" | "individual" | "user" | "author" | "speaker" => "Person",
        "org" | "organization" | "organisation" | "company" | "institution" | "agency"
        | "corporation" | "team" | "group" => "Org",
        "place" | "location" | "city" | "country" | "region" | "state" | "continent"
        | "address" => "Place",
        "project" | "product" | "app" | "application" => "Project",
        "topic" | "subject" | "concept" | "category" | "theme" => "Topic",
        "technology" | "tech" | "tool" | "library" | "framework" | "language" | "platform"
        | "api" | "sdk" => "Technology",
        "component" | "system" | "service" | "module" | "microservice" => "Component",
        _ => "Other",
    }
}

/// Priority used when compaction merges duplicate entities across types.
pub fn type_priority(entity_type: &str) -> i32 {
    match entity_type {
        "Person" => 10,
        "Org" => 9,
        "Place" => 8,
        "Project" => 7,
        "Technology" => 6,
        "Component" => 5,
        "Topic" => 4,
        _ => 1,
    }
}

// ============================================================================
// 2. NAME CANONICALIZATION
// ============================================================================

fn fold_fancy_quotes(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{2032}' | '`' => '\'',
        '\u{201C}' | '\u{201D}' => '"',
        _ => c,
    }
}

fn strip_enclosing_pairs(s: &str) -> String {
    let mut s = s.trim().to_string();
    loop {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() < 2 {
            break;
        }
        let pair = (chars[0], chars[chars.len() - 1]);
        let enclosed = matches!(
            pair,
            ('"', '"') | ('\'', '\'') | ('(', ')') | ('[', ']') | ('{', '}')
        );
        if !enclosed {
            break;
        }
        s = chars[1..chars.len() - 1].iter().collect::<String>().trim().to_string();
    }
    s
}

/// Produce the stable canonical form of an entity name.
///
/// Rule order:
/// 1. trim  2. lowercase  3. fold fancy quotes to ASCII
/// 4. strip enclosing quotes/brackets
/// 5. drop punctuation except internal hyphen/apostrophe
/// 6. collapse whitespace  7. strip leading article (a/an/the)
/// 8. singularize (len > 3, trailing 's', not "ss") for non-proper types
/// 9. final trim
pub fn canonicalize_entity_name(name: &str, entity_type: &str) -> String {
    let s = name.trim();
    if s.is_empty() {
        return String::new();
    }

    let s: String = s.to_lowercase().chars().map(fold_fancy_quotes).collect();
    let s = strip_enclosing_pairs(&s);

    let s: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-' || *c == '\'')
        .collect();

    let mut s = s.split_whitespace().collect::<Vec<_>>().join(" ");

    for article in ["a ", "an ", "the "] {
        if let Some(rest) = s.strip_prefix(article) {
            s = rest.trim_start().to_string();
            break;
        }
    }

    let norm_type = normalize_entity_type(entity_type);
    if !NO_SINGULARIZE_TYPES.contains(&norm_type)
        && s.chars().count() > 3
        && s.ends_with('s')
        && !s.ends_with("ss")
    {
        s.pop();
    }

    s.trim().to_string()
}

/// Human-friendly display name, chosen independently of the canonical form.
pub fn choose_display_name(original: &str, canonical: &str, entity_type: &str) -> String {
    let cleaned = original.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return title_case(canonical);
    }

    let norm_type = normalize_entity_type(entity_type);
    if NO_SINGULARIZE_TYPES.contains(&norm_type) {
        return title_case(&cleaned);
    }

    if cleaned.chars().count() >= 2 {
        cleaned
    } else {
        title_case(canonical)
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// 3. STABLE IDENTIFIERS
// ============================================================================

/// `ent:` + first 16 hex of sha1("<Type>|<canonical>").
pub fn entity_node_id(entity_type: &str, canonical: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}|{}", entity_type, canonical).as_bytes());
    format!("ent:{}", &hex::encode(hasher.finalize())[..16])
}

pub fn memory_node_id(memory_id: &str) -> String {
    format!("mem:{}", memory_id)
}

/// First 32 hex of sha1("from|type|to|valid_from|valid_to") so that
/// re-insertion of the same logical edge is idempotent.
pub fn edge_id(
    from_node_id: &str,
    edge_type: &str,
    to_node_id: &str,
    valid_from: Option<&str>,
    valid_to: Option<&str>,
) -> String {
    let raw = format!(
        "{}|{}|{}|{}|{}",
        from_node_id,
        edge_type,
        to_node_id,
        valid_from.unwrap_or(""),
        valid_to.unwrap_or("")
    );
    let mut hasher = Sha1::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())[..32].to_string()
}
