use mindloom::graph::canonical::{
    canonicalize_entity_name, choose_display_name, edge_id, entity_node_id,
    normalize_entity_type,
};

#[test]
fn test_type_normalization() {
    assert_eq!(normalize_entity_type("Organization"), "Org");
    assert_eq!(normalize_entity_type("Company"), "Org");
    assert_eq!(normalize_entity_type("Team"), "Org");
    assert_eq!(normalize_entity_type("City"), "Place");
    assert_eq!(normalize_entity_type("Country"), "Place");
    assert_eq!(normalize_entity_type("framework"), "Technology");
    assert_eq!(normalize_entity_type("microservice"), "Component");
    assert_eq!(normalize_entity_type("xyzzy"), "Other");
    assert_eq!(normalize_entity_type(""), "Other");
}

#[test]
fn test_canonicalization_stability() {
    // All of these must collapse to "dog" and therefore the same node id.
    let variants = ["Dog", "dog", "dogs", "  dog. ", "a dog", "the Dogs!"];
    for v in variants {
        assert_eq!(
            canonicalize_entity_name(v, "Topic"),
            "dog",
            "variant {:?} did not canonicalize to dog",
            v
        );
    }

    let ids: Vec<String> = variants
        .iter()
        .map(|v| entity_node_id("Topic", &canonicalize_entity_name(v, "Topic")))
        .collect();
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
    assert!(ids[0].starts_with("ent:"));
    assert_eq!(ids[0].len(), "ent:".len() + 16);
}

#[test]
fn test_no_singularization_for_proper_nouns() {
    // "Chris" must not become "Chri".
    assert_eq!(canonicalize_entity_name("Chris", "Person"), "chris");
    assert_eq!(canonicalize_entity_name("Airlines", "Org"), "airlines");
    // Non-proper types do singularize.
    assert_eq!(canonicalize_entity_name("databases", "Technology"), "database");
    // Short words and -ss endings are untouched.
    assert_eq!(canonicalize_entity_name("gas", "Topic"), "gas");
    assert_eq!(canonicalize_entity_name("glass", "Topic"), "glass");
}

#[test]
fn test_internal_punctuation_preserved() {
    assert_eq!(
        canonicalize_entity_name("state-of-the-art", "Topic"),
        "state-of-the-art"
    );
    assert_eq!(canonicalize_entity_name("John's", "Person"), "john's");
    assert_eq!(canonicalize_entity_name("\u{2018}quoted\u{2019}", "Topic"), "quoted");
    assert_eq!(canonicalize_entity_name("(parens)", "Topic"), "paren");
}

#[test]
fn test_display_name_choice() {
    // Proper-noun types title-case the original.
    assert_eq!(choose_display_name("alice smith", "alice smith", "Person"), "Alice Smith");
    assert_eq!(choose_display_name("acme corp", "acme corp", "Org"), "Acme Corp");
    // Other types keep the cleaned original when it is long enough.
    assert_eq!(choose_display_name("machine  learning", "machine learning", "Topic"), "machine learning");
    // Degenerate originals fall back to title-cased canonical.
    assert_eq!(choose_display_name("x", "xylophone", "Topic"), "Xylophone");
    assert_eq!(choose_display_name("", "dog", "Topic"), "Dog");
}

#[test]
fn test_edge_id_determinism() {
    let a = edge_id("mem:abc", "MENTIONS", "ent:123", None, None);
    let b = edge_id("mem:abc", "MENTIONS", "ent:123", None, None);
    assert_eq!(a, b);
    assert_eq!(a.len(), 32);

    // Any component change produces a different id.
    assert_ne!(a, edge_id("mem:abd", "MENTIONS", "ent:123", None, None));
    assert_ne!(a, edge_id("mem:abc", "ABOUT", "ent:123", None, None));
    assert_ne!(a, edge_id("mem:abc", "MENTIONS", "ent:124", None, None));
    assert_ne!(a, edge_id("mem:abc", "MENTIONS", "ent:123", Some("2024-01-01"), None));
}

#[test]
fn test_empty_and_whitespace_names() {
    assert_eq!(canonicalize_entity_name("", "Topic"), "");
    assert_eq!(canonicalize_entity_name("   ", "Topic"), "");
    assert_eq!(canonicalize_entity_name("!!!", "Topic"), "");
}
