//! Engine integration tests
//!
//! End-to-end tests exercising tokenization, restoration, redaction,
//! batches, registry persistence, and concurrency through the public API,
//! with in-test detectors standing in for a remote recognizer.

use a3s_pii::{
    Aes256GcmEncryptor, ConversationState, Entity, EntityDetector, EntityType, FileRegistryStore,
    Mapping, MemoryRegistryStore, PiiEngine, PiiError, PolicySelector, Result, TokenRegistry,
    TokenScope, TypeFilter,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reports every occurrence of a fixed vocabulary
struct VocabularyDetector {
    words: Vec<(EntityType, &'static str)>,
    calls: AtomicUsize,
}

impl VocabularyDetector {
    fn new(words: Vec<(EntityType, &'static str)>) -> Self {
        Self {
            words,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntityDetector for VocabularyDetector {
    async fn detect(&self, text: &str, filter: &TypeFilter) -> Result<Vec<Entity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut found = Vec::new();
        for (ty, word) in &self.words {
            if !filter.allows(ty) {
                continue;
            }
            for (start, _) in text.match_indices(word) {
                found.push(Entity::new(ty.clone(), *word, start, start + word.len()));
            }
        }
        Ok(found)
    }

    fn name(&self) -> &str {
        "vocabulary"
    }
}

/// Always fails, like an unreachable recognizer
struct UnavailableDetector;

#[async_trait]
impl EntityDetector for UnavailableDetector {
    async fn detect(&self, _text: &str, _filter: &TypeFilter) -> Result<Vec<Entity>> {
        Err(PiiError::Detection("connection refused".into()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

fn vocabulary() -> Vec<(EntityType, &'static str)> {
    vec![
        (EntityType::Person, "Hans Mueller"),
        (EntityType::Person, "Marie Dupont"),
        (EntityType::Person, "Lars Johansson"),
        (EntityType::EmailAddress, "hans.mueller@example.de"),
        (EntityType::EmailAddress, "marie.dupont@example.fr"),
        (EntityType::PhoneNumber, "+33 1 23 45 67 89"),
    ]
}

fn test_engine() -> PiiEngine {
    PiiEngine::new(Arc::new(VocabularyDetector::new(vocabulary())))
}

fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir()
        .join(format!("a3s-pii-test-{}", uuid::Uuid::new_v4()))
        .join(name)
}

// ─── Tokenize & Restore ─────────────────────────────────────────

#[tokio::test]
async fn test_invoice_scenario_roundtrip() {
    let engine = test_engine();
    let text = "Hans Mueller (hans.mueller@example.de) called about invoice 123.";

    let result = engine
        .tokenize(text, &"basic".into(), TokenScope::PerCall)
        .await
        .unwrap();

    assert_eq!(
        result.text,
        "<Person_1> (<EmailAddress_1>) called about invoice 123."
    );
    let expected: Mapping = [
        ("<Person_1>".to_string(), "Hans Mueller".to_string()),
        (
            "<EmailAddress_1>".to_string(),
            "hans.mueller@example.de".to_string(),
        ),
    ]
    .into_iter()
    .collect();
    assert_eq!(result.mapping, expected);

    let restored = engine.detokenize(&result.text, &result.mapping);
    assert_eq!(restored.text, text);
    assert!(restored.is_complete());
}

#[tokio::test]
async fn test_mapping_survives_json_storage() {
    let engine = test_engine();
    let result = engine
        .tokenize(
            "Marie Dupont <marie.dupont@example.fr>",
            &"basic".into(),
            TokenScope::PerCall,
        )
        .await
        .unwrap();

    // Stored next to the document, loaded back later
    let stored = serde_json::to_string(&result.mapping).unwrap();
    let loaded: Mapping = serde_json::from_str(&stored).unwrap();

    let restored = engine.detokenize(&result.text, &loaded);
    assert_eq!(restored.text, "Marie Dupont <marie.dupont@example.fr>");
}

#[tokio::test]
async fn test_per_call_numbering_restarts() {
    let engine = test_engine();
    let a = engine
        .tokenize("Hans Mueller", &"basic".into(), TokenScope::PerCall)
        .await
        .unwrap();
    let b = engine
        .tokenize("Marie Dupont", &"basic".into(), TokenScope::PerCall)
        .await
        .unwrap();
    assert_eq!(a.text, "<Person_1>");
    assert_eq!(b.text, "<Person_1>");
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_repeated_value_within_call_shares_token() {
    let engine = test_engine();
    let result = engine
        .tokenize(
            "Hans Mueller met Marie Dupont; Hans Mueller left.",
            &"basic".into(),
            TokenScope::PerCall,
        )
        .await
        .unwrap();
    assert_eq!(result.text, "<Person_1> met <Person_2>; <Person_1> left.");
    assert_eq!(result.mapping.len(), 2);
    assert_eq!(result.entities_count(), 3);
}

#[test]
fn test_substring_entities_keep_their_offsets() {
    let engine = test_engine();
    let text = "Marie wrote to Marie Dupont about Marie.";
    let entities = vec![
        Entity::new(EntityType::Person, "Marie Dupont", 15, 27),
        Entity::new(EntityType::Person, "Marie", 0, 5),
        Entity::new(EntityType::Person, "Marie", 34, 39),
    ];
    let result = engine
        .tokenize_entities(text, entities, TokenScope::Registry)
        .unwrap();

    // "Marie" is seen first, so it is numbered first
    assert_eq!(result.text, "<Person_1> wrote to <Person_2> about <Person_1>.");
    assert_eq!(engine.detokenize(&result.text, &result.mapping).text, text);
}

#[test]
fn test_multibyte_text_from_char_offsets() {
    let engine = test_engine();
    let text = "Grüße von Jürgen Weiß aus Köln";
    let entity = Entity::from_char_span(text, EntityType::Person, 10, 21).unwrap();
    let result = engine
        .tokenize_entities(text, vec![entity], TokenScope::PerCall)
        .unwrap();
    assert_eq!(result.text, "Grüße von <Person_1> aus Köln");
    assert_eq!(engine.detokenize(&result.text, &result.mapping).text, text);
}

#[test]
fn test_detokenize_leaves_unknown_tokens_visible() {
    let engine = test_engine();
    let mut mapping = Mapping::new();
    mapping.insert(&"<Person_1>".parse().unwrap(), "Hans Mueller");

    let reply = "<Person_1> should contact <Person_3> and <EmailAddress_2>.";
    let restored = engine.detokenize(reply, &mapping);
    assert_eq!(
        restored.text,
        "Hans Mueller should contact <Person_3> and <EmailAddress_2>."
    );
    assert_eq!(restored.replacements, 1);
    assert_eq!(restored.unresolved, vec!["<Person_3>", "<EmailAddress_2>"]);
}

// ─── Registry Scope ─────────────────────────────────────────────

#[tokio::test]
async fn test_registry_scope_consistent_across_documents() {
    let engine = test_engine();
    let first = engine
        .tokenize("Ticket opened by Marie Dupont", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    let second = engine
        .tokenize(
            "Lars Johansson forwarded it to Marie Dupont",
            &"basic".into(),
            TokenScope::Registry,
        )
        .await
        .unwrap();

    assert_eq!(first.text, "Ticket opened by <Person_1>");
    assert_eq!(second.text, "<Person_2> forwarded it to <Person_1>");
    // Each result only carries the tokens it uses
    assert_eq!(second.mapping.len(), 2);
    assert_eq!(engine.registry().len(), 2);
}

#[tokio::test]
async fn test_partial_name_in_later_call_gets_its_own_token() {
    let engine = PiiEngine::new(Arc::new(VocabularyDetector::new(vec![
        (EntityType::Person, "Marie Dupont"),
        (EntityType::Person, "Marie"),
    ])));

    // "Marie" inside "Marie Dupont" loses the overlap to the longer span
    let first = engine
        .tokenize("Ticket opened by Marie Dupont", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    assert_eq!(first.text, "Ticket opened by <Person_1>");
    assert_eq!(first.suppressed.len(), 1);
    assert_eq!(engine.registry().len(), 1);

    let second = engine
        .tokenize("Marie called back", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    assert_eq!(second.text, "<Person_2> called back");
    assert_eq!(second.mapping.get("<Person_2>"), Some("Marie"));

    // The earlier binding is untouched
    assert_eq!(
        engine.token_for("Marie Dupont").unwrap().to_string(),
        "<Person_1>"
    );
    assert_eq!(engine.token_for("Marie").unwrap().to_string(), "<Person_2>");
    assert_eq!(engine.registry().len(), 2);
    assert_eq!(
        engine.detokenize(&first.text, &engine.registry().to_mapping()).text,
        "Ticket opened by Marie Dupont"
    );
}

#[tokio::test]
async fn test_detection_failure_leaves_registry_untouched() {
    let engine = PiiEngine::new(Arc::new(UnavailableDetector));
    let err = engine
        .tokenize("Hans Mueller", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap_err();
    assert!(matches!(err, PiiError::Detection(_)));
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn test_unknown_policy_rejected_before_detection() {
    let detector = Arc::new(VocabularyDetector::new(vocabulary()));
    let engine = PiiEngine::new(detector.clone());

    let err = engine
        .tokenize("Hans Mueller", &"gdpr".into(), TokenScope::Registry)
        .await
        .unwrap_err();
    assert!(matches!(err, PiiError::UnknownPolicy(ref name) if name == "gdpr"));

    let err = engine.redact("Hans Mueller", &"gdpr".into()).await.unwrap_err();
    assert!(matches!(err, PiiError::UnknownPolicy(_)));
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_apply_registry_to_unscanned_text() {
    let engine = test_engine();
    engine
        .tokenize(
            "Marie Dupont and Hans Mueller",
            &"basic".into(),
            TokenScope::Registry,
        )
        .await
        .unwrap();

    let result = engine
        .apply_registry("Reminder for Hans Mueller; cc Marie Dupont.")
        .unwrap();
    assert_eq!(result.text, "Reminder for <Person_2>; cc <Person_1>.");
    assert_eq!(
        engine.detokenize(&result.text, &result.mapping).text,
        "Reminder for Hans Mueller; cc Marie Dupont."
    );
}

#[test]
fn test_concurrent_get_or_create_from_threads() {
    let registry = Arc::new(TokenRegistry::new());
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || registry.get_or_create("Marie Dupont", EntityType::Person).unwrap())
        })
        .collect();
    let tokens: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(tokens.iter().all(|t| t == &tokens[0]));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.counter(&EntityType::Person), 1);
}

#[tokio::test]
async fn test_concurrent_tokenize_tasks_share_registry() {
    let engine = Arc::new(test_engine());
    let mut handles = Vec::new();
    for i in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let text = if i % 2 == 0 {
                "Hans Mueller and Marie Dupont"
            } else {
                "Marie Dupont and Hans Mueller"
            };
            engine
                .tokenize(text, &"basic".into(), TokenScope::Registry)
                .await
                .unwrap()
        }));
    }

    let mut hans = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap();
        let inverse = result.mapping.inverse();
        hans.push(inverse["Hans Mueller"].to_string());
    }
    assert!(hans.iter().all(|t| t == &hans[0]));
    assert_eq!(engine.registry().len(), 2);
}

// ─── Batches ────────────────────────────────────────────────────

#[tokio::test]
async fn test_batch_same_value_same_token() {
    let engine = test_engine();
    let docs = [
        "Invoice for Marie Dupont is overdue.",
        "Marie Dupont asked for an extension.",
    ];
    let result = engine
        .tokenize_batch(&docs, &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    let outputs = result.into_outputs().unwrap();

    assert_eq!(outputs[0].text, "Invoice for <Person_1> is overdue.");
    assert_eq!(outputs[1].text, "<Person_1> asked for an extension.");
}

#[tokio::test]
async fn test_batch_preserves_order_under_concurrency() {
    let engine = test_engine()
        .with_config(a3s_pii::EngineConfig {
            batch_concurrency: 3,
            ..Default::default()
        })
        .unwrap();
    let docs: Vec<String> = (0..20)
        .map(|i| format!("doc {} from Hans Mueller", i))
        .collect();
    let result = engine
        .tokenize_batch(&docs, &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();

    for (i, (index, output)) in result.succeeded().enumerate() {
        assert_eq!(index, i);
        assert_eq!(output.text, format!("doc {} from <Person_1>", i));
    }
}

#[tokio::test]
async fn test_redact_batch_and_idempotence() {
    let engine = test_engine();
    let docs = ["Call Hans Mueller at +33 1 23 45 67 89", "No PII here"];
    let result = engine.redact_batch(&docs, &"basic".into()).await.unwrap();
    let outputs = result.into_outputs().unwrap();

    assert_eq!(
        outputs[0].text,
        "Call [REDACTED:Person] at [REDACTED:PhoneNumber]"
    );
    assert_eq!(outputs[1].text, "No PII here");

    let again = engine.redact(&outputs[0].text, &"basic".into()).await.unwrap();
    assert_eq!(again.text, outputs[0].text);
    assert!(engine.registry().is_empty());
}

// ─── Conversations ──────────────────────────────────────────────

#[tokio::test]
async fn test_conversation_restores_earlier_turns() {
    let engine = test_engine();
    let mut state = ConversationState::new();

    let turn1 = engine
        .tokenize("I am Hans Mueller", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    state.absorb_result(&turn1);

    let turn2 = engine
        .tokenize(
            "Please email marie.dupont@example.fr",
            &"basic".into(),
            TokenScope::Registry,
        )
        .await
        .unwrap();
    state.absorb_result(&turn2);

    // A model reply mentioning tokens from both turns
    let reply = state.detokenize("Sure <Person_1>, I will write to <EmailAddress_1>.");
    assert_eq!(
        reply.text,
        "Sure Hans Mueller, I will write to marie.dupont@example.fr."
    );
    assert_eq!(state.turns(), 2);
    assert_eq!(state.rebinds(), 0);
}

// ─── Persistence ────────────────────────────────────────────────

#[tokio::test]
async fn test_registry_restart_keeps_numbering() {
    let store = MemoryRegistryStore::default();
    {
        let engine = test_engine();
        engine
            .tokenize("Hans Mueller, Marie Dupont", &"basic".into(), TokenScope::Registry)
            .await
            .unwrap();
        engine.registry().flush_to(&store).unwrap();
    }

    let registry = Arc::new(TokenRegistry::load_from(&store).unwrap());
    let engine = test_engine().with_registry(registry);
    let result = engine
        .tokenize(
            "Lars Johansson replaced Marie Dupont",
            &"basic".into(),
            TokenScope::Registry,
        )
        .await
        .unwrap();
    assert_eq!(result.text, "<Person_3> replaced <Person_2>");
}

#[test]
fn test_encrypted_file_store_roundtrip() {
    let path = temp_path("registry.json");
    let encryptor = Arc::new(Aes256GcmEncryptor::new("k1", &[0x24; 32]));
    let store = FileRegistryStore::new(&path).with_encryptor(encryptor);

    let registry = TokenRegistry::new();
    registry.get_or_create("hans.mueller@example.de", EntityType::EmailAddress).unwrap();
    registry.flush_to(&store).unwrap();

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains("hans.mueller"));

    let loaded = TokenRegistry::load_from(&store).unwrap();
    assert_eq!(
        loaded
            .lookup_token("hans.mueller@example.de")
            .unwrap()
            .to_string(),
        "<EmailAddress_1>"
    );

    std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
}

#[tokio::test]
async fn test_merge_registries_from_two_engines() {
    let a = test_engine();
    let b = test_engine();
    a.tokenize("Hans Mueller", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();
    b.tokenize("Marie Dupont", &"basic".into(), TokenScope::Registry)
        .await
        .unwrap();

    // Both hand out <Person_1>, so importing b into a conflicts
    let report = a.registry().merge(b.registry());
    assert_eq!(report.added, 0);
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(a.registry().len(), 1);

    let fresh = TokenRegistry::new();
    assert!(fresh.merge(a.registry()).is_clean());
    assert_eq!(fresh.len(), 1);
}

#[tokio::test]
async fn test_selector_with_explicit_entities() {
    let engine = test_engine();
    let selector = PolicySelector::entities([EntityType::EmailAddress]);
    let result = engine
        .tokenize(
            "Hans Mueller <hans.mueller@example.de>",
            &selector,
            TokenScope::PerCall,
        )
        .await
        .unwrap();
    assert_eq!(result.text, "Hans Mueller <<EmailAddress_1>>");
    assert_eq!(
        engine.detokenize(&result.text, &result.mapping).text,
        "Hans Mueller <hans.mueller@example.de>"
    );
}
