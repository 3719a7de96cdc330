//! Inference seam. The real translation model is an external collaborator;
//! the node only needs `infer`. `DictionaryInference` is a small built-in
//! implementation (phrase table + medical terminology overrides) used by
//! tests and demos.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{DriftlessError, Result};
use crate::types::{Translation, TranslationRequest};

/// The opaque translation function. Failures surface to the caller and are
/// never cached or queued.
#[async_trait]
pub trait Inference: Send + Sync {
    async fn infer(&self, request: &TranslationRequest) -> Result<Translation>;
}

/// Confidence for an exact phrase or terminology hit.
const EXACT_CONFIDENCE: f32 = 0.9;

/// Dictionary-backed inference: exact phrase lookup, word-by-word fallback,
/// and context-specific medical terminology overriding both.
pub struct DictionaryInference {
    /// (source-target) -> phrase -> translation
    phrases: HashMap<String, HashMap<String, String>>,
    /// (source_lang, context) -> term -> (target_lang -> translation)
    terminology: HashMap<(String, String), HashMap<String, HashMap<String, String>>>,
}

impl DictionaryInference {
    pub fn new() -> Self {
        let mut inference = Self {
            phrases: HashMap::new(),
            terminology: HashMap::new(),
        };
        inference.seed_phrases();
        inference.seed_terminology();
        inference
    }

    pub fn with_phrase(mut self, pair: &str, phrase: &str, translation: &str) -> Self {
        self.phrases
            .entry(pair.to_string())
            .or_default()
            .insert(phrase.to_lowercase(), translation.to_string());
        self
    }

    fn seed_phrases(&mut self) {
        let en_es = [
            ("hello", "hola"),
            ("good morning", "buenos días"),
            ("how are you", "cómo estás"),
            ("thank you", "gracias"),
            ("doctor", "médico"),
            ("hospital", "hospital"),
            ("patient", "paciente"),
            ("medicine", "medicina"),
            ("pain", "dolor"),
            ("i need help", "necesito ayuda"),
            ("emergency", "emergencia"),
        ];
        let en_fr = [
            ("hello", "bonjour"),
            ("good morning", "bonjour"),
            ("how are you", "comment allez-vous"),
            ("thank you", "merci"),
            ("doctor", "médecin"),
            ("hospital", "hôpital"),
            ("patient", "patient"),
            ("medicine", "médicament"),
            ("pain", "douleur"),
            ("i need help", "j'ai besoin d'aide"),
            ("emergency", "urgence"),
        ];
        for (phrase, translation) in en_es {
            self.phrases
                .entry("en-es".into())
                .or_default()
                .insert(phrase.into(), translation.into());
        }
        for (phrase, translation) in en_fr {
            self.phrases
                .entry("en-fr".into())
                .or_default()
                .insert(phrase.into(), translation.into());
        }
    }

    fn seed_terminology(&mut self) {
        let general: &[(&str, &[(&str, &str)])] = &[
            ("fever", &[("es", "fiebre"), ("fr", "fièvre"), ("de", "Fieber")]),
            (
                "headache",
                &[("es", "dolor de cabeza"), ("fr", "mal de tête"), ("de", "Kopfschmerzen")],
            ),
            ("nausea", &[("es", "náusea"), ("fr", "nausée"), ("de", "Übelkeit")]),
        ];
        let cardiology: &[(&str, &[(&str, &str)])] = &[
            (
                "heart attack",
                &[("es", "ataque cardíaco"), ("fr", "crise cardiaque"), ("de", "Herzinfarkt")],
            ),
            (
                "blood pressure",
                &[("es", "presión arterial"), ("fr", "pression artérielle"), ("de", "Blutdruck")],
            ),
            (
                "arrhythmia",
                &[("es", "arritmia"), ("fr", "arythmie"), ("de", "Arrhythmie")],
            ),
        ];

        for (context, table) in [("general", general), ("cardiology", cardiology)] {
            let entry = self
                .terminology
                .entry(("en".to_string(), context.to_string()))
                .or_default();
            for &(term, targets) in table {
                let mut by_lang = HashMap::new();
                for &(lang, translation) in targets {
                    by_lang.insert(lang.to_string(), translation.to_string());
                }
                entry.insert(term.to_string(), by_lang);
            }
        }
    }

    /// Terminology for (source, context), falling back to the general set.
    fn term_lookup(&self, request: &TranslationRequest, term: &str) -> Option<&str> {
        let contexts = [request.context_or_default(), "general"];
        for context in contexts {
            if let Some(terms) = self
                .terminology
                .get(&(request.source_lang.clone(), context.to_string()))
            {
                if let Some(by_lang) = terms.get(term) {
                    if let Some(translation) = by_lang.get(&request.target_lang) {
                        return Some(translation);
                    }
                }
            }
        }
        None
    }
}

impl Default for DictionaryInference {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Inference for DictionaryInference {
    async fn infer(&self, request: &TranslationRequest) -> Result<Translation> {
        let pair = format!("{}-{}", request.source_lang, request.target_lang);
        let text = request.text.trim().to_lowercase();
        if text.is_empty() {
            return Err(DriftlessError::Inference("empty input text".into()));
        }

        // Terminology outranks the phrase table: context-specific wording is
        // the whole point of carrying it.
        if let Some(translation) = self.term_lookup(request, &text) {
            return Ok(Translation::new(translation, EXACT_CONFIDENCE));
        }

        let phrases = self.phrases.get(&pair).ok_or_else(|| {
            DriftlessError::Inference(format!("no model available for {}", pair))
        })?;

        if let Some(translation) = phrases.get(&text) {
            return Ok(Translation::new(translation, EXACT_CONFIDENCE));
        }

        // Word-by-word fallback; unknown words pass through untranslated and
        // drag confidence down proportionally.
        let words: Vec<&str> = text.split_whitespace().collect();
        let mut translated = Vec::with_capacity(words.len());
        let mut matched = 0usize;
        for word in &words {
            if let Some(t) = self.term_lookup(request, word).or_else(|| {
                phrases.get(*word).map(|s| s.as_str())
            }) {
                translated.push(t.to_string());
                matched += 1;
            } else {
                translated.push((*word).to_string());
            }
        }

        let coverage = matched as f32 / words.len() as f32;
        Ok(Translation::new(
            &translated.join(" "),
            (EXACT_CONFIDENCE * coverage).max(0.3),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_terminology_hit() {
        let inference = DictionaryInference::new();
        let result = inference
            .infer(&TranslationRequest::new("fever", "en", "es"))
            .await
            .unwrap();
        assert_eq!(result.text, "fiebre");
        assert!((result.confidence - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_context_specific_terminology() {
        let inference = DictionaryInference::new();
        let result = inference
            .infer(
                &TranslationRequest::new("heart attack", "en", "fr").with_context("cardiology"),
            )
            .await
            .unwrap();
        assert_eq!(result.text, "crise cardiaque");
    }

    #[tokio::test]
    async fn test_exact_phrase() {
        let inference = DictionaryInference::new();
        let result = inference
            .infer(&TranslationRequest::new("I need help", "en", "es"))
            .await
            .unwrap();
        assert_eq!(result.text, "necesito ayuda");
    }

    #[tokio::test]
    async fn test_word_by_word_fallback_lowers_confidence() {
        let inference = DictionaryInference::new();
        let result = inference
            .infer(&TranslationRequest::new("doctor zzz", "en", "es"))
            .await
            .unwrap();
        assert_eq!(result.text, "médico zzz");
        assert!(result.confidence < 0.9);
    }

    #[tokio::test]
    async fn test_unknown_pair_fails() {
        let inference = DictionaryInference::new();
        let result = inference
            .infer(&TranslationRequest::new("hello", "en", "ja"))
            .await;
        assert!(matches!(result, Err(DriftlessError::Inference(_))));
    }

    #[tokio::test]
    async fn test_empty_text_fails() {
        let inference = DictionaryInference::new();
        let result = inference.infer(&TranslationRequest::new("  ", "en", "es")).await;
        assert!(matches!(result, Err(DriftlessError::Inference(_))));
    }
}
