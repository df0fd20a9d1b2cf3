//! Okapi BM25 ranking over short course documents.
//!
//! Latin text is split into lowercase words; runs of CJK characters become
//! overlapping bigrams (single characters stay unigrams), which is enough to
//! match Chinese course titles without a segmenter.

use std::collections::{HashMap, HashSet};

const K1: f64 = 1.2;
const B: f64 = 0.75;

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
        | '\u{AC00}'..='\u{D7AF}')
}

fn push_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => tokens.push(run[0].to_string()),
        _ => tokens.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
    }
    run.clear();
}

/// Tokens used both for documents and queries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut run = Vec::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            run.push(c);
        } else if c.is_alphanumeric() {
            push_cjk(&mut run, &mut tokens);
            word.extend(c.to_lowercase());
        } else {
            push_cjk(&mut run, &mut tokens);
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
        }
    }
    push_cjk(&mut run, &mut tokens);
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

/// Index built once per search over the candidate documents.
pub struct Bm25 {
    docs: Vec<HashMap<String, u32>>,
    lengths: Vec<f64>,
    avg_len: f64,
    doc_freq: HashMap<String, u32>,
}

impl Bm25 {
    pub fn new<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut docs = Vec::new();
        let mut lengths = Vec::new();
        let mut doc_freq: HashMap<String, u32> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc.as_ref());
            lengths.push(tokens.len() as f64);
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            docs.push(tf);
        }

        let avg_len = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<f64>() / lengths.len() as f64
        };

        Self {
            docs,
            lengths,
            avg_len,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.docs.len() as f64;
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score of document `index` for already tokenized, de-duplicated terms.
    fn score(&self, index: usize, terms: &[String]) -> f64 {
        let tf = &self.docs[index];
        let norm = if self.avg_len > 0.0 {
            1.0 - B + B * self.lengths[index] / self.avg_len
        } else {
            1.0
        };
        terms
            .iter()
            .filter_map(|term| tf.get(term).map(|&f| (term, f as f64)))
            .map(|(term, f)| self.idf(term) * f * (K1 + 1.0) / (f + K1 * norm))
            .sum()
    }

    /// Indices of documents with a positive score, best first. Ties keep
    /// document order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<(usize, f64)> {
        let mut seen = HashSet::new();
        let terms: Vec<String> = tokenize(query)
            .into_iter()
            .filter(|t| seen.insert(t.clone()))
            .collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.docs.len())
            .map(|i| (i, self.score(i, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }
}
