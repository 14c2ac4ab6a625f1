//! String-table line provider.
//!
//! Looks line ids up in an in-memory table, falling back to the text carried by
//! the program, then applies substitutions and splits out hashtag metadata and
//! the speaker prefix.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use yarnweave_abstraction::{
    expand_substitutions, CancellationScope, LineError, LineId, LineProvider, LineRef, LocalizedLine,
};

#[derive(Debug, Clone, Default)]
struct TableEntry {
    text: String,
    metadata: Vec<String>,
}

/// Line provider backed by a string table.
#[derive(Debug, Default)]
pub struct StringTableLineProvider {
    table: RwLock<HashMap<LineId, TableEntry>>,
}

impl StringTableLineProvider {
    /// Creates a provider with an empty table; every line uses its raw text.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the text for a line.
    pub fn insert(&self, id: impl Into<LineId>, text: impl Into<String>) {
        self.insert_with_metadata(id, text, Vec::new());
    }

    /// Adds or replaces the text and metadata tags for a line.
    pub fn insert_with_metadata(&self, id: impl Into<LineId>, text: impl Into<String>, metadata: Vec<String>) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), TableEntry { text: text.into(), metadata });
    }

    /// Adds every `(id, text)` pair.
    pub fn extend<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<LineId>,
        V: Into<String>,
    {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        for (id, text) in entries {
            table.insert(id.into(), TableEntry { text: text.into(), metadata: Vec::new() });
        }
    }

    /// Number of lines in the table.
    pub fn len(&self) -> usize {
        self.table.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` when the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, line: &LineRef) -> Result<TableEntry, LineError> {
        if let Some(entry) = self.table.read().unwrap_or_else(PoisonError::into_inner).get(&line.id) {
            return Ok(entry.clone());
        }
        if line.raw_text.is_empty() {
            return Err(LineError::NotFound(line.id.clone()));
        }
        debug!(line_id = %line.id, "Line not in string table; using program text");
        Ok(TableEntry { text: line.raw_text.clone(), metadata: Vec::new() })
    }
}

#[async_trait]
impl LineProvider for StringTableLineProvider {
    async fn localized_line(
        &self,
        line: &LineRef,
        scope: &CancellationScope,
    ) -> Result<LocalizedLine, LineError> {
        if scope.is_cancelled() {
            return Err(LineError::Cancelled);
        }

        let entry = self.lookup(line)?;
        let expanded = expand_substitutions(&entry.text, &line.substitutions)?;
        let (text, tags) = split_hashtags(&expanded);

        let mut metadata: BTreeSet<String> = entry.metadata.into_iter().collect();
        metadata.extend(tags);

        Ok(LocalizedLine {
            text_id: line.id.clone(),
            character_name: character_name(text),
            display_text: text.to_string(),
            metadata,
        })
    }
}

/// Splits trailing `#tag` words off a line.
fn split_hashtags(text: &str) -> (&str, Vec<String>) {
    let mut body = text.trim_end();
    let mut tags = Vec::new();

    while let Some(split) = body.rfind(char::is_whitespace) {
        let word = &body[split..].trim_start();
        match word.strip_prefix('#') {
            Some(tag) if !tag.is_empty() => {
                tags.push(tag.to_string());
                body = body[..split].trim_end();
            }
            _ => break,
        }
    }

    tags.reverse();
    (body, tags)
}

/// Returns the speaker of a `Name: text` line.
fn character_name(text: &str) -> Option<String> {
    let (name, rest) = text.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || rest.trim().is_empty() || name.contains(['{', '}', '[', ']']) {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn localize(provider: &StringTableLineProvider, line: LineRef) -> Result<LocalizedLine, LineError> {
        provider.localized_line(&line, &CancellationScope::new()).await
    }

    #[tokio::test]
    async fn test_table_text_wins_over_raw_text() {
        let provider = StringTableLineProvider::new();
        provider.insert("line:1", "Bonjour");

        let line = localize(&provider, LineRef::new("line:1", "Hello")).await.unwrap();
        assert_eq!(line.display_text, "Bonjour");
        assert_eq!(line.text_id, LineId::new("line:1"));
    }

    #[tokio::test]
    async fn test_falls_back_to_raw_text() {
        let provider = StringTableLineProvider::new();
        let line = localize(&provider, LineRef::new("line:2", "Hello")).await.unwrap();
        assert_eq!(line.display_text, "Hello");
    }

    #[tokio::test]
    async fn test_missing_line_is_an_error() {
        let provider = StringTableLineProvider::new();
        let result = localize(&provider, LineRef::new("line:3", "")).await;
        assert_eq!(result, Err(LineError::NotFound(LineId::new("line:3"))));
    }

    #[tokio::test]
    async fn test_substitutions_and_speaker() {
        let provider = StringTableLineProvider::new();
        provider.insert("line:4", "Sally: You have {0} coins.");

        let line = localize(
            &provider,
            LineRef::new("line:4", "").with_substitutions(vec!["12".to_string()]),
        )
        .await
        .unwrap();

        assert_eq!(line.display_text, "Sally: You have 12 coins.");
        assert_eq!(line.character_name.as_deref(), Some("Sally"));
        assert_eq!(line.text_without_character_name(), "You have 12 coins.");
    }

    #[tokio::test]
    async fn test_missing_substitution() {
        let provider = StringTableLineProvider::new();
        let result = localize(&provider, LineRef::new("line:5", "Hi {0}")).await;
        assert_eq!(result, Err(LineError::MissingSubstitution { index: 0 }));
    }

    #[tokio::test]
    async fn test_hashtags_become_metadata() {
        let provider = StringTableLineProvider::new();
        provider.insert_with_metadata("line:6", "Narrator: It rains. #mood:grey #lastline", vec!["line:6".to_string()]);

        let line = localize(&provider, LineRef::new("line:6", "")).await.unwrap();
        assert_eq!(line.display_text, "Narrator: It rains.");
        let expected: BTreeSet<String> =
            ["line:6", "mood:grey", "lastline"].into_iter().map(String::from).collect();
        assert_eq!(line.metadata, expected);
    }

    #[tokio::test]
    async fn test_cancelled_scope() {
        let provider = StringTableLineProvider::new();
        let scope = CancellationScope::new();
        scope.cancel();
        let result = provider.localized_line(&LineRef::new("line:7", "Hi"), &scope).await;
        assert_eq!(result, Err(LineError::Cancelled));
    }

    #[test]
    fn test_split_hashtags() {
        assert_eq!(split_hashtags("plain text"), ("plain text", vec![]));
        assert_eq!(split_hashtags("a # b"), ("a # b", vec![]));
        assert_eq!(split_hashtags("x #a #b  "), ("x", vec!["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_character_name() {
        assert_eq!(character_name("Old Man: Hello"), Some("Old Man".to_string()));
        assert_eq!(character_name("No speaker here"), None);
        assert_eq!(character_name(": empty name"), None);
        assert_eq!(character_name("Trailing:"), None);
    }

    #[test]
    fn test_extend_and_len() {
        let provider = StringTableLineProvider::new();
        assert!(provider.is_empty());
        provider.extend([("line:a", "A"), ("line:b", "B")]);
        assert_eq!(provider.len(), 2);
    }
}
