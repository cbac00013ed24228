use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::discovery::{RepositoryDescriptor, RepositoryStream};

/// Number of repositories using one primary language
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageCount {
    pub language: String,
    pub count: usize,
}

#[derive(Debug, Default)]
pub struct LanguageTally {
    counts: HashMap<String, usize>,
}

impl LanguageTally {
    pub fn record(&mut self, repo: &RepositoryDescriptor) {
        match repo.language.as_deref().filter(|l| !l.is_empty()) {
            Some(language) => {
                info!("{} is in {}", repo.name, language);
                *self.counts.entry(language.to_string()).or_default() += 1;
            }
            None => debug!("{} has no primary language", repo.name),
        }
    }

    /// Entries by descending count, ties by ascending language name
    pub fn into_sorted(self) -> Vec<LanguageCount> {
        let mut entries: Vec<LanguageCount> = self
            .counts
            .into_iter()
            .map(|(language, count)| LanguageCount { language, count })
            .collect();
        entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.language.cmp(&b.language)));
        entries
    }
}

/// Drain `stream` and count repositories per language
pub async fn tally_languages(stream: RepositoryStream) -> Vec<LanguageCount> {
    stream
        .into_stream()
        .fold(LanguageTally::default(), |mut tally, repo| async move {
            tally.record(&repo);
            tally
        })
        .await
        .into_sorted()
}
