//! Storage lister: lazily pages through the input bucket and yields audio
//! files that pass the folder, filename-prefix and pattern filters.

use std::collections::VecDeque;
use std::sync::Arc;

use glob::{MatchOptions, Pattern};
use tracing::debug;

use crate::adapters::ObjectStore;
use crate::config::StorageSettings;
use crate::domain::AudioReference;
use crate::error::{PipelineError, Result};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Restartable, finite sequence of matching audio files
pub struct AudioLister {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    folder: String,
    file_prefix: String,
    patterns: Vec<Pattern>,
    limit: Option<usize>,

    buffer: VecDeque<AudioReference>,
    page_token: Option<String>,
    exhausted: bool,
    yielded: usize,
}

impl AudioLister {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        settings: &StorageSettings,
        limit: Option<usize>,
    ) -> Result<Self> {
        let patterns = settings
            .audio_patterns
            .iter()
            .map(|p| {
                Pattern::new(p).map_err(|e| {
                    PipelineError::configuration(format!("invalid audio pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            store,
            bucket: settings.input_bucket.clone(),
            folder: settings.input_folder.clone(),
            file_prefix: settings.file_prefix_filter.clone(),
            patterns,
            limit,
            buffer: VecDeque::new(),
            page_token: None,
            exhausted: false,
            yielded: 0,
        })
    }

    /// Whether an object passes every filter
    pub fn matches(&self, audio: &AudioReference) -> bool {
        if audio.object.ends_with('/') || !audio.object.starts_with(&self.folder) {
            return false;
        }

        let name = audio.file_name();
        if name.is_empty() || !name.starts_with(&self.file_prefix) {
            return false;
        }

        self.patterns.is_empty()
            || self
                .patterns
                .iter()
                .any(|p| p.matches_with(name, MATCH_OPTIONS))
    }

    /// Next matching file, fetching another page when the buffer runs dry
    pub async fn next(&mut self) -> Result<Option<AudioReference>> {
        loop {
            if self.limit.is_some_and(|limit| self.yielded >= limit) {
                return Ok(None);
            }

            if let Some(audio) = self.buffer.pop_front() {
                self.yielded += 1;
                return Ok(Some(audio));
            }

            if self.exhausted {
                return Ok(None);
            }

            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let page = self
            .store
            .list_page(&self.bucket, &self.folder, self.page_token.as_deref())
            .await?;

        let listed = page.objects.len();
        let matching: Vec<AudioReference> = page
            .objects
            .into_iter()
            .filter(|audio| self.matches(audio))
            .collect();

        debug!(
            bucket = %self.bucket,
            listed,
            matching = matching.len(),
            "Filtered storage page"
        );

        self.buffer.extend(matching);
        self.page_token = page.next_page_token;
        self.exhausted = self.page_token.is_none();
        Ok(())
    }

    /// Start over from the first page
    pub fn restart(&mut self) {
        self.buffer.clear();
        self.page_token = None;
        self.exhausted = false;
        self.yielded = 0;
    }

    /// Drain the remaining files
    pub async fn collect_all(&mut self) -> Result<Vec<AudioReference>> {
        let mut files = Vec::new();
        while let Some(audio) = self.next().await? {
            files.push(audio);
        }
        Ok(files)
    }
}
