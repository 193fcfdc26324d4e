//! Folder name resolution
//!
//! Maps a display name to a folder id. First hit wins:
//! 1. Exact lookup in the preloaded resolution cache
//! 2. Lowercase lookup
//! 3. Lookup of each name variation, verbatim and lowercased
//! 4. Live search, bounded by an overall timeout:
//!    - without a scope root, a name-contains query per variation
//!    - with a scope root, a breadth-first walk of child folders
//!
//! A miss is never an error: the caller turns it into a not-found outcome.

use crate::drive::{Folder, ResourceStore};
use crate::error::ConfigError;
use crate::retry::{Executor, RetryPolicy};
use regex::Regex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Leading honorific with optional dot
static HONORIFIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:mr|mrs|ms|miss|dr|prof|sir|madam)\.?\s+").expect("Invalid honorific regex")
});

static WHITESPACE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

static PUNCTUATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]").expect("Invalid punctuation regex"));

/// Variations tried by the global search
const GLOBAL_SEARCH_VARIATIONS: usize = 5;

/// Depth below the scope root searched by the walk
const DEFAULT_MAX_DEPTH: u32 = 3;

/// Times a node may go back on the queue after a retryable failure
const DEFAULT_REQUEUE_BUDGET: u32 = 2;

/// Preloaded name → folder id map
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    entries: HashMap<String, String>,
}

impl ResolutionCache {
    /// Empty cache
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from (name, id) pairs, indexing both the name and its lowercase
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = HashMap::new();
        let mut lowered = Vec::new();
        for (name, id) in entries {
            let name = name.into();
            let id = id.into();
            lowered.push((name.to_lowercase(), id.clone()));
            map.insert(name, id);
        }
        // Exact spellings win over lowercase aliases
        for (name, id) in lowered {
            map.entry(name).or_insert(id);
        }
        Self { entries: map }
    }

    /// Load a JSON object `{"Folder Name": "folderId", ...}`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidCache {
            path: path.to_path_buf(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let raw: HashMap<String, String> =
            serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;
        Ok(Self::from_entries(raw))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Candidate spellings of a name, deduplicated, in lookup order
///
/// Original, lowercase, uppercase, whitespace-normalized,
/// honorific-stripped, punctuation-stripped.
pub fn name_variations(name: &str) -> Vec<String> {
    let normalized = WHITESPACE_REGEX.replace_all(name.trim(), " ").into_owned();
    let no_title = HONORIFIC_REGEX.replace(&normalized, "").into_owned();
    let no_punct = PUNCTUATION_REGEX.replace_all(&no_title, "");
    let no_punct = WHITESPACE_REGEX.replace_all(no_punct.trim(), " ").into_owned();

    let candidates = [
        name.to_string(),
        name.to_lowercase(),
        name.to_uppercase(),
        normalized,
        no_title,
        no_punct,
    ];

    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Where a folder id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    GlobalSearch,
    ScopedSearch,
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::GlobalSearch => "global_search",
            ResolutionSource::ScopedSearch => "scoped_search",
        })
    }
}

/// A resolved folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: String,
    pub source: ResolutionSource,
}

/// A folder waiting to be listed by the scoped walk
#[derive(Debug, Clone)]
struct FolderTask {
    id: String,
    /// Depth from the scope root (0 = root)
    depth: u32,
    requeues: u32,
}

impl FolderTask {
    fn root(id: &str) -> Self {
        Self {
            id: id.to_string(),
            depth: 0,
            requeues: 0,
        }
    }
}

/// Pick the best folder for `wanted`: exact case-insensitive name, else
/// containment in either direction
fn best_match<'a>(folders: &'a [Folder], wanted: &str) -> Option<&'a Folder> {
    let wanted = wanted.to_lowercase();
    folders
        .iter()
        .find(|f| f.name.to_lowercase() == wanted)
        .or_else(|| {
            folders.iter().find(|f| {
                let name = f.name.to_lowercase();
                !name.is_empty() && (name.contains(&wanted) || wanted.contains(&name))
            })
        })
}

/// Name → folder id resolver
pub struct Resolver {
    store: Arc<dyn ResourceStore>,
    executor: Arc<Executor>,
    cache: ResolutionCache,
    timeout: Duration,
    max_depth: u32,
    requeue_budget: u32,
}

impl Resolver {
    /// Create a resolver with the default walk depth and requeue budget
    pub fn new(
        store: Arc<dyn ResourceStore>,
        executor: Arc<Executor>,
        cache: ResolutionCache,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            cache,
            timeout,
            max_depth: DEFAULT_MAX_DEPTH,
            requeue_budget: DEFAULT_REQUEUE_BUDGET,
        }
    }

    /// Cache lookup only
    pub fn lookup_cache(&self, name: &str) -> Option<String> {
        if let Some(id) = self.cache.get(name) {
            return Some(id.to_string());
        }
        if let Some(id) = self.cache.get(&name.to_lowercase()) {
            return Some(id.to_string());
        }
        name_variations(name).iter().find_map(|v| {
            self.cache
                .get(v)
                .or_else(|| self.cache.get(&v.to_lowercase()))
                .map(str::to_string)
        })
    }

    /// Resolve `name`, searching below `scope_root` when given
    pub async fn resolve(&self, name: &str, scope_root: Option<&str>) -> Option<Resolved> {
        let start = Instant::now();

        if name.trim().is_empty() {
            return None;
        }

        if let Some(id) = self.lookup_cache(name) {
            info!(
                name,
                folder_id = %id,
                source = %ResolutionSource::Cache,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Folder resolved"
            );
            return Some(Resolved {
                id,
                source: ResolutionSource::Cache,
            });
        }

        let variations = name_variations(name);
        let search = async {
            match scope_root {
                Some(root) => self.scoped_search(root, &variations).await,
                None => self.global_search(&variations).await,
            }
        };

        let result = tokio::time::timeout(self.timeout, search).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Some(resolved)) => {
                info!(
                    name,
                    folder_id = %resolved.id,
                    source = %resolved.source,
                    elapsed_ms,
                    "Folder resolved"
                );
                Some(resolved)
            }
            Ok(None) => {
                info!(name, elapsed_ms, "Folder not found");
                None
            }
            Err(_) => {
                warn!(
                    name,
                    timeout_secs = self.timeout.as_secs(),
                    elapsed_ms,
                    "Folder search timed out"
                );
                None
            }
        }
    }

    /// Name-contains query for each leading variation
    async fn global_search(&self, variations: &[String]) -> Option<Resolved> {
        for variation in variations.iter().take(GLOBAL_SEARCH_VARIATIONS) {
            let context = format!("name contains '{}'", variation);
            let folders = match self
                .executor
                .execute("files.list", &context, &RetryPolicy::search(), || {
                    self.store.search_folders(variation)
                })
                .await
            {
                Ok(folders) => folders,
                Err(e) if e.is_cancelled() => return None,
                Err(e) => {
                    warn!(variation = %variation, error = %e, "Folder search failed, trying next variation");
                    continue;
                }
            };

            if let Some(folder) = best_match(&folders, variation) {
                return Some(Resolved {
                    id: folder.id.clone(),
                    source: ResolutionSource::GlobalSearch,
                });
            }
        }
        None
    }

    /// Breadth-first walk below `root`
    async fn scoped_search(&self, root: &str, variations: &[String]) -> Option<Resolved> {
        let wanted: HashSet<String> = variations.iter().map(|v| v.to_lowercase()).collect();
        let mut queue = VecDeque::from([FolderTask::root(root)]);
        let mut listed = 0u64;

        while let Some(task) = queue.pop_front() {
            // Step 1: list every page of this node
            let children = match self.list_all_children(&task.id).await {
                Ok(children) => children,
                Err(e) if e.is_cancelled() => return None,
                Err(e) if e.root().is_retryable() && task.requeues < self.requeue_budget => {
                    debug!(folder_id = %task.id, requeues = task.requeues + 1, "Requeueing folder after rate limit");
                    queue.push_back(FolderTask {
                        requeues: task.requeues + 1,
                        ..task
                    });
                    continue;
                }
                Err(e) => {
                    warn!(folder_id = %task.id, error = %e, "Skipping folder in scoped search");
                    continue;
                }
            };
            listed += 1;

            // Step 2: match this level
            if let Some(folder) = children
                .iter()
                .find(|f| wanted.contains(&f.name.to_lowercase()))
            {
                debug!(folders_listed = listed, depth = task.depth + 1, "Scoped match");
                return Some(Resolved {
                    id: folder.id.clone(),
                    source: ResolutionSource::ScopedSearch,
                });
            }

            // Step 3: descend
            if task.depth + 1 < self.max_depth {
                queue.extend(children.into_iter().map(|f| FolderTask {
                    id: f.id,
                    depth: task.depth + 1,
                    requeues: 0,
                }));
            }
        }

        debug!(folders_listed = listed, "Scoped search exhausted");
        None
    }

    async fn list_all_children(&self, parent: &str) -> crate::error::RemoteResult<Vec<Folder>> {
        let mut children = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let context = format!("parent={}", parent);
            let page = self
                .executor
                .execute("files.list", &context, &RetryPolicy::search(), || {
                    self.store.list_child_folders(parent, token.as_deref())
                })
                .await?;
            children.extend(page.folders);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => return Ok(children),
            }
        }
    }
}
