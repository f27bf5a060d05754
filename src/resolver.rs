//! Wrapper chain resolution.
//!
//! A resolution starts from a document (or a locator to fetch), follows each
//! `Wrapper`'s `VASTAdTagURI` and stops at the first `InLine` ad. Every step
//! merges the chain-cumulative trackers of its document into one aggregate,
//! root first. Steps are strictly sequential: the next locator is only known
//! once the current document has been parsed.
//!
//! Synchronous and asynchronous resolution share [`ChainState`]; they differ
//! only in how the fetch of the next document is awaited.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{ResolveError, Result, VastError};
use crate::fetch::{AsyncFetcher, Fetcher};
use crate::models::{Document, NodeId, Tree};
use crate::parser::parse_document;
use crate::schema::{Schema, SchemaVersion};
use crate::stitcher::{node_to_xml_string, stitch_chain};

/// Default limit on the number of wrappers followed
pub const MAX_WRAPPER_DEPTH: usize = 10;

/// Default per-fetch timeout in milliseconds
pub const FETCH_TIMEOUT_MS: u64 = 3000;

/// Limits applied to one resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolveOptions {
    /// Number of wrapper hops that may be followed
    pub max_depth: usize,
    /// Timeout applied to each individual fetch
    pub fetch_timeout_ms: u64,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        ResolveOptions {
            max_depth: MAX_WRAPPER_DEPTH,
            fetch_timeout_ms: FETCH_TIMEOUT_MS,
        }
    }
}

impl ResolveOptions {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Where a resolution starts
#[derive(Debug, Clone)]
pub enum Source {
    /// Literal VAST XML
    Text(String),
    /// An already built or parsed document
    Document(Document),
    /// A locator to fetch first
    Url(String),
}

impl Source {
    /// Treat input starting with `<` as XML text, anything else as a locator
    pub fn detect(input: &str) -> Self {
        if input.trim_start().starts_with('<') {
            Source::Text(input.to_string())
        } else {
            Source::Url(input.trim().to_string())
        }
    }
}

impl From<Document> for Source {
    fn from(doc: Document) -> Self {
        Source::Document(doc)
    }
}

/// Tracker URLs merged across a chain, keyed by category.
///
/// Categories are the tag names the schema marks as cumulative
/// (`Impression`, `Error`, `ClickTracking`, ...). Tracking events are keyed
/// as `Tracking:<event>`; Extensions hold their serialized XML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trackers {
    categories: BTreeMap<String, Vec<String>>,
}

impl Trackers {
    pub fn push(&mut self, category: &str, value: String) {
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(value);
    }

    /// Values of one category in chain order (empty if never seen)
    pub fn get(&self, category: &str) -> &[String] {
        self.categories
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn impressions(&self) -> &[String] {
        self.get("Impression")
    }

    pub fn errors(&self) -> &[String] {
        self.get("Error")
    }

    pub fn tracking(&self, event: &str) -> &[String] {
        self.get(&format!("Tracking:{}", event))
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.categories
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

/// Where a chain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    Pending,
    InLineFound,
    Error,
    DepthExceeded,
}

/// What was resolved before a chain broke
#[derive(Debug, Clone, PartialEq)]
pub struct PartialChain {
    pub documents: Vec<Document>,
    pub trackers: Trackers,
    pub depth: usize,
    pub status: ChainStatus,
}

/// A fully resolved ad: every document of the chain plus merged trackers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAd {
    /// Visited documents, root first, InLine document last
    pub chain: Vec<Document>,
    pub trackers: Trackers,
    /// Number of wrappers followed
    pub depth: usize,
}

impl ResolvedAd {
    /// The terminal document holding the InLine creative; `None` only for a
    /// hand-built value with an empty chain
    pub fn inline(&self) -> Option<&Document> {
        self.chain.last()
    }

    /// Text contents of the given tags across the whole chain, root first
    pub fn contents(&self, tags: &[&str]) -> Vec<String> {
        self.chain
            .iter()
            .flat_map(|doc| doc.tree.contents_of(tags))
            .collect()
    }

    /// One document combining the InLine ad with every wrapper's trackers
    pub fn stitch(&self) -> Result<Tree> {
        stitch_chain(&self.chain)
    }
}

enum AdKind {
    Wrapper { locator: String },
    InLine,
}

enum Step {
    Fetch(String),
    Done,
}

/// Working set of one resolution. Never shared between resolutions.
#[derive(Debug)]
pub struct ChainState {
    documents: Vec<Document>,
    trackers: Trackers,
    depth: usize,
    max_depth: usize,
    status: ChainStatus,
}

impl ChainState {
    pub fn new(max_depth: usize) -> Self {
        ChainState {
            documents: Vec::new(),
            trackers: Trackers::default(),
            depth: 0,
            max_depth,
            status: ChainStatus::Pending,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn status(&self) -> ChainStatus {
        self.status
    }

    pub fn trackers(&self) -> &Trackers {
        &self.trackers
    }

    fn begin(&mut self, source: Source) -> Result<Step> {
        match source {
            Source::Text(xml) => self.enter_text("inline", &xml),
            Source::Document(mut doc) => {
                doc.depth = self.depth;
                self.enter(doc)
            }
            Source::Url(locator) => Ok(Step::Fetch(locator)),
        }
    }

    fn enter_text(&mut self, source: &str, xml: &str) -> Result<Step> {
        let doc = parse_document(xml, source, self.depth)?;
        self.enter(doc)
    }

    /// Classify a parsed document, merge its trackers and pick the next step
    fn enter(&mut self, doc: Document) -> Result<Step> {
        let (ad, kind) = classify(&doc.tree)?;
        self.merge(&doc.tree, ad);
        let source = doc.source.clone();
        self.documents.push(doc);

        match kind {
            AdKind::InLine => {
                self.status = ChainStatus::InLineFound;
                Ok(Step::Done)
            }
            AdKind::Wrapper { locator } => {
                self.depth += 1;
                if self.depth > self.max_depth {
                    self.status = ChainStatus::DepthExceeded;
                    return Err(VastError::DepthExceeded {
                        max_depth: self.max_depth,
                    });
                }
                let next = resolve_locator(&source, &locator);
                debug!("Following wrapper at depth {}: {}", self.depth, next);
                Ok(Step::Fetch(next))
            }
        }
    }

    /// Merge the cumulative elements below the followed Ad only
    fn merge(&mut self, tree: &Tree, ad: NodeId) {
        let version = tree
            .node(tree.root())
            .attr("version")
            .and_then(|v| v.parse::<SchemaVersion>().ok())
            .unwrap_or(SchemaVersion::V4);
        let schema = Schema::get(version);
        self.collect(schema, tree, ad);
    }

    fn collect(&mut self, schema: &Schema, tree: &Tree, id: NodeId) {
        let node = tree.node(id);
        if schema.is_cumulative(&node.tag) {
            match node.tag.as_str() {
                "Extension" => {
                    // Extension bodies are opaque; keep them whole.
                    self.trackers.push("Extension", node_to_xml_string(tree, id));
                    return;
                }
                "Tracking" => {
                    let category = match node.attr("event") {
                        Some(event) => format!("Tracking:{}", event),
                        None => "Tracking".to_string(),
                    };
                    if node.has_content() {
                        self.trackers.push(&category, node.content.trim().to_string());
                    }
                }
                tag => {
                    if node.has_content() {
                        self.trackers.push(tag, node.content.trim().to_string());
                    }
                }
            }
        }
        for child in tree.children(id) {
            self.collect(schema, tree, child);
        }
    }

    fn finish(self) -> ResolvedAd {
        info!(
            "Resolved wrapper chain of {} document(s), {} wrapper(s) deep",
            self.documents.len(),
            self.depth
        );
        ResolvedAd {
            chain: self.documents,
            trackers: self.trackers,
            depth: self.depth,
        }
    }

    fn fail(mut self, source: VastError) -> ResolveError {
        if self.status != ChainStatus::DepthExceeded {
            self.status = ChainStatus::Error;
        }
        warn!("Wrapper chain stopped at depth {}: {}", self.depth, source);
        ResolveError::Chain {
            source,
            partial: PartialChain {
                documents: self.documents,
                trackers: self.trackers,
                depth: self.depth,
                status: self.status,
            },
        }
    }
}

/// Decide whether the first Ad of a document is a wrapper or an InLine ad.
/// Other Ads of the same response are ignored.
fn classify(tree: &Tree) -> Result<(NodeId, AdKind)> {
    let root = tree.root();
    if tree.tag(root) != "VAST" {
        return Err(VastError::MalformedDocument(format!(
            "root element is <{}>, expected <VAST>",
            tree.tag(root)
        )));
    }

    let ad = tree
        .child(root, "Ad")
        .ok_or_else(|| VastError::MalformedDocument("no Ad element in VAST response".to_string()))?;

    if let Some(wrapper) = tree.child(ad, "Wrapper") {
        let locator = tree
            .child(wrapper, "VASTAdTagURI")
            .map(|uri| tree.node(uri).content.trim().to_string())
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| VastError::MissingField("VASTAdTagURI".to_string()))?;
        return Ok((ad, AdKind::Wrapper { locator }));
    }

    if tree.child(ad, "InLine").is_some() {
        return Ok((ad, AdKind::InLine));
    }

    Err(VastError::MalformedDocument(
        "Ad has neither InLine nor Wrapper".to_string(),
    ))
}

/// Resolve a possibly relative locator against the document that carried it
fn resolve_locator(current: &str, locator: &str) -> String {
    if url::Url::parse(locator).is_ok() {
        return locator.to_string();
    }
    match url::Url::parse(current).and_then(|base| base.join(locator)) {
        Ok(joined) => joined.to_string(),
        Err(_) => locator.to_string(),
    }
}

/// Cancels an in-flight asynchronous resolution
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        AbortHandle {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn abort(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once `abort` has been called
    async fn aborted(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A resolution running on the tokio runtime
pub struct ResolveTask {
    abort: AbortHandle,
    handle: JoinHandle<()>,
}

impl ResolveTask {
    /// Abort the resolution; the callback receives `ResolveError::Aborted`
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Wait until the callback has run
    pub async fn join(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| VastError::Other(format!("Resolution task failed: {}", e)))
    }
}

/// Follows wrapper chains with a fixed set of options
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    options: ResolveOptions,
}

impl Resolver {
    pub fn new(options: ResolveOptions) -> Self {
        Resolver { options }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Resolve a chain, blocking on each fetch
    pub fn resolve_sync(
        &self,
        source: impl Into<Source>,
        fetcher: &dyn Fetcher,
    ) -> std::result::Result<ResolvedAd, ResolveError> {
        let timeout = self.options.fetch_timeout();
        let mut state = ChainState::new(self.options.max_depth);
        let mut step = state.begin(source.into());

        loop {
            match step {
                Ok(Step::Done) => return Ok(state.finish()),
                Ok(Step::Fetch(locator)) => {
                    step = fetcher
                        .fetch(&locator, timeout)
                        .and_then(|xml| state.enter_text(&locator, &xml));
                }
                Err(err) => return Err(state.fail(err)),
            }
        }
    }

    /// Resolve a chain, suspending at each fetch
    pub async fn resolve_async(
        &self,
        source: impl Into<Source>,
        fetcher: &dyn AsyncFetcher,
    ) -> std::result::Result<ResolvedAd, ResolveError> {
        self.resolve_with_abort(source.into(), fetcher, &AbortHandle::new())
            .await
    }

    /// Asynchronous resolution that stops with `Aborted` once `abort` fires
    pub async fn resolve_with_abort(
        &self,
        source: Source,
        fetcher: &dyn AsyncFetcher,
        abort: &AbortHandle,
    ) -> std::result::Result<ResolvedAd, ResolveError> {
        let timeout = self.options.fetch_timeout();
        let mut state = ChainState::new(self.options.max_depth);
        let mut step = state.begin(source);

        loop {
            if abort.is_aborted() {
                debug!("Resolution aborted at depth {}", state.depth());
                return Err(ResolveError::Aborted);
            }
            match step {
                Ok(Step::Done) => return Ok(state.finish()),
                Ok(Step::Fetch(locator)) => {
                    let fetched = tokio::select! {
                        biased;
                        _ = abort.aborted() => None,
                        result = tokio::time::timeout(timeout, fetcher.fetch(&locator, timeout)) => Some(result),
                    };
                    let Some(result) = fetched else {
                        debug!("Resolution aborted while fetching {}", locator);
                        return Err(ResolveError::Aborted);
                    };
                    step = result
                        .unwrap_or_else(|_| {
                            Err(VastError::Timeout {
                                url: locator.clone(),
                                timeout_ms: self.options.fetch_timeout_ms,
                            })
                        })
                        .and_then(|xml| state.enter_text(&locator, &xml));
                }
                Err(err) => return Err(state.fail(err)),
            }
        }
    }

    /// Run an asynchronous resolution on the current tokio runtime and hand
    /// the outcome to `on_done`. Must be called from within a runtime.
    pub fn spawn<F>(
        &self,
        source: impl Into<Source>,
        fetcher: Arc<dyn AsyncFetcher>,
        on_done: F,
    ) -> ResolveTask
    where
        F: FnOnce(std::result::Result<ResolvedAd, ResolveError>) + Send + 'static,
    {
        let resolver = self.clone();
        let source = source.into();
        let abort = AbortHandle::new();
        let task_abort = abort.clone();

        let handle = tokio::spawn(async move {
            let result = resolver
                .resolve_with_abort(source, fetcher.as_ref(), &task_abort)
                .await;
            on_done(result);
        });

        ResolveTask { abort, handle }
    }
}
