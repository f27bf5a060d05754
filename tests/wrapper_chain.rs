use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vast_chain::fetch::{AsyncFetcher, CachedFetcher, Fetcher};
use vast_chain::parser::parse_document;
use vast_chain::resolver::{ChainStatus, ResolveOptions, Resolver, Source};
use vast_chain::{ErrorKind, ResolveError, Result, VastError};

const ROOT: &str = "http://vasts/minimal_wrapper_1.xml";

const CHAIN: [&str; 4] = [
    "minimal_wrapper_1.xml",
    "minimal_wrapper_2.xml",
    "minimal_wrapper_3.xml",
    "vast_inline.xml",
];

fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(path).unwrap()
}

fn chain_fetcher() -> CachedFetcher {
    let mut fetcher = CachedFetcher::new();
    for name in CHAIN {
        fetcher.insert(format!("http://vasts/{}", name), fixture(name));
    }
    fetcher
}

/// Records every locator it is asked for and optionally stalls
struct RecordingFetcher {
    inner: CachedFetcher,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingFetcher {
    fn new(inner: CachedFetcher) -> Self {
        Self::slow(inner, Duration::ZERO)
    }

    fn slow(inner: CachedFetcher, delay: Duration) -> Self {
        RecordingFetcher {
            inner,
            calls: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for RecordingFetcher {
    fn fetch(&self, locator: &str, timeout: Duration) -> Result<String> {
        self.calls.lock().unwrap().push(locator.to_string());
        Fetcher::fetch(&self.inner, locator, timeout)
    }
}

#[async_trait]
impl AsyncFetcher for RecordingFetcher {
    async fn fetch(&self, locator: &str, timeout: Duration) -> Result<String> {
        self.calls.lock().unwrap().push(locator.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        AsyncFetcher::fetch(&self.inner, locator, timeout).await
    }
}

fn expected_impressions() -> Vec<&'static str> {
    vec![
        "impression url wrapper 1",
        "impression url wrapper 2",
        "impression url wrapper 3",
        "impression url vast inline",
    ]
}

#[test]
fn should_parse_a_vast_synchronously() {
    let fetcher = RecordingFetcher::new(chain_fetcher());
    let ad = Resolver::default()
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap();

    assert_eq!(fetcher.calls().len(), 4);
    assert_eq!(ad.contents(&["Impression"]), expected_impressions());
    assert_eq!(ad.trackers.impressions(), expected_impressions().as_slice());
    assert_eq!(ad.depth, 3);
    assert_eq!(ad.chain.len(), 4);
    assert_eq!(ad.inline().unwrap().source, "http://vasts/vast_inline.xml");
    let depths: Vec<usize> = ad.chain.iter().map(|doc| doc.depth).collect();
    assert_eq!(depths, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn should_parse_a_vast_asynchronously() {
    let fetcher = RecordingFetcher::new(chain_fetcher());
    let ad = Resolver::default()
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap();

    assert_eq!(
        fetcher.calls(),
        vec![
            "http://vasts/minimal_wrapper_1.xml",
            "http://vasts/minimal_wrapper_2.xml",
            "http://vasts/minimal_wrapper_3.xml",
            "http://vasts/vast_inline.xml",
        ]
    );
    assert_eq!(ad.contents(&["Impression"]), expected_impressions());
}

#[test]
fn every_category_has_one_entry_per_step() {
    let ad = Resolver::default()
        .resolve_sync(Source::Url(ROOT.to_string()), &chain_fetcher())
        .unwrap();

    assert_eq!(
        ad.trackers.errors(),
        [
            "error url wrapper 1",
            "error url wrapper 2",
            "error url wrapper 3",
            "error url vast inline",
        ]
    );
    assert_eq!(
        ad.trackers.tracking("start"),
        [
            "start url wrapper 1",
            "start url wrapper 2",
            "start url wrapper 3",
            "start url vast inline",
        ]
    );
    assert_eq!(ad.trackers.get("ClickTracking").len(), 4);
}

#[tokio::test]
async fn sync_and_async_results_are_identical() {
    let fetcher = chain_fetcher();
    let resolver = Resolver::default();
    let sync = resolver
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap();
    let asynchronous = resolver
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap();

    assert_eq!(sync, asynchronous);
    assert_eq!(
        serde_json::to_string(&sync).unwrap(),
        serde_json::to_string(&asynchronous).unwrap()
    );
}

#[test]
fn pre_built_document_is_a_valid_source() {
    let root = parse_document(&fixture("minimal_wrapper_1.xml"), ROOT, 0).unwrap();
    let ad = Resolver::default()
        .resolve_sync(root, &chain_fetcher())
        .unwrap();
    assert_eq!(ad.trackers.impressions(), expected_impressions().as_slice());
}

#[test]
fn fetch_failure_keeps_completed_steps() {
    // Step 3 is missing from the cache.
    let fetcher = CachedFetcher::new()
        .with(ROOT, fixture("minimal_wrapper_1.xml"))
        .with("http://vasts/minimal_wrapper_2.xml", fixture("minimal_wrapper_2.xml"));

    let err = Resolver::default()
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FetchFailure);
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, ChainStatus::Error);
    assert_eq!(partial.documents.len(), 2);
    assert_eq!(
        partial.trackers.impressions(),
        ["impression url wrapper 1", "impression url wrapper 2"]
    );
    match err {
        ResolveError::Chain {
            source: VastError::FetchFailed { url, .. },
            ..
        } => assert_eq!(url, "http://vasts/minimal_wrapper_3.xml"),
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[test]
fn malformed_step_is_a_parse_failure() {
    let fetcher = CachedFetcher::new()
        .with(ROOT, fixture("minimal_wrapper_1.xml"))
        .with("http://vasts/minimal_wrapper_2.xml", fixture("broken.xml"));

    let err = Resolver::default()
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ParseFailure);
    assert_eq!(
        err.partial().unwrap().trackers.impressions(),
        ["impression url wrapper 1"]
    );
}

#[test]
fn depth_limit_stops_before_fetching() {
    let fetcher = RecordingFetcher::new(chain_fetcher());
    let resolver = Resolver::new(ResolveOptions {
        max_depth: 2,
        ..ResolveOptions::default()
    });

    let err = resolver
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DepthExceeded);
    assert!(matches!(
        err,
        ResolveError::Chain {
            source: VastError::DepthExceeded { max_depth: 2 },
            ..
        }
    ));
    // wrapper 3 was read, the inline document never requested
    assert_eq!(fetcher.calls().len(), 3);
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, ChainStatus::DepthExceeded);
    assert_eq!(partial.trackers.impressions().len(), 3);

    let ad = Resolver::new(ResolveOptions {
        max_depth: 3,
        ..ResolveOptions::default()
    })
    .resolve_sync(Source::Url(ROOT.to_string()), &chain_fetcher())
    .unwrap();
    assert_eq!(ad.depth, 3);
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let fetcher = RecordingFetcher::slow(chain_fetcher(), Duration::from_millis(500));
    let resolver = Resolver::new(ResolveOptions {
        fetch_timeout_ms: 20,
        ..ResolveOptions::default()
    });

    let err = resolver
        .resolve_async(Source::Text(fixture("minimal_wrapper_1.xml")), &fetcher)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Chain {
            source: VastError::Timeout { timeout_ms: 20, .. },
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::FetchFailure);
    assert_eq!(
        err.partial().unwrap().trackers.impressions(),
        ["impression url wrapper 1"]
    );
}

#[tokio::test]
async fn spawned_resolution_reports_through_callback() {
    let fetcher: Arc<dyn AsyncFetcher> = Arc::new(chain_fetcher());
    let (tx, rx) = tokio::sync::oneshot::channel();

    let task = Resolver::default().spawn(Source::Url(ROOT.to_string()), fetcher, move |result| {
        let _ = tx.send(result);
    });
    task.join().await.unwrap();

    let ad = rx.await.unwrap().unwrap();
    assert_eq!(ad.contents(&["Impression"]), expected_impressions());
}

#[tokio::test]
async fn aborted_resolution_discards_partial_data() {
    let fetcher: Arc<dyn AsyncFetcher> = Arc::new(RecordingFetcher::slow(
        chain_fetcher(),
        Duration::from_millis(200),
    ));
    let (tx, rx) = tokio::sync::oneshot::channel();

    let task = Resolver::default().spawn(
        Source::Text(fixture("minimal_wrapper_1.xml")),
        fetcher,
        move |result| {
            let _ = tx.send(result);
        },
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    task.join().await.unwrap();

    let err = rx.await.unwrap().unwrap_err();
    assert!(matches!(err, ResolveError::Aborted));
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert!(err.partial().is_none());
}

#[tokio::test]
async fn independent_chains_resolve_concurrently() {
    let fetcher = chain_fetcher()
        .with("http://other/inline.xml", fixture("vast_inline.xml"));
    let resolver = Resolver::default();

    let (long, short) = tokio::join!(
        resolver.resolve_async(Source::Url(ROOT.to_string()), &fetcher),
        resolver.resolve_async(Source::Url("http://other/inline.xml".to_string()), &fetcher),
    );

    assert_eq!(long.unwrap().trackers.impressions().len(), 4);
    assert_eq!(short.unwrap().trackers.impressions(), ["impression url vast inline"]);
}

#[test]
fn stitched_chain_is_a_valid_inline_document() {
    let ad = Resolver::default()
        .resolve_sync(Source::Url(ROOT.to_string()), &chain_fetcher())
        .unwrap();
    let stitched = ad.stitch().unwrap();

    let mut impressions = stitched.contents_of(&["Impression"]);
    impressions.sort();
    let mut expected = expected_impressions();
    expected.sort();
    assert_eq!(impressions, expected);
    assert_eq!(stitched.contents_of(&["Tracking"]).len(), 4);
    assert!(stitched.find_first("Wrapper").is_none());

    let validator = vast_chain::Validator::new(vast_chain::SchemaVersion::V4);
    assert_eq!(validator.validate(&stitched), Ok(true));
}

#[tokio::test]
async fn async_fetch_failure_keeps_completed_steps() {
    let fetcher = RecordingFetcher::new(
        CachedFetcher::new()
            .with(ROOT, fixture("minimal_wrapper_1.xml"))
            .with("http://vasts/minimal_wrapper_2.xml", fixture("minimal_wrapper_2.xml")),
    );

    let err = Resolver::default()
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FetchFailure);
    // the failing fetch is the last one attempted
    assert_eq!(
        fetcher.calls(),
        vec![
            "http://vasts/minimal_wrapper_1.xml",
            "http://vasts/minimal_wrapper_2.xml",
            "http://vasts/minimal_wrapper_3.xml",
        ]
    );
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, ChainStatus::Error);
    assert_eq!(partial.documents.len(), 2);
    assert_eq!(partial.depth, 2);
    assert_eq!(
        partial.trackers.impressions(),
        ["impression url wrapper 1", "impression url wrapper 2"]
    );
    assert_eq!(
        partial.trackers.errors(),
        ["error url wrapper 1", "error url wrapper 2"]
    );
}

#[tokio::test]
async fn async_malformed_step_is_a_parse_failure() {
    let fetcher = RecordingFetcher::new(
        CachedFetcher::new()
            .with(ROOT, fixture("minimal_wrapper_1.xml"))
            .with("http://vasts/minimal_wrapper_2.xml", fixture("broken.xml")),
    );

    let err = Resolver::default()
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ParseFailure);
    assert_eq!(fetcher.calls().len(), 2);
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, ChainStatus::Error);
    assert_eq!(partial.documents.len(), 1);
    assert_eq!(partial.trackers.impressions(), ["impression url wrapper 1"]);
}

#[tokio::test]
async fn async_depth_limit_stops_before_fetching() {
    let fetcher = RecordingFetcher::new(chain_fetcher());
    let resolver = Resolver::new(ResolveOptions {
        max_depth: 2,
        ..ResolveOptions::default()
    });

    let err = resolver
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Chain {
            source: VastError::DepthExceeded { max_depth: 2 },
            ..
        }
    ));
    assert_eq!(
        fetcher.calls(),
        vec![
            "http://vasts/minimal_wrapper_1.xml",
            "http://vasts/minimal_wrapper_2.xml",
            "http://vasts/minimal_wrapper_3.xml",
        ]
    );
    let partial = err.partial().unwrap();
    assert_eq!(partial.status, ChainStatus::DepthExceeded);
    assert_eq!(partial.documents.len(), 3);
    assert_eq!(partial.trackers.impressions().len(), 3);
    assert_eq!(partial.trackers.tracking("start").len(), 3);
}

#[tokio::test]
async fn partial_chains_match_across_modes() {
    let fetcher = CachedFetcher::new()
        .with(ROOT, fixture("minimal_wrapper_1.xml"))
        .with("http://vasts/minimal_wrapper_2.xml", fixture("minimal_wrapper_2.xml"));
    let resolver = Resolver::default();

    let sync = resolver
        .resolve_sync(Source::Url(ROOT.to_string()), &fetcher)
        .unwrap_err();
    let asynchronous = resolver
        .resolve_async(Source::Url(ROOT.to_string()), &fetcher)
        .await
        .unwrap_err();

    assert_eq!(sync.kind(), asynchronous.kind());
    assert_eq!(sync.partial(), asynchronous.partial());
}
