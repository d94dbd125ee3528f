//! End-to-end pipeline tests against a stub site served by wiremock.
//!
//! The stub site speaks a deliberately simple page format so these tests
//! exercise the pipeline (queues, retries, policies, store) rather than
//! HTML parsing, which the bundled site plugins cover in their own units:
//!
//! - info page: book name on the first line, then `cid|title` lines
//! - chapter page: `TITLE:<title>` and `BODY:<body>` lines
//! - a page missing both markers does not parse (soft failure)

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use novel_dl::download::ProgressHook;
use novel_dl::models::{BookInfo, ChapterRecord, ChapterRef, Volume};
use novel_dl::site::{
    Fetcher, FetcherInit, GenericFetcher, LoginCredentials, Parser, SiteClient, SiteProfile,
    SiteRegistry,
};
use novel_dl::store::read_book_info;
use novel_dl::{BookDownloader, BookRequest, CancelToken, EngineError, FetchError};

const STUB_SITE: &str = "stub";

/// Parser for the stub page format.
struct StubParser;

impl Parser for StubParser {
    fn site_name(&self) -> &'static str {
        STUB_SITE
    }

    fn parse_book_info(&self, pages: &[String]) -> Option<BookInfo> {
        let page = pages.first()?;
        let mut lines = page.lines();
        let book_name = lines.next()?.trim().to_string();
        if book_name.is_empty() {
            return None;
        }

        let mut chapters = Vec::new();
        for line in lines {
            let Some((cid, title)) = line.split_once('|') else {
                continue;
            };
            chapters.push(ChapterRef {
                chapter_id: cid.trim().to_string(),
                title: title.trim().to_string(),
                url: format!("/book/B/{}.html", cid.trim()),
            });
        }

        Some(BookInfo {
            book_name,
            volumes: vec![Volume {
                volume_name: "main".to_string(),
                chapters,
            }],
            ..BookInfo::default()
        })
    }

    fn parse_chapter(&self, pages: &[String], chapter_id: &str) -> Option<ChapterRecord> {
        let mut title = String::new();
        let mut bodies = Vec::new();
        for page in pages {
            for line in page.lines() {
                if let Some(value) = line.strip_prefix("TITLE:") {
                    if title.is_empty() {
                        title = value.trim().to_string();
                    }
                } else if let Some(value) = line.strip_prefix("BODY:") {
                    bodies.push(value.trim().to_string());
                }
            }
        }
        if title.is_empty() && bodies.is_empty() {
            return None;
        }
        Some(ChapterRecord::new(chapter_id, title, bodies.join("\n")))
    }
}

/// Policies for the stub site.
struct StubClient {
    workers: usize,
}

impl SiteClient for StubClient {
    fn site_name(&self) -> &'static str {
        STUB_SITE
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn is_access_limited(&self, pages: &[String]) -> bool {
        pages
            .first()
            .is_some_and(|page| page.contains("<h1>Bad GateWay</h1>"))
    }

    fn skip_empty_chapter(&self, pages: &[String]) -> bool {
        pages.first().is_some_and(|page| page.contains("EMPTY-CHAPTER"))
    }
}

/// Registers a stub triad whose fetcher targets `server`.
fn stub_registry(server: &MockServer, paginated: bool, workers: usize) -> SiteRegistry {
    let base: &'static str = Box::leak(server.uri().into_boxed_str());
    let info: &'static str = Box::leak(format!("{base}/book/{{book_id}}/info").into_boxed_str());
    let chapter: &'static str =
        Box::leak(format!("{base}/book/{{book_id}}/{{chapter_id}}.html").into_boxed_str());

    let mut registry = SiteRegistry::new();
    registry.register_fetcher(
        STUB_SITE,
        Box::new(move |init: &FetcherInit| {
            let profile = SiteProfile::new(STUB_SITE, base, info, chapter);
            let profile = if paginated {
                profile.with_paginated_chapters()
            } else {
                profile
            };
            let fetcher: Arc<dyn Fetcher> = Arc::new(GenericFetcher::new(
                profile,
                init.config.clone(),
                Arc::clone(&init.limiter),
            )?);
            Ok(fetcher)
        }),
    );
    registry.register_parser(STUB_SITE, Arc::new(StubParser));
    registry.register_client(STUB_SITE, Arc::new(StubClient { workers }));
    registry
}

/// A fast request against the stub site.
fn stub_request() -> BookRequest {
    BookRequest {
        rate: 1000.0,
        burst: 100,
        jitter: 0.0,
        transport_retries: 0,
        request_interval: Duration::ZERO,
        ..BookRequest::new(STUB_SITE, "B")
    }
}

fn recording_hook() -> (Arc<StdMutex<Vec<(usize, usize)>>>, ProgressHook) {
    let events: Arc<StdMutex<Vec<(usize, usize)>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let hook: ProgressHook = Arc::new(move |done, total| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().unwrap().push((done, total));
        })
    });
    (events, hook)
}

async fn mount_info(server: &MockServer, chapter_count: usize) {
    let mut body = String::from("Stub Book\n");
    for i in 1..=chapter_count {
        body.push_str(&format!("c{i}|T_{i}\n"));
    }
    Mock::given(method("GET"))
        .and(path("/book/B/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_chapter(server: &MockServer, cid: &str, title: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/book/B/{cid}.html")))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(format!("TITLE:{title}\nBODY:{body}")),
        )
        .mount(server)
        .await;
}

// S1 - happy path: five chapters, in-order progress, all complete.
#[tokio::test]
async fn test_happy_path_stores_all_chapters_with_ordered_progress() {
    let server = MockServer::start().await;
    mount_info(&server, 5).await;
    for i in 1..=5 {
        mount_chapter(&server, &format!("c{i}"), &format!("T_{i}"), &format!("body_{i}")).await;
    }

    let registry = stub_registry(&server, false, 4);
    let (events, hook) = recording_hook();
    let request = BookRequest {
        progress_hook: Some(hook),
        ..stub_request()
    };

    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.catalog_chapters, 5);
    assert_eq!(summary.completed, 5);
    assert_eq!(summary.needs_refetch, 0);
    assert_eq!(summary.dropped, 0);
    assert!(!summary.cancelled);

    // Exactly one hook call per terminal outcome, done strictly increasing.
    assert_eq!(
        *events.lock().unwrap(),
        vec![(1, 5), (2, 5), (3, 5), (4, 5), (5, 5)]
    );

    let store = downloader.store();
    for i in 1..=5 {
        let record = store.get(&format!("c{i}")).await.unwrap().unwrap();
        assert_eq!(record.title, format!("T_{i}"));
        assert_eq!(record.content, format!("body_{i}"));
        assert!(!record.need_refetch);
    }

    // Sidecar reflects the resolved catalog in order.
    let info = read_book_info(downloader.book_dir()).await.unwrap().unwrap();
    assert_eq!(info.book_name, "Stub Book");
    let ids: Vec<&str> = info.chapters().map(|c| c.chapter_id.as_str()).collect();
    assert_eq!(ids, ["c1", "c2", "c3", "c4", "c5"]);
}

// S2 - transient transport failure: c3 fails twice with 500, succeeds on
// the third fetch; only one final store write.
#[tokio::test]
async fn test_transient_500_requeues_then_stores_once() {
    let server = MockServer::start().await;
    mount_info(&server, 3).await;
    mount_chapter(&server, "c1", "T_1", "body_1").await;
    mount_chapter(&server, "c2", "T_2", "body_2").await;
    Mock::given(method("GET"))
        .and(path("/book/B/c3.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/B/c3.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("TITLE:T_3\nBODY:body_3"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = stub_registry(&server, false, 2);
    let request = BookRequest {
        max_retries: 3,
        ..stub_request()
    };

    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.dropped, 0);

    let record = downloader.store().get("c3").await.unwrap().unwrap();
    assert_eq!(record.content, "body_3");
    server.verify().await;
}

// S3 - access limited: a Bad GateWay body is a terminal outcome stored as
// a need_refetch placeholder, never requeued.
#[tokio::test]
async fn test_access_limited_body_stores_placeholder() {
    let server = MockServer::start().await;
    mount_info(&server, 4).await;
    for i in [1, 2, 3] {
        mount_chapter(&server, &format!("c{i}"), &format!("T_{i}"), &format!("body_{i}")).await;
    }
    Mock::given(method("GET"))
        .and(path("/book/B/c4.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Bad GateWay</h1>"))
        .expect(1)
        .mount(&server)
        .await;

    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.needs_refetch, 1);

    let record = downloader.store().get("c4").await.unwrap().unwrap();
    assert!(record.need_refetch);
    assert!(record.title.is_empty());
    assert!(record.content.is_empty());
    server.verify().await;
}

// Intentionally empty chapter: placeholder stored as complete.
#[tokio::test]
async fn test_intentionally_empty_chapter_is_complete_placeholder() {
    let server = MockServer::start().await;
    mount_info(&server, 2).await;
    mount_chapter(&server, "c1", "T_1", "body_1").await;
    Mock::given(method("GET"))
        .and(path("/book/B/c2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("EMPTY-CHAPTER"))
        .mount(&server)
        .await;

    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(summary.needs_refetch, 0);

    let record = downloader.store().get("c2").await.unwrap().unwrap();
    assert!(!record.need_refetch);
    assert!(record.content.is_empty());
}

// S4 - pagination termination: three pages advertised by substring, joined
// in order by the parser.
#[tokio::test]
async fn test_paginated_chapter_joins_three_pages() {
    let server = MockServer::start().await;
    mount_info(&server, 1).await;
    Mock::given(method("GET"))
        .and(path("/book/B/c1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "TITLE:T_1\nBODY:part one\nnext: /book/B/c1_2.html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/B/c1_2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "TITLE:T_1 (2/3)\nBODY:part two\nnext: /book/B/c1_3.html",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/book/B/c1_3.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("TITLE:T_1 (3/3)\nBODY:part three"))
        .mount(&server)
        .await;

    let registry = stub_registry(&server, true, 1);
    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.completed, 1);
    let record = downloader.store().get("c1").await.unwrap().unwrap();
    assert_eq!(record.title, "T_1");
    assert_eq!(record.content, "part one\npart two\npart three");
}

// Parse failure exhausts retries and is dropped without a store write.
#[tokio::test]
async fn test_unparseable_chapter_is_dropped_after_retries() {
    let server = MockServer::start().await;
    mount_info(&server, 2).await;
    mount_chapter(&server, "c1", "T_1", "body_1").await;
    Mock::given(method("GET"))
        .and(path("/book/B/c2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captcha wall</html>"))
        // initial attempt + max_retries requeues
        .expect(3)
        .mount(&server)
        .await;

    let registry = stub_registry(&server, false, 2);
    let request = BookRequest {
        max_retries: 2,
        ..stub_request()
    };

    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.done(), 2);
    assert!(downloader.store().get("c2").await.unwrap().is_none());
    server.verify().await;
}

// Restart semantics: a need_refetch placeholder is refetched on the next
// run, chapters already complete are not.
#[tokio::test]
async fn test_second_run_refetches_only_provisional_chapters() {
    let server = MockServer::start().await;
    mount_info(&server, 3).await;
    mount_chapter(&server, "c1", "T_1", "body_1").await;
    mount_chapter(&server, "c2", "T_2", "body_2").await;
    Mock::given(method("GET"))
        .and(path("/book/B/c3.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Bad GateWay</h1>"))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();

    let registry = stub_registry(&server, false, 2);
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let first = downloader.run().await.unwrap();
    assert_eq!(first.completed, 2);
    assert_eq!(first.needs_refetch, 1);
    drop(downloader);

    // The gate lifts: c3 now serves real content.
    server.reset().await;
    mount_info(&server, 3).await;
    Mock::given(method("GET"))
        .and(path("/book/B/c3.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("TITLE:T_3\nBODY:body_3"))
        .expect(1)
        .mount(&server)
        .await;
    // c1/c2 must not be fetched again: no mocks for them.

    let registry = stub_registry(&server, false, 2);
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let second = downloader.run().await.unwrap();

    assert_eq!(second.already_complete, 2);
    assert_eq!(second.completed, 1);

    let record = downloader.store().get("c3").await.unwrap().unwrap();
    assert!(!record.need_refetch);
    assert_eq!(record.content, "body_3");
    server.verify().await;
}

// S6 - cancellation mid-flight: cancel once ten chapters are done.
#[tokio::test]
async fn test_cancellation_mid_flight_keeps_store_consistent() {
    let server = MockServer::start().await;
    mount_info(&server, 100).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/book/B/c\d+\.html$"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("TITLE:T\nBODY:body")
                .set_delay(Duration::from_millis(5)),
        )
        .mount(&server)
        .await;

    let cancel_slot: Arc<StdMutex<Option<CancelToken>>> = Arc::new(StdMutex::new(None));
    let hook_slot = Arc::clone(&cancel_slot);
    let hook: ProgressHook = Arc::new(move |done, _total| {
        let hook_slot = Arc::clone(&hook_slot);
        Box::pin(async move {
            if done >= 10 {
                if let Some(token) = hook_slot.lock().unwrap().as_ref() {
                    token.cancel();
                }
            }
        })
    });

    let registry = stub_registry(&server, false, 4);
    let request = BookRequest {
        progress_hook: Some(hook),
        ..stub_request()
    };

    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap();
    *cancel_slot.lock().unwrap() = Some(downloader.cancel_token());

    let summary = tokio::time::timeout(Duration::from_secs(30), downloader.run())
        .await
        .expect("cancelled run must finish promptly")
        .unwrap();

    assert!(summary.cancelled);
    assert!(summary.done() >= 10);
    assert!(summary.done() < 100, "cancellation should cut the run short");

    let stored = downloader.store().count().await.unwrap();
    assert!(stored >= 10);

    // No partial rows: everything stored is either a complete record or an
    // intentional placeholder.
    let order: Vec<String> = (1..=100).map(|i| format!("c{i}")).collect();
    for record in downloader.store().get_ordered(&order).await.unwrap() {
        if !record.need_refetch {
            assert!(!record.title.is_empty());
            assert!(!record.content.is_empty());
        }
    }
}

// Configuration errors are fatal at startup.
#[tokio::test]
async fn test_unknown_site_is_fatal() {
    let server = MockServer::start().await;
    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();

    let request = BookRequest::new("no-such-site", "B");
    let err = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Registry(_)));
}

#[tokio::test]
async fn test_invalid_worker_count_is_fatal() {
    let server = MockServer::start().await;
    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();

    let request = BookRequest {
        workers: Some(0),
        ..stub_request()
    };
    let err = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidWorkers { value: 0 }));
}

#[tokio::test]
async fn test_zero_rate_is_fatal() {
    let server = MockServer::start().await;
    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();

    let request = BookRequest {
        rate: 0.0,
        ..stub_request()
    };
    let err = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Limiter(_)));
}

// An unparseable info page aborts the run before any chapter work.
#[tokio::test]
async fn test_malformed_book_info_aborts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/B/info"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;

    let registry = stub_registry(&server, false, 2);
    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(stub_request(), &registry, root.path())
        .await
        .unwrap();
    let err = downloader.run().await.unwrap_err();
    assert!(matches!(err, EngineError::BookInfoParse { .. }));
}

// Cookie injection reaches the stub origin.
#[tokio::test]
async fn test_cookies_from_request_are_sent_to_site() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/B/info"))
        .and(wiremock::matchers::header("cookie", "sid=tok42"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Stub Book\nc1|T_1\n"))
        .expect(1)
        .mount(&server)
        .await;
    mount_chapter(&server, "c1", "T_1", "body_1").await;

    let registry = stub_registry(&server, false, 1);
    let mut cookies = HashMap::new();
    cookies.insert("sid".to_string(), "tok42".to_string());
    let request = BookRequest {
        cookies: Some(cookies),
        ..stub_request()
    };

    let root = tempfile::tempdir().unwrap();
    let downloader = BookDownloader::new(request, &registry, root.path())
        .await
        .unwrap();
    let summary = downloader.run().await.unwrap();
    assert_eq!(summary.completed, 1);
    server.verify().await;
}

// The default Fetcher::login surface: unsupported unless the plugin opts in.
#[tokio::test]
async fn test_trait_login_defaults() {
    struct Bare;

    #[async_trait::async_trait]
    impl Fetcher for Bare {
        fn site_name(&self) -> &'static str {
            "bare"
        }
        async fn get_book_info(&self, _book_id: &str) -> Result<Vec<String>, FetchError> {
            Ok(vec![String::new()])
        }
        async fn get_book_chapter(
            &self,
            _book_id: &str,
            _chapter_id: &str,
        ) -> Result<Vec<String>, FetchError> {
            Ok(vec![String::new()])
        }
        fn close(&self) {}
    }

    let bare = Bare;
    assert!(!bare.verifies_auth());
    let err = bare.login(&LoginCredentials::default()).await.unwrap_err();
    assert!(matches!(err, FetchError::Unsupported { .. }));
    let err = bare.get_bookcase(1).await.unwrap_err();
    assert!(matches!(err, FetchError::Unsupported { .. }));
}
