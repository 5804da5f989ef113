use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use website_replicator::report::{FAILURES_FILE, INDEX_FILE, MANIFEST_FILE, README_FILE, SERVER_SCRIPT};
use website_replicator::rewriter::ANALYTICS_DISABLED;
use website_replicator::{FetchError, ReplicaConfig, ReplicaError, WebsiteReplicator};

async fn serve(server: &MockServer, route: &str, content_type: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), content_type))
        .mount(server)
        .await;
}

fn replicator(server: &MockServer, output_dir: &Path) -> WebsiteReplicator {
    replicator_at(server, "/", output_dir)
}

fn replicator_at(server: &MockServer, page: &str, output_dir: &Path) -> WebsiteReplicator {
    let mut config = ReplicaConfig::new(&format!("{}{page}", server.uri()), output_dir).unwrap();
    config.delay = Duration::ZERO;
    config.timeout = Duration::from_secs(5);
    WebsiteReplicator::new(config).unwrap()
}

/// Every `./` reference in `index` names a file under `out`; returns how many there were.
fn assert_local_references_exist(index: &str, out: &Path) -> usize {
    let reference = Regex::new(r#"(?:href|src|data-src)="\./([^"]+)""#).unwrap();
    let targets: Vec<&str> = reference
        .captures_iter(index)
        .map(|caps| caps.get(1).unwrap().as_str())
        .collect();
    for target in &targets {
        assert!(out.join(target).is_file(), "Failed for reference: {}", target);
    }
    targets.len()
}

#[tokio::test]
async fn test_replicates_site_end_to_end() {
    let server = MockServer::start().await;
    let html = format!(
        r#"<html><head>
<link rel="stylesheet" href="{}/css/site.css">
<!-- Google Tag Manager --><script>(function(w){{w.dataLayer=[];}})(window);</script><!-- End Google Tag Manager -->
</head><body><img src="/img/a.png" alt="a"></body></html>"#,
        server.uri()
    );
    serve(&server, "/", "text/html", &html).await;
    serve(&server, "/css/site.css", "text/css", "body { background: url(../img/bg.png); }").await;
    serve(&server, "/img/a.png", "image/png", "a-png").await;
    serve(&server, "/img/bg.png", "image/png", "bg-png").await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let report = replicator(&server, &out).replicate().await.unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.downloaded(), 3);
    assert_eq!(fs::read_to_string(out.join("img/a.png")).unwrap(), "a-png");
    assert_eq!(fs::read_to_string(out.join("img/bg.png")).unwrap(), "bg-png");
    assert_eq!(
        fs::read_to_string(out.join("css/site.css")).unwrap(),
        "body { background: url(../img/bg.png); }"
    );

    let index = fs::read_to_string(out.join(INDEX_FILE)).unwrap();
    assert!(index.contains(r#"href="./css/site.css""#), "{index}");
    assert!(index.contains(r#"src="./img/a.png""#), "{index}");
    assert!(index.contains(ANALYTICS_DISABLED));
    assert!(!index.contains("dataLayer"));

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["css"].as_array().unwrap().len(), 1);
    assert_eq!(manifest["images"].as_array().unwrap().len(), 2);
    assert_eq!(manifest["js"], serde_json::json!([]));

    assert!(!out.join(FAILURES_FILE).exists());
    let readme = fs::read_to_string(out.join(README_FILE)).unwrap();
    assert!(readme.contains("- Total files: 3"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(out.join(SERVER_SCRIPT)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[tokio::test]
async fn test_rewritten_references_point_at_saved_files() {
    let server = MockServer::start().await;
    let html = r#"<link href="/css/app.css?v=3" rel="stylesheet">
<script src="/js/app.js"></script>
<img src="/img/photo.jpg"><div data-src="/img/lazy.webp"></div>"#;
    serve(&server, "/", "text/html", html).await;
    serve(&server, "/css/app.css", "text/css", "h1 { color: red }").await;
    serve(&server, "/js/app.js", "text/javascript", "run()").await;
    serve(&server, "/img/photo.jpg", "image/jpeg", "jpg").await;
    serve(&server, "/img/lazy.webp", "image/webp", "webp").await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    replicator(&server, &out).replicate().await.unwrap();

    let index = fs::read_to_string(out.join(INDEX_FILE)).unwrap();
    assert_eq!(assert_local_references_exist(&index, &out), 4, "{index}");
}

#[tokio::test]
async fn test_page_relative_references_on_root_page() {
    let server = MockServer::start().await;
    let html = r#"<link rel="stylesheet" href="css/site.css?v=2"><script src="js/app.js"></script><img src="./img/a.png">"#;
    serve(&server, "/", "text/html", html).await;
    serve(&server, "/css/site.css", "text/css", "h1 { color: red }").await;
    serve(&server, "/js/app.js", "text/javascript", "run()").await;
    serve(&server, "/img/a.png", "image/png", "a-png").await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let report = replicator(&server, &out).replicate().await.unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(fs::read_to_string(out.join("css/site_v=2.css")).unwrap(), "h1 { color: red }");

    let index = fs::read_to_string(out.join(INDEX_FILE)).unwrap();
    assert!(index.contains(r#"href="./css/site_v=2.css""#), "{index}");
    assert!(index.contains(r#"src="./js/app.js""#), "{index}");
    assert!(index.contains(r#"src="./img/a.png""#), "{index}");
    assert_eq!(assert_local_references_exist(&index, &out), 3);
}

#[tokio::test]
async fn test_page_relative_references_in_subdirectory() {
    let server = MockServer::start().await;
    let html = r#"<link rel="stylesheet" href="../css/s.css?v=2">
<img src="img/a.png"><img src="/logo.png">"#;
    serve(&server, "/blog/post.html", "text/html", html).await;
    serve(&server, "/css/s.css", "text/css", "p { margin: 0 }").await;
    serve(&server, "/blog/img/a.png", "image/png", "a-png").await;
    serve(&server, "/logo.png", "image/png", "logo").await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let report = replicator_at(&server, "/blog/post.html", &out)
        .replicate()
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(fs::read_to_string(out.join("blog/img/a.png")).unwrap(), "a-png");

    let index = fs::read_to_string(out.join(INDEX_FILE)).unwrap();
    assert!(index.contains(r#"src="./blog/img/a.png""#), "{index}");
    assert!(index.contains(r#"href="./css/s_v=2.css""#), "{index}");
    assert!(index.contains(r#"src="./logo.png""#), "{index}");
    assert_eq!(assert_local_references_exist(&index, &out), 3);
}

#[tokio::test]
async fn test_non_utf8_page_is_decoded_from_its_charset() {
    let server = MockServer::start().await;
    let (bytes, _, _) = encoding_rs::WINDOWS_1252.encode(r#"<meta charset="windows-1252"><p>Café crème</p>"#);
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(bytes.into_owned(), "text/html; charset=windows-1252"),
        )
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    replicator(&server, &out).replicate().await.unwrap();

    let index = fs::read_to_string(out.join(INDEX_FILE)).unwrap();
    assert_eq!(index, r#"<meta charset="utf-8"><p>Café crème</p>"#);
}

#[tokio::test]
async fn test_missing_stylesheet_is_not_fatal() {
    let server = MockServer::start().await;
    let html = r#"<link rel="stylesheet" href="/missing.css"><img src="/logo.png">"#;
    serve(&server, "/", "text/html", html).await;
    serve(&server, "/logo.png", "image/png", "logo").await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let report = replicator(&server, &out).replicate().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.downloaded(), 1);
    assert!(out.join(INDEX_FILE).exists());
    assert_eq!(
        fs::read_to_string(out.join(FAILURES_FILE)).unwrap(),
        format!("{}/missing.css - HTTP 404 Not Found\n", server.uri())
    );
    // Only images get a placeholder.
    assert!(!out.join("missing.css").exists());
}

#[tokio::test]
async fn test_shared_resource_is_fetched_once() {
    let server = MockServer::start().await;
    let html = r#"<link rel="stylesheet" href="/a.css"><link rel="stylesheet" href="/b.css">
<img src="/shared.png"><div style="background-image: url('/shared.png')"></div>"#;
    serve(&server, "/", "text/html", html).await;
    serve(&server, "/a.css", "text/css", ".a { background: url(shared.png) }").await;
    serve(&server, "/b.css", "text/css", ".b { background: url(/shared.png) }").await;
    Mock::given(method("GET"))
        .and(path("/shared.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(b"png".to_vec(), "image/png"))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let report = replicator(&server, &out).replicate().await.unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.downloaded(), 3);
    server.verify().await;
}

#[tokio::test]
async fn test_page_fetch_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp_dir = tempdir().unwrap();
    let out = temp_dir.path().join("replica");
    let err = replicator(&server, &out).replicate().await.unwrap_err();

    match err {
        ReplicaError::PageFetch { source, .. } => assert_eq!(
            source,
            FetchError::Status {
                status: 500,
                reason: "Internal Server Error".to_string()
            }
        ),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out.join(INDEX_FILE).exists());
}
