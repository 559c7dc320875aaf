//! Search and download against a mock ESGF node.

use esgf_client::{
    sha256_file, Checksum, Credentials, Downloader, EsgSearchClient, EsgfError, HttpDownloader,
    RemoteFile, SearchQuery, SearchService,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn search_body(server: &MockServer) -> serde_json::Value {
    json!({
        "response": {
            "numFound": 2,
            "docs": [
                {
                    "id": "cmip5.pr_Amon_modelA_historical_r1i1p1_200001-200512.nc",
                    "url": [format!(
                        "{}/thredds/fileServer/cmip5/pr_Amon_modelA_historical_r1i1p1_200001-200512.nc|application/netcdf|HTTPServer",
                        server.uri()
                    )]
                },
                {
                    "id": "cmip5.tas_Amon_modelA_historical_r1i1p1_200001-200512.nc",
                    "url": [format!(
                        "{}/thredds/fileServer/cmip5/tas_Amon_modelA_historical_r1i1p1_200001-200512.nc|application/netcdf|HTTPServer",
                        server.uri()
                    )]
                }
            ]
        },
        "facet_counts": {"facet_fields": {"variable": ["pr", 1, "tas", 1]}}
    })
}

#[tokio::test]
async fn test_search_sends_file_query_and_parses_hits() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/esg-search/search"))
        .and(query_param("type", "File"))
        .and(query_param("project", "CMIP5"))
        .and(query_param("latest", "true"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body(&server)))
        .expect(1)
        .mount(&server)
        .await;

    let client = EsgSearchClient::new(&format!("{}/esg-search", server.uri())).unwrap();
    let query = SearchQuery::files(vec![
        ("project".to_string(), "CMIP5".to_string()),
        ("model".to_string(), "modelA".to_string()),
    ])
    .with_time_bounds("2000-01-01T00:00:00Z", "2005-12-31T23:59:59Z")
    .with_limit(10);

    let result = client.search(&query).await.unwrap();
    assert_eq!(result.num_found, 2);
    assert_eq!(result.files.len(), 2);
    assert!(result.files[0].url.ends_with("pr_Amon_modelA_historical_r1i1p1_200001-200512.nc"));
    assert_eq!(result.facet_counts["variable"]["tas"], 1);
}

#[tokio::test]
async fn test_search_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = EsgSearchClient::new(&server.uri()).unwrap();
    let err = client.search(&SearchQuery::files(vec![])).await.unwrap_err();
    match err {
        EsgfError::HttpStatus { status, .. } => assert_eq!(status, 503),
        other => panic!("expected HttpStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn test_search_malformed_body_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = EsgSearchClient::new(&server.uri()).unwrap();
    let err = client.search(&SearchQuery::files(vec![])).await.unwrap_err();
    assert!(matches!(err, EsgfError::MalformedResponse(_)));
}

#[tokio::test]
async fn test_search_unreachable_endpoint() {
    // Port 9 (discard) is not served by anything in the test environment.
    let client = EsgSearchClient::new("http://127.0.0.1:9/esg-search").unwrap();
    let err = client.search(&SearchQuery::files(vec![])).await.unwrap_err();
    assert!(matches!(err, EsgfError::Unreachable { .. }));
}

#[tokio::test]
async fn test_download_verifies_checksum_and_caches() {
    let server = MockServer::start().await;
    let body = b"CDF\x01 fake netcdf payload".to_vec();
    Mock::given(method("GET"))
        .and(path("/thredds/fileServer/cmip5/pr.nc"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let cache = tempfile::tempdir().unwrap();
    let downloader = HttpDownloader::new(cache.path()).unwrap();

    let cached = cache.path().join("cmip5/pr.nc");
    // Compute the expected digest from a scratch copy of the payload.
    let scratch = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(scratch.path(), &body).unwrap();
    let digest = sha256_file(scratch.path()).unwrap();

    let file = RemoteFile {
        id: "pr".to_string(),
        url: format!("{}/thredds/fileServer/cmip5/pr.nc", server.uri()),
        checksum: Some(Checksum {
            algorithm: "SHA256".to_string(),
            value: digest,
        }),
        size: Some(body.len() as u64),
    };
    let creds = Credentials::Bearer {
        token: "secret".to_string(),
    };

    let refs = downloader.download(&[file.clone()], &creds).await.unwrap();
    assert_eq!(refs[0].local_path(), Some(cached.clone()));
    assert_eq!(std::fs::read(&cached).unwrap(), body);

    // Second retrieval is served from the cache (mock expects one hit).
    let refs = downloader.download(&[file], &creds).await.unwrap();
    assert_eq!(refs[0].local_path(), Some(cached));
}

#[tokio::test]
async fn test_download_checksum_mismatch_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thredds/fileServer/cmip5/tas.nc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"tampered".to_vec()))
        .mount(&server)
        .await;

    let cache = tempfile::tempdir().unwrap();
    let downloader = HttpDownloader::new(cache.path()).unwrap();
    let file = RemoteFile {
        id: "tas".to_string(),
        url: format!("{}/thredds/fileServer/cmip5/tas.nc", server.uri()),
        checksum: Some(Checksum {
            algorithm: "SHA256".to_string(),
            value: "00".repeat(32),
        }),
        size: None,
    };

    let err = downloader
        .download(&[file], &Credentials::Anonymous)
        .await
        .unwrap_err();
    assert!(matches!(err, EsgfError::ChecksumMismatch { .. }));
    assert!(!cache.path().join("cmip5/tas.nc").exists());
}

#[tokio::test]
async fn test_download_missing_file_is_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let cache = tempfile::tempdir().unwrap();
    let downloader = HttpDownloader::new(cache.path()).unwrap();
    let file = RemoteFile::from_url(format!("{}/thredds/fileServer/cmip5/ua.nc", server.uri()));

    let err = downloader
        .download(&[file], &Credentials::Anonymous)
        .await
        .unwrap_err();
    assert!(matches!(err, EsgfError::HttpStatus { status: 404, .. }));
}
