//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the catalog site and drive a
//! real `Harvester` end-to-end, writing records into a temporary directory.

use catalog_gleaner::config::Config;
use catalog_gleaner::{CombinedCsvWriter, Harvester, JsonFileWriter};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const PRODUCT_PAGE: &str = include_str!("../fixtures/product_B09X7CRKRZ.html");
const NO_HISTOGRAM_PAGE: &str = include_str!("../fixtures/product_no_histogram.html");
const CAPTCHA_PAGE: &str = include_str!("../fixtures/captcha.html");
const NOT_FOUND_PAGE: &str = include_str!("../fixtures/not_found.html");
const OFFERS_ALL: &str = include_str!("../fixtures/offers_all.html");
const OFFERS_PRIME: &str = include_str!("../fixtures/offers_prime.html");

/// Creates a test configuration pointing at the mock server
fn create_test_config(base_url: &str, output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.initial_session_pool_size = 2;
    config.shutdown_grace_secs = 1;
    config.fetch.base_url = base_url.to_string();
    config.fetch.warm_up = false;
    config.fetch.timeout_secs = 5;
    config.fetch.backoff_base_ms = 10; // Very short for testing
    config.fetch.backoff_max_ms = 50;
    config.output.directory = output_dir.display().to_string();
    config
}

fn create_harvester(config: Config) -> Harvester {
    let writer = JsonFileWriter::new(&config.output.directory).expect("Failed to create writer");
    Harvester::new(config, Arc::new(writer)).expect("Failed to create harvester")
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body)
        .insert_header("content-type", "text/html; charset=utf-8")
}

/// Reads the record written for an identifier, if any
fn read_record(dir: &Path, identifier: &str) -> Option<serde_json::Value> {
    let prefix = format!("product_{}_", identifier);
    let entry = std::fs::read_dir(dir)
        .expect("Failed to read output directory")
        .filter_map(Result::ok)
        .find(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))?;

    let content = std::fs::read_to_string(entry.path()).expect("Failed to read record");
    Some(serde_json::from_str(&content).expect("Record is not valid JSON"))
}

#[tokio::test]
async fn test_batch_with_missing_listing() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dp/B0NOHIST01"))
        .respond_with(html(NO_HISTOGRAM_PAGE))
        .mount(&mock_server)
        .await;

    // Not-found listings are never retried
    Mock::given(method("GET"))
        .and(path("/dp/B000INVALID"))
        .respond_with(ResponseTemplate::new(404).set_body_string(NOT_FOUND_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester
        .run(["B09X7CRKRZ", "B000INVALID", "B0NOHIST01"])
        .await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.written, 2);
    assert_eq!(summary.not_found, 1);
    assert!(summary.is_complete());

    assert!(read_record(output.path(), "B000INVALID").is_none());

    let record = read_record(output.path(), "B09X7CRKRZ").expect("Record should be written");
    assert_eq!(record["asin"], "B09X7CRKRZ");
    assert!(record["timestamp"].as_i64().unwrap() > 0);

    let main = &record["product_details"]["main_product_details_section"];
    assert_eq!(main["price"], 23.99);
    assert_eq!(main["currency"], "$");
    assert_eq!(main["average_rating"], 4.8);
    assert_eq!(main["number_of_ratings"], 116877);
    assert_eq!(main["brand"], "SanDisk");
    assert_eq!(main["feature_bullets"].as_array().unwrap().len(), 3);
    assert_eq!(main["available_options"][0], "size_name");
    assert_eq!(main["media"]["images"].as_array().unwrap().len(), 2);

    let histogram = &record["product_details"]["reviews_histogram_section"];
    assert_eq!(histogram["distribution"]["5"]["percentage"], 86);
    assert_eq!(histogram["distribution"]["5"]["count"], 100514);

    let info = &record["product_details"]["product_information_section"];
    assert_eq!(info["Brand"], "SanDisk");
    assert_eq!(info["Customer Reviews"]["count"], 116877);
    assert_eq!(info["Best Sellers Rank"].as_array().unwrap().len(), 2);

    let offers = record["offers_data"].as_array().unwrap();
    assert_eq!(offers[0]["seller_name"], "Amazon.com");
    assert_eq!(offers[0]["buy_box_winner"], true);

    let sizes = record["variants"]["size_name"].as_array().unwrap();
    assert_eq!(sizes.len(), 3);
    assert_eq!(sizes[1]["selected"], true);
    assert_eq!(sizes[2]["availability"], "Currently unavailable.");
}

#[tokio::test]
async fn test_missing_histogram_keeps_main_details() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B0NOHIST01"))
        .respond_with(html(NO_HISTOGRAM_PAGE))
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester.run(["B0NOHIST01"]).await;
    assert_eq!(summary.written, 1);

    let record = read_record(output.path(), "B0NOHIST01").unwrap();
    assert!(record["product_details"]["reviews_histogram_section"].is_null());
    assert!(record["offers_data"].is_null());
    assert!(record["variants"].is_null());

    let main = &record["product_details"]["main_product_details_section"];
    assert_eq!(main["product_title"], "Anker USB C Cable, 6 ft Braided Fast Charging Cable");
    assert_eq!(main["brand"], "Anker");
    assert_eq!(main["price"], 1299.0);
    assert_eq!(main["currency"], "₹");
    assert_eq!(main["average_rating"], 4.6);
    assert_eq!(main["number_of_ratings"], 3714);

    let info = &record["product_details"]["product_information_section"];
    assert_eq!(info["Manufacturer"], "Anker Innovations");
}

#[tokio::test]
async fn test_blocked_session_is_rotated() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    // First request hits a challenge page, later ones succeed
    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(CAPTCHA_PAGE))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    assert_eq!(summary.written, 1);
    assert_eq!(summary.blocked, 0);
    assert_eq!(summary.sessions_retired, 1);
    assert_eq!(harvester.throttle().blocks_seen(), 1);

    // The retired session was replaced, so the pool keeps its size
    let snapshot = harvester.pool().snapshot();
    assert_eq!(snapshot.available, 2);
    assert_eq!(snapshot.replacements, 1);
}

#[tokio::test]
async fn test_persistent_block_exhausts_rotations() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(ResponseTemplate::new(503).set_body_string(CAPTCHA_PAGE))
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), output.path());
    config.fetch.max_attempts = 2;
    let harvester = create_harvester(config);
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    assert_eq!(summary.blocked, 1);
    assert_eq!(summary.written, 0);
    assert_eq!(summary.sessions_retired, 3);
    assert!(read_record(output.path(), "B09X7CRKRZ").is_none());
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    assert_eq!(summary.written, 1);
    assert_eq!(summary.transient, 0);
    assert_eq!(summary.sessions_retired, 0);
}

#[tokio::test]
async fn test_transient_budget_exhausted() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    assert_eq!(summary.transient, 1);
    assert_eq!(summary.written, 0);
    assert!(summary.is_complete());
}

#[tokio::test]
async fn test_duplicates_processed_once() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let harvester = create_harvester(create_test_config(&mock_server.uri(), output.path()));
    let summary = harvester
        .run(["B09X7CRKRZ", "B09X7CRKRZ", "B09X7CRKRZ"])
        .await;

    assert_eq!(summary.total, 1);
    assert_eq!(summary.written, 1);
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_warm_up_visits_site_root() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            html("<html><body>Welcome</body></html>")
                .insert_header("set-cookie", "session-id=123-4567; Path=/"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // The listing only answers when the warm-up cookie comes along
    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .and(header("cookie", "session-id=123-4567"))
        .respond_with(html(PRODUCT_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), output.path());
    config.initial_session_pool_size = 1;
    config.fetch.warm_up = true;
    let harvester = create_harvester(config);
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    assert_eq!(summary.written, 1);
}

#[tokio::test]
async fn test_offers_fragments_merged() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gp/product/ajax"))
        .and(|req: &Request| req.url.as_str().contains("primeEligible"))
        .respond_with(html(OFFERS_PRIME))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gp/product/ajax"))
        .and(|req: &Request| req.url.as_str().contains("all%2522"))
        .respond_with(html(OFFERS_ALL))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), output.path());
    config.fetch.fetch_offers = true;
    let harvester = create_harvester(config);
    let summary = harvester.run(["B09X7CRKRZ"]).await;
    assert_eq!(summary.written, 1);

    let record = read_record(output.path(), "B09X7CRKRZ").unwrap();
    let offers = record["offers_data"].as_array().unwrap();
    assert_eq!(offers.len(), 3);

    assert_eq!(offers[0]["buy_box_winner"], true);
    assert_eq!(offers[0]["prime"], false);

    assert_eq!(offers[1]["seller_name"], "Memory Hub");
    assert_eq!(offers[1]["seller_id"], "A3P5ROKL5A1OLE");
    assert_eq!(offers[1]["shipping_cost"], 4.99);
    assert_eq!(offers[1]["total_price"], 27.48);
    assert_eq!(offers[1]["prime"], true);

    assert_eq!(offers[2]["condition"], "Used - Very Good");
    assert_eq!(offers[2]["prime"], false);
}

#[tokio::test]
async fn test_blocked_offers_fragment_retires_session() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/gp/product/ajax"))
        .respond_with(ResponseTemplate::new(503).set_body_string(CAPTCHA_PAGE))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(&mock_server.uri(), output.path());
    config.fetch.fetch_offers = true;
    let harvester = create_harvester(config);
    let summary = harvester.run(["B09X7CRKRZ"]).await;

    // The listing itself was fine, so the record is still written
    assert_eq!(summary.written, 1);
    assert_eq!(summary.sessions_retired, 1);
    assert_eq!(harvester.throttle().blocks_seen(), 1);

    let snapshot = harvester.pool().snapshot();
    assert_eq!(snapshot.available, 2);
    assert_eq!(snapshot.replacements, 1);

    // Offers fall back to the inline pinned offer on the listing
    let record = read_record(output.path(), "B09X7CRKRZ").unwrap();
    let offers = record["offers_data"].as_array().unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["seller_name"], "Amazon.com");
}

#[tokio::test]
async fn test_stop_signal_during_fetch() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE).set_delay(Duration::from_secs(10)))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), output.path());
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    let harvester = create_harvester(config);

    let cancel = harvester.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let summary = harvester.run(["B09X7CRKRZ"]).await;
    let elapsed = started.elapsed();

    assert_eq!(summary.total, 1);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.written, 0);
    assert!(summary.is_complete());
    assert!(
        elapsed < grace + Duration::from_millis(500),
        "run took {:?}",
        elapsed
    );

    // No record and no leftover temporary file
    let written: Vec<_> = std::fs::read_dir(output.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(written.is_empty(), "unexpected files: {:?}", written);

    // The interrupted lease went back to the pool
    let snapshot = harvester.pool().snapshot();
    assert_eq!(snapshot.leased, 0);
    assert_eq!(snapshot.retired, 0);
}

#[tokio::test]
async fn test_unreachable_site_fails_transiently() {
    let output = TempDir::new().unwrap();

    // Nothing listens on the discard port
    let mut config = create_test_config("http://127.0.0.1:9", output.path());
    config.fetch.max_attempts = 1;
    let harvester = create_harvester(config);
    let summary = harvester.run(["B09X7CRKRZ", "B0NOHIST01"]).await;

    assert_eq!(summary.transient, 2);
    assert_eq!(summary.written, 0);
    assert!(summary.is_complete());
}

#[tokio::test]
async fn test_combined_csv_after_run() {
    let mock_server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/dp/B09X7CRKRZ"))
        .respond_with(html(PRODUCT_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dp/B0NOHIST01"))
        .respond_with(html(NO_HISTOGRAM_PAGE))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/dp/B000INVALID"))
        .respond_with(ResponseTemplate::new(404).set_body_string(NOT_FOUND_PAGE))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri(), output.path());
    let writer = JsonFileWriter::new(output.path()).unwrap();
    let csv_writer = Arc::new(CombinedCsvWriter::new(writer));
    let harvester = Harvester::new(config, csv_writer.clone()).unwrap();

    let summary = harvester
        .run(["B0NOHIST01", "B000INVALID", "B09X7CRKRZ"])
        .await;
    assert_eq!(summary.written, 2);
    assert_eq!(csv_writer.row_count(), 2);

    let path = csv_writer
        .export(output.path(), Utc::now())
        .unwrap()
        .expect("rows were collected");

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(&headers[0], "asin");
    assert_eq!(&headers[1], "timestamp");
    assert!(headers
        .iter()
        .any(|h| h.starts_with("product_details_main_product_details_section_")));

    // One row per written record, ordered by identifier; the missing listing has none
    let asins: Vec<String> = reader
        .records()
        .map(|row| row.unwrap()[0].to_string())
        .collect();
    assert_eq!(asins, vec!["B09X7CRKRZ", "B0NOHIST01"]);
}
