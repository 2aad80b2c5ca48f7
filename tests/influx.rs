mod common;

use capcast_core::config::StoreConfig;
use capcast_core::sink::write_lines;
use capcast_core::{Error, InfluxClient, SourceConfig, TimeSeriesSource, WriteTarget};
use common::{annotated_csv, fast_write_options, CannedResponse, MockInflux, ENTITY};

fn store(url: String) -> StoreConfig {
    StoreConfig {
        url,
        org: "-".into(),
        bucket: "telegraf/autogen".into(),
        token: None,
        timeout_secs: 5,
    }
}

fn target() -> WriteTarget {
    WriteTarget {
        bucket: "telegraf/autogen".into(),
        org: "-".into(),
    }
}

#[tokio::test]
async fn test_fetch_posts_flux_and_decodes_csv() {
    let mock = MockInflux::start(vec![CannedResponse::new(
        200,
        annotated_csv(&[10.0, 11.5, 12.25]),
    )])
    .await;
    let client = InfluxClient::new(&store(mock.url()), Some("admin:secret".into())).unwrap();
    let query = SourceConfig {
        entity: ENTITY.into(),
        ..SourceConfig::default()
    }
    .query("telegraf/autogen");

    let observations = client.fetch(&query).await.unwrap();
    let values: Vec<f64> = observations.iter().map(|o| o.value).collect();
    assert_eq!(values, vec![10.0, 11.5, 12.25]);
    assert_eq!(observations[2].timestamp.to_rfc3339(), "2021-01-01T02:00:00+00:00");

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.target, "/api/v2/query?org=-");
    assert_eq!(request.header("authorization"), Some("Token admin:secret"));
    assert_eq!(request.header("content-type"), Some("application/vnd.flux"));
    assert_eq!(request.body, query.to_flux());
}

#[tokio::test]
async fn test_fetch_surfaces_rejected_query() {
    let mock = MockInflux::start(vec![CannedResponse::new(
        401,
        "{\"code\":\"unauthorized\",\"message\":\"unauthorized access\"}",
    )])
    .await;
    let client = InfluxClient::new(&store(mock.url()), None).unwrap();
    let query = SourceConfig::default().query("telegraf/autogen");

    let err = client.fetch(&query).await.unwrap_err();
    match err {
        Error::Source(msg) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("unauthorized access"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(mock.requests()[0].header("authorization").is_none());
}

#[tokio::test]
async fn test_write_sends_line_protocol_batches() {
    let mock = MockInflux::start(vec![CannedResponse::new(204, "")]).await;
    let client = InfluxClient::new(&store(mock.url()), Some("token".into())).unwrap();
    let lines: Vec<String> = (0..5)
        .map(|i| format!("m,type=forecast yhat={}.0,yhat_lower=0.0,yhat_upper=9.0 {}000000000", i, 1609459200 + i * 3600))
        .collect();

    let report = write_lines(&client, target(), lines.clone(), fast_write_options(2))
        .await
        .unwrap();
    assert_eq!(report.lines, 5);
    assert_eq!(report.batches, 3);

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[0].target,
        "/api/v2/write?org=-&bucket=telegraf%2Fautogen&precision=ns"
    );
    assert_eq!(requests[0].body, lines[..2].join("\n"));
    assert_eq!(requests[2].body, lines[4]);
}

#[tokio::test]
async fn test_write_retries_transient_failures() {
    let mock = MockInflux::start(vec![
        CannedResponse::new(503, "busy"),
        CannedResponse::new(429, "slow down").with_header("Retry-After", "0"),
        CannedResponse::new(204, ""),
    ])
    .await;
    let client = InfluxClient::new(&store(mock.url()), None).unwrap();

    let report = write_lines(
        &client,
        target(),
        vec!["m,type=forecast yhat=1.0,yhat_lower=0.0,yhat_upper=2.0 0".into()],
        fast_write_options(10),
    )
    .await
    .unwrap();
    assert_eq!(report.retries, 2);
    assert_eq!(report.batches, 1);
    assert_eq!(mock.requests().len(), 3);
}

#[tokio::test]
async fn test_write_rejection_is_fatal() {
    let mock = MockInflux::start(vec![CannedResponse::new(
        400,
        "{\"code\":\"invalid\",\"message\":\"unable to parse\"}",
    )])
    .await;
    let client = InfluxClient::new(&store(mock.url()), None).unwrap();

    let err = write_lines(&client, target(), vec!["garbage".into()], fast_write_options(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Sink(ref msg) if msg.contains("unable to parse")));
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_store_is_fatal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let client = InfluxClient::new(&store(url), None).unwrap();

    let err = write_lines(&client, target(), vec!["m v=1.0 0".into()], fast_write_options(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Sink(_)));
}
