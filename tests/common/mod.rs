//! Shared test doubles: in-memory source and sink, and a minimal HTTP
//! responder standing in for InfluxDB.
#![allow(dead_code)]

use async_trait::async_trait;
use capcast_core::{
    error::Result, RawObservation, SeriesQuery, Settings, TimeSeriesSink, TimeSeriesSource,
    WriteError, WriteOptions, WriteTarget,
};
use chrono::{TimeDelta, TimeZone, Utc};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const ENTITY: &str = "688287b9-0f7b-4c6b-9f93-ecdadf0af36b";

/// Source returning a fixed set of observations and recording queries.
#[derive(Default)]
pub struct MemorySource {
    pub observations: Vec<RawObservation>,
    pub queries: Mutex<Vec<SeriesQuery>>,
}

impl MemorySource {
    pub fn new(observations: Vec<RawObservation>) -> Self {
        Self {
            observations,
            queries: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TimeSeriesSource for MemorySource {
    async fn fetch(&self, query: &SeriesQuery) -> Result<Vec<RawObservation>> {
        self.queries.lock().unwrap().push(query.clone());
        Ok(self.observations.clone())
    }
}

/// Sink keeping every written line.
#[derive(Default)]
pub struct MemorySink {
    pub lines: Mutex<Vec<String>>,
    pub batches: Mutex<usize>,
}

#[async_trait]
impl TimeSeriesSink for MemorySink {
    async fn write_batch(
        &self,
        _target: &WriteTarget,
        body: &str,
    ) -> std::result::Result<(), WriteError> {
        *self.batches.lock().unwrap() += 1;
        self.lines
            .lock()
            .unwrap()
            .extend(body.lines().map(str::to_string));
        Ok(())
    }
}

/// `n` hourly observations starting 2021-01-01T00:00:00Z on a gentle ramp.
pub fn hourly_ramp(n: i64) -> Vec<RawObservation> {
    let t0 = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| RawObservation::new(t0 + TimeDelta::hours(i), 1.0e9 + 2.5e6 * i as f64))
        .collect()
}

/// Settings for one entity with a short, reproducible run.
pub fn test_settings(periods: usize) -> Settings {
    let mut settings = Settings::default();
    settings.source.entity = ENTITY.into();
    settings.horizon.periods = periods;
    settings.forecast.yearly_seasonality = false;
    settings.forecast.uncertainty_samples = 200;
    settings.forecast.seed = Some(42);
    settings
}

pub fn fast_write_options(batch_size: usize) -> WriteOptions {
    WriteOptions {
        batch_size,
        flush_interval: Duration::from_secs(3600),
        jitter_interval: Duration::ZERO,
        retry_interval: Duration::from_millis(5),
        max_retries: 3,
    }
}

/// Parses `yhat`, `yhat_lower` and `yhat_upper` out of one forecast line.
pub fn line_fields(line: &str) -> (f64, f64, f64) {
    let fields = line.split(' ').nth(1).unwrap();
    let values: Vec<f64> = fields
        .split(',')
        .map(|kv| kv.split_once('=').unwrap().1.parse().unwrap())
        .collect();
    (values[0], values[1], values[2])
}

/// A request as seen by [`MockInflux`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CannedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl CannedResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// One-connection-per-request HTTP/1.1 responder. Responses are served in
/// order and the last one repeats once the queue runs dry.
pub struct MockInflux {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockInflux {
    pub async fn start(responses: Vec<CannedResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let handle = tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                let response = responses
                    .get(served)
                    .or_else(|| responses.last())
                    .cloned()
                    .unwrap_or_else(|| CannedResponse::new(204, ""));
                served += 1;
                if let Some(request) = serve_one(stream, &response).await {
                    recorded.lock().unwrap().push(request);
                }
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockInflux {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_one(mut stream: TcpStream, response: &CannedResponse) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();

    let mut reply = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        reply.push_str(&format!("{}: {}\r\n", name, value));
    }
    reply.push_str("\r\n");
    reply.push_str(&response.body);
    stream.write_all(reply.as_bytes()).await.ok()?;
    let _ = stream.shutdown().await;

    Some(RecordedRequest {
        method,
        target,
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Annotated CSV as `/api/v2/query` returns it for `values`, one per hour
/// from 2021-01-01T00:00:00Z.
pub fn annotated_csv(values: &[f64]) -> String {
    let mut body = String::from(
        "#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string,string\r\n\
         #group,false,false,true,true,false,false,true,true,true,true\r\n\
         #default,_result,,,,,,,,,\r\n\
         ,result,table,_start,_stop,_time,_value,_field,_measurement,fsid,type_instance\r\n",
    );
    let t0 = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    for (i, value) in values.iter().enumerate() {
        let ts = t0 + TimeDelta::hours(i as i64);
        body.push_str(&format!(
            ",,0,2020-01-01T00:00:00Z,2022-01-01T00:00:00Z,{},{},value,ceph_cluster_stats,{},data_bytes\r\n",
            ts.format("%Y-%m-%dT%H:%M:%SZ"),
            value,
            ENTITY
        ));
    }
    body.push_str("\r\n");
    body
}
