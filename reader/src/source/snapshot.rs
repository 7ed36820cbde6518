use std::time::{Duration, Instant};

use chrono::Utc;
use ipcam_common::config::StreamConfig;
use ipcam_common::frame::Frame;
use reqwest::blocking::Client;
use tracing::{debug, info};

use super::{http_client, VideoSource};
use crate::acquisition::StopSignal;
use crate::error::SourceError;

/// Polling fallback for cameras without a stream endpoint: one GET per frame,
/// paced to the configured frame rate.
pub struct SnapshotSource {
    url: String,
    client: Client,
    interval: Duration,
    last_fetch: Option<Instant>,
    seq: u64,
    stop: StopSignal,
}

impl SnapshotSource {
    pub fn new(stream: &StreamConfig) -> Result<Self, SourceError> {
        Ok(Self {
            url: stream.snapshot_url(),
            client: http_client(stream)?,
            interval: stream.frame_interval(),
            last_fetch: None,
            seq: 0,
            stop: StopSignal::new(),
        })
    }

    fn fetch(&mut self) -> Result<Vec<u8>, SourceError> {
        self.last_fetch = Some(Instant::now());
        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(SourceError::Connect)?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus(response.status().as_u16()));
        }
        let body = response.bytes().map_err(SourceError::Http)?;
        Ok(body.to_vec())
    }
}

impl VideoSource for SnapshotSource {
    fn open(&mut self) -> Result<(), SourceError> {
        let probe = self.fetch()?;
        info!(url = %self.url, bytes = probe.len(), interval = ?self.interval, "snapshot endpoint reachable");
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, SourceError> {
        if let Some(last) = self.last_fetch {
            let elapsed = last.elapsed();
            if elapsed < self.interval && !self.stop.sleep(self.interval - elapsed) {
                return Ok(Frame::empty());
            }
        }

        let jpeg = self.fetch()?;
        if jpeg.is_empty() {
            debug!(url = %self.url, "camera returned an empty snapshot");
            return Ok(Frame::empty());
        }
        self.seq += 1;
        Ok(Frame::from_jpeg(jpeg, Utc::now().timestamp_millis(), self.seq))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn bind_stop_signal(&mut self, stop: StopSignal) {
        self.stop = stop;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// Answer `count` requests, each with a distinct one-byte-tagged body.
    fn serve_snapshots(count: u8) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for tag in 1..=count {
                let (mut socket, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(socket.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                    line.clear();
                }
                let body = [0xFF, 0xD8, tag, 0xFF, 0xD9];
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                socket.write_all(head.as_bytes()).unwrap();
                socket.write_all(&body).unwrap();
            }
        });
        format!("http://{addr}/frame")
    }

    #[test]
    fn polls_paced_snapshots() {
        let mut stream = StreamConfig::from_url(serve_snapshots(3));
        stream.fps = 20.0;
        let mut source = SnapshotSource::new(&stream).unwrap();
        source.open().unwrap();

        let start = Instant::now();
        let first = source.read_frame().unwrap();
        let second = source.read_frame().unwrap();
        assert_eq!(first.data, vec![0xFF, 0xD8, 2, 0xFF, 0xD9]);
        assert_eq!(second.data, vec![0xFF, 0xD8, 3, 0xFF, 0xD9]);
        assert_eq!((first.seq, second.seq), (1, 2));
        // Two reads after the probe are each paced by the 50ms interval.
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn open_fails_when_unreachable() {
        let mut source =
            SnapshotSource::new(&StreamConfig::from_url("http://127.0.0.1:9/frame")).unwrap();
        assert!(matches!(source.open(), Err(SourceError::Connect(_))));
    }
}
