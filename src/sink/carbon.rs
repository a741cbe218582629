//! Carbon plaintext transport for push sinks.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::{path_segment, PointBatch, SinkError, SinkTransport};
use crate::db::Sink;

/// Port used when a push sink address carries none.
pub const DEFAULT_CARBON_PORT: u16 = 2003;

/// Writes `<path> <value> <timestamp>` lines over a fresh TCP connection.
#[derive(Debug, Default, Clone)]
pub struct CarbonTransport;

impl CarbonTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SinkTransport for CarbonTransport {
    fn name(&self) -> &str {
        "carbon"
    }

    async fn send(&self, sink: &Sink, batch: &PointBatch) -> Result<(), SinkError> {
        let address = carbon_address(&sink.address);
        let mut stream = TcpStream::connect(&address)
            .await
            .map_err(|e| SinkError::Connection(format!("{}: {}", address, e)))?;

        stream.write_all(carbon_lines(&sink.prefix, batch).as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Append the default port when the address has none.
pub fn carbon_address(address: &str) -> String {
    if address.rsplit_once(':').is_some_and(|(_, port)| port.parse::<u16>().is_ok()) {
        address.to_string()
    } else {
        format!("{}:{}", address, DEFAULT_CARBON_PORT)
    }
}

/// Render a batch as carbon plaintext, one newline-terminated line per point.
pub fn carbon_lines(prefix: &str, batch: &PointBatch) -> String {
    let mut base = Vec::with_capacity(4);
    if !prefix.is_empty() {
        base.push(prefix.to_string());
    }
    base.extend(batch.realm.split('.').map(path_segment));
    base.push(path_segment(&batch.host));
    if !batch.service.is_empty() {
        base.push(path_segment(&batch.service));
    }
    let base = base.join(".");
    let ts = batch.timestamp.timestamp();

    let mut out = String::new();
    for point in batch.points.iter() {
        out.push_str(&format!("{}.{} {} {}\n", base, path_segment(&point.name), point.value, ts));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perfdata::parse;
    use crate::sink::SinkKind;
    use chrono::{TimeZone, Utc};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn batch(service: &str) -> PointBatch {
        PointBatch {
            realm: "All.All A".to_string(),
            host: "srv001".to_string(),
            service: service.to_string(),
            timestamp: Utc.with_ymd_and_hms(2016, 10, 5, 12, 0, 0).unwrap(),
            points: parse("rta=0.083ms;10 pl=0%"),
        }
    }

    #[test]
    fn test_carbon_lines() {
        let text = carbon_lines("", &batch("check xxx"));
        assert_eq!(
            text,
            "All.All_A.srv001.check_xxx.rta 0.083 1475668800\n\
             All.All_A.srv001.check_xxx.rta_warning 10 1475668800\n\
             All.All_A.srv001.check_xxx.pl 0 1475668800\n"
        );

        let text = carbon_lines("monitoring", &batch(""));
        assert!(text.starts_with("monitoring.All.All_A.srv001.rta 0.083 "));
    }

    #[test]
    fn test_carbon_address() {
        assert_eq!(carbon_address("192.168.0.101"), "192.168.0.101:2003");
        assert_eq!(carbon_address("graphite:2004"), "graphite:2004");
    }

    #[tokio::test]
    async fn test_send_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = String::new();
            socket.read_to_string(&mut received).await.unwrap();
            received
        });

        let sink = Sink {
            id: 1,
            name: "graphite".to_string(),
            kind: SinkKind::Push,
            realm_id: 1,
            sub_realm: false,
            address,
            prefix: String::new(),
        };
        let batch = batch("ping");
        CarbonTransport::new().send(&sink, &batch).await.unwrap();

        assert_eq!(reader.await.unwrap(), carbon_lines("", &batch));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let sink = Sink {
            id: 1,
            name: "graphite".to_string(),
            kind: SinkKind::Push,
            realm_id: 1,
            sub_realm: false,
            address,
            prefix: String::new(),
        };
        let err = CarbonTransport::new().send(&sink, &batch("")).await.unwrap_err();
        assert!(matches!(err, SinkError::Connection(_)));
    }
}
