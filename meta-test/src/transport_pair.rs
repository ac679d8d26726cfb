use meta_transport::Transport;
use tokio::io::DuplexStream;

/// A connected pair of in-memory `Transport`s, standing in for two
/// stdio-connected processes in tests (framing runs over any
/// `AsyncRead + AsyncWrite`, not just real pipes).
pub struct TransportPair {
    pub left: Transport<DuplexStream, DuplexStream>,
    pub right: Transport<DuplexStream, DuplexStream>,
}

/// Builds a pair of transports such that writes on `left` are read by
/// `right` and vice versa, each over its own 64 KiB in-memory pipe.
pub fn paired_transports() -> TransportPair {
    let (left_read, right_write) = tokio::io::duplex(64 * 1024);
    let (right_read, left_write) = tokio::io::duplex(64 * 1024);
    TransportPair {
        left: Transport::new(left_read, left_write),
        right: Transport::new(right_read, right_write),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meta_transport::Envelope;
    use serde_json::json;

    #[tokio::test]
    async fn a_message_sent_on_left_arrives_on_right() {
        let TransportPair { mut left, mut right } = paired_transports();
        let envelope = Envelope::request("FSMListProviders", "a", "b", "rpc-a-1-1", json!({}));
        left.send_one(&envelope).await.unwrap();
        let received = right.recv_one().await.unwrap().unwrap();
        assert_eq!(received.correlation_id, "rpc-a-1-1");
    }
}
