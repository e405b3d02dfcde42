//! Stream multiplexer: fans N topic streams into one channel of tagged jobs.

use std::collections::HashMap;

use tokio::sync::mpsc;

/// A payload in transit between the multiplexer and deserialization.
/// No identity beyond topic + bytes; never persisted.
#[derive(Debug)]
pub(crate) struct Job {
    pub topic: String,
    pub body: Vec<u8>,
}

/// Fan all topic streams into a single channel of `Job`s.
///
/// One forwarder task per topic, so topics race freely against each other
/// while each topic's own order is preserved. The output channel has
/// capacity 1: a stalled consumer throttles every producer symmetrically
/// instead of buffering without bound.
///
/// The returned receiver stays open as long as any input stream is open and
/// closes once all of them have closed.
pub(crate) fn multiplex(streams: HashMap<String, mpsc::Receiver<Vec<u8>>>) -> mpsc::Receiver<Job> {
    let (tx, rx) = mpsc::channel(1);

    for (topic, mut stream) in streams {
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(body) = stream.recv().await {
                let job = Job {
                    topic: topic.clone(),
                    body,
                };
                if tx.send(job).await.is_err() {
                    break; // consumer is gone
                }
            }
        });
    }

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn preserves_per_topic_order() {
        let (tx_a, rx_a) = mpsc::channel(8);
        let (tx_b, rx_b) = mpsc::channel(8);
        let mut streams = HashMap::new();
        streams.insert("a".to_string(), rx_a);
        streams.insert("b".to_string(), rx_b);

        let mut jobs = multiplex(streams);

        for n in 1..=3u8 {
            tx_a.send(vec![n]).await.unwrap();
            tx_b.send(vec![10 + n]).await.unwrap();
        }
        drop(tx_a);
        drop(tx_b);

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        while let Some(job) = jobs.recv().await {
            match job.topic.as_str() {
                "a" => seen_a.push(job.body[0]),
                "b" => seen_b.push(job.body[0]),
                other => panic!("unexpected topic {other}"),
            }
        }

        // Cross-topic interleaving is unconstrained; per-topic order is not.
        assert_eq!(seen_a, vec![1, 2, 3]);
        assert_eq!(seen_b, vec![11, 12, 13]);
    }

    #[tokio::test]
    async fn output_closes_when_all_inputs_close() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(1);
        let mut streams = HashMap::new();
        streams.insert("only".to_string(), rx);

        let mut jobs = multiplex(streams);
        drop(tx);

        let end = timeout(Duration::from_millis(100), jobs.recv())
            .await
            .expect("channel should close promptly");
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn output_stays_open_while_one_input_remains() {
        let (tx_a, rx_a) = mpsc::channel::<Vec<u8>>(1);
        let (tx_b, rx_b) = mpsc::channel::<Vec<u8>>(1);
        let mut streams = HashMap::new();
        streams.insert("a".to_string(), rx_a);
        streams.insert("b".to_string(), rx_b);

        let mut jobs = multiplex(streams);
        drop(tx_a);

        tx_b.send(b"still here".to_vec()).await.unwrap();
        let job = jobs.recv().await.expect("stream b is still open");
        assert_eq!(job.topic, "b");
    }
}
