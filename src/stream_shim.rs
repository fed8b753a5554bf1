//! Broker-facing shim: turns the two inbound MQTT topics into paired filter cycles and
//! republishes the anti-noise chunk.
//!
//! The synchronous half (`on_reference`/`on_error_chunk`) is grounded directly in
//! `original_source/server/anc_server.py`'s `on_message` callback and is unit-testable
//! without a broker. The async `run` loop adapts the teacher's `network.rs`
//! (`establish_connection` / `start_udp_receiver`) connect-and-receive shape from a raw
//! UDP socket to an `rumqttc` MQTT client, and its reconnect backoff is grounded in
//! `error_recovery.rs`'s `NetworkRecoveryHandler::recover`.

use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};

use crate::adaptive_filter::AdaptiveFilter;
use crate::codec::PcmCodec;
use crate::config::{AppConfig, BrokerConfig};
use crate::error::AncError;

/// Holds the cached reference chunk, the adaptive filter, and the wire codec. Owns the
/// entire DSP cycle; the broker connection is a thin shell around it.
pub struct StreamShim {
    last_reference: Vec<f64>,
    filter: AdaptiveFilter,
    codec: PcmCodec,
    chunk_size: usize,
}

impl StreamShim {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            last_reference: vec![0.0; config.engine.chunk_size],
            filter: AdaptiveFilter::new(config.engine.filter),
            codec: PcmCodec::new(config.engine.to_codec_config()),
            chunk_size: config.engine.chunk_size,
        }
    }

    /// Decode an incoming reference-topic payload and cache it. Does not trigger a
    /// filter cycle.
    pub fn on_reference(&mut self, payload: &[u8]) -> Result<(), AncError> {
        self.last_reference = self.codec.decode(payload)?;
        Ok(())
    }

    /// Decode an incoming error-topic payload, run one filter cycle against the cached
    /// reference, and return the encoded anti-noise payload to publish.
    pub fn on_error_chunk(&mut self, payload: &[u8]) -> Result<Vec<u8>, AncError> {
        let error_vec = self.codec.decode(payload)?;
        let output = self.filter.process_chunk(&self.last_reference, &error_vec);
        Ok(self.codec.encode(&output))
    }

    pub fn filter(&self) -> &AdaptiveFilter {
        &self.filter
    }

    pub fn last_reference(&self) -> &[f64] {
        &self.last_reference
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Connect to the broker, subscribe to the two input topics, and process chunks
    /// until `shutdown` resolves. Reconnects with bounded exponential backoff on
    /// transport failure; returns an error only once reconnection attempts are
    /// exhausted, mirroring §7's TransportError policy.
    pub async fn run(
        &mut self,
        broker: &BrokerConfig,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<(), AncError> {
        let mut backoff = ReconnectBackoff::new(broker);

        loop {
            let client_id = format!("{}-{}", broker.client_id_prefix, std::process::id());
            let mut mqtt_options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
            mqtt_options.set_keep_alive(Duration::from_secs(30));
            mqtt_options.set_connection_timeout(broker.connect_timeout_ms / 1000);

            let (client, mut event_loop) = AsyncClient::new(mqtt_options, 64);
            client
                .subscribe(broker.topic_reference.clone(), QoS::AtMostOnce)
                .await
                .map_err(|e| AncError::Transport(e.to_string()))?;
            client
                .subscribe(broker.topic_error.clone(), QoS::AtMostOnce)
                .await
                .map_err(|e| AncError::Transport(e.to_string()))?;
            info!(
                "subscribed to {} and {}",
                broker.topic_reference, broker.topic_error
            );

            let mut connection_failed = false;
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown => {
                        info!("shutdown signal received, closing broker connection");
                        return Ok(());
                    }
                    event = event_loop.poll() => {
                        match event {
                            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                                self.dispatch(&publish.topic, &publish.payload, broker, &client).await;
                            }
                            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                                info!("broker connection established");
                                backoff.reset();
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!("broker transport error: {e}");
                                connection_failed = true;
                                break;
                            }
                        }
                    }
                }
            }

            if connection_failed {
                backoff.wait_and_advance().await?;
            }
        }
    }

    async fn dispatch(&mut self, topic: &str, payload: &[u8], broker: &BrokerConfig, client: &AsyncClient) {
        if topic == broker.topic_reference {
            if let Err(e) = self.on_reference(payload) {
                debug!("dropping malformed reference chunk: {e}");
            }
        } else if topic == broker.topic_error {
            match self.on_error_chunk(payload) {
                Ok(output) => {
                    if let Err(e) = client
                        .publish(broker.topic_processed.clone(), QoS::AtMostOnce, false, output)
                        .await
                    {
                        error!("failed to publish processed chunk: {e}");
                    }
                }
                Err(e) => {
                    debug!("dropping malformed error chunk: {e}");
                }
            }
        }
    }
}

/// Bounded exponential backoff, grounded in the teacher's
/// `NetworkRecoveryHandler::recover` formula (`1000ms * 2^attempts`, capped), applied
/// here as a plain loop rather than through a circuit-breaker registry.
struct ReconnectBackoff {
    attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl ReconnectBackoff {
    fn new(broker: &BrokerConfig) -> Self {
        Self {
            attempts: 0,
            initial_delay: Duration::from_millis(broker.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(broker.reconnect_max_delay_ms),
        }
    }

    fn current_delay(&self) -> Duration {
        let scale = 1u32.checked_shl(self.attempts.min(10)).unwrap_or(u32::MAX);
        let millis = self.initial_delay.as_millis() as u64 * scale as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }

    async fn wait_and_advance(&mut self) -> Result<(), AncError> {
        if self.current_delay() >= self.max_delay && self.attempts > 16 {
            return Err(AncError::Transport(
                "reconnect attempts exhausted".to_string(),
            ));
        }
        let delay = self.current_delay();
        warn!("reconnecting to broker in {delay:?} (attempt {})", self.attempts + 1);
        tokio::time::sleep(delay).await;
        self.attempts += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecConfig;

    fn test_shim() -> StreamShim {
        let config = AppConfig::default();
        StreamShim::new(&config)
    }

    fn encode_samples(samples: &[f64]) -> Vec<u8> {
        PcmCodec::new(CodecConfig::default()).encode(samples)
    }

    #[test]
    fn on_reference_caches_decoded_chunk() {
        let mut shim = test_shim();
        let samples = vec![0.5_f64; shim.chunk_size()];
        let payload = encode_samples(&samples);

        shim.on_reference(&payload).expect("decode reference");
        assert_eq!(shim.last_reference().len(), shim.chunk_size());
        assert!((shim.last_reference()[0] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn on_error_chunk_produces_equal_length_output_without_reference() {
        let mut shim = test_shim();
        let samples = vec![0.5_f64; shim.chunk_size()];
        let payload = encode_samples(&samples);

        // No reference chunk has arrived; last_reference is the initial zero vector,
        // which gates the filter, per §9 "Initial last_reference".
        let output = shim.on_error_chunk(&payload).expect("process error chunk");
        let decoded = PcmCodec::new(CodecConfig::default()).decode(&output).unwrap();
        assert_eq!(decoded.len(), shim.chunk_size());
        assert!(decoded.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn malformed_payload_surfaces_format_error() {
        let mut shim = test_shim();
        let err = shim.on_reference(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, AncError::Format { .. }));
    }

    #[test]
    fn reference_then_error_cycle_runs_full_filter_path() {
        let mut shim = test_shim();
        let n = shim.chunk_size();
        let alternating: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 0.6 } else { -0.6 }).collect();
        let payload = encode_samples(&alternating);

        shim.on_reference(&payload).expect("reference");
        let output = shim.on_error_chunk(&payload).expect("error chunk");
        let decoded = PcmCodec::new(CodecConfig::default()).decode(&output).unwrap();
        assert_eq!(decoded.len(), n);
        assert_eq!(shim.filter().packet_count(), 1);
    }

    #[test]
    fn backoff_grows_geometrically_and_caps() {
        let broker = BrokerConfig {
            reconnect_initial_delay_ms: 1000,
            reconnect_max_delay_ms: 8000,
            ..BrokerConfig::default()
        };
        let mut backoff = ReconnectBackoff::new(&broker);
        let mut delays = Vec::new();
        for _ in 0..5 {
            delays.push(backoff.current_delay());
            backoff.attempts += 1;
        }
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0], "backoff should be non-decreasing");
        }
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_resets_after_successful_reconnect() {
        let broker = BrokerConfig::default();
        let mut backoff = ReconnectBackoff::new(&broker);
        backoff.attempts = 7;
        backoff.reset();
        assert_eq!(backoff.attempts, 0);
        assert_eq!(backoff.current_delay(), backoff.initial_delay);
    }
}
