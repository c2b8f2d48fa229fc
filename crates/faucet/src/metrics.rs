//! Prometheus metrics for claim processing.

use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct FaucetMetrics {
    registry: Registry,
    /// Claims by outcome kind
    pub claims_total: IntCounterVec,
    pub claim_duration: Histogram,
    /// Intents awaiting reconciliation after the last sweep
    pub unresolved_intents: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let claims_total = IntCounterVec::new(
            opts!("faucet_claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )?;
        let claim_duration = Histogram::with_opts(
            histogram_opts!(
                "faucet_claim_duration_seconds",
                "Wall time of a claim from validation to outcome"
            )
            .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let unresolved_intents = IntGauge::with_opts(opts!(
            "faucet_unresolved_intents",
            "Claim intents left open after reconciliation"
        ))?;

        registry.register(Box::new(claims_total.clone()))?;
        registry.register(Box::new(claim_duration.clone()))?;
        registry.register(Box::new(unresolved_intents.clone()))?;

        Ok(Self {
            registry,
            claims_total,
            claim_duration,
            unresolved_intents,
        })
    }

    /// Text exposition format.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
