//! Integration tests: encoded batches flowing through the ingress chain into
//! the store

use tally_core::{Metric, TallyError};
use tally_ingress::{
    generate_key_pair, EgressEncoder, IngressPipeline, IngressRequest, Operation, Signer,
};
use tally_metrics::Persister;

/// Decode the pipeline's plaintext output and apply it, the way the server does
async fn ingest(
    pipeline: &IngressPipeline,
    persister: &Persister,
    request: IngressRequest,
) -> tally_core::Result<Vec<Metric>> {
    let plain = pipeline.process(request)?;
    let samples: Vec<Metric> = serde_json::from_slice(&plain.body)?;
    persister.apply_batch(&samples).await
}

#[tokio::test]
async fn test_round_trip_with_every_stage_enabled() {
    let (encryptor, decryptor) = generate_key_pair(1024).unwrap();
    let signer = Signer::new("shared-secret");

    let encoder = EgressEncoder::new(Some(signer.clone()), Some(encryptor));
    let pipeline = IngressPipeline::new(Some(decryptor), Some(signer), true);
    let persister = Persister::in_memory();

    let batch = vec![
        Metric::gauge("Temp", 23.5),
        Metric::counter("Requests", 1),
        Metric::counter("Requests", 4),
    ];
    let encoded = encoder.encode(&batch).unwrap();
    assert!(encoded.compressed);

    let request = IngressRequest::new(Operation::UpdateBatch, encoded.compressed, encoded.body);
    let stored = ingest(&pipeline, &persister, request).await.unwrap();

    assert_eq!(stored.len(), 3);
    assert_eq!(persister.gauge("Temp").await.unwrap(), 23.5);
    assert_eq!(persister.counter("Requests").await.unwrap(), 5);
}

#[tokio::test]
async fn test_bad_hash_in_middle_rejects_whole_batch() {
    let signer = Signer::new("shared-secret");
    let pipeline = IngressPipeline::new(None, Some(signer.clone()), false);
    let persister = Persister::in_memory();

    let mut batch = vec![
        Metric::gauge("Temp", 23.5),
        Metric::counter("Requests", 1),
        Metric::gauge("Humidity", 40.0),
    ];
    for sample in &mut batch {
        signer.sign(sample).unwrap();
    }
    batch[1].hash = Some("00".repeat(32));

    let body = serde_json::to_vec(&batch).unwrap();
    let err = ingest(
        &pipeline,
        &persister,
        IngressRequest::new(Operation::UpdateBatch, false, body),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TallyError::Integrity(_)));
    assert!(persister.store().is_empty().await);
}

#[tokio::test]
async fn test_mismatched_secret_is_rejected() {
    let encoder = EgressEncoder::new(Some(Signer::new("agent-secret")), None);
    let pipeline = IngressPipeline::new(None, Some(Signer::new("server-secret")), false);
    let persister = Persister::in_memory();

    let encoded = encoder.encode(&[Metric::gauge("Temp", 1.0)]).unwrap();
    let err = ingest(
        &pipeline,
        &persister,
        IngressRequest::new(Operation::UpdateBatch, encoded.compressed, encoded.body),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, TallyError::Integrity(_)));
    assert!(persister.store().is_empty().await);
}

#[tokio::test]
async fn test_encrypted_body_without_server_key_fails_to_decode() {
    let (encryptor, _) = generate_key_pair(1024).unwrap();
    let encoder = EgressEncoder::new(None, Some(encryptor));
    let pipeline = IngressPipeline::plain();
    let persister = Persister::in_memory();

    let encoded = encoder.encode(&[Metric::gauge("Temp", 1.0)]).unwrap();
    let result = ingest(
        &pipeline,
        &persister,
        IngressRequest::new(Operation::UpdateBatch, encoded.compressed, encoded.body),
    )
    .await;

    assert!(matches!(result, Err(TallyError::Serialization(_))));
}
