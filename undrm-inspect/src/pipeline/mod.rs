//! Inspect pipeline orchestrator
//!
//! Runs one request end to end: resolve key material, decrypt the
//! container, parse its structure, sample the TOC, infer the start point.
//! The audit record is created before key material is touched and reaches
//! a terminal state exactly once, on every exit path.
//!
//! Decryption and parsing are CPU-bound and run on the blocking pool,
//! gated by a semaphore so a burst of requests cannot exhaust it. Key
//! material lives only inside the decrypt closure; the decrypted container
//! is wiped as soon as parsing has consumed it.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::audit::AuditSink;
use crate::models::{ContainerManifest, DecryptedContent, RequestContext, StartPointResult};
use crate::services::{decryptor, epub, sampler, InferenceClient, LicenseResolver};
use undrm_common::audit::{AuditCompletion, AuditRecord};
use undrm_common::{Error, Result};

pub struct InspectPipeline {
    resolver: Arc<dyn LicenseResolver>,
    audit: Arc<dyn AuditSink>,
    inference: Arc<InferenceClient>,
    decrypt_permits: Arc<Semaphore>,
}

impl InspectPipeline {
    pub fn new(
        resolver: Arc<dyn LicenseResolver>,
        audit: Arc<dyn AuditSink>,
        inference: Arc<InferenceClient>,
        max_decrypt_concurrency: usize,
    ) -> Self {
        Self {
            resolver,
            audit,
            inference,
            decrypt_permits: Arc::new(Semaphore::new(max_decrypt_concurrency)),
        }
    }

    /// Run the full pipeline for one request.
    ///
    /// The audit record transitions to `Success` or `Failure` exactly once
    /// before this returns. A sink failure on the success path fails the
    /// request; a sink failure on the failure path is logged and the
    /// original pipeline error is returned.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        encrypted: Vec<u8>,
    ) -> Result<StartPointResult> {
        let record = AuditRecord::processing(
            ctx.event_id,
            &ctx.tenant_id,
            &ctx.item_id,
            &ctx.source.bucket,
            &ctx.source.key,
            &ctx.reason,
        );
        self.audit.create(&record).await?;

        let mut grant_id: Option<String> = None;
        let outcome = self.execute(ctx, encrypted, &mut grant_id).await;

        match outcome {
            Ok(result) => {
                self.audit
                    .finish(ctx.event_id, &AuditCompletion::success(grant_id))
                    .await?;
                Ok(result)
            }
            Err(e) => {
                let completion = AuditCompletion::failure(e.to_string(), grant_id);
                if let Err(sink_err) = self.audit.finish(ctx.event_id, &completion).await {
                    tracing::error!(
                        event_id = %ctx.event_id,
                        error = %sink_err,
                        "Audit completion failed while recording pipeline failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        encrypted: Vec<u8>,
        grant_id: &mut Option<String>,
    ) -> Result<StartPointResult> {
        tracing::debug!(event_id = %ctx.event_id, item_id = %ctx.item_id, "Pipeline start");

        let key = self.resolver.resolve(&ctx.tenant_id, &ctx.item_id).await?;
        *grant_id = key.grant_id.clone();
        tracing::debug!(event_id = %ctx.event_id, "Key resolved");

        let permit = self
            .decrypt_permits
            .acquire()
            .await
            .map_err(|_| Error::Internal("Decrypt semaphore closed".to_string()))?;

        // Key material moves into the closure and drops (zeroized) there
        let decrypted = tokio::task::spawn_blocking(move || {
            decryptor::decrypt_container(&encrypted, &key)
        })
        .await
        .map_err(|e| Error::Internal(format!("Decrypt task failed: {}", e)))??;
        tracing::debug!(event_id = %ctx.event_id, size = decrypted.len(), "Container decrypted");

        let manifest = tokio::task::spawn_blocking(move || {
            let mut decrypted = decrypted;
            parse_and_wipe(&mut decrypted)
        })
        .await
        .map_err(|e| Error::Internal(format!("Parse task failed: {}", e)))??;
        drop(permit);
        tracing::debug!(
            event_id = %ctx.event_id,
            toc_entries = manifest.toc.len(),
            "Container parsed"
        );

        let sampled = sampler::sample_toc(&manifest.toc, ctx.use_full_toc_analysis);
        let result = self.inference.detect_start_point(&manifest, &sampled).await?;

        tracing::info!(
            event_id = %ctx.event_id,
            item_id = %ctx.item_id,
            start_file = %result.start_file,
            confidence = result.confidence,
            "Pipeline complete"
        );
        Ok(result)
    }
}

/// Parse the decrypted container and clear the plaintext buffer before the
/// blocking task returns, whether or not parsing succeeded
fn parse_and_wipe(decrypted: &mut DecryptedContent) -> Result<ContainerManifest> {
    let parsed = epub::parse_container(decrypted.as_bytes());
    decrypted.wipe();
    parsed
}
