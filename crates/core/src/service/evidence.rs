use crate::api::PricingBackend;
use crate::contract::evidence::{EvidenceBundle, HoneywellMapping};
use crate::service::fallback;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Documentation for the evidence/methods tab.
///
/// Backend failures here are never fatal: they are logged and replaced by
/// the bundled fallback content. Only successful fetches are cached, so a
/// later call retries the backend.
pub struct EvidenceService {
    backend: Arc<dyn PricingBackend>,
    bundle: RwLock<Option<EvidenceBundle>>,
    mapping: RwLock<Option<HoneywellMapping>>,
}

impl EvidenceService {
    pub fn new(backend: Arc<dyn PricingBackend>) -> Self {
        Self {
            backend,
            bundle: RwLock::new(None),
            mapping: RwLock::new(None),
        }
    }

    async fn cached_bundle(&self) -> Option<EvidenceBundle> {
        self.bundle.read().await.clone()
    }

    async fn fetch_bundle(&self) -> Option<EvidenceBundle> {
        if let Some(bundle) = self.cached_bundle().await {
            return Some(bundle);
        }
        match self.backend.evidence().await {
            Ok(bundle) => {
                *self.bundle.write().await = Some(bundle.clone());
                Some(bundle)
            }
            Err(err) => {
                tracing::warn!(error = %err, "evidence fetch failed; using bundled fallback");
                None
            }
        }
    }

    pub async fn evidence(&self) -> EvidenceBundle {
        self.fetch_bundle()
            .await
            .unwrap_or_else(fallback::fallback_bundle)
    }

    /// Markdown for document `id`; always non-empty.
    pub async fn doc_content(&self, id: &str) -> String {
        if let Some(bundle) = self.fetch_bundle().await {
            if let Some(doc) = bundle.document(id).filter(|d| !d.content.trim().is_empty()) {
                return doc.content.clone();
            }
        }

        match self.backend.evidence_doc(id).await {
            Ok(doc) if !doc.content.trim().is_empty() => return doc.content,
            Ok(_) => tracing::warn!(id, "backend returned an empty document"),
            Err(err) if err.is_not_found() => tracing::debug!(id, "document not found on backend"),
            Err(err) => tracing::warn!(id, error = %err, "document fetch failed"),
        }

        match fallback::fallback_doc(id) {
            Some(content) => content.to_string(),
            None => fallback::placeholder_doc(id),
        }
    }

    pub async fn honeywell_mapping(&self) -> HoneywellMapping {
        if let Some(mapping) = self.mapping.read().await.clone() {
            return mapping;
        }
        match self.backend.honeywell_mapping().await {
            Ok(mapping) => {
                *self.mapping.write().await = Some(mapping.clone());
                mapping
            }
            Err(err) => {
                tracing::warn!(error = %err, "honeywell mapping fetch failed; using bundled fallback");
                fallback::fallback_honeywell_mapping()
            }
        }
    }

    pub async fn invalidate(&self) {
        *self.bundle.write().await = None;
        *self.mapping.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::testing::FakeBackend;
    use crate::contract::evidence::EvidenceDoc;

    fn bundle_with(doc: EvidenceDoc) -> EvidenceBundle {
        EvidenceBundle {
            documents: vec![doc],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn caches_first_successful_bundle() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_evidence(Ok(bundle_with(EvidenceDoc {
            id: "methodology".to_string(),
            title: "Live".to_string(),
            content: "live".to_string(),
        })));
        let service = EvidenceService::new(backend.clone());

        assert_eq!(service.evidence().await.documents[0].title, "Live");
        assert_eq!(service.evidence().await.documents[0].title, "Live");
        assert_eq!(backend.calls("evidence"), 1);

        service.invalidate().await;
        service.evidence().await;
        assert_eq!(backend.calls("evidence"), 2);
    }

    #[tokio::test]
    async fn failure_falls_back_and_is_not_cached() {
        let backend = Arc::new(FakeBackend::default());
        let service = EvidenceService::new(backend.clone());

        let bundle = service.evidence().await;
        assert_eq!(bundle, fallback::fallback_bundle());
        service.evidence().await;
        assert_eq!(backend.calls("evidence"), 2);
    }

    #[tokio::test]
    async fn doc_content_prefers_bundle_then_endpoint_then_fallback() {
        let backend = Arc::new(FakeBackend::default());
        backend.set_evidence(Ok(bundle_with(EvidenceDoc {
            id: "methodology".to_string(),
            title: "Methodology".to_string(),
            content: "from bundle".to_string(),
        })));
        backend.set_doc("elasticity", "from endpoint");
        let service = EvidenceService::new(backend.clone());

        assert_eq!(service.doc_content("methodology").await, "from bundle");
        assert_eq!(service.doc_content("elasticity").await, "from endpoint");
        assert_eq!(
            service.doc_content("business_rules").await,
            fallback::fallback_doc("business_rules").unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_doc_never_fails_and_is_non_empty() {
        let backend = Arc::new(FakeBackend::default());
        let service = EvidenceService::new(backend);
        let content = service.doc_content("unknown_id").await;
        assert!(!content.trim().is_empty());
        assert!(content.contains("unknown_id"));
    }

    #[tokio::test]
    async fn honeywell_mapping_falls_back() {
        let backend = Arc::new(FakeBackend::default());
        let service = EvidenceService::new(backend);
        let mapping = service.honeywell_mapping().await;
        assert!(!mapping.mappings.is_empty());
    }
}
