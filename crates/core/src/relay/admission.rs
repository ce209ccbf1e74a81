use std::sync::Arc;

use async_trait::async_trait;
use regex_lite::Regex;
use tracing::debug;

use super::hook::StartHook;
use crate::connection::{Admission, PeerInfo, StartPolicy, StartRejection};
use crate::metrics::START_REJECTIONS;
use crate::transcoder::{SessionConfig, TranscodeSlots};

pub const LIMIT_REACHED: &str = "maximum number of concurrent transcodes reached";
pub const DESTINATION_NOT_ALLOWED: &str = "destination URL not allowed";

/// The relay-wide start policy: concurrency limit, then operator hook, then
/// destination allow-list.
///
/// Every admitted start holds a slot from the shared counter until its
/// transcoder is destroyed or exits, whether or not a limit is configured.
pub struct AdmissionPolicy {
    slots: TranscodeSlots,
    max_concurrent: Option<usize>,
    hook: Option<Arc<dyn StartHook>>,
    allowed_destinations: Option<Regex>,
}

impl AdmissionPolicy {
    pub fn new(slots: TranscodeSlots) -> Self {
        Self {
            slots,
            max_concurrent: None,
            hook: None,
            allowed_destinations: None,
        }
    }

    pub fn with_limit(mut self, max_concurrent: Option<usize>) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_hook(mut self, hook: Option<Arc<dyn StartHook>>) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_allowed_destinations(mut self, pattern: Option<Regex>) -> Self {
        self.allowed_destinations = pattern;
        self
    }
}

#[async_trait]
impl StartPolicy for AdmissionPolicy {
    async fn admit(
        &self,
        peer: &PeerInfo,
        config: SessionConfig,
    ) -> Result<Admission, StartRejection> {
        let slot = match self.max_concurrent {
            Some(limit) => self.slots.try_acquire(limit).ok_or_else(|| {
                START_REJECTIONS.with_label_values(&["limit"]).inc();
                debug!(connection = %peer.id, limit, "transcode limit reached");
                StartRejection::new(LIMIT_REACHED)
            })?,
            None => self.slots.acquire(),
        };

        // The slot is released on any early return below.
        let config = match &self.hook {
            Some(hook) => hook.rewrite(peer, config).await.inspect_err(|rejection| {
                START_REJECTIONS.with_label_values(&["hook"]).inc();
                debug!(connection = %peer.id, "start hook refused: {}", rejection);
            })?,
            None => config,
        };

        if let Some(pattern) = &self.allowed_destinations {
            if !pattern.is_match(&config.rtmp) {
                START_REJECTIONS.with_label_values(&["destination"]).inc();
                debug!(connection = %peer.id, destination = %config.rtmp, "destination refused");
                return Err(StartRejection::new(DESTINATION_NOT_ALLOWED));
            }
        }

        Ok(Admission::new(config).with_slot(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::TemplateRewrite;
    use std::collections::HashMap;

    fn peer() -> PeerInfo {
        PeerInfo::new(None)
    }

    fn session(rtmp: &str) -> SessionConfig {
        SessionConfig::new(25, 44100, rtmp)
    }

    #[tokio::test]
    async fn test_unlimited_still_counts_slots() {
        let slots = TranscodeSlots::new();
        let policy = AdmissionPolicy::new(slots.clone());

        let a = policy.admit(&peer(), session("rtmp://x/y")).await.unwrap();
        let b = policy.admit(&peer(), session("rtmp://x/y")).await.unwrap();
        assert_eq!(slots.active(), 2);

        drop(a);
        drop(b);
        assert_eq!(slots.active(), 0);
    }

    #[tokio::test]
    async fn test_limit_rejects_excess() {
        let slots = TranscodeSlots::new();
        let policy = AdmissionPolicy::new(slots.clone()).with_limit(Some(1));

        let held = policy.admit(&peer(), session("rtmp://x/y")).await.unwrap();
        let err = policy
            .admit(&peer(), session("rtmp://x/y"))
            .await
            .unwrap_err();
        assert_eq!(err.reason, LIMIT_REACHED);

        drop(held);
        assert!(policy.admit(&peer(), session("rtmp://x/y")).await.is_ok());
    }

    #[tokio::test]
    async fn test_allow_list_rejects_and_releases_slot() {
        let slots = TranscodeSlots::new();
        let policy = AdmissionPolicy::new(slots.clone())
            .with_limit(Some(1))
            .with_allowed_destinations(Some(Regex::new(r"^rtmp://allowed\.example/").unwrap()));

        let err = policy
            .admit(&peer(), session("rtmp://evil.example/live"))
            .await
            .unwrap_err();
        assert_eq!(err.reason, DESTINATION_NOT_ALLOWED);
        assert_eq!(slots.active(), 0);

        let admitted = policy
            .admit(&peer(), session("rtmp://allowed.example/live"))
            .await
            .unwrap();
        assert!(admitted.slot.is_some());
    }

    #[tokio::test]
    async fn test_allow_list_applies_to_rewritten_destination() {
        let slots = TranscodeSlots::new();
        let hook: Arc<dyn StartHook> =
            Arc::new(TemplateRewrite::parse("rtmp://allowed.example/app/{key}").unwrap());
        let policy = AdmissionPolicy::new(slots.clone())
            .with_hook(Some(hook))
            .with_allowed_destinations(Some(Regex::new(r"^rtmp://allowed\.example/").unwrap()));
        let peer = PeerInfo::new(None)
            .with_query(HashMap::from([("key".to_string(), "s3cret".to_string())]));

        let admitted = policy
            .admit(&peer, session("rtmp://evil.example/live"))
            .await
            .unwrap();

        assert_eq!(admitted.config.rtmp, "rtmp://allowed.example/app/s3cret");
    }

    #[tokio::test]
    async fn test_hook_rejection_releases_slot() {
        let slots = TranscodeSlots::new();
        let hook: Arc<dyn StartHook> = Arc::new(TemplateRewrite::parse("rtmp://x/{key}").unwrap());
        let policy = AdmissionPolicy::new(slots.clone())
            .with_limit(Some(1))
            .with_hook(Some(hook));

        let err = policy
            .admit(&peer(), session("rtmp://x/y"))
            .await
            .unwrap_err();

        assert_eq!(err.reason, "missing query parameter 'key'");
        assert_eq!(slots.active(), 0);
    }
}
