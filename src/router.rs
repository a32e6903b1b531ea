//! Topic fan-out with attribute filtering.
//!
//! A [`TopicRouter`] delivers each published event to every registered
//! subscriber whose [`FilterPolicy`] matches the event's attributes.
//! Deliveries are independent: a failing subscriber is logged and never
//! blocks its siblings, and events that match no filter are silently
//! dropped for that subscriber rather than treated as errors.

use crate::events::Attributes;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// A consumer of events published on a topic.
#[async_trait]
pub trait Subscriber<E: Send + 'static>: Send + Sync {
    /// Handle one delivered event.
    ///
    /// Errors are isolated per delivery: the router logs them and carries
    /// on with the remaining subscribers.
    async fn deliver(&self, event: E, attributes: &Attributes) -> anyhow::Result<()>;
}

/// Attribute-equality allow-list deciding which events reach a subscriber.
///
/// Every rule must match: the attribute has to be present on the event and
/// its value has to be in the rule's allow-list. A policy with no rules
/// matches everything.
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    rules: HashMap<String, HashSet<String>>,
}

impl FilterPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an allow-list rule for one attribute.
    pub fn allow<I, V>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.rules
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Pure predicate: does this policy admit an event with `attributes`?
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.rules.iter().all(|(attribute, allowed)| {
            attributes
                .get(attribute)
                .map(|value| allowed.contains(value))
                .unwrap_or(false)
        })
    }
}

struct Subscription<E> {
    name: String,
    filter: Option<FilterPolicy>,
    subscriber: Arc<dyn Subscriber<E>>,
}

/// Fan-out point for one event type.
pub struct TopicRouter<E> {
    topic: String,
    subscriptions: Vec<Subscription<E>>,
}

impl<E: Clone + Send + Sync + 'static> TopicRouter<E> {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Register a subscriber that receives every event on the topic.
    pub fn subscribe(&mut self, name: impl Into<String>, subscriber: Arc<dyn Subscriber<E>>) {
        self.subscriptions.push(Subscription {
            name: name.into(),
            filter: None,
            subscriber,
        });
    }

    /// Register a subscriber gated by a filter policy.
    pub fn subscribe_filtered(
        &mut self,
        name: impl Into<String>,
        filter: FilterPolicy,
        subscriber: Arc<dyn Subscriber<E>>,
    ) {
        self.subscriptions.push(Subscription {
            name: name.into(),
            filter: Some(filter),
            subscriber,
        });
    }

    /// Deliver an event to all matching subscribers concurrently.
    ///
    /// Returns the number of successful deliveries.
    pub async fn publish(&self, event: E, attributes: &Attributes) -> usize {
        let matching: Vec<&Subscription<E>> = self
            .subscriptions
            .iter()
            .filter(|sub| {
                sub.filter
                    .as_ref()
                    .map(|f| f.matches(attributes))
                    .unwrap_or(true)
            })
            .collect();

        if matching.len() < self.subscriptions.len() {
            debug!(
                topic = %self.topic,
                filtered = self.subscriptions.len() - matching.len(),
                "event filtered from some subscribers"
            );
        }

        let deliveries = matching.iter().map(|sub| {
            let event = event.clone();
            async move {
                match sub.subscriber.deliver(event, attributes).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            topic = %self.topic,
                            subscriber = %sub.name,
                            error = %e,
                            "subscriber delivery failed"
                        );
                        metrics::counter!("router.deliveries.failed").increment(1);
                        false
                    }
                }
            }
        });

        let delivered = futures::future::join_all(deliveries)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();

        metrics::counter!("router.events.published").increment(1);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_policy_matches_everything() {
        let policy = FilterPolicy::new();
        assert!(policy.matches(&Attributes::new()));
        assert!(policy.matches(&attrs(&[("metadata_type", "Location")])));
    }

    #[test]
    fn test_policy_allow_list() {
        let policy =
            FilterPolicy::new().allow("metadata_type", ["Caption", "Date", "Photographer"]);

        assert!(policy.matches(&attrs(&[("metadata_type", "Caption")])));
        assert!(policy.matches(&attrs(&[("metadata_type", "Date")])));
        assert!(!policy.matches(&attrs(&[("metadata_type", "Location")])));
        // Missing attribute never matches a rule
        assert!(!policy.matches(&Attributes::new()));
    }

    #[test]
    fn test_policy_requires_every_rule() {
        let policy = FilterPolicy::new()
            .allow("metadata_type", ["Caption"])
            .allow("channel", ["photo"]);

        assert!(policy.matches(&attrs(&[("metadata_type", "Caption"), ("channel", "photo")])));
        assert!(!policy.matches(&attrs(&[("metadata_type", "Caption")])));
    }

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Subscriber<String> for Recorder {
        async fn deliver(&self, event: String, _attributes: &Attributes) -> anyhow::Result<()> {
            self.seen.lock().await.push(event);
            Ok(())
        }
    }

    struct Failing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Subscriber<String> for Failing {
        async fn deliver(&self, _event: String, _attributes: &Attributes) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn test_fan_out_reaches_all_unfiltered_subscribers() {
        let mut router = TopicRouter::new("new-image");
        let first = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let second = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.subscribe("first", first.clone());
        router.subscribe("second", second.clone());

        let delivered = router
            .publish("hello".to_string(), &Attributes::new())
            .await;

        assert_eq!(delivered, 2);
        assert_eq!(*first.seen.lock().await, vec!["hello".to_string()]);
        assert_eq!(*second.seen.lock().await, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_others() {
        let mut router = TopicRouter::new("new-image");
        let failing = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.subscribe("failing", failing.clone());
        router.subscribe("recorder", recorder.clone());

        let delivered = router.publish("event".to_string(), &Attributes::new()).await;

        assert_eq!(delivered, 1);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_filtered_subscriber_skipped_silently() {
        let mut router = TopicRouter::new("metadata");
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        router.subscribe_filtered(
            "updater",
            FilterPolicy::new().allow("metadata_type", ["Caption", "Date", "Photographer"]),
            recorder.clone(),
        );

        let delivered = router
            .publish(
                "ignored".to_string(),
                &attrs(&[("metadata_type", "Location")]),
            )
            .await;

        assert_eq!(delivered, 0);
        assert!(recorder.seen.lock().await.is_empty());

        let delivered = router
            .publish(
                "applied".to_string(),
                &attrs(&[("metadata_type", "Caption")]),
            )
            .await;

        assert_eq!(delivered, 1);
        assert_eq!(*recorder.seen.lock().await, vec!["applied".to_string()]);
    }
}
