//! Subscription registry.
//!
//! Every routing participant keeps the patterns it is interested in here: the
//! native API with its application handlers, and each edge with the patterns
//! its peer subscribed to.
use std::ops::RangeInclusive;
use std::sync::Arc;

use directmq::topic;

/// Subscription identifier, unique within its list.
pub type SubscriptionId = u32;

/// How many random ids we try before giving up.
pub const MAX_ID_ATTEMPTS: usize = 1000;

/// A subscribed pattern along with its handler.
#[derive(Debug, Clone)]
pub struct Subscription<H> {
    pub id: SubscriptionId,
    pub pattern: Arc<str>,
    pub handler: H,
}

/// Insertion-ordered list of subscriptions.
#[derive(Debug)]
pub struct SubscriptionList<H> {
    subscriptions: Vec<Subscription<H>>,
    rng: fastrand::Rng,
    /// Ids are drawn from this range.
    ids: RangeInclusive<SubscriptionId>,
}

impl<H> Default for SubscriptionList<H> {
    fn default() -> Self {
        Self::new(fastrand::Rng::new())
    }
}

impl<H> SubscriptionList<H> {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self::with_ids(rng, SubscriptionId::MIN..=SubscriptionId::MAX)
    }

    /// A list that only hands out ids from the given range.
    pub fn with_ids(rng: fastrand::Rng, ids: RangeInclusive<SubscriptionId>) -> Self {
        Self {
            subscriptions: Vec::new(),
            rng,
            ids,
        }
    }

    /// Add a subscription. Patterns are not validated here.
    ///
    /// Returns `None` if no free id could be found.
    pub fn add(&mut self, pattern: impl Into<Arc<str>>, handler: H) -> Option<SubscriptionId> {
        let id = self.random_id()?;

        self.subscriptions.push(Subscription {
            id,
            pattern: pattern.into(),
            handler,
        });
        Some(id)
    }

    /// Remove a subscription. Does nothing if it isn't found.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription<H>> {
        let ix = self.subscriptions.iter().position(|s| s.id == id)?;

        Some(self.subscriptions.remove(ix))
    }

    /// Find a subscription by its exact pattern.
    pub fn find(&self, pattern: &str) -> Option<&Subscription<H>> {
        self.subscriptions.iter().find(|s| &*s.pattern == pattern)
    }

    /// Subscriptions matching a topic, in registry order.
    pub fn triggered<'a>(
        &'a self,
        topic: &'a str,
    ) -> impl Iterator<Item = &'a Subscription<H>> + 'a {
        self.subscriptions
            .iter()
            .filter(move |s| topic::matches(&s.pattern, topic))
    }

    /// Like [`SubscriptionList::triggered`], but gives mutable access to handlers.
    pub fn triggered_mut(&mut self, topic: &str) -> Vec<&mut Subscription<H>> {
        self.subscriptions
            .iter_mut()
            .filter(|s| topic::matches(&s.pattern, topic))
            .collect()
    }

    /// Whether any subscription matches the topic.
    pub fn will_handle(&self, topic: &str) -> bool {
        self.triggered(topic).next().is_some()
    }

    /// Whether a registered pattern already covers `pattern`.
    pub fn already_handles(&self, pattern: &str) -> bool {
        self.subscriptions
            .iter()
            .any(|s| topic::is_subtopic(&s.pattern, pattern))
    }

    /// Registered patterns, without duplicates.
    pub fn unique_topics(&self) -> Vec<Arc<str>> {
        let mut unique: Vec<Arc<str>> = Vec::with_capacity(self.subscriptions.len());

        for s in &self.subscriptions {
            if !unique.iter().any(|u| *u == s.pattern) {
                unique.push(s.pattern.clone());
            }
        }
        unique
    }

    /// Registered patterns not covered by any other registered pattern.
    pub fn top_level_topics(&self) -> Vec<Arc<str>> {
        topic::deduplicate(self.unique_topics())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription<H>> {
        self.subscriptions.iter()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    fn random_id(&mut self) -> Option<SubscriptionId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.rng.u32(self.ids.clone());

            if !self.subscriptions.iter().any(|s| s.id == id) {
                return Some(id);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use qcheck_macros::quickcheck;

    use directmq::test::arbitrary::{Pattern, Topic};

    fn topics(list: Vec<Arc<str>>) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_add_remove() {
        let mut subs = SubscriptionList::default();
        let a = subs.add("a/b", 'a').unwrap();
        let b = subs.add("a/*", 'b').unwrap();

        assert_ne!(a, b);
        assert_eq!(subs.len(), 2);

        let removed = subs.remove(a).unwrap();
        assert_eq!(removed.handler, 'a');
        assert_eq!(subs.len(), 1);
        assert!(subs.remove(a).is_none());
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn test_triggered() {
        let mut subs = SubscriptionList::default();
        subs.add("a/*", 1).unwrap();
        subs.add("b", 2).unwrap();
        subs.add("a/b", 3).unwrap();
        subs.add("**", 4).unwrap();

        let triggered = subs.triggered("a/b").map(|s| s.handler).collect::<Vec<_>>();
        assert_eq!(triggered, vec![1, 3, 4]);

        assert!(subs.will_handle("b"));
        assert!(subs.will_handle("c/d/e"));

        for s in subs.triggered_mut("b") {
            s.handler *= 10;
        }
        let handlers = subs.iter().map(|s| s.handler).collect::<Vec<_>>();
        assert_eq!(handlers, vec![1, 20, 3, 40]);
    }

    #[test]
    fn test_will_handle_empty() {
        let subs = SubscriptionList::<()>::default();

        assert!(!subs.will_handle("a"));
        assert!(!subs.already_handles("a"));
        assert!(subs.top_level_topics().is_empty());
    }

    #[test]
    fn test_already_handles() {
        let mut subs = SubscriptionList::default();
        subs.add("x/y/**", ()).unwrap();

        assert!(subs.already_handles("x/y/z"));
        assert!(subs.already_handles("x/y/**"));
        assert!(!subs.already_handles("x/**"));
        assert!(!subs.already_handles("a"));
    }

    #[test]
    fn test_topics() {
        let mut subs = SubscriptionList::default();
        subs.add("topic/1", ()).unwrap();
        subs.add("topic/1", ()).unwrap();
        subs.add("other", ()).unwrap();
        subs.add("topic/*", ()).unwrap();

        assert_eq!(
            topics(subs.unique_topics()),
            vec!["topic/1", "other", "topic/*"]
        );
        assert_eq!(topics(subs.top_level_topics()), vec!["other", "topic/*"]);

        subs.clear();
        assert!(subs.is_empty());
        assert!(subs.unique_topics().is_empty());
    }

    #[test]
    fn test_find() {
        let mut subs = SubscriptionList::default();
        let id = subs.add("a/*", ()).unwrap();

        assert_eq!(subs.find("a/*").map(|s| s.id), Some(id));
        assert!(subs.find("a/b").is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut subs = SubscriptionList::new(fastrand::Rng::with_seed(7));
        let mut ids = (0..256)
            .map(|_| subs.add("a", ()).unwrap())
            .collect::<Vec<_>>();

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 256);
    }

    #[test]
    fn test_ids_exhausted() {
        let mut subs = SubscriptionList::with_ids(fastrand::Rng::with_seed(7), 1..=2);
        let mut ids = vec![subs.add("a", ()).unwrap(), subs.add("b", ()).unwrap()];

        ids.sort();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(subs.add("c", ()), None);

        subs.remove(1);
        assert_eq!(subs.add("c", ()), Some(1));
    }

    #[quickcheck]
    fn prop_triggered_matches(patterns: Vec<Pattern>, topic: Topic) {
        let mut subs = SubscriptionList::default();
        for p in &patterns {
            subs.add(p.as_str(), ()).unwrap();
        }
        let expected = patterns.iter().filter(|p| topic::matches(p, &topic)).count();

        assert_eq!(subs.triggered(&topic).count(), expected);
        assert_eq!(subs.will_handle(&topic), expected > 0);
    }
}
