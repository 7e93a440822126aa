//! Notification subscriptions
//!
//! Subscribers register for a [`NotificationKind`] or for
//! [`NotificationKind::All`]. Delivery is synchronous: subscribers of the
//! notification's own kind first, then `All` subscribers, each list in
//! registration order.

use std::collections::HashMap;
use std::fmt;

use nexum_nci_core::{Notification, NotificationKind};
use tracing::trace;

/// Callback invoked for each delivered notification
pub type NotificationCallback = Box<dyn FnMut(&Notification)>;

/// Handle returned by [`Registry::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    callback: NotificationCallback,
}

/// Subscriber table keyed by notification kind
#[derive(Default)]
pub struct Registry {
    next_id: u64,
    subscriptions: HashMap<NotificationKind, Vec<Subscription>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self
            .subscriptions
            .iter()
            .map(|(kind, subs)| (*kind, subs.len()))
            .collect();
        f.debug_struct("Registry").field("subscriptions", &counts).finish()
    }
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for notifications of `kind`
    pub fn subscribe(&mut self, kind: NotificationKind, callback: NotificationCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions
            .entry(kind)
            .or_default()
            .push(Subscription { id, callback });
        id
    }

    /// Remove a subscription, returning whether it existed
    pub fn unsubscribe(&mut self, kind: NotificationKind, id: SubscriptionId) -> bool {
        let Some(subs) = self.subscriptions.get_mut(&kind) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|sub| sub.id != id);
        before != subs.len()
    }

    /// Number of subscribers for `kind`
    pub fn subscriber_count(&self, kind: NotificationKind) -> usize {
        self.subscriptions.get(&kind).map_or(0, Vec::len)
    }

    /// Deliver a notification, returning the number of callbacks invoked
    pub fn dispatch(&mut self, notification: &Notification) -> usize {
        let kind = notification.kind();
        let mut delivered = 0;
        for key in [kind, NotificationKind::All] {
            if let Some(subs) = self.subscriptions.get_mut(&key) {
                for sub in subs.iter_mut() {
                    (sub.callback)(notification);
                    delivered += 1;
                }
            }
        }
        trace!(?kind, delivered, "Dispatched notification");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use nexum_nci_core::Status;

    use super::*;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> NotificationCallback {
        let log = Rc::clone(log);
        Box::new(move |_| log.borrow_mut().push(name))
    }

    #[test]
    fn test_kind_then_all_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        registry.subscribe(NotificationKind::All, recorder(&log, "all-1"));
        registry.subscribe(NotificationKind::CoreGenericError, recorder(&log, "kind-1"));
        registry.subscribe(NotificationKind::CoreGenericError, recorder(&log, "kind-2"));
        registry.subscribe(NotificationKind::All, recorder(&log, "all-2"));
        registry.subscribe(NotificationKind::RfFieldInfo, recorder(&log, "other"));

        let delivered = registry.dispatch(&Notification::CoreGenericError(Status::Failed));
        assert_eq!(delivered, 4);
        assert_eq!(*log.borrow(), vec!["kind-1", "kind-2", "all-1", "all-2"]);
    }

    #[test]
    fn test_unsubscribe() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = Registry::new();
        let id = registry.subscribe(NotificationKind::RfFieldInfo, recorder(&log, "field"));
        assert_eq!(registry.subscriber_count(NotificationKind::RfFieldInfo), 1);

        assert!(!registry.unsubscribe(NotificationKind::All, id));
        assert!(registry.unsubscribe(NotificationKind::RfFieldInfo, id));
        assert!(!registry.unsubscribe(NotificationKind::RfFieldInfo, id));

        assert_eq!(registry.dispatch(&Notification::RfFieldInfo { field_on: true }), 0);
        assert!(log.borrow().is_empty());
    }
}
