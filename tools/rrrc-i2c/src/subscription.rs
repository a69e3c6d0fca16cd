/// Listener list for driver and port events. Listeners run synchronously,
/// in subscription order, on the thread that emits.
pub struct Subscribers<T> {
    next_id: usize,
    listeners: Vec<(usize, Box<dyn FnMut(&T) + Send>)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(usize);

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            listeners: Vec::new(),
        }
    }
}

impl<T> std::fmt::Debug for Subscribers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.listeners.len())
            .finish()
    }
}

impl<T> Subscribers<T> {
    pub fn subscribe(&mut self, listener: impl FnMut(&T) + Send + 'static) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id.0);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, value: &T) {
        for (_, listener) in &mut self.listeners {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn emit_reaches_listeners_until_unsubscribed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Subscribers::<u32>::default();
        let l = log.clone();
        let a = subs.subscribe(move |v| l.lock().unwrap().push(("a", *v)));
        let l = log.clone();
        subs.subscribe(move |v| l.lock().unwrap().push(("b", *v)));

        subs.emit(&1);
        assert!(subs.unsubscribe(a));
        assert!(!subs.unsubscribe(a));
        subs.emit(&2);

        assert_eq!(*log.lock().unwrap(), vec![("a", 1), ("b", 1), ("b", 2)]);
        assert_eq!(subs.len(), 1);
    }
}
