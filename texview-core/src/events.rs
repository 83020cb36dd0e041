use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::view::ScaleMode;

/// Notifications published by a [`crate::PageView`] after each state change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewEvent {
    PageChanged(usize),
    ZoomChanged(f64),
    ScaleOptionChanged(ScaleMode),
}

type Observer = Box<dyn FnMut(&ViewEvent) + Send>;

/// Observer registry; every subscriber sees every event in emission order.
#[derive(Default)]
pub struct EventBus {
    observers: Vec<Observer>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, observer: F)
    where
        F: FnMut(&ViewEvent) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Subscribes a shared log and returns it, for status lines and tests.
    pub fn recorder(&mut self) -> Arc<Mutex<Vec<ViewEvent>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        self.subscribe(move |event| sink.lock().push(*event));
        log
    }

    pub fn emit(&mut self, event: ViewEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}
