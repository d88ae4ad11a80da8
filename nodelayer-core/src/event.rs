//! Lifecycle events and their listeners.
//!
//! Listeners register for an explicit set of [`Event`]s with the session's [`EventManager`].
//! Dispatch is an ordinary synchronous call: listeners run in registration order on the
//! thread that called `flush`, and receive the session itself so they can schedule more work.
//!
//! # Example
//!
//! ```ignore
//! use nodelayer::prelude::*;
//!
//! session.event_manager().listen(&[Event::PrePersist], |args: &mut EventArgs<'_>| {
//!     if let Some(document) = args.document() {
//!         document.set("name", "prepersist");
//!     }
//!     Ok(())
//! })?;
//! ```

use std::{collections::HashMap, fmt, rc::Rc, str::FromStr};

use tracing::trace;

use crate::{
    document::DocumentHandle,
    error::{SessionError, SessionResult},
    session::Session,
};

/// The closed set of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    PrePersist,
    PostPersist,
    PreUpdate,
    PostUpdate,
    PreRemove,
    PostRemove,
    PreMove,
    PostMove,
    PreFlush,
    OnFlush,
    PostFlush,
}

impl Event {
    pub const ALL: [Event; 11] = [
        Event::PrePersist,
        Event::PostPersist,
        Event::PreUpdate,
        Event::PostUpdate,
        Event::PreRemove,
        Event::PostRemove,
        Event::PreMove,
        Event::PostMove,
        Event::PreFlush,
        Event::OnFlush,
        Event::PostFlush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::PrePersist => "prePersist",
            Event::PostPersist => "postPersist",
            Event::PreUpdate => "preUpdate",
            Event::PostUpdate => "postUpdate",
            Event::PreRemove => "preRemove",
            Event::PostRemove => "postRemove",
            Event::PreMove => "preMove",
            Event::PostMove => "postMove",
            Event::PreFlush => "preFlush",
            Event::OnFlush => "onFlush",
            Event::PostFlush => "postFlush",
        }
    }

    /// Whether the event concerns a single document.
    pub fn has_document(&self) -> bool {
        !matches!(self, Event::PreFlush | Event::OnFlush | Event::PostFlush)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| SessionError::InvalidListener(format!("unknown event {s:?}")))
    }
}

/// Payload handed to listeners.
pub struct EventArgs<'a> {
    event: Event,
    document: Option<DocumentHandle>,
    session: &'a mut Session,
}

impl<'a> EventArgs<'a> {
    pub(crate) fn new(
        event: Event,
        document: Option<DocumentHandle>,
        session: &'a mut Session,
    ) -> Self {
        Self { event, document, session }
    }

    pub fn event(&self) -> Event {
        self.event
    }

    /// The affected document; `None` for the flush-wide events.
    pub fn document(&self) -> Option<&DocumentHandle> {
        self.document.as_ref()
    }

    /// The session being flushed. Listeners may persist, remove, move and look up documents
    /// through it; during `onFlush` the queue accessors and
    /// [`Session::compute_single_document_change_set`] are available as well.
    pub fn session(&mut self) -> &mut Session {
        self.session
    }
}

/// A handler for one or more lifecycle events.
pub trait EventListener {
    fn on_event(&self, args: &mut EventArgs<'_>) -> SessionResult<()>;
}

impl<F> EventListener for F
where
    F: Fn(&mut EventArgs<'_>) -> SessionResult<()>,
{
    fn on_event(&self, args: &mut EventArgs<'_>) -> SessionResult<()> {
        self(args)
    }
}

/// A listener that declares the events it handles.
pub trait EventSubscriber: EventListener {
    fn subscribed_events(&self) -> Vec<Event>;
}

/// Registry of listeners per event.
#[derive(Default)]
pub struct EventManager {
    listeners: HashMap<Event, Vec<Rc<dyn EventListener>>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for every event in `events`.
    ///
    /// # Errors
    ///
    /// Fails with [`SessionError::InvalidListener`] when `events` is empty. Registering the
    /// same listener for the same event again is a no-op.
    pub fn add_listener(
        &mut self,
        events: &[Event],
        listener: Rc<dyn EventListener>,
    ) -> SessionResult<()> {
        if events.is_empty() {
            return Err(SessionError::InvalidListener(
                "a listener must be registered for at least one event".to_string(),
            ));
        }

        for event in events {
            let registered = self.listeners.entry(*event).or_default();

            if !registered.iter().any(|existing| Rc::ptr_eq(existing, &listener)) {
                registered.push(Rc::clone(&listener));
            }
        }

        Ok(())
    }

    /// Registers a listener by event names, validating every name first.
    pub fn add_listener_by_names(
        &mut self,
        names: &[&str],
        listener: Rc<dyn EventListener>,
    ) -> SessionResult<()> {
        let events = names
            .iter()
            .map(|name| name.parse())
            .collect::<SessionResult<Vec<Event>>>()?;

        self.add_listener(&events, listener)
    }

    /// Registers a closure.
    pub fn listen<F>(&mut self, events: &[Event], listener: F) -> SessionResult<()>
    where
        F: Fn(&mut EventArgs<'_>) -> SessionResult<()> + 'static,
    {
        self.add_listener(events, Rc::new(listener))
    }

    pub fn add_subscriber<S>(&mut self, subscriber: Rc<S>) -> SessionResult<()>
    where
        S: EventSubscriber + 'static,
    {
        let events = subscriber.subscribed_events();
        self.add_listener(&events, subscriber)
    }

    /// Removes `listener` from every event it is registered for.
    pub fn remove_listener(&mut self, listener: &Rc<dyn EventListener>) {
        for registered in self.listeners.values_mut() {
            registered.retain(|existing| !Rc::ptr_eq(existing, listener));
        }
    }

    pub fn has_listeners(&self, event: Event) -> bool {
        self.listeners.get(&event).is_some_and(|l| !l.is_empty())
    }

    /// A copy of the listeners of `event`, so that dispatch is unaffected by registrations
    /// made while it runs.
    pub fn listeners_for(&self, event: Event) -> Vec<Rc<dyn EventListener>> {
        self.listeners.get(&event).cloned().unwrap_or_default()
    }
}

impl fmt::Debug for EventManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self
            .listeners
            .iter()
            .map(|(event, listeners)| (event.as_str(), listeners.len()))
            .collect::<HashMap<_, _>>();

        f.debug_struct("EventManager").field("listeners", &counts).finish()
    }
}

impl Session {
    /// Invokes every listener of `event` in registration order. The first error aborts the
    /// dispatch and is returned as [`SessionError::Listener`].
    pub(crate) fn dispatch(
        &mut self,
        event: Event,
        document: Option<&DocumentHandle>,
    ) -> SessionResult<()> {
        let listeners = self.event_manager().listeners_for(event);

        for listener in listeners {
            trace!(%event, document = ?document, "dispatching");

            let mut args = EventArgs::new(event, document.cloned(), self);
            listener
                .on_event(&mut args)
                .map_err(|source| SessionError::Listener {
                    event,
                    source: Box::new(source),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl EventListener for Noop {
        fn on_event(&self, _args: &mut EventArgs<'_>) -> SessionResult<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_camel_case_names() {
        assert_eq!("onFlush".parse::<Event>().unwrap(), Event::OnFlush);
        assert_eq!(Event::PreMove.to_string(), "preMove");
        assert!(matches!(
            "preSave".parse::<Event>(),
            Err(SessionError::InvalidListener(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_a_noop() {
        let mut manager = EventManager::new();
        let listener: Rc<dyn EventListener> = Rc::new(Noop);

        manager
            .add_listener(&[Event::PrePersist, Event::PostPersist], listener.clone())
            .unwrap();
        manager.add_listener(&[Event::PrePersist], listener.clone()).unwrap();

        assert_eq!(manager.listeners_for(Event::PrePersist).len(), 1);
        assert_eq!(manager.listeners_for(Event::PostPersist).len(), 1);

        manager.remove_listener(&listener);
        assert!(!manager.has_listeners(Event::PrePersist));
    }

    #[test]
    fn registration_needs_events() {
        let mut manager = EventManager::new();

        assert!(matches!(
            manager.add_listener(&[], Rc::new(Noop)),
            Err(SessionError::InvalidListener(_))
        ));
        assert!(manager.add_listener_by_names(&["prePersist", "nope"], Rc::new(Noop)).is_err());
        assert!(!manager.has_listeners(Event::PrePersist));
    }
}
