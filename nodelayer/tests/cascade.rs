mod common;

use std::{cell::RefCell, rc::Rc};

use nodelayer::{memory::InMemoryNodeStore, prelude::*};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

fn author() -> DocumentHandle {
    Document::new("CmsAuthor")
        .with_id("/functional/author")
        .with("name", "lsmith")
        .into_handle()
}

fn article(id: &str) -> DocumentHandle {
    Document::new("CmsArticle")
        .with_id(id)
        .with("topic", "news")
        .into_handle()
}

fn ids(documents: &[DocumentHandle]) -> Vec<String> {
    documents.iter().filter_map(DocumentHandle::id).collect()
}

/// Records persist events together with the id of their document.
fn record_persists(session: &mut Session) -> Rc<RefCell<Vec<(Event, String)>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);

    session
        .event_manager()
        .listen(&[Event::PrePersist, Event::PostPersist], move |args: &mut EventArgs<'_>| {
            let id = args.document().and_then(DocumentHandle::id).unwrap_or_default();
            sink.borrow_mut().push((args.event(), id));
            Ok(())
        })
        .unwrap();

    seen
}

#[test]
#[traced_test]
fn referenced_documents_are_persisted_ahead_of_their_referrer() {
    let (mut session, store) = common::session();
    let seen = record_persists(&mut session);

    let author = author();
    let first = article("/functional/a1");
    let second = article("/functional/a2");
    let post = Document::new("CmsPost")
        .with_id("/functional/post")
        .with("title", "hello")
        .with("author", &author)
        .with("related", ReferenceMany::from_documents(vec![first.clone(), second.clone()]))
        .into_handle();

    session.persist(&post).unwrap();

    let expected = vec![
        "/functional/author".to_string(),
        "/functional/a1".to_string(),
        "/functional/a2".to_string(),
        "/functional/post".to_string(),
    ];
    assert_eq!(ids(&session.scheduled_inserts()), expected);
    assert_eq!(session.document_state(&author), DocumentState::ScheduledInsert);

    session.flush().unwrap();

    let pre = seen
        .borrow()
        .iter()
        .filter(|(event, _)| *event == Event::PrePersist)
        .map(|(_, id)| id.clone())
        .collect::<Vec<_>>();
    let post_events = seen
        .borrow()
        .iter()
        .filter(|(event, _)| *event == Event::PostPersist)
        .map(|(_, id)| id.clone())
        .collect::<Vec<_>>();
    assert_eq!(pre, expected);
    assert_eq!(post_events, expected);
    assert_eq!(store.paths()[2..].to_vec(), expected);

    session.clear().unwrap();

    let reloaded = session.find(Some("CmsPost"), "/functional/post").unwrap().unwrap();
    let linked = reloaded.get("author").and_then(|v| v.as_reference().cloned()).unwrap();
    assert_eq!(linked.id().as_deref(), Some("/functional/author"));

    session.load_collection(&reloaded, "related").unwrap();
    assert_eq!(
        ids(&common::members(&reloaded, "related")),
        vec!["/functional/a1", "/functional/a2"]
    );
}

#[test]
#[traced_test]
fn inserts_are_committed_after_the_documents_they_reference() {
    let (mut session, store) = common::session();

    let pinned = article("/functional/pinned");
    let post = Document::new("CmsPost")
        .with_id("/functional/post")
        .with("pinned", &pinned)
        .into_handle();

    session.persist(&post).unwrap();
    assert_eq!(session.document_state(&pinned), DocumentState::Detached);

    session.persist(&pinned).unwrap();
    assert_eq!(
        ids(&session.scheduled_inserts()),
        vec!["/functional/post", "/functional/pinned"]
    );

    session.flush().unwrap();

    assert_eq!(
        store.paths(),
        vec!["/", "/functional", "/functional/pinned", "/functional/post"]
    );
}

#[test]
#[traced_test]
fn removal_cascades_only_through_fields_that_ask_for_it() {
    let (mut session, store) = common::session();

    let attachment = article("/functional/attachment");
    let related = article("/functional/related");
    let post = Document::new("CmsPost")
        .with_id("/functional/post")
        .with("related", ReferenceMany::from_documents(vec![related.clone()]))
        .with("attachments", ReferenceMany::from_documents(vec![attachment.clone()]))
        .into_handle();

    session.persist(&post).unwrap();
    session.flush().unwrap();

    session.remove(&post).unwrap();
    assert_eq!(session.document_state(&attachment), DocumentState::ScheduledRemove);
    assert_eq!(session.document_state(&related), DocumentState::Managed);

    session.flush().unwrap();

    assert!(!store.node_exists("/functional/post").unwrap());
    assert!(!store.node_exists("/functional/attachment").unwrap());
    assert!(store.node_exists("/functional/related").unwrap());
    assert!(session.contains(&related));
}

#[test]
#[traced_test]
fn descendants_stay_scheduled_as_they_are_without_cascading_removal() {
    let store = InMemoryNodeStore::new();
    let config = SessionConfig {
        cascade_remove_descendants: false,
        ..SessionConfig::default()
    };
    let mut session = Session::builder()
        .store(store.clone())
        .metadata(common::registry())
        .config(config)
        .build()
        .unwrap();
    session.ensure_path("/functional").unwrap();
    let seen = common::record_events(&mut session);

    let item = Document::new("CmsItem").with("name", "first").into_handle();
    let page = Document::new("CmsPage")
        .with_id("/functional/page")
        .with("items", ReferenceMany::from_documents(vec![item.clone()]))
        .into_handle();

    session.persist(&page).unwrap();
    session.flush().unwrap();
    seen.borrow_mut().clear();

    let pending = Document::new("CmsItem")
        .with("name", "second")
        .with("parent", &page)
        .into_handle();
    session.persist(&pending).unwrap();
    assert_eq!(pending.id().as_deref(), Some("/functional/page/second"));

    session.remove(&page).unwrap();

    assert_eq!(session.document_state(&item), DocumentState::Managed);
    assert_eq!(session.document_state(&pending), DocumentState::Detached);
    assert_eq!(session.scheduled_removes().len(), 1);

    session.flush().unwrap();

    assert!(!store.node_exists("/functional/page").unwrap());
    assert!(!store.node_exists("/functional/page/first").unwrap());
    assert_eq!(session.document_state(&item), DocumentState::Detached);
    assert_eq!(
        *seen.borrow(),
        vec![Event::PreFlush, Event::PreRemove, Event::OnFlush, Event::PostRemove, Event::PostFlush]
    );
}
