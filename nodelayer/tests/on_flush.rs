mod common;

use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use nodelayer::prelude::*;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

/// Files every inserted or updated article under a tag named after its date.
struct DateTagger;

impl EventListener for DateTagger {
    fn on_event(&self, args: &mut EventArgs<'_>) -> SessionResult<()> {
        let session = args.session();
        session.ensure_path("/functional/tags")?;

        let articles = session
            .scheduled_inserts()
            .into_iter()
            .chain(session.scheduled_updates())
            .filter(|document| document.class() == "CmsArticle")
            .collect::<Vec<_>>();

        for article in articles {
            let Some(date) = article.get("date").and_then(|v| v.as_date().copied()) else {
                continue;
            };

            let id = format!("/functional/tags/{}", date.format("%Y-%m-%d"));
            let tag = session.find_or_create("CmsTag", &id, || {
                Document::new("CmsTag").with("references", ReferenceMany::new())
            })?;

            session.load_collection(&tag, "references")?;
            if let Some(references) = tag.borrow_mut().collection_mut("references") {
                references.push_unique(article.clone())?;
            }

            session.compute_single_document_change_set(&tag)?;
        }

        Ok(())
    }
}

impl EventSubscriber for DateTagger {
    fn subscribed_events(&self) -> Vec<Event> {
        vec![Event::OnFlush]
    }
}

fn day() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2013, 4, 16, 10, 30, 0).unwrap()
}

fn article(id: &str) -> DocumentHandle {
    Document::new("CmsArticle")
        .with_id(id)
        .with("topic", "events")
        .with("date", day())
        .into_handle()
}

fn tagged_session() -> (Session, nodelayer::memory::InMemoryNodeStore) {
    let (mut session, store) = common::session();
    session
        .event_manager()
        .add_subscriber(Rc::new(DateTagger))
        .unwrap();

    (session, store)
}

const TAG_ID: &str = "/functional/tags/2013-04-16";

#[test]
#[traced_test]
fn on_flush_listener_collects_references_across_flushes() {
    let (mut session, store) = tagged_session();

    let first = article("/functional/article1");
    session.persist(&first).unwrap();
    session.flush().unwrap();

    assert!(store.node_exists(TAG_ID).unwrap());

    let second = article("/functional/article2");
    session.persist(&second).unwrap();
    session.flush().unwrap();

    session.clear().unwrap();

    let tag = session.find(Some("CmsTag"), TAG_ID).unwrap().unwrap();
    assert!(!tag.borrow().collection("references").unwrap().is_loaded());

    session.load_collection(&tag, "references").unwrap();

    let ids = common::members(&tag, "references")
        .iter()
        .map(|member| member.id().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["/functional/article1", "/functional/article2"]);

    assert_eq!(tag.get_string("name").as_deref(), Some("2013-04-16"));
    let parent = tag.get("parent").and_then(|v| v.as_reference().cloned()).unwrap();
    assert_eq!(parent.id().as_deref(), Some("/functional/tags"));
    assert_eq!(session.document_state(&tag), DocumentState::Managed);
}

#[test]
#[traced_test]
fn documents_created_during_on_flush_are_found_within_the_same_flush() {
    let (mut session, store) = tagged_session();

    let first = article("/functional/article1");
    let second = article("/functional/article2");
    session.persist(&first).unwrap();
    session.persist(&second).unwrap();
    session.flush().unwrap();

    let tags = store.children("/functional/tags").unwrap();
    assert_eq!(tags.len(), 1);

    let tag = session.find(Some("CmsTag"), TAG_ID).unwrap().unwrap();
    let members = common::members(&tag, "references");
    assert_eq!(members.len(), 2);
    assert!(members[0].ptr_eq(&first));
    assert!(members[1].ptr_eq(&second));
}

#[test]
#[traced_test]
fn updated_documents_are_seen_by_on_flush() {
    let (mut session, store) = tagged_session();

    let first = Document::new("CmsArticle")
        .with_id("/functional/article1")
        .with("topic", "undated")
        .into_handle();
    session.persist(&first).unwrap();
    session.flush().unwrap();

    assert!(!store.node_exists(TAG_ID).unwrap());

    first.set("date", day());
    session.flush().unwrap();

    assert!(store.node_exists(TAG_ID).unwrap());
    assert!(store.read_node(TAG_ID).unwrap().unwrap().property("references").is_some());
}

#[test]
#[traced_test]
fn compute_single_document_change_set_requires_a_tracked_document() {
    let (mut session, _store) = common::session();

    let loose = article("/functional/loose");
    let err = session.compute_single_document_change_set(&loose).unwrap_err();

    assert!(err.is_illegal_state());
}
