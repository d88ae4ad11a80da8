#![allow(dead_code)]

use std::{cell::RefCell, rc::Rc};

use nodelayer::{memory::InMemoryNodeStore, prelude::*};

pub const USER_ID: &str = "/functional/user";

pub fn registry() -> MetadataRegistry {
    MetadataRegistry::builder()
        .class(
            ClassMetadata::builder("CmsUser")
                .field("name", FieldKind::String)
                .field("username", FieldKind::String)
                .field("status", FieldKind::String)
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsArticle")
                .referenceable(true)
                .field("topic", FieldKind::String)
                .field("date", FieldKind::Date)
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsTag")
                .referenceable(true)
                .id_strategy(IdStrategy::Parent)
                .field("name", FieldKind::NodeName)
                .field("parent", FieldKind::Parent)
                .field("references", FieldKind::ReferenceMany)
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsPage")
                .field("title", FieldKind::String)
                .field("items", FieldKind::Children)
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsAuthor")
                .referenceable(true)
                .field("name", FieldKind::String)
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsPost")
                .field("title", FieldKind::String)
                .field("author", FieldKind::ReferenceOne)
                .field("related", FieldKind::ReferenceMany)
                .mapped(
                    "attachments",
                    FieldMapping {
                        cascade: Some(Cascade::ALL),
                        ..FieldMapping::new(FieldKind::ReferenceMany)
                    },
                )
                .mapped(
                    "pinned",
                    FieldMapping {
                        cascade: Some(Cascade::NONE),
                        ..FieldMapping::new(FieldKind::ReferenceOne)
                    },
                )
                .build(),
        )
        .class(
            ClassMetadata::builder("CmsItem")
                .id_strategy(IdStrategy::Parent)
                .field("name", FieldKind::NodeName)
                .field("parent", FieldKind::Parent)
                .field("label", FieldKind::String)
                .build(),
        )
        .build()
}

/// A session over a fresh in-memory store with `/functional` in place, plus a handle on the
/// store for inspecting what was written.
pub fn session() -> (Session, InMemoryNodeStore) {
    let store = InMemoryNodeStore::new();
    let session = Session::new(store.clone(), registry());
    session.ensure_path("/functional").unwrap();

    (session, store)
}

pub fn user() -> DocumentHandle {
    Document::new("CmsUser")
        .with_id(USER_ID)
        .with("name", "mdekrijger")
        .with("username", "mdekrijger")
        .with("status", "active")
        .into_handle()
}

/// Records every dispatched event in order.
pub fn record_events(session: &mut Session) -> Rc<RefCell<Vec<Event>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);

    session
        .event_manager()
        .listen(&Event::ALL, move |args: &mut EventArgs<'_>| {
            sink.borrow_mut().push(args.event());
            Ok(())
        })
        .unwrap();

    seen
}

/// The stored string property of the node at `path`.
pub fn stored(store: &InMemoryNodeStore, path: &str, property: &str) -> Option<String> {
    store
        .read_node(path)
        .unwrap()
        .and_then(|node| node.property(property).and_then(|b| b.as_str()).map(str::to_string))
}

pub fn members(document: &DocumentHandle, field: &str) -> Vec<DocumentHandle> {
    document
        .borrow()
        .collection(field)
        .and_then(|c| c.documents().map(<[_]>::to_vec))
        .unwrap_or_default()
}
