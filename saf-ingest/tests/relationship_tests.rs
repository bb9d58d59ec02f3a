//! Integration tests for the relationship pass of a batch

mod helpers;

use helpers::ArchiveFixture;
use saf_common::model::RelationshipType;
use saf_common::Ports;
use saf_ingest::manifest::RelationshipsDeclaration;
use saf_ingest::models::{BatchOptions, BatchState};
use saf_ingest::services::{BatchContext, RelationshipResolver};
use saf_ingest::IngestError;

fn author_type(fixture: &ArchiveFixture) -> RelationshipType {
    fixture.repo.add_relationship_type(
        "Publication",
        "Person",
        "isAuthorOfPublication",
        "isPublicationOfAuthor",
    )
}

fn entity(fixture: &ArchiveFixture, folder: &str, entity_type: &str, extra: &[(&str, Option<&str>, &str)]) {
    let item = fixture.item(folder);
    let mut values = vec![("title", None, folder)];
    values.extend_from_slice(extra);
    item.dublin_core(&values)
        .schema_metadata("dspace", &[("entity", Some("type"), entity_type)])
        .contents(&[]);
}

fn item_for(fixture: &ArchiveFixture, folder: &str) -> uuid::Uuid {
    let session_lines = fixture.mapfile_lines();
    let handle = session_lines
        .iter()
        .find_map(|l| l.strip_prefix(&format!("{} ", folder)))
        .unwrap()
        .to_string();
    fixture
        .repo
        .items()
        .into_iter()
        .find(|i| i.handle.as_deref() == Some(handle.as_str()))
        .unwrap()
        .id
}

#[test]
fn test_folder_reference_to_later_folder() {
    let fixture = ArchiveFixture::new();
    let kind = author_type(&fixture);
    // "a_paper" sorts before "b_author", so the target does not exist yet
    // while a_paper is built
    entity(&fixture, "a_paper", "Publication", &[]);
    fixture
        .item("a_paper")
        .relationships(&["relation.isAuthorOfPublication folderName:b_author"]);
    entity(&fixture, "b_author", "Person", &[]);

    let session = fixture.import(BatchOptions::default()).unwrap();

    assert_eq!(session.relationships_created, 1);
    let relationships = fixture.repo.relationships();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].type_id, kind.id);
    assert_eq!(relationships[0].left_item, item_for(&fixture, "a_paper"));
    assert_eq!(relationships[0].right_item, item_for(&fixture, "b_author"));
}

#[test]
fn test_rightward_name_puts_origin_on_right() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "author", "Person", &[]);
    fixture
        .item("author")
        .relationships(&["relation.isPublicationOfAuthor folderName:paper"]);
    entity(&fixture, "paper", "Publication", &[]);

    fixture.import(BatchOptions::default()).unwrap();

    let relationships = fixture.repo.relationships();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].left_item, item_for(&fixture, "paper"));
    assert_eq!(relationships[0].right_item, item_for(&fixture, "author"));
}

#[test]
fn test_places_append_per_item() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "paper", "Publication", &[]);
    fixture.item("paper").relationships(&[
        "relation.isAuthorOfPublication folderName:person_1",
        "relation.isAuthorOfPublication folderName:person_2",
    ]);
    entity(&fixture, "person_1", "Person", &[]);
    entity(&fixture, "person_2", "Person", &[]);

    fixture.import(BatchOptions::default()).unwrap();

    let places: Vec<(i32, i32)> = fixture
        .repo
        .relationships()
        .iter()
        .map(|r| (r.left_place, r.right_place))
        .collect();
    assert_eq!(places, vec![(0, 0), (1, 0)]);
}

#[test]
fn test_metadata_reference_resolves_existing_item() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(
        &fixture,
        "person",
        "Person",
        &[("identifier", Some("other"), "XYZ123")],
    );
    fixture.import(BatchOptions::default()).unwrap();
    let person = item_for(&fixture, "person");

    // A second batch links to the first by metadata value
    std::fs::remove_file(fixture.mapfile()).unwrap();
    std::fs::remove_dir_all(fixture.batch_dir().join("person")).unwrap();
    entity(&fixture, "paper", "Publication", &[]);
    fixture
        .item("paper")
        .relationships(&["relation.isAuthorOfPublication dc.identifier.other:XYZ123"]);

    fixture.import(BatchOptions::default()).unwrap();

    let relationships = fixture.repo.relationships();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].right_item, person);
}

#[test]
fn test_ambiguous_metadata_reference_fails() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "person_1", "Person", &[("identifier", Some("other"), "DUP")]);
    entity(&fixture, "person_2", "Person", &[("identifier", Some("other"), "DUP")]);
    entity(&fixture, "paper", "Publication", &[]);
    fixture
        .item("paper")
        .relationships(&["relation.isAuthorOfPublication dc.identifier.other:DUP"]);

    let result = fixture.import(BatchOptions::default());

    match result {
        Err(IngestError::Resolution(message)) => assert!(message.contains("ambiguous")),
        other => panic!("expected ambiguous resolution error, got {:?}", other.map(|s| s.state)),
    }
    // Items stay committed; only the relationship pass failed
    assert_eq!(fixture.repo.items().len(), 3);
    assert!(fixture.repo.relationships().is_empty());
}

#[test]
fn test_absent_metadata_reference_fails() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "paper", "Publication", &[]);
    fixture
        .item("paper")
        .relationships(&["relation.isAuthorOfPublication dc.identifier.other:NOPE"]);

    let result = fixture.import(BatchOptions::default());

    assert!(matches!(result, Err(IngestError::Resolution(_))));
}

#[test]
fn test_missing_relationship_type_fails() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "paper", "Publication", &[]);
    fixture
        .item("paper")
        .relationships(&["relation.isEditorOfPublication folderName:person"]);
    entity(&fixture, "person", "Person", &[]);

    let result = fixture.import(BatchOptions::default());

    assert!(matches!(result, Err(IngestError::Resolution(_))));
}

#[test]
fn test_resumed_folders_remain_targets() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "a_person", "Person", &[]);
    fixture.import(BatchOptions::default()).unwrap();

    entity(&fixture, "b_paper", "Publication", &[]);
    fixture
        .item("b_paper")
        .relationships(&["relation.isAuthorOfPublication folderName:a_person"]);

    let session = fixture
        .import(BatchOptions {
            resume: true,
            ..BatchOptions::default()
        })
        .unwrap();

    assert_eq!(session.state, BatchState::Completed);
    let relationships = fixture.repo.relationships();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].right_item, item_for(&fixture, "a_person"));
}

#[test]
fn test_resume_ignores_mapfile_folders_missing_from_source() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "a_person", "Person", &[]);
    fixture.import(BatchOptions::default()).unwrap();

    // a_person stays in the MapFile but is no longer part of the source
    std::fs::remove_dir_all(fixture.batch_dir().join("a_person")).unwrap();
    entity(&fixture, "b_paper", "Publication", &[]);
    fixture
        .item("b_paper")
        .relationships(&["relation.isAuthorOfPublication folderName:a_person"]);

    let result = fixture.import(BatchOptions {
        resume: true,
        ..BatchOptions::default()
    });

    assert!(matches!(result, Err(IngestError::Resolution(_))));
    assert!(fixture.repo.relationships().is_empty());
}

#[test]
fn test_test_mode_only_logs_relationships() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "paper", "Publication", &[]);
    fixture
        .item("paper")
        .relationships(&["relation.isAuthorOfPublication folderName:nobody"]);

    let session = fixture
        .import(BatchOptions {
            test: true,
            ..BatchOptions::default()
        })
        .unwrap();

    assert_eq!(session.relationships_created, 0);
    assert!(fixture.repo.relationships().is_empty());
}

#[test]
fn test_resolver_handle_reference() {
    let fixture = ArchiveFixture::new();
    author_type(&fixture);
    entity(&fixture, "paper", "Publication", &[]);
    entity(&fixture, "person", "Person", &[]);
    fixture.import(BatchOptions::default()).unwrap();

    let paper = item_for(&fixture, "paper");
    let person = item_for(&fixture, "person");
    let person_handle = fixture
        .repo
        .items()
        .into_iter()
        .find(|i| i.id == person)
        .and_then(|i| i.handle)
        .unwrap();

    let mut declaration = RelationshipsDeclaration::default();
    declaration.push("isAuthorOfPublication", &person_handle);

    let resolver = RelationshipResolver::new(Ports::from_repository(&fixture.repo));
    let created = resolver.link(paper, &declaration, &BatchContext::new()).unwrap();

    assert_eq!(created, 1);
    assert_eq!(fixture.repo.relationships()[0].right_item, person);
}
