//! Two or three instances sharing a directory over the in-memory network.

use bytes::Bytes;

use sharing::core::consts::{FILES, ROOT_DIR_ID, TRIGGERS};
use sharing::core::{xor_id, DocRef, Rule};
use sharing::perms::MemberStatus;
use sharing::store::{DocumentStore, Vfs};
use sharing::sync::{BulkDocsRequest, Inbound};
use sharing::NewSharing;
use sharing_testkit::{init_tracing, Pair, TestInstance};

const CAROL: &str = "https://carol.example.net";

#[tokio::test]
async fn test_initial_copy_mirrors_the_tree() {
    init_tracing();
    let pair = Pair::new();
    pair.alice
        .add_contact(Pair::BOB_CONTACT, "Bob", "bob@example.net", Pair::BOB, &[])
        .await
        .unwrap();
    let dir = pair.alice.mkdir("Holidays", ROOT_DIR_ID).await.unwrap();
    let beach = pair.alice.mkdir("Beach", &dir.id).await.unwrap();
    let photo = pair.alice.write_file("sand.jpg", &beach.id, b"sand").await.unwrap();
    pair.alice.write_file("plan.txt", &dir.id, b"day 1").await.unwrap();

    let (sharing, _) = pair.share_existing_dir(&dir, false).await.unwrap();
    assert!(sharing.active);
    assert!(!sharing.initial);
    assert_eq!(sharing.members[1].status, MemberStatus::Ready);
    assert_eq!(sharing.members[1].instance, Pair::BOB);

    let bob_sharing = pair.bob.sharing(&sharing.id).await.unwrap();
    assert!(bob_sharing.active);
    assert!(!bob_sharing.owner);
    assert!(!bob_sharing.initial);

    let key = sharing.credentials_for(1).unwrap().xor_key.clone().unwrap();
    let bob_root = pair.bob_root(&sharing.id).await.unwrap();
    assert_eq!(bob_root, xor_id(&dir.id, &key));
    assert_ne!(bob_root, dir.id);

    let copy = pair.bob.vfs.get(&xor_id(&photo.id, &key)).await.unwrap().unwrap();
    assert_eq!(copy.name, "sand.jpg");
    assert_eq!(copy.dir_id, xor_id(&beach.id, &key));
    assert_eq!(pair.bob.vfs.open(&copy.id).await.unwrap(), Bytes::from_static(b"sand"));

    assert_eq!(
        pair.alice.tree(&dir.id).await.unwrap(),
        pair.bob.tree(&bob_root).await.unwrap()
    );
}

#[tokio::test]
async fn test_recipient_directory_lands_in_shared_with_me() {
    let pair = Pair::new();
    let (sharing, _) = pair.share_dir("Holidays", false).await.unwrap();
    let bob_root = pair.bob_root(&sharing.id).await.unwrap();

    let root = pair.bob.vfs.get(&bob_root).await.unwrap().unwrap();
    assert_eq!(root.name, "Holidays");
    assert_eq!(root.path.as_deref(), Some("/Shared with me/Holidays"));
}

#[tokio::test]
async fn test_settled_engines_stay_idle() {
    let pair = Pair::new();
    let (_, dir) = pair.share_dir("Docs", false).await.unwrap();
    pair.alice.write_file("a.txt", &dir.id, b"a").await.unwrap();
    pair.settle().await.unwrap();

    assert_eq!(pair.settle().await.unwrap(), 0);
    assert_eq!(pair.alice.engine.jobs().len(), 0);
    assert_eq!(pair.bob.engine.jobs().len(), 0);
}

#[tokio::test]
async fn test_changes_flow_both_ways() {
    let pair = Pair::new();
    let (sharing, dir) = pair.share_dir("Docs", false).await.unwrap();
    let bob_root = pair.bob_root(&sharing.id).await.unwrap();

    pair.alice.write_file("from-alice.txt", &dir.id, b"hello bob").await.unwrap();
    pair.settle().await.unwrap();
    let bob_tree = pair.bob.tree(&bob_root).await.unwrap();
    assert!(bob_tree.contains_key("/from-alice.txt"));

    let notes = pair.bob.mkdir("Notes", &bob_root).await.unwrap();
    pair.bob.write_file("from-bob.txt", &notes.id, b"hello alice").await.unwrap();
    pair.settle().await.unwrap();

    let alice_tree = pair.alice.tree(&dir.id).await.unwrap();
    assert!(alice_tree.contains_key("/Notes/from-bob.txt"));
    assert_eq!(alice_tree, pair.bob.tree(&bob_root).await.unwrap());
}

#[tokio::test]
async fn test_content_rename_and_trash_are_replicated() {
    let pair = Pair::new();
    let (sharing, dir) = pair.share_dir("Docs", false).await.unwrap();
    let key = sharing.credentials_for(1).unwrap().xor_key.clone().unwrap();
    let file = pair.alice.write_file("draft.txt", &dir.id, b"v1").await.unwrap();
    let other = pair.alice.write_file("old.txt", &dir.id, b"old").await.unwrap();
    pair.settle().await.unwrap();

    pair.alice
        .vfs
        .write_content(&file.id, Bytes::from_static(b"v2"))
        .await
        .unwrap();
    let mut renamed = pair.alice.vfs.get(&file.id).await.unwrap().unwrap();
    renamed.name = "final.txt".into();
    pair.alice.vfs.update(renamed).await.unwrap();
    pair.alice.vfs.trash(&other.id).await.unwrap();
    pair.settle().await.unwrap();

    let copy = pair.bob.vfs.get(&xor_id(&file.id, &key)).await.unwrap().unwrap();
    assert_eq!(copy.name, "final.txt");
    assert_eq!(pair.bob.vfs.open(&copy.id).await.unwrap(), Bytes::from_static(b"v2"));

    let bob_tree = pair.bob.tree(&pair.bob_root(&sharing.id).await.unwrap()).await.unwrap();
    assert!(!bob_tree.contains_key("/old.txt"));
    assert_eq!(bob_tree, pair.alice.tree(&dir.id).await.unwrap());
}

#[tokio::test]
async fn test_replayed_batch_changes_nothing() {
    let pair = Pair::new();
    let (sharing, dir) = pair.share_dir("Docs", false).await.unwrap();
    let sub = pair.alice.mkdir("Sub", &dir.id).await.unwrap();
    pair.settle().await.unwrap();

    let mut renamed = pair.alice.vfs.get(&sub.id).await.unwrap().unwrap();
    renamed.name = "Renamed".into();
    pair.alice.vfs.update(renamed).await.unwrap();
    pair.alice.engine.process_events().await.unwrap();

    let alice_sharing = pair.alice.sharing(&sharing.id).await.unwrap();
    let doc = pair
        .alice
        .engine
        .context()
        .shared_document(&alice_sharing, 1, FILES, &sub.id)
        .await
        .unwrap();
    let mut batch = BulkDocsRequest::new();
    batch.insert(FILES.to_string(), vec![doc]);
    let token = alice_sharing
        .credentials_for(1)
        .and_then(|c| c.outbound_token())
        .unwrap()
        .to_string();
    pair.bob.engine.on_bulk_docs(&token, &sharing.id, batch.clone()).await.unwrap();
    pair.bob.engine.on_bulk_docs(&token, &sharing.id, batch).await.unwrap();

    let key = alice_sharing.credentials_for(1).unwrap().xor_key.clone().unwrap();
    let bob_sub = xor_id(&sub.id, &key);
    let shared = pair
        .bob
        .engine
        .context()
        .load_ref(&DocRef::new(FILES, &bob_sub))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shared.infos.len(), 1);
    assert_eq!(shared.revisions.leaves().len(), 1);

    let bob_root = pair.bob_root(&sharing.id).await.unwrap();
    let bob_tree = pair.bob.tree(&bob_root).await.unwrap();
    assert_eq!(bob_tree.keys().collect::<Vec<_>>(), vec!["/Renamed"]);

    pair.settle().await.unwrap();
    assert_eq!(pair.bob.tree(&bob_root).await.unwrap(), bob_tree);
    assert_eq!(pair.alice.tree(&dir.id).await.unwrap(), bob_tree);
}

#[tokio::test]
async fn test_read_only_recipient_gets_no_triggers() {
    let pair = Pair::new();
    let (sharing, dir) = pair.share_dir("Docs", true).await.unwrap();
    assert!(sharing.members[1].read_only);

    let bob_sharing = pair.bob.sharing(&sharing.id).await.unwrap();
    assert!(bob_sharing.triggers.is_empty());
    assert!(!sharing.triggers.is_empty());
    assert!(!pair.alice.store.all_docs(TRIGGERS).await.unwrap().is_empty());

    pair.alice.write_file("a.txt", &dir.id, b"a").await.unwrap();
    pair.settle().await.unwrap();
    let bob_root = pair.bob_root(&sharing.id).await.unwrap();
    assert!(pair.bob.tree(&bob_root).await.unwrap().contains_key("/a.txt"));
}

#[tokio::test]
async fn test_group_members_are_invited() {
    let pair = Pair::new();
    pair.alice.add_group("friends", "Friends").await.unwrap();
    pair.alice
        .add_contact(Pair::BOB_CONTACT, "Bob", "bob@example.net", Pair::BOB, &["friends"])
        .await
        .unwrap();
    pair.alice
        .add_contact("contact-dave", "Dave", "dave@example.net", "", &["friends"])
        .await
        .unwrap();
    let dir = pair.alice.mkdir("Party", ROOT_DIR_ID).await.unwrap();

    let request = NewSharing::new("Party", vec![Rule::files_by_id("Party", &dir.id)])
        .with_group("friends", false);
    let sharing = pair.alice.engine.create_sharing(request).await.unwrap();
    assert_eq!(sharing.groups.len(), 1);
    assert_eq!(sharing.members.len(), 3);
    for member in &sharing.members[1..] {
        assert!(member.only_in_groups);
        assert_eq!(member.groups, vec![0]);
    }

    assert_eq!(pair.alice.engine.invite(&sharing.id).await.unwrap(), 2);
    let mails = pair.alice.notifier.sent();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].email, "dave@example.net");
    assert!(mails[0]
        .link
        .starts_with(&format!("{}/sharings/{}/discovery?state=", Pair::ALICE, sharing.id)));

    pair.bob.engine.accept(&sharing.id).await.unwrap();
    pair.settle().await.unwrap();
    pair.alice.engine.send_members(&sharing.id).await.unwrap();

    let bob_sharing = pair.bob.sharing(&sharing.id).await.unwrap();
    assert_eq!(bob_sharing.members.len(), 3);
    assert_eq!(bob_sharing.groups.len(), 1);
    let dave = bob_sharing
        .members
        .iter()
        .find(|m| m.email == "dave@example.net")
        .unwrap();
    assert_eq!(dave.status, MemberStatus::Pending);
}

#[tokio::test]
async fn test_mail_invitation_discovers_the_instance() {
    let pair = Pair::new();
    let carol = TestInstance::new(&pair.network, CAROL, "Carol");
    pair.alice
        .add_contact("contact-carol", "Carol", "carol@example.net", "", &[])
        .await
        .unwrap();
    let dir = pair.alice.mkdir("Recipes", ROOT_DIR_ID).await.unwrap();
    pair.alice.write_file("pie.md", &dir.id, b"apples").await.unwrap();

    let request = NewSharing::new("Recipes", vec![Rule::files_by_id("Recipes", &dir.id)])
        .with_recipient("contact-carol", false);
    let sharing = pair.alice.engine.create_sharing(request).await.unwrap();
    pair.alice.engine.invite(&sharing.id).await.unwrap();

    let link = pair.alice.notifier.sent().remove(0).link;
    let state = link.split("state=").nth(1).unwrap().to_string();
    assert!(pair.alice.engine.discover(&sharing.id, "wrong", CAROL).await.is_err());
    pair.alice.engine.discover(&sharing.id, &state, CAROL).await.unwrap();
    assert!(carol.sharing(&sharing.id).await.is_ok());

    carol.engine.accept(&sharing.id).await.unwrap();
    for _ in 0..16 {
        let handled = pair.alice.engine.run_until_idle().await.unwrap()
            + carol.engine.run_until_idle().await.unwrap();
        if handled == 0 {
            break;
        }
    }

    let carol_sharing = carol.sharing(&sharing.id).await.unwrap();
    let root = carol_sharing.root_dir_id().unwrap().to_string();
    assert!(carol.tree(&root).await.unwrap().contains_key("/pie.md"));
    let alice_sharing = pair.alice.sharing(&sharing.id).await.unwrap();
    assert_eq!(alice_sharing.members[1].instance, CAROL);
    assert_eq!(alice_sharing.members[1].status, MemberStatus::Ready);
}

#[tokio::test]
async fn test_accepting_twice_is_rejected() {
    let pair = Pair::new();
    let (sharing, _) = pair.share_dir("Docs", false).await.unwrap();
    assert!(pair.bob.engine.accept(&sharing.id).await.is_err());
    assert!(pair.alice.engine.accept(&sharing.id).await.is_err());
}
