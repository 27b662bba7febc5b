//! Test fixtures and helpers.
//!
//! Instances wired to a shared in-memory network, with the helpers
//! integration tests use to write files and compare trees.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use serde_json::json;

use sharing::core::consts::{CONTACTS, GROUPS, ROOT_DIR_ID};
use sharing::core::{Document, Rule};
use sharing::perms::Sharing;
use sharing::store::{DocumentStore, EventBus, FileDoc, MemoryStore, MemoryVfs, Vfs};
use sharing::sync::{Inbound, MemoryNetwork};
use sharing::{Engine, EngineBuilder, EngineConfig, MemoryNotifier, NewSharing, Result};

/// Engine type of the fixtures.
pub type TestEngine = Engine<MemoryStore, MemoryVfs>;

/// Rounds of [`Pair::settle`] before giving up.
const MAX_SETTLE_ROUNDS: usize = 64;

/// Install a test subscriber for tracing output. Safe to call many times.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// One instance: its stores and its engine.
pub struct TestInstance {
    pub url: String,
    pub name: String,
    pub store: Arc<MemoryStore>,
    pub vfs: Arc<MemoryVfs>,
    pub notifier: Arc<MemoryNotifier>,
    pub engine: Arc<TestEngine>,
}

impl TestInstance {
    /// Create an instance reachable at `url` on `network`. Delays are
    /// disabled so that [`TestEngine::run_until_idle`] runs every job.
    pub fn new(network: &MemoryNetwork, url: &str, name: &str) -> Self {
        let events = EventBus::default();
        let store = Arc::new(MemoryStore::new().with_events(events.clone()));
        let vfs = Arc::new(MemoryVfs::new().with_events(events.clone()));
        let notifier = Arc::new(MemoryNotifier::new());
        let config = EngineConfig::new(url, name).immediate();

        let engine = EngineBuilder::new(
            config,
            store.clone(),
            vfs.clone(),
            Arc::new(network.transport()),
            &events,
        )
        .notifier(notifier.clone())
        .build();
        let inbound: Weak<dyn Inbound> = Arc::downgrade(&engine) as Weak<dyn Inbound>;
        network.register(url, inbound);

        Self {
            url: url.to_string(),
            name: name.to_string(),
            store,
            vfs,
            notifier,
            engine,
        }
    }

    /// Store a contact. An empty `cozy_url` makes a contact invited by mail.
    pub async fn add_contact(
        &self,
        id: &str,
        fullname: &str,
        email: &str,
        cozy_url: &str,
        groups: &[&str],
    ) -> Result<()> {
        let cozy = if cozy_url.is_empty() {
            json!([])
        } else {
            json!([{ "url": cozy_url, "primary": true }])
        };
        let mut doc = Document::from_value(
            CONTACTS,
            json!({
                "_id": id,
                "fullname": fullname,
                "email": [{ "address": email, "primary": true }],
                "cozy": cozy,
                "groups": groups,
            }),
        )?;
        self.store.create_doc(&mut doc).await?;
        Ok(())
    }

    /// Store a contact group. Its members are the contacts listing it.
    pub async fn add_group(&self, id: &str, name: &str) -> Result<()> {
        let mut doc = Document::from_value(GROUPS, json!({ "_id": id, "name": name }))?;
        self.store.create_doc(&mut doc).await?;
        Ok(())
    }

    pub async fn mkdir(&self, name: &str, parent: &str) -> Result<FileDoc> {
        Ok(self.vfs.create_dir(FileDoc::new_dir(name, parent)).await?)
    }

    pub async fn write_file(&self, name: &str, parent: &str, content: &[u8]) -> Result<FileDoc> {
        Ok(self
            .vfs
            .create_file(FileDoc::new_file(name, parent), Bytes::copy_from_slice(content))
            .await?)
    }

    pub async fn sharing(&self, sharing_id: &str) -> Result<Sharing> {
        self.engine.sharing(sharing_id).await
    }

    /// The files below `root`, by path relative to it, with their checksum
    /// (`None` for directories).
    pub async fn tree(&self, root: &str) -> Result<BTreeMap<String, Option<String>>> {
        let mut tree = BTreeMap::new();
        let mut stack = vec![(root.to_string(), String::new())];
        while let Some((dir, prefix)) = stack.pop() {
            for child in self.vfs.children(&dir).await? {
                let path = format!("{}/{}", prefix, child.name);
                if child.is_dir() {
                    tree.insert(path.clone(), None);
                    stack.push((child.id, path));
                } else {
                    tree.insert(path, child.checksum);
                }
            }
        }
        Ok(tree)
    }
}

/// An owner and a recipient on the same network.
pub struct Pair {
    pub network: MemoryNetwork,
    pub alice: TestInstance,
    pub bob: TestInstance,
}

impl Pair {
    pub const ALICE: &'static str = "https://alice.example.net";
    pub const BOB: &'static str = "https://bob.example.net";
    /// Id of Bob's contact in Alice's address book.
    pub const BOB_CONTACT: &'static str = "contact-bob";

    pub fn new() -> Self {
        let network = MemoryNetwork::new();
        let alice = TestInstance::new(&network, Self::ALICE, "Alice");
        let bob = TestInstance::new(&network, Self::BOB, "Bob");
        Self {
            network,
            alice,
            bob,
        }
    }

    /// Run both engines until neither has anything left to do. Returns the
    /// number of rounds it took.
    pub async fn settle(&self) -> Result<usize> {
        for round in 0..MAX_SETTLE_ROUNDS {
            let handled =
                self.alice.engine.run_until_idle().await? + self.bob.engine.run_until_idle().await?;
            if handled == 0 {
                return Ok(round);
            }
        }
        panic!("engines still busy after {} rounds", MAX_SETTLE_ROUNDS);
    }

    /// Share a new directory of Alice's with Bob, have Bob accept, and let
    /// the initial copy run. Returns the sharing and the shared directory.
    pub async fn share_dir(&self, name: &str, read_only: bool) -> Result<(Sharing, FileDoc)> {
        self.alice
            .add_contact(Self::BOB_CONTACT, "Bob", "bob@example.net", Self::BOB, &[])
            .await?;
        let dir = self.alice.mkdir(name, ROOT_DIR_ID).await?;
        self.share_existing_dir(&dir, read_only).await
    }

    /// Same as [`Pair::share_dir`] for a directory that already exists,
    /// once Bob is in Alice's contacts.
    pub async fn share_existing_dir(&self, dir: &FileDoc, read_only: bool) -> Result<(Sharing, FileDoc)> {
        let request = NewSharing::new(dir.name.clone(), vec![Rule::files_by_id(&dir.name, &dir.id)])
            .with_recipient(Self::BOB_CONTACT, read_only);
        let sharing = self.alice.engine.create_sharing(request).await?;
        self.alice.engine.invite(&sharing.id).await?;
        self.bob.engine.accept(&sharing.id).await?;
        self.settle().await?;
        let sharing = self.alice.sharing(&sharing.id).await?;
        Ok((sharing, dir.clone()))
    }

    /// Id of the shared directory on Bob's side.
    pub async fn bob_root(&self, sharing_id: &str) -> Result<String> {
        let sharing = self.bob.sharing(sharing_id).await?;
        sharing.root_dir_id().map(str::to_string).ok_or_else(|| {
            sharing::EngineError::InvalidOperation(format!("sharing {} has no directory", sharing_id))
        })
    }
}

impl Default for Pair {
    fn default() -> Self {
        Self::new()
    }
}
