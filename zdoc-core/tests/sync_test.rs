//! Push/pull integration tests
//!
//! Two independent client workspaces share one in-memory server.

use std::fs;

use tempfile::TempDir;
use zdoc_core::{
    CommitEngine, Config, ContentHash, Descriptor, DocStatus, MemoryRemote, Reconciler,
    UpdateTime, Workspace,
};

struct Client {
    _tmp: TempDir,
    ws: Workspace,
}

impl Client {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let config = Config {
            token: "test-token".into(),
            ..Default::default()
        };
        let ws = Workspace::with_config(tmp.path(), config).unwrap();
        Self { _tmp: tmp, ws }
    }

    async fn commit(&self, remote: &MemoryRemote, name: &str, body: &str) {
        fs::write(self.ws.layout().post_path(name), body).unwrap();
        CommitEngine::new(&self.ws, remote, remote)
            .commit(name)
            .await
            .unwrap();
    }

    fn descriptor(&self, name: &str) -> Option<Descriptor> {
        self.ws.index().load().unwrap().get(name).cloned()
    }

    fn work_file(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.ws.layout().post_path(name)).ok()
    }

    /// Put a descriptor and its blob straight into the index
    fn seed(&self, name: &str, body: &str, time: &str, status: DocStatus) {
        let hash = self.ws.objects().put(body.as_bytes()).unwrap();
        if !status.is_deleted() {
            fs::write(self.ws.layout().post_path(name), body).unwrap();
        }
        let mut desc = Descriptor::new(name, hash, t(time));
        desc.status = status;
        self.ws
            .index()
            .update(|index| {
                index.upsert(desc);
                Ok::<_, zdoc_core::StorageError>(())
            })
            .unwrap();
    }
}

fn t(s: &str) -> UpdateTime {
    UpdateTime::parse(s).unwrap()
}

fn article(title: &str, body: &str) -> String {
    format!("---\ntitle: {}\ncategory: rust\n---\n{}\n", title, body)
}

#[tokio::test]
async fn test_push_then_pull_converges() {
    let remote = MemoryRemote::new();
    let a = Client::new();
    let b = Client::new();

    let body = article("Hello", "first post");
    a.commit(&remote, "hello.md", &body).await;
    let pushed = Reconciler::new(&a.ws, &remote).push().await.unwrap();
    assert_eq!(pushed.uploaded, vec!["hello.md"]);
    assert_eq!(remote.metadata("hello.md").unwrap(), ("Hello".into(), "rust".into()));

    let pulled = Reconciler::new(&b.ws, &remote).pull().await.unwrap();
    assert_eq!(pulled.fetched, vec!["hello.md"]);

    let desc = b.descriptor("hello.md").unwrap();
    assert_eq!(desc.content_hash, ContentHash::from_data(body.as_bytes()));
    assert_eq!(desc.status, DocStatus::Active);
    assert_eq!(desc, a.descriptor("hello.md").unwrap());
    assert_eq!(b.work_file("hello.md").unwrap(), body);
    assert!(b.ws.objects().exists(&desc.content_hash));
}

#[tokio::test]
async fn test_pull_into_empty_workspace() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    let hash = remote.insert_document("a.md", "# remote a", t("2024-01-01 00:00:00"));

    Reconciler::new(&client.ws, &remote).pull().await.unwrap();

    let desc = client.descriptor("a.md").unwrap();
    assert_eq!(desc.content_hash, hash);
    assert_eq!(desc.status, DocStatus::Active);
    assert_eq!(desc.update_time, t("2024-01-01 00:00:00"));
    assert_eq!(client.ws.objects().get(&hash).unwrap(), b"# remote a");
    assert_eq!(client.work_file("a.md").unwrap(), "# remote a");
}

#[tokio::test]
async fn test_newer_local_tombstone_deletes_remote_without_upload() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    remote.insert_document("b.md", "b body", t("2024-01-15"));
    client.seed("b.md", "b body", "2024-02-01", DocStatus::UserDeleted);

    let report = Reconciler::new(&client.ws, &remote).push().await.unwrap();

    assert_eq!(report.deleted_remote, vec!["b.md"]);
    assert!(report.uploaded.is_empty());
    assert_eq!(remote.calls().delete, 1);
    assert_eq!(remote.calls().add, 0);
    assert!(remote.descriptor("b.md").unwrap().is_tombstone());
}

#[tokio::test]
async fn test_tombstone_propagates_and_does_not_resurrect() {
    let remote = MemoryRemote::new();
    let a = Client::new();
    let b = Client::new();

    a.commit(&remote, "gone.md", &article("Gone", "soon deleted")).await;
    Reconciler::new(&a.ws, &remote).push().await.unwrap();
    Reconciler::new(&b.ws, &remote).pull().await.unwrap();
    assert!(b.work_file("gone.md").is_some());

    // the removal orders after the pushed state, even within the same second
    CommitEngine::new(&a.ws, &remote, &remote).remove("gone.md").unwrap();
    let pushed_time = remote.descriptor("gone.md").unwrap().update_time;
    assert!(a.descriptor("gone.md").unwrap().update_time.is_newer_than(&pushed_time));
    let report = Reconciler::new(&a.ws, &remote).push().await.unwrap();
    assert_eq!(report.deleted_remote, vec!["gone.md"]);

    let report = Reconciler::new(&b.ws, &remote).pull().await.unwrap();
    assert_eq!(report.deleted_local, vec!["gone.md"]);
    assert!(b.work_file("gone.md").is_none());
    assert!(b.descriptor("gone.md").unwrap().is_tombstone());
    assert!(b.ws.objects().list().unwrap().is_empty());

    // b's stale knowledge of the document must not bring it back
    remote.reset_calls();
    Reconciler::new(&b.ws, &remote).push().await.unwrap();
    assert_eq!(remote.calls().add, 0);
    assert!(remote.descriptor("gone.md").unwrap().is_tombstone());
}

#[tokio::test]
async fn test_admin_deletion_reaches_live_local_copy() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    remote.insert_document("spam.md", "spam", t("2024-01-01"));
    Reconciler::new(&client.ws, &remote).pull().await.unwrap();

    remote.mark_deleted("spam.md", DocStatus::AdminDeleted, t("2024-01-02"));
    let report = Reconciler::new(&client.ws, &remote).push().await.unwrap();

    assert_eq!(report.deleted_local, vec!["spam.md"]);
    assert!(client.work_file("spam.md").is_none());
    assert_eq!(client.descriptor("spam.md").unwrap().status, DocStatus::AdminDeleted);
    assert_eq!(remote.calls().add, 0);
}

#[tokio::test]
async fn test_last_writer_wins_and_ties_stay_local() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    client.seed("lww.md", "local", "2024-02-01 12:00:00", DocStatus::Active);

    // tie: different content, same second
    remote.insert_document("lww.md", "remote tie", t("2024-02-01 12:00:00"));
    let report = Reconciler::new(&client.ws, &remote).pull().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(client.work_file("lww.md").unwrap(), "local");

    // a tie does not overwrite the server either
    let report = Reconciler::new(&client.ws, &remote).push().await.unwrap();
    assert!(report.uploaded.is_empty());
    assert_eq!(remote.calls().add, 0);
    assert_eq!(remote.content("lww.md").unwrap(), "remote tie");

    // older remote never overwrites
    remote.insert_document("lww.md", "remote old", t("2024-01-01"));
    Reconciler::new(&client.ws, &remote).pull().await.unwrap();
    assert_eq!(client.work_file("lww.md").unwrap(), "local");

    // newer remote wins exactly
    let hash = remote.insert_document("lww.md", "remote new", t("2024-03-01"));
    Reconciler::new(&client.ws, &remote).pull().await.unwrap();
    let desc = client.descriptor("lww.md").unwrap();
    assert_eq!(desc.content_hash, hash);
    assert_eq!(desc.update_time, t("2024-03-01"));
    assert_eq!(client.work_file("lww.md").unwrap(), "remote new");
    assert!(!client.ws.objects().exists(&ContentHash::from_data(b"local")));
}

#[tokio::test]
async fn test_push_and_pull_are_idempotent() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    client.commit(&remote, "one.md", &article("One", "1")).await;
    client.commit(&remote, "two.md", &article("Two", "2")).await;

    let first = Reconciler::new(&client.ws, &remote).push().await.unwrap();
    assert_eq!(first.uploaded.len(), 2);

    remote.reset_calls();
    let second = Reconciler::new(&client.ws, &remote).push().await.unwrap();
    assert!(!second.has_changes());
    assert_eq!(second.skipped, 2);

    let pulled = Reconciler::new(&client.ws, &remote).pull().await.unwrap();
    assert!(!pulled.has_changes());

    let calls = remote.calls();
    assert_eq!(calls.list, 2);
    assert_eq!(calls.add + calls.delete + calls.get, 0);
}

#[tokio::test]
async fn test_corrupt_remote_content_is_skipped() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    remote.insert_document("good.md", "good", t("2024-01-01"));
    remote.insert_document("bad.md", "advertised", t("2024-01-01"));
    remote.corrupt_document("bad.md", "something else");

    let report = Reconciler::new(&client.ws, &remote).pull().await.unwrap();

    assert_eq!(report.fetched, vec!["good.md"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "bad.md");
    assert!(client.descriptor("bad.md").is_none());
    assert!(client.work_file("bad.md").is_none());
    assert_eq!(client.ws.objects().list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_edit_after_pull_is_pushed() {
    let remote = MemoryRemote::new();
    let client = Client::new();
    remote.insert_document("post.md", &article("Post", "v1"), t("2024-01-01"));
    Reconciler::new(&client.ws, &remote).pull().await.unwrap();

    let edited = article("Post", "v2");
    client.commit(&remote, "post.md", &edited).await;
    let report = Reconciler::new(&client.ws, &remote).push().await.unwrap();

    assert_eq!(report.uploaded, vec!["post.md"]);
    assert_eq!(remote.content("post.md").unwrap(), edited);
    assert_eq!(
        remote.descriptor("post.md").unwrap().content_hash,
        ContentHash::from_data(edited.as_bytes())
    );
}
