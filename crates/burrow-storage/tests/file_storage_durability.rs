use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use burrow_storage::{
    FileStorage, FileStorageSettings, Repository, ShortId, ShortUrl, Storage, StorageError,
    UrlStore, User, UserStore,
};
use tempfile::TempDir;
use uuid::Uuid;

async fn open(path: &Path) -> Repository<FileStorage> {
    let settings = FileStorageSettings::builder().path(path).build();
    Repository::new(FileStorage::open(settings).await.unwrap())
}

fn code(value: &str) -> ShortId {
    ShortId::new_unchecked(value)
}

#[tokio::test]
async fn records_and_tombstones_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("urls.jsonl");

    let (user, kept, deleted) = {
        let repo = open(&path).await;
        let user = repo.new_user().await.unwrap().id;
        let kept = repo.save_url("https://kept.example", user).await.unwrap();
        let deleted = repo.save_url("https://deleted.example", user).await.unwrap();

        repo.delete_url_batch(user, vec![deleted.clone()]).await.unwrap();
        repo.close().await.unwrap();
        (user, kept, deleted)
    };

    let repo = open(&path).await;

    let record = repo.get_url(&kept).await.unwrap().unwrap();
    assert_eq!(record.url, "https://kept.example");
    assert_eq!(record.user_id, user);
    assert!(!record.is_deleted);

    assert!(repo.get_url(&deleted).await.unwrap().unwrap().is_deleted);
    assert_eq!(repo.url_count().await.unwrap(), 1);
    assert_eq!(repo.get_user_url_list(user, 10).await.unwrap().len(), 2);

    // owners found in the journal are known users again
    assert!(repo.user_exists(user).await.unwrap());

    // dedup and short id uniqueness still hold after replay
    assert!(matches!(
        repo.save_url("https://kept.example", user).await,
        Err(StorageError::Conflict { existing }) if existing == kept
    ));
    assert!(repo.exist(&deleted).await.unwrap());
}

#[tokio::test]
async fn buffered_batch_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("urls.jsonl");

    let saved = {
        let repo = open(&path).await;
        let user = repo.new_user().await.unwrap().id;
        let urls = (0..12).map(|i| format!("https://example.com/{i}")).collect();
        let saved = repo.save_url_list(urls, user).await.unwrap();
        repo.close().await.unwrap();
        saved
    };

    let repo = open(&path).await;
    for record in &saved {
        assert_eq!(repo.get_url(&record.short_id).await.unwrap().as_ref(), Some(record));
    }
}

#[tokio::test]
async fn anonymous_records_are_replayed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("urls.jsonl");

    let short_id = {
        let repo = open(&path).await;
        let short_id = repo.save_url("https://anon.example", Uuid::nil()).await.unwrap();
        repo.close().await.unwrap();
        short_id
    };

    let repo = open(&path).await;
    let record = repo.get_url(&short_id).await.unwrap().unwrap();
    assert!(record.is_anonymous());
    assert_eq!(repo.user_count().await.unwrap(), 0);
}

#[tokio::test]
async fn torn_trailing_line_is_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("urls.jsonl");

    let (user, short_id) = {
        let repo = open(&path).await;
        let user = repo.new_user().await.unwrap().id;
        let short_id = repo.save_url("https://example.com", user).await.unwrap();
        repo.close().await.unwrap();
        (user, short_id)
    };

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(br#"{"id":"0b9e","shortid":"tor"#).unwrap();
    drop(file);

    let repo = open(&path).await;
    assert!(repo.get_url(&short_id).await.unwrap().is_some());

    let next = repo.save_url("https://next.example", user).await.unwrap();
    repo.close().await.unwrap();

    let repo = open(&path).await;
    assert!(repo.get_url(&next).await.unwrap().is_some());
    assert_eq!(repo.url_count().await.unwrap(), 2);
}

#[tokio::test]
async fn corrupt_line_in_the_middle_fails_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("urls.jsonl");

    {
        let repo = open(&path).await;
        let user = repo.new_user().await.unwrap().id;
        repo.save_url("https://example.com", user).await.unwrap();
        repo.close().await.unwrap();
    }

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"garbage\n").unwrap();
    drop(file);

    let settings = FileStorageSettings::builder().path(path.as_path()).build();
    let err = FileStorage::open(settings).await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

#[tokio::test]
async fn storage_contract_without_repository() {
    let dir = TempDir::new().unwrap();
    let settings = FileStorageSettings::builder()
        .path(dir.path().join("urls.jsonl"))
        .build();
    let storage = FileStorage::open(settings).await.unwrap();

    let user = storage.users().add_user(User::new()).await.unwrap();
    let record = ShortUrl::new(Uuid::new_v4(), code("manual1"), "https://manual.example", user.id);
    storage.urls().save_url(record.clone()).await.unwrap();

    assert_eq!(storage.urls().get_url(&code("manual1")).await.unwrap(), Some(record));
    storage.close().await.unwrap();
}
