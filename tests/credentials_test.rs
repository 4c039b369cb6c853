//! Integration tests for the on-disk credential store.

use std::collections::BTreeMap;

use relay_core::credentials::CredentialStore;

#[test]
fn store_keeps_one_token_per_server() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let mut store = CredentialStore::open(&path).unwrap();
    store.put("https://a.example/", "tok-a").unwrap();
    store.put("https://b.example", "tok-b").unwrap();
    store.put("https://a.example", "tok-a2").unwrap();

    let reopened = CredentialStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.get("https://a.example/"), Some("tok-a2"));
    assert_eq!(reopened.get("https://b.example/"), Some("tok-b"));
}

#[test]
fn store_file_is_a_plain_json_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let mut store = CredentialStore::open(&path).unwrap();
    store.put("https://ci.example", "tok").unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.get("https://ci.example/").map(String::as_str), Some("tok"));
}

#[test]
fn removing_one_server_leaves_others() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let mut store = CredentialStore::open(&path).unwrap();
    store.put("https://a.example/", "tok-a").unwrap();
    store.put("https://b.example/", "tok-b").unwrap();
    assert!(store.remove("https://a.example").unwrap());

    let reopened = CredentialStore::open(&path).unwrap();
    assert_eq!(reopened.get("https://a.example/"), None);
    assert_eq!(reopened.get("https://b.example/"), Some("tok-b"));
}

#[test]
fn empty_file_opens_as_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    std::fs::write(&path, "").unwrap();
    assert!(CredentialStore::open(&path).unwrap().is_empty());
}

#[test]
fn no_temp_files_left_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let mut store = CredentialStore::open(&path).unwrap();
    for i in 0..5 {
        store.put("https://ci.example/", &format!("tok-{}", i)).unwrap();
    }

    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}
