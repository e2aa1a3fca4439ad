//! End-to-end tests of encrypted writes and reads through the facade

mod common;

use common::{write_keystore, Instance};
use proptest::prelude::*;
use rand::RngCore;
use rstest::rstest;
use sealstore::crypto::KeyAlgorithm;
use sealstore::store::{ContentContext, ContentReader, ContentStore, ContentUrlKeyDao, ContentWriter};
use sealstore::Collaborators;
use std::io::{Read, Write};

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn started(aliases: &[&str]) -> (tempfile::TempDir, Collaborators, Instance) {
    let dir = tempfile::tempdir().unwrap();
    write_keystore(dir.path(), aliases);
    let collaborators = Collaborators::in_memory();
    let instance = Instance::start(&dir, aliases, &collaborators);
    (dir, collaborators, instance)
}

fn total_key_records(collaborators: &Collaborators) -> u64 {
    collaborators
        .key_dao
        .count_symmetric_keys()
        .unwrap()
        .values()
        .sum()
}

#[rstest]
#[case::one_byte(1)]
#[case::one_block(16)]
#[case::unaligned(1000)]
#[case::large(3 * 1024 * 1024 + 7)]
fn test_write_and_read_back(#[case] len: usize) {
    let (_dir, collaborators, instance) = started(&["a"]);
    let content = random_bytes(len);

    let writer = instance.store.writer(&ContentContext::new()).unwrap();
    writer.put_content(&content).unwrap();
    let url = writer.content_url().to_string();

    assert!(writer.is_closed());
    assert_eq!(writer.size(), len as u64);
    assert_ne!(instance.backing.raw_content(&url).unwrap().as_ref(), content.as_slice());

    let reader = instance.store.reader(&url).unwrap();
    assert!(reader.exists());
    assert_eq!(reader.size(), len as u64);
    assert_eq!(reader.content_bytes().unwrap(), content);

    let entity = instance.manager.content_url_entity(&url).unwrap().unwrap();
    assert_eq!(entity.key.unwrap().unencrypted_size, len as u64);
    assert_eq!(total_key_records(&collaborators), 1);
}

#[test]
fn test_encrypted_size_exceeds_plaintext_for_small_content() {
    let (_dir, _collaborators, instance) = started(&["a"]);

    let writer = instance.store.writer(&ContentContext::new()).unwrap();
    writer.put_content(b"x").unwrap();
    let url = writer.content_url().to_string();

    assert_eq!(instance.store.reader(&url).unwrap().size(), 1);
    assert!(instance.backing.reader(&url).unwrap().size() > 1);
}

#[test]
fn test_ten_mebibytes_read_in_small_chunks() {
    const LEN: usize = 10 * 1024 * 1024;
    let (_dir, collaborators, instance) = started(&["a"]);
    let store = instance.store.with_content_key(KeyAlgorithm::Aes, Some(128));
    let content = random_bytes(LEN);

    let writer = store.writer(&ContentContext::new()).unwrap();
    let mut channel = writer.channel().unwrap();
    for chunk in content.chunks(64 * 1024) {
        channel.write_all(chunk).unwrap();
    }
    channel.close().unwrap();
    let url = writer.content_url().to_string();

    let reader = store.reader(&url).unwrap();
    assert_eq!(reader.size(), 10_485_760);
    let mut channel = reader.channel().unwrap();
    let mut buf = [0u8; 1024];
    let mut read_back = Vec::with_capacity(LEN);
    loop {
        let n = channel.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        read_back.extend_from_slice(&buf[..n]);
    }
    channel.close().unwrap();

    assert!(read_back == content);
    assert_eq!(total_key_records(&collaborators), 1);
    let key = store.manager().get_decryption_key(&url).unwrap().unwrap();
    assert_eq!(key.algorithm(), KeyAlgorithm::Aes);
    assert_eq!(key.key_size(), 128);
}

#[test]
fn test_closing_twice_stores_one_key() {
    let (_dir, collaborators, instance) = started(&["a"]);

    let writer = instance.store.writer(&ContentContext::new()).unwrap();
    let mut channel = writer.channel().unwrap();
    channel.write_all(b"closed twice").unwrap();
    channel.close().unwrap();
    channel.close().unwrap();
    assert!(!channel.is_open());

    assert_eq!(total_key_records(&collaborators), 1);
    let reader = writer.reader().unwrap();
    assert_eq!(reader.content_bytes().unwrap(), b"closed twice");
}

#[test]
fn test_same_content_encrypts_differently() {
    let (_dir, _collaborators, instance) = started(&["a"]);
    let content = random_bytes(4096);

    let urls: Vec<String> = (0..2)
        .map(|_| {
            let writer = instance.store.writer(&ContentContext::new()).unwrap();
            writer.put_content(&content).unwrap();
            writer.content_url().to_string()
        })
        .collect();

    let first = instance.backing.raw_content(&urls[0]).unwrap();
    let second = instance.backing.raw_content(&urls[1]).unwrap();
    assert_ne!(first, second);

    let first_key = instance.manager.get_decryption_key(&urls[0]).unwrap().unwrap();
    let second_key = instance.manager.get_decryption_key(&urls[1]).unwrap().unwrap();
    assert_ne!(first_key.as_bytes(), second_key.as_bytes());

    for url in &urls {
        assert_eq!(instance.store.reader(url).unwrap().content_bytes().unwrap(), content);
    }
}

#[test]
fn test_reader_before_close_is_empty() {
    let (_dir, _collaborators, instance) = started(&["a"]);

    let writer = instance.store.writer(&ContentContext::new()).unwrap();
    let mut channel = writer.channel().unwrap();
    channel.write_all(b"pending").unwrap();
    assert!(!writer.reader().unwrap().exists());

    channel.close().unwrap();
    assert!(writer.reader().unwrap().exists());
}

#[test]
fn test_content_of_other_instance_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    write_keystore(dir.path(), &["a", "b"]);
    let collaborators = Collaborators::in_memory();
    let first = Instance::start(&dir, &["a", "b"], &collaborators);
    let second =
        Instance::start_with_backing(&dir, &["a", "b"], &collaborators, first.backing.clone());

    let writer = first.store.writer(&ContentContext::new()).unwrap();
    writer.put_content(b"shared").unwrap();

    let reader = second.store.reader(writer.content_url()).unwrap();
    assert_eq!(reader.content_bytes().unwrap(), b"shared");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_content_reads_back(
        content in proptest::collection::vec(any::<u8>(), 0..8192),
        chunk in 1usize..600,
    ) {
        let (_dir, _collaborators, instance) = started(&["a"]);

        let writer = instance.store.writer(&ContentContext::new()).unwrap();
        let mut channel = writer.channel().unwrap();
        for part in content.chunks(chunk) {
            channel.write_all(part).unwrap();
        }
        channel.close().unwrap();

        let reader = instance.store.reader(writer.content_url()).unwrap();
        prop_assert_eq!(reader.size(), content.len() as u64);
        prop_assert_eq!(reader.content_bytes().unwrap(), content);
    }
}
