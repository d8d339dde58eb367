//! Integration tests for the attachment stream cipher.
//!
//! Exercises the public reader/writer pair end to end: incremental chunk
//! verification on a multi-megabyte stream, read-size invariance, file
//! backed sources, upload padding and the archive layering.

use std::io::{Cursor, Read, Seek, Write};

use courier_crypto::attachment::{
    ciphertext_len, decrypt_attachment, encrypt_attachment, open_archived, padded_size,
    write_padding,
};
use courier_crypto::{
    AttachmentReader, AttachmentWriter, ChunkSizePolicy, CipherError, CombinedKeyMaterial,
    IncrementalDigest, StreamParams,
};

const MIB: usize = 1024 * 1024;
const CHUNK: usize = 64 * 1024;
const BLOCK: usize = 16;
const IV: usize = 16;

fn fixed_key() -> CombinedKeyMaterial {
    let mut raw = [0u8; 64];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = i as u8;
    }
    CombinedKeyMaterial::from_bytes(raw)
}

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

/// Read with a fixed buffer size, returning everything delivered before
/// the first error alongside that error.
fn read_in_steps(reader: &mut impl Read, step: usize) -> (Vec<u8>, Option<CipherError>) {
    let mut out = Vec::new();
    let mut buf = vec![0u8; step];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return (out, None),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(e) => return (out, Some(e.into())),
        }
    }
}

#[test]
fn ten_mib_incremental_fails_exactly_at_chunk_42() {
    let key = fixed_key();
    let plaintext = make_data(10 * MIB);
    assert_eq!(
        ChunkSizePolicy::default().chunk_size_for(ciphertext_len(plaintext.len() as u64)),
        CHUNK
    );

    let (mut blob, meta) = encrypt_attachment(&plaintext, &key, Some(CHUNK)).unwrap();
    let incremental = meta.incremental.clone().expect("incremental digest");
    assert_eq!(incremental.chunk_size, CHUNK);
    assert_eq!(incremental.entries(), blob.len().div_ceil(CHUNK));

    // Untampered: every chunk verifies.
    let mut reader =
        AttachmentReader::open(Cursor::new(&blob), &key, StreamParams::for_upload(&meta)).unwrap();
    let (out, err) = read_in_steps(&mut reader, 4096);
    assert!(err.is_none(), "clean stream must verify: {err:?}");
    assert_eq!(out, plaintext);

    // Flip one byte inside chunk 42.
    blob[42 * CHUNK + 1234] ^= 0x01;
    let mut reader =
        AttachmentReader::open(Cursor::new(&blob), &key, StreamParams::for_upload(&meta)).unwrap();
    let (out, err) = read_in_steps(&mut reader, 4096);

    match err {
        Some(CipherError::ChunkMacMismatch { chunk_index }) => assert_eq!(chunk_index, 42),
        other => panic!("expected chunk 42 MAC mismatch, got {other:?}"),
    }
    // Chunks 0..=41 were released, minus the IV and the block held back
    // at the boundary.
    let released = 42 * CHUNK - IV - BLOCK;
    assert_eq!(out.len(), released);
    assert_eq!(out, plaintext[..released]);
}

#[test]
fn read_size_does_not_change_plaintext() {
    let key = fixed_key();
    let plaintext = make_data(300_000);

    for chunk in [None, Some(CHUNK)] {
        let (blob, meta) = encrypt_attachment(&plaintext, &key, chunk).unwrap();
        for step in [1usize, 17, 4096, blob.len()] {
            let mut reader =
                AttachmentReader::open(Cursor::new(&blob), &key, StreamParams::for_upload(&meta))
                    .unwrap();
            let (out, err) = read_in_steps(&mut reader, step);
            assert!(err.is_none(), "step {step} chunk {chunk:?}: {err:?}");
            assert_eq!(out, plaintext, "step {step} chunk {chunk:?}");
        }
    }
}

#[test]
fn file_backed_stream_roundtrip_with_padding() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("attachment.bin");
    let key = fixed_key();
    let plaintext = make_data(123_457);

    let file = std::fs::File::create(&path).unwrap();
    let mut writer = AttachmentWriter::new(file, &key, Some(CHUNK)).unwrap();
    writer.write_all(&plaintext).unwrap();
    write_padding(&mut writer, plaintext.len() as u64).unwrap();
    let (_file, meta) = writer.finish().unwrap();

    let on_disk = std::fs::metadata(&path).unwrap().len();
    assert_eq!(on_disk, meta.ciphertext_len);
    assert_eq!(
        on_disk,
        ciphertext_len(padded_size(plaintext.len() as u64))
    );

    let source = std::io::BufReader::new(std::fs::File::open(&path).unwrap());
    let params = StreamParams::for_upload(&meta).with_plaintext_len(plaintext.len() as u64);
    let mut reader = AttachmentReader::open(source, &key, params).unwrap();
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, plaintext);

    // Rewinding replays the same plaintext.
    reader.rewind().unwrap();
    let mut again = Vec::new();
    reader.read_to_end(&mut again).unwrap();
    assert_eq!(again, plaintext);
}

#[test]
fn truncated_stream_never_verifies() {
    let key = fixed_key();
    let plaintext = make_data(200_000);
    let (blob, meta) = encrypt_attachment(&plaintext, &key, Some(CHUNK)).unwrap();

    for cut in [1usize, BLOCK, 32, CHUNK] {
        let short = &blob[..blob.len() - cut];

        // Caller believes the original length: the source runs dry.
        let mut reader =
            AttachmentReader::open(Cursor::new(short), &key, StreamParams::for_upload(&meta))
                .unwrap();
        let (out, err) = read_in_steps(&mut reader, 8192);
        assert!(err.is_some(), "cut {cut} must fail");
        assert!(out.len() < plaintext.len());

        // Caller is told the short length: layout or digest checks reject it.
        let params = StreamParams::for_upload(&meta);
        let params = StreamParams {
            ciphertext_len: short.len() as u64,
            incremental: None,
            ..params
        };
        assert!(
            AttachmentReader::open(Cursor::new(short), &key, params).is_err(),
            "cut {cut}"
        );
    }
}

#[test]
fn archived_attachment_with_incremental_inner_layer() {
    let inner_key = fixed_key();
    let outer_key = CombinedKeyMaterial::from_bytes([0xa7; 64]);
    let plaintext = make_data(2 * MIB + 5);

    let (inner_blob, inner_meta) =
        encrypt_attachment(&plaintext, &inner_key, Some(CHUNK)).unwrap();
    let (outer_blob, _) = encrypt_attachment(&inner_blob, &outer_key, None).unwrap();

    let mut reader = open_archived(
        Cursor::new(&outer_blob),
        &outer_key,
        outer_blob.len() as u64,
        &inner_key,
        StreamParams::for_upload(&inner_meta),
    )
    .unwrap();
    let (out, err) = read_in_steps(&mut reader, 17 * 1024);
    assert!(err.is_none(), "{err:?}");
    assert_eq!(out, plaintext);
}

proptest::proptest! {
    #![proptest_config(proptest::prelude::ProptestConfig::with_cases(32))]

    #[test]
    fn prop_any_single_bit_flip_is_detected(
        len in 0usize..5000,
        flip_seed in proptest::prelude::any::<usize>(),
        bit in 0u8..8,
        incremental in proptest::prelude::any::<bool>(),
    ) {
        let key = fixed_key();
        let plaintext = make_data(len);
        let chunk = incremental.then_some(1024);
        let (mut blob, meta) = encrypt_attachment(&plaintext, &key, chunk).unwrap();

        let index = flip_seed % blob.len();
        blob[index] ^= 1 << bit;

        let params = StreamParams::for_upload(&meta);
        let outcome = AttachmentReader::open(Cursor::new(&blob), &key, params)
            .and_then(|mut reader| {
                let mut out = Vec::new();
                reader.read_to_end(&mut out)?;
                Ok(out)
            });
        match outcome {
            Ok(_) => proptest::prop_assert!(false, "flip at {} went unnoticed", index),
            Err(err) => proptest::prop_assert!(
                err.is_authentication_failure(),
                "flip at {} surfaced as {:?}",
                index,
                err
            ),
        }
    }
}

fn open_and_read(blob: &[u8], key: &CombinedKeyMaterial, params: StreamParams) -> CipherError {
    let outcome = AttachmentReader::open(Cursor::new(blob), key, params).and_then(|mut reader| {
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    });
    match outcome {
        Ok(_) => panic!("tampered stream decrypted"),
        Err(err) => err,
    }
}

#[test]
fn iv_flip_is_authentication_failure() {
    let key = fixed_key();
    let plaintext = make_data(3000);
    for chunk in [None, Some(1024)] {
        let (blob, meta) = encrypt_attachment(&plaintext, &key, chunk).unwrap();
        for index in 0..IV {
            let mut tampered = blob.clone();
            tampered[index] ^= 0x01;
            let err = open_and_read(&tampered, &key, StreamParams::for_upload(&meta));
            assert!(
                err.is_authentication_failure(),
                "IV byte {index} (chunked: {}) gave {err:?}",
                chunk.is_some()
            );
        }
    }
}

#[test]
fn oversized_incremental_chunk_is_rejected() {
    let key = fixed_key();
    let (blob, meta) = encrypt_attachment(&make_data(100), &key, None).unwrap();
    let params = StreamParams::for_upload(&meta).with_incremental(IncrementalDigest {
        chunk_size: usize::MAX / 2,
        digest: vec![0u8; 32],
    });

    let err = decrypt_attachment(&blob, &key, params).unwrap_err();
    assert!(
        matches!(err, CipherError::IncrementalDigestMismatch(_)),
        "got {err:?}"
    );
}

#[test]
fn chunk_longer_than_small_stream_still_decrypts() {
    let key = fixed_key();
    let plaintext = make_data(100);
    let (blob, meta) = encrypt_attachment(&plaintext, &key, Some(CHUNK)).unwrap();
    assert!(blob.len() < CHUNK);
    assert_eq!(meta.incremental.as_ref().map(|d| d.entries()), Some(1));

    let decrypted = decrypt_attachment(&blob, &key, StreamParams::for_upload(&meta)).unwrap();
    assert_eq!(decrypted, plaintext);
}
