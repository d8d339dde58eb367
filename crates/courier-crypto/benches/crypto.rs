use std::io::{Cursor, Read, Write};

use courier_crypto::attachment::encrypt_attachment;
use courier_crypto::{
    generate_combined_key, generate_profile_key, AttachmentReader, ProfileCipher, StreamParams,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_attachment(bencher: divan::Bencher, size: usize) {
    let key = generate_combined_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| encrypt_attachment(divan::black_box(&data), &key, None).unwrap());
}

#[divan::bench(args = [65536, 1048576, 8388608])]
fn bench_decrypt_whole_stream(bencher: divan::Bencher, size: usize) {
    let key = generate_combined_key();
    let (blob, meta) = encrypt_attachment(&make_data(size), &key, None).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut reader = AttachmentReader::open(
                Cursor::new(divan::black_box(&blob)),
                &key,
                StreamParams::for_upload(&meta),
            )
            .unwrap();
            let mut out = Vec::with_capacity(size);
            reader.read_to_end(&mut out).unwrap();
            out
        });
}

#[divan::bench(args = [65536, 1048576, 8388608])]
fn bench_decrypt_incremental(bencher: divan::Bencher, size: usize) {
    let key = generate_combined_key();
    let (blob, meta) = encrypt_attachment(&make_data(size), &key, Some(64 * 1024)).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut reader = AttachmentReader::open(
                Cursor::new(divan::black_box(&blob)),
                &key,
                StreamParams::for_upload(&meta),
            )
            .unwrap();
            let mut out = Vec::with_capacity(size);
            reader.read_to_end(&mut out).unwrap();
            out
        });
}

#[divan::bench]
fn bench_profile_about(bencher: divan::Bencher) {
    let cipher = ProfileCipher::new(generate_profile_key());
    let about = "a".repeat(200);
    bencher.bench(|| {
        let sealed = cipher.encrypt_about(divan::black_box(&about)).unwrap();
        cipher.decrypt_string(&sealed).unwrap()
    });
}

#[divan::bench(args = [65536, 1048576])]
fn bench_avatar_stream(bencher: divan::Bencher, size: usize) {
    let cipher = ProfileCipher::new(generate_profile_key());
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let mut writer = cipher.avatar_writer(Vec::with_capacity(size + 28)).unwrap();
            writer.write_all(divan::black_box(&data)).unwrap();
            let sealed = writer.finish().unwrap();

            let mut reader = cipher.avatar_reader(sealed.as_slice()).unwrap();
            let mut out = Vec::with_capacity(size);
            reader.read_to_end(&mut out).unwrap();
            out
        });
}

fn main() {
    divan::main();
}
