use ctfs_crypto::{base58, decrypt_chunk, encrypt_chunk, SymmetricKey, SymmetricLink};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576, 5242880])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let key = SymmetricKey::random();
    let nonce = key.create_nonce();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_chunk(
                divan::black_box(&key),
                divan::black_box(&nonce),
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576, 5242880])]
fn bench_decrypt_chunk(bencher: divan::Bencher, size: usize) {
    let key = SymmetricKey::random();
    let nonce = key.create_nonce();
    let data = make_data(size);
    let (cipher, auth) = encrypt_chunk(&key, &nonce, &data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            decrypt_chunk(
                divan::black_box(&key),
                divan::black_box(&nonce),
                divan::black_box(&cipher),
                divan::black_box(&auth),
            )
            .unwrap()
        });
}

#[divan::bench]
fn bench_link_target(bencher: divan::Bencher) {
    let from = SymmetricKey::random();
    let link = SymmetricLink::from_pair(&from, &SymmetricKey::random()).unwrap();
    bencher.bench(|| link.target(divan::black_box(&from)).unwrap());
}

#[divan::bench]
fn bench_base58_key(bencher: divan::Bencher) {
    let key = SymmetricKey::random().serialize();
    bencher.bench(|| base58::decode(&base58::encode(divan::black_box(&key))).unwrap());
}

fn main() {
    divan::main();
}
