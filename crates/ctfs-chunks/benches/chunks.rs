use ctfs_chunks::{sha256, Fragmenter, HashTree};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8)
        .collect()
}

#[divan::bench(args = [65536, 1048576, 5242880])]
fn bench_split(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| Fragmenter::Split.split(divan::black_box(&data)));
}

const ALLOWED_FAILURES: u8 = 10;

#[divan::bench(args = [5, 40, 80])]
fn bench_erasure_encode(bencher: divan::Bencher, n_original: u8) {
    let data = make_data(1024 * 1024);
    let fragmenter = Fragmenter::erasure(n_original, ALLOWED_FAILURES).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(data.len()))
        .bench(|| fragmenter.split(divan::black_box(&data)));
}

#[divan::bench(args = [5, 40])]
fn bench_erasure_recover(bencher: divan::Bencher, n_original: u8) {
    let data = make_data(1024 * 1024);
    let fragmenter = Fragmenter::erasure(n_original, ALLOWED_FAILURES).unwrap();
    let fragments = fragmenter.split(&data);
    bencher
        .with_inputs(|| {
            let mut shares: Vec<_> = fragments.iter().cloned().map(Some).collect();
            for share in shares.iter_mut().take(ALLOWED_FAILURES as usize) {
                *share = None;
            }
            shares
        })
        .bench_values(|shares| fragmenter.recombine(shares, data.len()).unwrap());
}

#[divan::bench(args = [1, 1024, 4096])]
fn bench_hash_tree_build(bencher: divan::Bencher, chunks: u64) {
    let hashes: Vec<[u8; 32]> = (0..chunks).map(|i| sha256(&i.to_be_bytes())).collect();
    bencher.bench(|| HashTree::build(divan::black_box(&hashes)).unwrap());
}

fn main() {
    divan::main();
}
