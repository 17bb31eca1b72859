use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ed25519_dalek::Signer;
use tzmempool_core::encoding::{self, BLOCK_HASH, ED25519_PUBLIC_KEY, ED25519_SIGNATURE};
use tzmempool_core::{forge, signature, BlockWindow, MessageType, WindowEntry, WindowListener};

const CHAIN: &str = "NetXdQprcVkpaWU";

fn bench_forge_and_digest(c: &mut Criterion) {
    let branch = encoding::encode(&[0x11; 32], &BLOCK_HASH).unwrap();
    let watermark = forge::chain_watermark(CHAIN).unwrap();
    c.bench_function("forge_endorsement_digest", |b| {
        b.iter(|| {
            let bytes = forge::endorsement_bytes(black_box(&branch), black_box(4_000_000)).unwrap();
            forge::signing_digest(&watermark, &bytes)
        })
    });
}

fn bench_verify_ed25519(c: &mut Criterion) {
    let key = ed25519_dalek::SigningKey::from_bytes(&[9; 32]);
    let public_key = encoding::encode(&key.verifying_key().to_bytes(), &ED25519_PUBLIC_KEY).unwrap();
    let digest = [0x42; 32];
    let signature = encoding::encode(&key.sign(&digest).to_bytes(), &ED25519_SIGNATURE).unwrap();

    c.bench_function("verify_ed25519", |b| {
        b.iter(|| signature::verify(black_box(&public_key), black_box(&signature), &digest))
    });

    // A baker resolution pass mostly tries keys that do not match.
    let other = ed25519_dalek::SigningKey::from_bytes(&[10; 32]);
    let other_key = encoding::encode(&other.verifying_key().to_bytes(), &ED25519_PUBLIC_KEY).unwrap();
    c.bench_function("verify_ed25519_mismatch", |b| {
        b.iter(|| signature::verify(black_box(&other_key), black_box(&signature), &digest))
    });
}

struct Discard;

impl WindowListener for Discard {
    type Error = std::convert::Infallible;

    fn on_pop(&mut self, _entry: &WindowEntry) -> Result<(), Self::Error> {
        Ok(())
    }

    fn on_rollback(&mut self, _entry: &WindowEntry, _level: u64) -> Result<(), Self::Error> {
        Ok(())
    }
}

fn bench_window_eviction(c: &mut Criterion) {
    c.bench_function("window_1000_blocks_capacity_60", |b| {
        b.iter(|| {
            let mut window = BlockWindow::new(60).unwrap();
            for level in 0..1000u64 {
                let entry = WindowEntry::new(format!("BL{level}"), level, MessageType::Data);
                window.add(entry, &mut Discard).unwrap();
            }
            window.len()
        })
    });
}

criterion_group!(
    benches,
    bench_forge_and_digest,
    bench_verify_ed25519,
    bench_window_eviction
);
criterion_main!(benches);
