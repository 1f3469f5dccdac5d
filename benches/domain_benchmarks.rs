use criterion::{Criterion, criterion_group, criterion_main};
use ed25519_dalek::SigningKey;
use secrecy::SecretString;
use solana_reward_relayer::domain::{NotificationPayload, RewardPayload, SendRewardRequest};
use solana_reward_relayer::infra::blockchain::decode_signing_key;
use std::hint::black_box;
use validator::Validate;

fn bench_validation(c: &mut Criterion) {
    let request = SendRewardRequest::new(
        "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU",
        "DRpbCBMxVnDK7maPM5tGv6MvB3v1sRMC86PZ8okm21hy",
        1,
        "prize-42",
    );

    c.bench_function("validate_reward_request", |b| {
        b.iter(|| {
            let _ = black_box(&request).validate();
        })
    });
}

fn bench_key_decoding(c: &mut Criterion) {
    let key = SigningKey::from_bytes(&[7u8; 32]);
    let bytes = key.to_keypair_bytes();
    let json = SecretString::from(serde_json::to_string(&bytes.to_vec()).unwrap_or_default());
    let base58 = SecretString::from(bs58::encode(bytes).into_string());

    c.bench_function("decode_signing_key_json", |b| {
        b.iter(|| {
            let _ = decode_signing_key(black_box(&json));
        })
    });
    // Falls through the JSON and base64 decoders first
    c.bench_function("decode_signing_key_base58", |b| {
        b.iter(|| {
            let _ = decode_signing_key(black_box(&base58));
        })
    });
}

fn bench_notification_serialization(c: &mut Criterion) {
    let payload = RewardPayload::new(
        &SendRewardRequest::new("MINT1", "WALLET1", 1, "prize-42"),
        SecretString::from("key"),
    );
    let notification = NotificationPayload::success(6869, &payload, "SIG1");

    c.bench_function("serialize_notification", |b| {
        b.iter(|| {
            let _ = serde_json::to_value(black_box(&notification));
        })
    });
}

criterion_group!(
    benches,
    bench_validation,
    bench_key_decoding,
    bench_notification_serialization
);
criterion_main!(benches);
