//! Benchmarks for the response cache.
//!
//! Measures key derivation, hit/miss lookups and inserts.

use criterion::{BenchmarkId, Criterion, Throughput, black_box};
use rand::Rng;
use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};

use dohproxy::cache::{CacheKey, ResponseCache};

fn create_dns_query(query_id: u16, domain: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(512);

    // Header (12 bytes)
    packet.extend_from_slice(&query_id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query
    packet.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    packet.extend_from_slice(&[0x00; 6]);

    for label in domain.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0x00); // Root label

    packet.extend_from_slice(&[0x00, 0x01]); // Type: A
    packet.extend_from_slice(&[0x00, 0x01]); // Class: IN

    packet
}

fn random_domain(rng: &mut impl Rng) -> String {
    let label: String = (0..rng.random_range(3..16))
        .map(|_| rng.random_range(b'a'..=b'z') as char)
        .collect();
    format!("{label}.example.com")
}

fn max_age(secs: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_str(&format!("max-age={secs}")).unwrap());
    headers
}

fn bench_cache(c: &mut Criterion) {
    let mut rng = rand::rng();
    let cache = ResponseCache::new();
    let headers = max_age(3600);

    let queries: Vec<Vec<u8>> = (0..1000u16)
        .map(|id| create_dns_query(id, &random_domain(&mut rng)))
        .collect();
    for query in &queries {
        cache.put(query, query, &headers).unwrap();
    }
    let missing = create_dns_query(0x1234, "not-cached.example.org");

    let mut group = c.benchmark_group("cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function(BenchmarkId::new("key", "sha256"), |b| {
        b.iter(|| CacheKey::from_query(black_box(&queries[0])))
    });

    group.bench_function(BenchmarkId::new("get", "hit"), |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % queries.len();
            cache.get(black_box(&queries[i]))
        })
    });

    group.bench_function(BenchmarkId::new("get", "miss"), |b| {
        b.iter(|| cache.get(black_box(&missing)))
    });

    group.bench_function(BenchmarkId::new("put", "overwrite"), |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % queries.len();
            cache.put(black_box(&queries[i]), &queries[i], &headers)
        })
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_cache(&mut criterion);
    criterion.final_summary();
}
