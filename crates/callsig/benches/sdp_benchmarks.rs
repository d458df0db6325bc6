//! SDP bandwidth editor and bitrate computation benchmarks

use callsig::sdp::{apply_limit, remove_limit};
use callsig::stats::{compute_bitrate, StatsSample};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Browser-like description with `sections` media sections
fn sample_sdp(sections: usize) -> String {
    let mut sdp = String::from(
        "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\na=group:BUNDLE 0\r\n",
    );
    for mid in 0..sections {
        sdp.push_str("m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99\r\n");
        sdp.push_str("c=IN IP4 0.0.0.0\r\n");
        sdp.push_str("a=rtcp:9 IN IP4 0.0.0.0\r\n");
        sdp.push_str("a=ice-ufrag:Xk2t\r\na=ice-pwd:9cf4cd1a2b3c4d5e6f7a8b9c0d1e2f3a\r\n");
        sdp.push_str(&format!("a=mid:{}\r\n", mid));
        sdp.push_str("a=sendrecv\r\na=rtcp-mux\r\n");
        for pt in 96..100 {
            sdp.push_str(&format!("a=rtpmap:{} VP8/90000\r\n", pt));
            sdp.push_str(&format!("a=rtcp-fb:{} nack\r\na=rtcp-fb:{} nack pli\r\n", pt, pt));
        }
    }
    sdp
}

fn bench_apply_limit(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_limit");

    for sections in [1usize, 2, 8] {
        let sdp = sample_sdp(sections);
        let limited = apply_limit(&sdp, 2000).unwrap();
        group.throughput(Throughput::Bytes(sdp.len() as u64));

        group.bench_with_input(BenchmarkId::new("insert", sections), &sdp, |b, sdp| {
            b.iter(|| apply_limit(black_box(sdp), black_box(500)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("replace", sections), &limited, |b, sdp| {
            b.iter(|| apply_limit(black_box(sdp), black_box(125)).unwrap())
        });
    }

    group.finish();
}

fn bench_remove_limit(c: &mut Criterion) {
    let limited = apply_limit(&sample_sdp(2), 500).unwrap();
    c.bench_function("remove_limit", |b| b.iter(|| remove_limit(black_box(&limited))));
}

fn bench_compute_bitrate(c: &mut Criterion) {
    let prev = StatsSample {
        id: "outbound-video".to_string(),
        timestamp_ms: 1_000.0,
        bytes_sent: 1_250_000,
        header_bytes_sent: 62_500,
    };
    let now = StatsSample {
        timestamp_ms: 2_000.0,
        bytes_sent: 1_312_500,
        header_bytes_sent: 65_625,
        ..prev.clone()
    };
    c.bench_function("compute_bitrate", |b| {
        b.iter(|| compute_bitrate(black_box(&prev), black_box(&now)).unwrap())
    });
}

criterion_group!(benches, bench_apply_limit, bench_remove_limit, bench_compute_bitrate);
criterion_main!(benches);
