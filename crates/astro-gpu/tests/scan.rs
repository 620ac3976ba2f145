mod common;

use astro_gpu::{CountBuffer, GpuContext, PrefixScan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn run_scan(ctx: &GpuContext, capacity: u32, values: &[u32]) -> (Vec<u32>, u32) {
    let count = CountBuffer::new(ctx, "Scan Count");
    count.set(ctx, values.len() as u32);
    let scan = PrefixScan::new(ctx, capacity, count.buffer()).unwrap();
    scan.upload(ctx, values).unwrap();

    let mut encoder = ctx.encoder("Scan Test");
    scan.encode(&mut encoder);
    ctx.submit(encoder);

    (
        scan.read_prefix(ctx, values.len()).unwrap(),
        scan.read_total(ctx).unwrap(),
    )
}

fn exclusive(values: &[u32]) -> (Vec<u32>, u32) {
    let mut sum = 0u32;
    let prefix = values
        .iter()
        .map(|&v| {
            let before = sum;
            sum += v;
            before
        })
        .collect();
    (prefix, sum)
}

fn random_values(len: usize, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random_range(0..4)).collect()
}

#[test]
fn test_empty_scan_totals_zero() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let (prefix, total) = run_scan(&ctx, 1024, &[]);
    assert!(prefix.is_empty());
    assert_eq!(total, 0);
}

#[test]
fn test_single_block() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let values = [3, 0, 1, 4, 1, 5, 9, 2, 6];
    let (prefix, total) = run_scan(&ctx, 512, &values);
    assert_eq!(prefix, vec![0, 3, 3, 4, 8, 9, 14, 23, 25]);
    assert_eq!(total, 31);
}

#[test]
fn test_two_levels() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let values = random_values(5_000, 1);
    let (prefix, total) = run_scan(&ctx, 5_000, &values);
    let (expected, expected_total) = exclusive(&values);
    assert_eq!(prefix[0], 0);
    assert_eq!(prefix, expected);
    assert_eq!(total, expected_total);
}

#[test]
fn test_three_levels() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let len = 512 * 512 + 4_321;
    let values = random_values(len, 2);
    let (prefix, total) = run_scan(&ctx, len as u32, &values);
    let (expected, expected_total) = exclusive(&values);
    assert_eq!(prefix, expected);
    assert_eq!(total, expected_total);
}

#[test]
fn test_live_count_below_capacity() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let count = CountBuffer::new(&ctx, "Scan Count");
    let scan = PrefixScan::new(&ctx, 4_096, count.buffer()).unwrap();
    let values = vec![1u32; 4_096];
    scan.upload(&ctx, &values).unwrap();
    count.set(&ctx, 1_000);

    let mut encoder = ctx.encoder("Scan Test");
    scan.encode(&mut encoder);
    ctx.submit(encoder);

    let prefix = scan.read_prefix(&ctx, 4_096).unwrap();
    assert_eq!(scan.read_total(&ctx).unwrap(), 1_000);
    assert_eq!(prefix[999], 999);
    assert!(prefix[1_000..].iter().all(|&v| v == 1));
}

#[test]
fn test_upload_rejects_overflow() {
    let Some(ctx) = common::gpu_context() else {
        return;
    };
    let count = CountBuffer::new(&ctx, "Scan Count");
    let scan = PrefixScan::new(&ctx, 16, count.buffer()).unwrap();
    assert!(scan.upload(&ctx, &[0; 17]).is_err());
}
